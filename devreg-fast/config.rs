use devreg_core::OrbConfig;
use crate::error::{FastError, FastResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Complete detector configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorConfig {
    /// Core ORB configuration
    pub core: OrbConfig,
    /// Minimum distance between surviving corners on one level
    pub nms_distance: f32,
    /// Metadata
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub description: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::new(OrbConfig::default())
    }
}

impl DetectorConfig {
    pub fn new(core: OrbConfig) -> Self {
        Self {
            core,
            nms_distance: 3.0,
            name: None,
            description: None,
        }
    }

    /// Fewer levels and features, higher threshold
    pub fn fast_preset() -> Self {
        Self {
            core: OrbConfig {
                max_features: 300,
                scale_factor: 1.3,
                n_levels: 4,
                threshold: 30,
                patch_size: 31,
                n_threads: num_cpus::get().max(1),
            },
            nms_distance: 5.0,
            name: Some("Fast".to_string()),
            description: Some("Coarse pyramid with a small feature budget".to_string()),
        }
    }

    /// Dense pyramid and a low threshold for weakly textured scenes
    pub fn quality_preset() -> Self {
        Self {
            core: OrbConfig {
                max_features: 1500,
                scale_factor: 1.2,
                n_levels: 8,
                threshold: 12,
                patch_size: 31,
                n_threads: num_cpus::get().max(1),
            },
            nms_distance: 2.0,
            name: Some("Quality".to_string()),
            description: Some("Dense pyramid for weakly textured scenes".to_string()),
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.core.threshold = threshold;
        self
    }

    pub fn with_nms_distance(mut self, distance: f32) -> Self {
        self.nms_distance = distance;
        self
    }

    /// Pixels kept clear at every level edge so orientation and descriptor patches fit
    pub fn border(&self) -> usize {
        self.core.patch_size / 2 + 1
    }

    /// Smallest level side the detector will process
    pub fn min_level_size(&self) -> usize {
        2 * self.border() + 1
    }

    /// Generate human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "DetectorConfig: features={}, levels={}, scale={:.2}, threshold={}, patch={}, nms={:.1}",
            self.core.max_features,
            self.core.n_levels,
            self.core.scale_factor,
            self.core.threshold,
            self.core.patch_size,
            self.nms_distance
        )
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> FastResult<()> {
        if self.core.threshold == 0 || self.core.threshold > 127 {
            return Err(FastError::InvalidThreshold(self.core.threshold));
        }
        if self.core.patch_size % 2 == 0 || self.core.patch_size < 7 {
            return Err(FastError::InvalidPatchSize {
                patch_size: self.core.patch_size,
                min_image_dim: 0,
            });
        }
        if !self.core.scale_factor.is_finite() || self.core.scale_factor <= 1.0 {
            return Err(FastError::InvalidScaleFactor(self.core.scale_factor));
        }
        if self.core.n_levels == 0 || self.core.n_levels > 32 {
            return Err(FastError::InvalidLevelCount(self.core.n_levels));
        }
        if self.core.max_features == 0 {
            return Err(FastError::InvalidFeatureBudget(self.core.max_features));
        }
        Ok(())
    }

    /// Save configuration to JSON file
    #[cfg(feature = "serde")]
    pub fn save_json<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load configuration from JSON file
    #[cfg(feature = "serde")]
    pub fn load_json<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Serialize to JSON string
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML string
    #[cfg(feature = "serde")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Deserialize from TOML string
    #[cfg(feature = "serde")]
    pub fn from_toml(toml_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }
}
