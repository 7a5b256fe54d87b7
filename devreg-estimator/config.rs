use std::path::Path;
use std::time::Duration;

use devreg_core::OrbConfig;
use devreg_fast::DetectorConfig;

use crate::depth::DepthResolver;
use crate::error::ConfigError;
use crate::gate::{GateThresholds, ReprojectionAveraging};
use crate::pnp::PnpParams;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Every tunable of the registration pipeline.
///
/// Serialized names are camelCase (`pnpReprojectionErrorPx`, `orbMaxPoints`, ...);
/// missing keys fall back to the defaults below.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct EstimatorConfig {
    /// RANSAC inlier threshold, pixels
    pub pnp_reprojection_error_px: f64,
    /// RANSAC confidence in (0, 1)
    pub pnp_confidence: f64,
    /// RANSAC iteration cap
    pub pnp_iterations: usize,
    /// Maximum Hamming distance of a kept match
    pub matching_threshold: u32,
    /// Mean reprojection error above which an estimate is discarded, pixels
    pub reprojection_error_discard_threshold: f64,
    pub orb_max_points: usize,
    pub orb_scale_factor: f32,
    pub orb_levels_number: usize,
    pub orb_fast_threshold: u8,
    pub orb_patch_size: usize,
    pub phone_orientation_difference_threshold_deg: f64,
    pub minimum_matches_number: usize,
    pub measurement_noise_variance: f64,
    pub process_noise_variance_factor: f64,
    /// Feed accepted registrations through the Kalman smoother
    pub enable_smoothing: bool,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub min_pose_height: Option<f64>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub max_pose_height: Option<f64>,
    /// Frames older than this (relative to the processing time) are dropped
    pub max_frame_age_sec: f64,
    /// Registry forgets devices silent for longer than this
    pub device_timeout_sec: f64,
    pub ransac_seed: u64,
    pub reprojection_averaging: ReprojectionAveraging,
    pub depth_search_radius: usize,
    pub depth_ring_width: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            pnp_reprojection_error_px: 5.0,
            pnp_confidence: 0.99,
            pnp_iterations: 1000,
            matching_threshold: 25,
            reprojection_error_discard_threshold: 5.0,
            orb_max_points: 500,
            orb_scale_factor: 1.2,
            orb_levels_number: 8,
            orb_fast_threshold: 20,
            orb_patch_size: 31,
            phone_orientation_difference_threshold_deg: 45.0,
            minimum_matches_number: 4,
            measurement_noise_variance: 1.0,
            process_noise_variance_factor: 1.0,
            enable_smoothing: true,
            min_pose_height: None,
            max_pose_height: None,
            max_frame_age_sec: 5.0,
            device_timeout_sec: 5.0,
            ransac_seed: 0,
            reprojection_averaging: ReprojectionAveraging::AllCorrespondences,
            depth_search_radius: DepthResolver::DEFAULT_SEARCH_RADIUS,
            depth_ring_width: DepthResolver::DEFAULT_RING_WIDTH,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.into() }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl EstimatorConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.pnp_reprojection_error_px.is_finite() && self.pnp_reprojection_error_px > 0.0) {
            return Err(invalid("pnpReprojectionErrorPx", "must be finite and > 0"));
        }
        if !(self.pnp_confidence > 0.0 && self.pnp_confidence < 1.0) {
            return Err(invalid("pnpConfidence", "must lie in (0, 1)"));
        }
        if self.pnp_iterations == 0 {
            return Err(invalid("pnpIterations", "must be > 0"));
        }
        if self.matching_threshold > 256 {
            return Err(invalid("matchingThreshold", "descriptors have 256 bits"));
        }
        if !(self.reprojection_error_discard_threshold.is_finite() && self.reprojection_error_discard_threshold >= 0.0) {
            return Err(invalid("reprojectionErrorDiscardThreshold", "must be finite and >= 0"));
        }
        if !(0.0..=180.0).contains(&self.phone_orientation_difference_threshold_deg) {
            return Err(invalid("phoneOrientationDifferenceThresholdDeg", "must lie in [0, 180]"));
        }
        if !(self.measurement_noise_variance.is_finite() && self.measurement_noise_variance > 0.0) {
            return Err(invalid("measurementNoiseVariance", "must be finite and > 0"));
        }
        if !(self.process_noise_variance_factor.is_finite() && self.process_noise_variance_factor > 0.0) {
            return Err(invalid("processNoiseVarianceFactor", "must be finite and > 0"));
        }
        if let (Some(min), Some(max)) = (self.min_pose_height, self.max_pose_height) {
            if min > max {
                return Err(invalid("minPoseHeight", format!("{} exceeds maxPoseHeight {}", min, max)));
            }
        }
        if !(self.max_frame_age_sec.is_finite() && self.max_frame_age_sec >= 0.0) {
            return Err(invalid("maxFrameAgeSec", "must be finite and >= 0"));
        }
        if !(self.device_timeout_sec.is_finite() && self.device_timeout_sec >= 0.0) {
            return Err(invalid("deviceTimeoutSec", "must be finite and >= 0"));
        }
        if self.depth_search_radius == 0 {
            return Err(invalid("depthSearchRadius", "must be > 0"));
        }
        self.detector_config()
            .validate()
            .map_err(|e| invalid("orb", e.to_string()))?;
        Ok(())
    }

    /// ORB detector settings for the feature extractor
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig::new(OrbConfig {
            max_features: self.orb_max_points,
            scale_factor: self.orb_scale_factor,
            n_levels: self.orb_levels_number,
            threshold: self.orb_fast_threshold,
            patch_size: self.orb_patch_size,
            ..OrbConfig::default()
        })
    }

    pub fn pnp_params(&self) -> PnpParams {
        PnpParams {
            reprojection_error_px: self.pnp_reprojection_error_px,
            confidence: self.pnp_confidence,
            max_iterations: self.pnp_iterations,
            seed: self.ransac_seed,
        }
    }

    pub fn gate_thresholds(&self) -> GateThresholds {
        GateThresholds {
            minimum_matches: self.minimum_matches_number,
            max_reprojection_error: self.reprojection_error_discard_threshold,
            max_orientation_deg: self.phone_orientation_difference_threshold_deg,
            min_height: self.min_pose_height,
            max_height: self.max_pose_height,
            averaging: self.reprojection_averaging,
        }
    }

    pub fn depth_resolver(&self) -> DepthResolver {
        DepthResolver::new(self.depth_search_radius, self.depth_ring_width)
    }

    pub fn max_frame_age(&self) -> Duration {
        secs(self.max_frame_age_sec)
    }

    pub fn device_timeout(&self) -> Duration {
        secs(self.device_timeout_sec)
    }

    /// Generate human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "EstimatorConfig: pnp(err={:.1}px, conf={:.3}, iters={}), match<={}, discard>{:.1}px, orb({}, {:.2}, {}), orient<={:.0}deg, minMatches={}, kalman(R={}, Q={})",
            self.pnp_reprojection_error_px,
            self.pnp_confidence,
            self.pnp_iterations,
            self.matching_threshold,
            self.reprojection_error_discard_threshold,
            self.orb_max_points,
            self.orb_scale_factor,
            self.orb_levels_number,
            self.phone_orientation_difference_threshold_deg,
            self.minimum_matches_number,
            self.measurement_noise_variance,
            self.process_noise_variance_factor
        )
    }

    /// Serialize to JSON string
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Deserialize from JSON string
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML string
    #[cfg(feature = "serde")]
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Deserialize from TOML string
    #[cfg(feature = "serde")]
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON file
    #[cfg(feature = "serde")]
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Load configuration from TOML file
    #[cfg(feature = "serde")]
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Load by file extension (`.json` or `.toml`)
    #[cfg(feature = "serde")]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::load_json(path),
            Some("toml") => Self::load_toml(path),
            other => Err(ConfigError::UnsupportedFormat(other.unwrap_or("").to_string())),
        }
    }

    /// Save configuration to JSON file
    #[cfg(feature = "serde")]
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = EstimatorConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.pnp_iterations, 1000);
        assert_eq!(cfg.matching_threshold, 25);
        assert_eq!(cfg.max_frame_age(), Duration::from_secs(5));
        assert_eq!(cfg.detector_config().core.max_features, 500);
    }

    #[test]
    fn test_invalid_values() {
        let cfg = EstimatorConfig { pnp_confidence: 1.0, ..EstimatorConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { field: "pnpConfidence", .. })));

        let cfg = EstimatorConfig { orb_scale_factor: 1.0, ..EstimatorConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { field: "orb", .. })));

        let cfg = EstimatorConfig {
            min_pose_height: Some(2.0),
            max_pose_height: Some(1.0),
            ..EstimatorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_uses_camel_case_names() {
        let json = EstimatorConfig::default().to_json().unwrap();
        for key in [
            "pnpReprojectionErrorPx",
            "pnpConfidence",
            "pnpIterations",
            "matchingThreshold",
            "reprojectionErrorDiscardThreshold",
            "orbMaxPoints",
            "orbScaleFactor",
            "orbLevelsNumber",
            "phoneOrientationDifferenceThresholdDeg",
            "minimumMatchesNumber",
            "measurementNoiseVariance",
            "processNoiseVarianceFactor",
        ] {
            assert!(json.contains(key), "missing {}", key);
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_json_and_toml_round_trip() {
        let cfg = EstimatorConfig::from_json(r#"{ "matchingThreshold": 40, "maxPoseHeight": 2.5 }"#).unwrap();
        assert_eq!(cfg.matching_threshold, 40);
        assert_eq!(cfg.max_pose_height, Some(2.5));
        assert_eq!(cfg.pnp_iterations, 1000);

        let text = cfg.to_toml().unwrap();
        assert!(text.contains("matchingThreshold = 40"));
        assert_eq!(EstimatorConfig::from_toml(&text).unwrap(), cfg);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estimator.json");
        let cfg = EstimatorConfig { pnp_iterations: 200, ..EstimatorConfig::default() };
        cfg.save_json(&path).unwrap();
        assert_eq!(EstimatorConfig::load(&path).unwrap(), cfg);
        assert!(matches!(
            EstimatorConfig::load(dir.path().join("estimator.yaml")),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
