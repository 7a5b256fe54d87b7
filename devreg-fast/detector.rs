use devreg_core::{GrayImage, Keypoint, PyramidLevel};
use crate::config::DetectorConfig;
use crate::corner_detection::CornerDetector;
use crate::error::{FastError, FastResult};
use crate::pyramid::ImagePyramid;
use crate::refinement::KeypointRefinement;
use crate::types::ScaleLevel;

/// Keypoints in level-0 pixels together with the pyramid they were found on
#[derive(Debug, Clone)]
pub struct Detection {
    pub keypoints: Vec<Keypoint>,
    pub pyramid: Vec<PyramidLevel>,
}

/// Multi-scale oriented FAST detector
#[derive(Debug, Clone)]
pub struct FastDetector {
    cfg: DetectorConfig,
}

impl FastDetector {
    /// Creates a new FAST detector with validation
    pub fn new(cfg: DetectorConfig) -> FastResult<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    fn validate_image(&self, img: &GrayImage) -> FastResult<()> {
        let (width, height) = img.dimensions();
        let min_size = self.cfg.min_level_size();
        if width < min_size || height < min_size {
            return Err(FastError::ImageTooSmall { width, height, min_size });
        }
        Ok(())
    }

    /// Scale levels this detector would use for an image of the given size
    pub fn scale_levels(&self, width: usize, height: usize) -> FastResult<Vec<ScaleLevel>> {
        let core = &self.cfg.core;
        ImagePyramid::generate_scale_levels(
            width,
            height,
            core.scale_factor,
            core.n_levels,
            core.max_features,
            self.cfg.min_level_size(),
        )
    }

    /// Detects keypoints over the whole pyramid.
    ///
    /// Per level: FAST-9, NMS, strongest `budget` kept, orientation, then
    /// coordinates scaled back to the base image. Output is ordered by level
    /// and by decreasing response within a level.
    pub fn detect(&self, img: &GrayImage) -> FastResult<Detection> {
        self.validate_image(img)?;
        let (width, height) = img.dimensions();
        let levels = self.scale_levels(width, height)?;
        let pyramid = ImagePyramid::build_image_pyramid(img, &levels)?;

        let mut keypoints = Vec::with_capacity(self.cfg.core.max_features);
        for (scale_level, level) in levels.iter().zip(pyramid.iter()) {
            keypoints.extend(self.detect_on_level(&level.image, scale_level));
        }

        Ok(Detection { keypoints, pyramid })
    }

    /// Level-0 keypoints only; the pyramid is discarded
    pub fn detect_keypoints(&self, img: &GrayImage) -> FastResult<Vec<Keypoint>> {
        Ok(self.detect(img)?.keypoints)
    }

    fn detect_on_level(&self, img: &GrayImage, scale_level: &ScaleLevel) -> Vec<Keypoint> {
        let core = &self.cfg.core;
        let raw = CornerDetector::detect_keypoints_at_scale(img, scale_level, core.threshold, self.cfg.border());
        let mut kept = KeypointRefinement::non_maximum_suppression(&raw, self.cfg.nms_distance);
        kept.truncate(scale_level.budget);

        kept.into_iter()
            .map(|sk| {
                let mut kp = sk.keypoint;
                kp.angle = KeypointRefinement::compute_orientation(img, kp.x as usize, kp.y as usize, core.patch_size);
                kp.x *= scale_level.scale;
                kp.y *= scale_level.scale;
                kp.size = core.patch_size as f32 * scale_level.scale;
                kp
            })
            .collect()
    }

    /// Get detector configuration
    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }
}
