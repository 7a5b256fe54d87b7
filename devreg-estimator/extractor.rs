//! ORB feature extraction: oriented FAST keypoints plus steered BRIEF descriptors.

use devreg_brief::BriefGenerator;
use devreg_core::{Descriptor, GrayImage, Keypoint};
use devreg_fast::{DetectorConfig, FastDetector};
use tracing::trace;

use crate::error::{FeatureError, InputError};

/// Keypoints with one descriptor each
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    keypoints: Vec<Keypoint>,
    descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Vec<Descriptor>) -> Result<Self, InputError> {
        if keypoints.len() != descriptors.len() {
            return Err(InputError::DescriptorCountMismatch {
                keypoints: keypoints.len(),
                descriptors: descriptors.len(),
            });
        }
        Ok(Self { keypoints, descriptors })
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Keypoint>, Vec<Descriptor>) {
        (self.keypoints, self.descriptors)
    }
}

/// Built once from a detector configuration and reused for every image
#[derive(Debug, Clone)]
pub struct OrbExtractor {
    detector: FastDetector,
    brief: BriefGenerator,
}

impl OrbExtractor {
    pub fn new(cfg: DetectorConfig) -> Result<Self, FeatureError> {
        let brief = BriefGenerator::new(cfg.core.patch_size)?;
        let detector = FastDetector::new(cfg)?;
        Ok(Self { detector, brief })
    }

    pub fn config(&self) -> &DetectorConfig {
        self.detector.config()
    }

    pub fn extract(&self, img: &GrayImage) -> Result<FeatureSet, FeatureError> {
        let detection = self.detector.detect(img)?;
        if detection.keypoints.is_empty() {
            return Err(FeatureError::NoKeypoints);
        }

        let descriptors = self.brief.generate_descriptors(&detection.pyramid, &detection.keypoints)?;
        if descriptors.is_empty() {
            return Err(FeatureError::NoDescriptors);
        }
        trace!(
            keypoints = detection.keypoints.len(),
            levels = detection.pyramid.len(),
            "extracted ORB features"
        );

        Ok(FeatureSet {
            keypoints: detection.keypoints,
            descriptors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devreg_core::OrbConfig;
    use devreg_fast::FastError;

    fn config() -> DetectorConfig {
        DetectorConfig::new(OrbConfig {
            max_features: 150,
            scale_factor: 1.2,
            n_levels: 3,
            threshold: 20,
            patch_size: 31,
            n_threads: 1,
        })
    }

    /// Bright squares of varying size on a dark background
    fn textured_image(width: usize, height: usize) -> GrayImage {
        let mut img = GrayImage::filled(width, height, 40).unwrap();
        for y in 0..height {
            for x in 0..width {
                let cell = (x / 20) + 7 * (y / 20);
                let side = 6 + cell % 7;
                if x % 20 < side && y % 20 < side {
                    img.set(x, y, 200);
                }
            }
        }
        img
    }

    #[test]
    fn test_feature_set_counts_must_match() {
        let err = FeatureSet::new(vec![Keypoint::new(1.0, 1.0)], vec![]).unwrap_err();
        assert_eq!(err, InputError::DescriptorCountMismatch { keypoints: 1, descriptors: 0 });
    }

    #[test]
    fn test_extract_textured_image() {
        let extractor = OrbExtractor::new(config()).unwrap();
        let features = extractor.extract(&textured_image(200, 160)).unwrap();
        assert!(!features.is_empty());
        assert!(features.len() <= 150);
        assert_eq!(features.keypoints().len(), features.descriptors().len());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = OrbExtractor::new(config()).unwrap();
        let img = textured_image(200, 160);
        assert_eq!(extractor.extract(&img).unwrap(), extractor.extract(&img).unwrap());
    }

    #[test]
    fn test_flat_image_has_no_keypoints() {
        let extractor = OrbExtractor::new(config()).unwrap();
        let img = GrayImage::filled(200, 160, 128).unwrap();
        assert_eq!(extractor.extract(&img), Err(FeatureError::NoKeypoints));
    }

    #[test]
    fn test_tiny_image_is_a_detector_error() {
        let extractor = OrbExtractor::new(config()).unwrap();
        let img = GrayImage::filled(20, 20, 0).unwrap();
        assert!(matches!(
            extractor.extract(&img),
            Err(FeatureError::Detector(FastError::ImageTooSmall { .. }))
        ));
    }
}
