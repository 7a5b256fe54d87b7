//! Multi-scale oriented FAST detection.
//!
//! A [`FastDetector`] builds a scale pyramid, runs the FAST-9 segment test on
//! every level, suppresses non-maxima, keeps the strongest corners per level
//! and assigns intensity-centroid orientations. Keypoints are reported in
//! base-image pixels; the pyramid is returned alongside so descriptors can be
//! sampled on the level a keypoint was found on.

mod corner_detection;
mod refinement;
mod types;
mod utils;

pub mod config;
pub mod detector;
pub mod error;
pub mod pyramid;

pub use config::DetectorConfig;
pub use corner_detection::{CornerDetector, FAST_ARC_LENGTH};
pub use detector::{Detection, FastDetector};
pub use error::{FastError, FastResult};
pub use pyramid::ImagePyramid;
pub use refinement::KeypointRefinement;
pub use types::{ScaleLevel, ScoredKeypoint};
pub use utils::has_consecutive_bits;

#[cfg(test)]
mod tests {
    use super::*;
    use devreg_core::{GrayImage, Keypoint, OrbConfig};

    fn create_test_config() -> DetectorConfig {
        DetectorConfig::new(OrbConfig {
            max_features: 200,
            scale_factor: 1.2,
            n_levels: 4,
            threshold: 20,
            patch_size: 15,
            n_threads: 1,
        })
    }

    /// Grid of 8px bright squares on a dark background, 24px apart
    fn create_blob_grid_image(width: usize, height: usize) -> GrayImage {
        let mut img = GrayImage::filled(width, height, 45).unwrap();
        for y in 0..height {
            for x in 0..width {
                if (x % 24) >= 8 && (x % 24) < 16 && (y % 24) >= 8 && (y % 24) < 16 {
                    img.set(x, y, 210);
                }
            }
        }
        img
    }

    fn create_corner_image(width: usize, height: usize) -> GrayImage {
        let mut img = GrayImage::filled(width, height, 50).unwrap();
        let (cx, cy) = (width / 2, height / 2);
        for y in cy - 6..=cy + 6 {
            for x in cx - 6..=cx + 6 {
                img.set(x, y, 255);
            }
        }
        img
    }

    #[test]
    fn test_valid_constructor() {
        assert!(FastDetector::new(create_test_config()).is_ok());
    }

    #[test]
    fn test_invalid_threshold() {
        let result = FastDetector::new(create_test_config().with_threshold(0));
        assert!(matches!(result, Err(FastError::InvalidThreshold(0))));

        let result = FastDetector::new(create_test_config().with_threshold(200));
        assert!(matches!(result, Err(FastError::InvalidThreshold(200))));
    }

    #[test]
    fn test_even_patch_size() {
        let mut cfg = create_test_config();
        cfg.core.patch_size = 16;
        assert!(matches!(FastDetector::new(cfg), Err(FastError::InvalidPatchSize { .. })));
    }

    #[test]
    fn test_image_too_small() {
        let detector = FastDetector::new(create_test_config()).unwrap();
        let img = GrayImage::filled(10, 10, 128).unwrap();
        assert!(matches!(detector.detect(&img), Err(FastError::ImageTooSmall { .. })));
    }

    #[test]
    fn test_uniform_image_no_keypoints() {
        let detector = FastDetector::new(create_test_config()).unwrap();
        let img = GrayImage::filled(100, 100, 128).unwrap();
        assert!(detector.detect_keypoints(&img).unwrap().is_empty());
    }

    #[test]
    fn test_corner_detection() {
        let detector = FastDetector::new(create_test_config()).unwrap();
        let img = create_corner_image(100, 100);
        let kps = detector.detect_keypoints(&img).unwrap();
        assert!(!kps.is_empty());
        for kp in &kps {
            assert!((kp.x - 50.0).abs() <= 10.0 && (kp.y - 50.0).abs() <= 10.0);
            assert!(kp.angle.is_finite());
            assert!(kp.response > 0.0);
        }
    }

    #[test]
    fn test_budget_and_levels() {
        let detector = FastDetector::new(create_test_config()).unwrap();
        let img = create_blob_grid_image(160, 128);
        let detection = detector.detect(&img).unwrap();
        assert_eq!(detection.pyramid.len(), 4);
        assert!(detection.keypoints.len() <= 200);
        assert!(detection.keypoints.iter().any(|kp| kp.octave > 0));
        for kp in &detection.keypoints {
            let scale = detection.pyramid[kp.octave as usize].scale;
            assert!((kp.size - 15.0 * scale).abs() < 1e-3);
            assert!(kp.x >= 0.0 && kp.x < 160.0 && kp.y >= 0.0 && kp.y < 128.0);
        }
    }

    #[test]
    fn test_nms_distance_spreads_keypoints() {
        let img = create_blob_grid_image(160, 128);
        let level0 = |cfg: DetectorConfig| -> Vec<Keypoint> {
            let detector = FastDetector::new(cfg).unwrap();
            detector.detect_keypoints(&img).unwrap().into_iter().filter(|kp| kp.octave == 0).collect()
        };
        let narrow = level0(create_test_config().with_nms_distance(3.0));
        let wide = level0(create_test_config().with_nms_distance(30.0));
        assert!(!wide.is_empty());
        assert!(wide.len() < narrow.len());
        for (i, a) in wide.iter().enumerate() {
            for b in &wide[i + 1..] {
                assert!((a.x - b.x).hypot(a.y - b.y) >= 30.0 - 1e-3);
            }
        }
    }

    #[test]
    fn test_detection_is_deterministic() {
        let detector = FastDetector::new(create_test_config()).unwrap();
        let img = create_blob_grid_image(160, 128);
        let a = detector.detect_keypoints(&img).unwrap();
        let b = detector.detect_keypoints(&img).unwrap();
        assert_eq!(a, b);
    }
}
