use devreg_core::{GrayImage, Keypoint};
use rayon::prelude::*;
use crate::types::{CornerType, ScaleLevel, ScoredKeypoint};
use crate::utils::has_consecutive_bits;

/// Minimum contiguous arc for a FAST-9 corner
pub const FAST_ARC_LENGTH: usize = 9;

/// FAST segment-test corner detection
pub struct CornerDetector;

impl CornerDetector {
    /// Bresenham circle of radius 3, clockwise from 12 o'clock
    pub const FAST_OFFSETS: [(i32, i32); 16] = [
        (0, -3), (1, -3), (2, -2), (3, -1),
        (3, 0), (3, 1), (2, 2), (1, 3),
        (0, 3), (-1, 3), (-2, 2), (-3, 1),
        (-3, 0), (-3, -1), (-2, -2), (-1, -3),
    ];

    /// Detect FAST-9 corners on one pyramid level, rows in parallel.
    ///
    /// Only pixels at least `border` away from every edge are tested; returned
    /// coordinates are in level pixels with `octave` set to the level index.
    pub fn detect_keypoints_at_scale(
        img: &GrayImage,
        scale_level: &ScaleLevel,
        threshold: u8,
        border: usize,
    ) -> Vec<ScoredKeypoint> {
        let (width, height) = img.dimensions();
        let border = border.max(3);
        if width <= 2 * border || height <= 2 * border {
            return Vec::new();
        }

        (border..height - border)
            .into_par_iter()
            .flat_map_iter(|y| {
                let mut row_keypoints = Vec::new();
                for x in border..width - border {
                    if let Some(response) = Self::segment_test(img, x, y, threshold) {
                        let mut keypoint = Keypoint::new(x as f32, y as f32);
                        keypoint.octave = scale_level.level as i32;
                        keypoint.response = response;
                        row_keypoints.push(ScoredKeypoint { keypoint, response });
                    }
                }
                row_keypoints
            })
            .collect()
    }

    #[inline]
    fn classify(pixel: i32, center: i32, threshold: i32) -> CornerType {
        if pixel > center + threshold {
            CornerType::Bright
        } else if pixel < center - threshold {
            CornerType::Dark
        } else {
            CornerType::None
        }
    }

    /// Returns the corner score when (x, y) passes the FAST-9 test.
    /// Caller guarantees a 3-pixel margin around (x, y).
    pub fn segment_test(img: &GrayImage, x: usize, y: usize, threshold: u8) -> Option<f32> {
        let center = img.get(x, y) as i32;
        let t = threshold as i32;

        let sample = |i: usize| {
            let (dx, dy) = Self::FAST_OFFSETS[i];
            img.get((x as i32 + dx) as usize, (y as i32 + dy) as usize) as i32
        };

        // A 9-arc always covers at least two of the four compass pixels
        let compass = [0usize, 4, 8, 12].map(|i| Self::classify(sample(i), center, t));
        let bright_compass = compass.iter().filter(|c| **c == CornerType::Bright).count();
        let dark_compass = compass.iter().filter(|c| **c == CornerType::Dark).count();
        if bright_compass < 2 && dark_compass < 2 {
            return None;
        }

        let mut bright_mask = 0u16;
        let mut dark_mask = 0u16;
        let mut bright_score = 0i32;
        let mut dark_score = 0i32;
        for i in 0..16 {
            let pixel = sample(i);
            match Self::classify(pixel, center, t) {
                CornerType::Bright => {
                    bright_mask |= 1 << i;
                    bright_score += pixel - center - t;
                }
                CornerType::Dark => {
                    dark_mask |= 1 << i;
                    dark_score += center - pixel - t;
                }
                CornerType::None => {}
            }
        }

        let bright = has_consecutive_bits(bright_mask, FAST_ARC_LENGTH);
        let dark = has_consecutive_bits(dark_mask, FAST_ARC_LENGTH);
        match (bright, dark) {
            (true, _) if !dark || bright_score >= dark_score => Some(bright_score as f32),
            (_, true) => Some(dark_score as f32),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level0(width: usize, height: usize) -> ScaleLevel {
        ScaleLevel { level: 0, scale: 1.0, width, height, budget: 100 }
    }

    /// Dark background with a bright square whose corners are FAST corners
    fn create_square_image(width: usize, height: usize) -> GrayImage {
        let mut img = GrayImage::filled(width, height, 40).unwrap();
        for y in height / 3..2 * height / 3 {
            for x in width / 3..2 * width / 3 {
                img.set(x, y, 220);
            }
        }
        img
    }

    #[test]
    fn test_uniform_image_has_no_corners() {
        let img = GrayImage::filled(40, 40, 128).unwrap();
        assert!(CornerDetector::detect_keypoints_at_scale(&img, &level0(40, 40), 20, 3).is_empty());
    }

    #[test]
    fn test_square_corner_detected() {
        let img = create_square_image(60, 60);
        let kps = CornerDetector::detect_keypoints_at_scale(&img, &level0(60, 60), 20, 3);
        assert!(!kps.is_empty());
        // Every response lies near one of the four square corners
        let corners = [(20.0, 20.0), (39.0, 20.0), (20.0, 39.0), (39.0, 39.0)];
        for kp in &kps {
            let near = corners
                .iter()
                .any(|(cx, cy)| (kp.keypoint.x - cx).abs() <= 3.0 && (kp.keypoint.y - cy).abs() <= 3.0);
            assert!(near, "unexpected corner at ({}, {})", kp.keypoint.x, kp.keypoint.y);
            assert!(kp.response > 0.0);
        }
    }

    #[test]
    fn test_straight_edge_is_not_a_corner() {
        let mut img = GrayImage::filled(40, 40, 40).unwrap();
        for y in 0..40 {
            for x in 20..40 {
                img.set(x, y, 220);
            }
        }
        assert!(CornerDetector::segment_test(&img, 20, 20, 20).is_none());
        assert!(CornerDetector::segment_test(&img, 19, 20, 20).is_none());
    }

    #[test]
    fn test_border_is_respected() {
        let img = create_square_image(60, 60);
        let kps = CornerDetector::detect_keypoints_at_scale(&img, &level0(60, 60), 20, 25);
        assert!(kps.is_empty());
    }
}
