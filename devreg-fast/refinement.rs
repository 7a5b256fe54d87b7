use devreg_core::GrayImage;
use crate::types::ScoredKeypoint;

/// Orientation and suppression passes over raw FAST responses
pub struct KeypointRefinement;

impl KeypointRefinement {
    /// Intensity-centroid orientation over a circular patch of diameter `patch_size`.
    ///
    /// Returns radians in (-pi, pi]; 0 when the patch does not fit or is flat.
    pub fn compute_orientation(img: &GrayImage, x: usize, y: usize, patch_size: usize) -> f32 {
        let half = (patch_size / 2) as i32;
        let (cx, cy) = (x as i32, y as i32);
        let (width, height) = img.dimensions();

        if cx - half < 0 || cy - half < 0 || cx + half >= width as i32 || cy + half >= height as i32 {
            return 0.0;
        }

        let radius_sq = half * half;
        let mut m10 = 0i64;
        let mut m01 = 0i64;

        for dy in -half..=half {
            let yy = (cy + dy) as usize;
            for dx in -half..=half {
                if dx * dx + dy * dy > radius_sq {
                    continue;
                }
                let val = img.get((cx + dx) as usize, yy) as i64;
                m10 += dx as i64 * val;
                m01 += dy as i64 * val;
            }
        }

        if m10 == 0 && m01 == 0 {
            0.0
        } else {
            (m01 as f32).atan2(m10 as f32)
        }
    }

    /// Greedy non-maximum suppression: strongest first, drop anything closer
    /// than `min_distance` to an accepted keypoint. Ties keep scan order.
    pub fn non_maximum_suppression(keypoints: &[ScoredKeypoint], min_distance: f32) -> Vec<ScoredKeypoint> {
        if keypoints.is_empty() {
            return Vec::new();
        }

        let mut sorted_keypoints = keypoints.to_vec();
        sorted_keypoints.sort_by(|a, b| {
            b.response
                .partial_cmp(&a.response)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.keypoint.y.total_cmp(&b.keypoint.y))
                .then(a.keypoint.x.total_cmp(&b.keypoint.x))
        });

        let mut suppressed: Vec<ScoredKeypoint> = Vec::new();
        let min_distance_sq = min_distance * min_distance;

        for candidate in sorted_keypoints {
            let is_local_max = suppressed.iter().all(|existing| {
                let dx = candidate.keypoint.x - existing.keypoint.x;
                let dy = candidate.keypoint.y - existing.keypoint.y;
                dx * dx + dy * dy >= min_distance_sq
            });

            if is_local_max {
                suppressed.push(candidate);
            }
        }

        suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devreg_core::Keypoint;

    fn scored(x: f32, y: f32, response: f32) -> ScoredKeypoint {
        ScoredKeypoint { keypoint: Keypoint::new(x, y), response }
    }

    #[test]
    fn test_orientation_points_to_bright_side() {
        // Brightness increases to the right: centroid lies on +x, angle ~ 0
        let mut img = GrayImage::filled(41, 41, 0).unwrap();
        for y in 0..41 {
            for x in 21..41 {
                img.set(x, y, 200);
            }
        }
        let angle = KeypointRefinement::compute_orientation(&img, 20, 20, 31);
        assert!(angle.abs() < 1e-3);

        // Brightness below the centre: angle ~ +pi/2 (image y grows downward)
        let mut img = GrayImage::filled(41, 41, 0).unwrap();
        for y in 21..41 {
            for x in 0..41 {
                img.set(x, y, 200);
            }
        }
        let angle = KeypointRefinement::compute_orientation(&img, 20, 20, 31);
        assert!((angle - std::f32::consts::FRAC_PI_2).abs() < 1e-3);
    }

    #[test]
    fn test_orientation_patch_outside_image() {
        let img = GrayImage::filled(20, 20, 90).unwrap();
        assert_eq!(KeypointRefinement::compute_orientation(&img, 2, 2, 31), 0.0);
    }

    #[test]
    fn test_nms_keeps_strongest() {
        let kps = vec![scored(10.0, 10.0, 5.0), scored(11.0, 10.0, 9.0), scored(30.0, 30.0, 1.0)];
        let kept = KeypointRefinement::non_maximum_suppression(&kps, 3.0);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].keypoint.x, 11.0);
        assert_eq!(kept[1].keypoint.x, 30.0);
    }
}
