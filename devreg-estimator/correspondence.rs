//! 3D-2D correspondences from filtered matches and the fixed camera's depth.

use devreg_brief::Match;
use devreg_core::{CameraIntrinsics, DepthImage, Keypoint};
use nalgebra::{Vector2, Vector3};
use tracing::debug;

use crate::depth::DepthResolver;
use crate::error::InputError;

/// Parallel sequences: `points[i]` (fixed optical frame, metres) projects to
/// `pixels[i]` in the device image; `matches[i]` is the match it came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correspondences {
    pub points: Vec<Vector3<f64>>,
    pub pixels: Vec<Vector2<f64>>,
    pub matches: Vec<Match>,
}

impl Correspondences {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Every index must be valid before any depth is looked up
pub fn validate_matches(matches: &[Match], query_len: usize, train_len: usize) -> Result<(), InputError> {
    match matches.iter().find(|m| m.query_idx >= query_len || m.train_idx >= train_len) {
        Some(m) => Err(InputError::MatchIndexOutOfRange {
            query_idx: m.query_idx,
            train_idx: m.train_idx,
            query_len,
            train_len,
        }),
        None => Ok(()),
    }
}

/// Unprojects each match's fixed-camera keypoint with its (repaired) depth.
///
/// Matches whose depth cannot be resolved are dropped; order is preserved.
pub fn build_correspondences(
    matches: &[Match],
    device_keypoints: &[Keypoint],
    fixed_keypoints: &[Keypoint],
    depth: &DepthImage,
    fixed_intrinsics: &CameraIntrinsics,
    resolver: &DepthResolver,
) -> Result<Correspondences, InputError> {
    if !fixed_intrinsics.is_valid() {
        return Err(InputError::InvalidIntrinsics);
    }
    validate_matches(matches, device_keypoints.len(), fixed_keypoints.len())?;

    let mut out = Correspondences {
        points: Vec::with_capacity(matches.len()),
        pixels: Vec::with_capacity(matches.len()),
        matches: Vec::with_capacity(matches.len()),
    };

    for m in matches {
        let fixed = &fixed_keypoints[m.train_idx];
        let Some(raw) = resolver.resolve(depth, fixed.x, fixed.y) else {
            continue;
        };
        let [x, y, z] = fixed_intrinsics.unproject(fixed.x as f64, fixed.y as f64, depth.to_metres(raw));
        let device = &device_keypoints[m.query_idx];

        out.points.push(Vector3::new(x, y, z));
        out.pixels.push(Vector2::new(device.x as f64, device.y as f64));
        out.matches.push(*m);
    }

    if out.len() < matches.len() {
        debug!(
            dropped = matches.len() - out.len(),
            kept = out.len(),
            "matches without resolvable depth"
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(500.0, 500.0, 32.0, 24.0)
    }

    fn m(query_idx: usize, train_idx: usize) -> Match {
        Match { query_idx, train_idx, distance: 10 }
    }

    #[test]
    fn test_unprojection() {
        let depth = DepthImage::from_millimetres(64, 48, vec![2000; 64 * 48]).unwrap();
        let fixed = vec![Keypoint::new(42.0, 14.0)];
        let device = vec![Keypoint::new(100.5, 200.25)];
        let c = build_correspondences(&[m(0, 0)], &device, &fixed, &depth, &intrinsics(), &DepthResolver::default())
            .unwrap();
        assert_eq!(c.len(), 1);
        let p = c.points[0];
        assert!((p.x - 10.0 * 2.0 / 500.0).abs() < 1e-12);
        assert!((p.y + 10.0 * 2.0 / 500.0).abs() < 1e-12);
        assert!((p.z - 2.0).abs() < 1e-12);
        assert_eq!(c.pixels[0], Vector2::new(100.5, 200.25));
    }

    #[test]
    fn test_repaired_depth_is_used() {
        let mut data = vec![0u16; 64 * 48];
        data[20 * 64 + 15] = 1234; // 5 px right of (10, 20)
        let depth = DepthImage::from_millimetres(64, 48, data).unwrap();
        let fixed = vec![Keypoint::new(10.0, 20.0)];
        let device = vec![Keypoint::new(0.0, 0.0)];
        let c = build_correspondences(&[m(0, 0)], &device, &fixed, &depth, &intrinsics(), &DepthResolver::default())
            .unwrap();
        assert_eq!(c.len(), 1);
        assert!((c.points[0].z - 1.234).abs() < 1e-9);
    }

    #[test]
    fn test_unresolvable_matches_are_dropped() {
        let mut data = vec![0u16; 64 * 48];
        data[0] = 900;
        let depth = DepthImage::from_millimetres(64, 48, data).unwrap();
        let fixed = vec![Keypoint::new(2.0, 1.0), Keypoint::new(60.0, 40.0)];
        let device = vec![Keypoint::new(5.0, 5.0), Keypoint::new(6.0, 6.0)];
        let resolver = DepthResolver::new(10, 10);
        let c = build_correspondences(&[m(0, 0), m(1, 1)], &device, &fixed, &depth, &intrinsics(), &resolver)
            .unwrap();
        assert_eq!(c.matches, vec![m(0, 0)]);
    }

    #[test]
    fn test_out_of_range_index() {
        let depth = DepthImage::from_millimetres(8, 8, vec![1000; 64]).unwrap();
        let kps = vec![Keypoint::new(1.0, 1.0)];
        let err = build_correspondences(&[m(0, 3)], &kps, &kps, &depth, &intrinsics(), &DepthResolver::default())
            .unwrap_err();
        assert_eq!(
            err,
            InputError::MatchIndexOutOfRange { query_idx: 0, train_idx: 3, query_len: 1, train_len: 1 }
        );
    }
}
