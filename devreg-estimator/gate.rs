//! Acceptance checks applied to every solved pose, in pipeline order.

use nalgebra::Vector3;
use thiserror::Error;

use crate::error::status;
use crate::frames::{angle_between, Pose};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Never fewer than this many correspondences reach the solver
pub const MIN_PNP_POINTS: usize = 4;

/// Denominator used when averaging inlier reprojection errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum ReprojectionAveraging {
    /// Sum over inliers divided by the number of correspondences
    #[default]
    AllCorrespondences,
    /// Sum over inliers divided by the number of inliers
    Inliers,
}

impl ReprojectionAveraging {
    pub fn average(&self, inlier_error_sum: f64, inliers: usize, correspondences: usize) -> f64 {
        let n = match self {
            ReprojectionAveraging::AllCorrespondences => correspondences,
            ReprojectionAveraging::Inliers => inliers,
        };
        if n == 0 {
            0.0
        } else {
            inlier_error_sum / n as f64
        }
    }
}

/// Soft rejections: the frame was processed but its estimate is not trusted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("insufficient matches: {found} < {required}")]
    InsufficientMatches { found: usize, required: usize },
    #[error("reprojection error {error:.3}px exceeds {threshold:.3}px")]
    ReprojectionExceeded { error: f64, threshold: f64 },
    #[error("device/camera orientation difference {angle_deg:.1}deg exceeds {threshold_deg:.1}deg")]
    OrientationExceeded { angle_deg: f64, threshold_deg: f64 },
    #[error("device height {height:.3}m outside [{min:?}, {max:?}]")]
    HeightOutOfRange {
        height: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
}

impl Rejection {
    pub fn code(&self) -> i32 {
        match self {
            Rejection::InsufficientMatches { .. } => status::INSUFFICIENT_MATCHES,
            Rejection::ReprojectionExceeded { .. } => status::REPROJECTION_EXCEEDED,
            Rejection::OrientationExceeded { .. } => status::ORIENTATION_EXCEEDED,
            Rejection::HeightOutOfRange { .. } => status::HEIGHT_OUT_OF_RANGE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateThresholds {
    pub minimum_matches: usize,
    pub max_reprojection_error: f64,
    pub max_orientation_deg: f64,
    pub min_height: Option<f64>,
    pub max_height: Option<f64>,
    pub averaging: ReprojectionAveraging,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            minimum_matches: MIN_PNP_POINTS,
            max_reprojection_error: 5.0,
            max_orientation_deg: 45.0,
            min_height: None,
            max_height: None,
            averaging: ReprojectionAveraging::AllCorrespondences,
        }
    }
}

impl GateThresholds {
    pub fn required_matches(&self) -> usize {
        self.minimum_matches.max(MIN_PNP_POINTS)
    }

    /// Applied both to correspondences before solving and to inliers after
    pub fn check_count(&self, found: usize) -> Result<(), Rejection> {
        let required = self.required_matches();
        if found < required {
            return Err(Rejection::InsufficientMatches { found, required });
        }
        Ok(())
    }

    pub fn check_reprojection(&self, error: f64) -> Result<(), Rejection> {
        if !(error <= self.max_reprojection_error) {
            return Err(Rejection::ReprojectionExceeded {
                error,
                threshold: self.max_reprojection_error,
            });
        }
        Ok(())
    }

    /// Compares the device optical axis, expressed in the fixed camera frame,
    /// with the fixed camera's own optical axis. Returns the angle in degrees.
    pub fn check_orientation(&self, fixed_from_device: &Pose) -> Result<f64, Rejection> {
        let angle_deg = optical_axis_deviation_deg(fixed_from_device);
        if angle_deg > self.max_orientation_deg {
            return Err(Rejection::OrientationExceeded {
                angle_deg,
                threshold_deg: self.max_orientation_deg,
            });
        }
        Ok(angle_deg)
    }

    /// World z of the device must lie within the configured bounds
    pub fn check_height(&self, world_from_device: &Pose) -> Result<(), Rejection> {
        let height = world_from_device.translation.z;
        let below = self.min_height.is_some_and(|min| height < min);
        let above = self.max_height.is_some_and(|max| height > max);
        if below || above {
            return Err(Rejection::HeightOutOfRange {
                height,
                min: self.min_height,
                max: self.max_height,
            });
        }
        Ok(())
    }
}

pub fn optical_axis_deviation_deg(fixed_from_device: &Pose) -> f64 {
    let device_axis = fixed_from_device.rotate_vector(&Vector3::z());
    angle_between(&device_axis, &Vector3::z()).to_degrees()
}
