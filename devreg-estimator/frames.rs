//! Rigid-transform algebra and the device/fixed-camera frame conventions.
//!
//! A `Pose` named `a_from_b` maps coordinates expressed in frame `b` into
//! frame `a`; `a_from_b.compose(&b_from_c)` is `a_from_c`.

use nalgebra::{Isometry3, Quaternion, Translation3, Unit, UnitQuaternion, Vector3};
use std::f64::consts::{FRAC_PI_2, PI};

use crate::error::InputError;

/// Largest accepted deviation of |q| from 1
const UNIT_TOLERANCE: f64 = 1e-6;

/// Translation plus unit-quaternion rotation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub translation: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }

    pub fn from_parts(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { translation, rotation }
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self::from_parts(translation, UnitQuaternion::identity())
    }

    pub fn from_rotation(rotation: UnitQuaternion<f64>) -> Self {
        Self::from_parts(Vector3::zeros(), rotation)
    }

    /// Pure rotation of `angle` radians about `axis`
    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> Self {
        Self::from_rotation(UnitQuaternion::from_axis_angle(&Unit::new_normalize(*axis), angle))
    }

    /// Builds a pose from a position and a raw (x, y, z, w) quaternion as it
    /// arrives on the wire. The quaternion is normalized; zero or non-finite
    /// input is rejected.
    pub fn from_raw(position: [f64; 3], quaternion: [f64; 4]) -> Result<Self, InputError> {
        let [x, y, z, w] = quaternion;
        let q = Quaternion::new(w, x, y, z);
        if !position.iter().chain(quaternion.iter()).all(|v| v.is_finite()) || q.norm() < 1e-9 {
            return Err(InputError::InvalidPose);
        }
        Ok(Self::from_parts(Vector3::from(position), UnitQuaternion::from_quaternion(q)))
    }

    /// `self ∘ other`: apply `other` first
    pub fn compose(&self, other: &Pose) -> Pose {
        Pose {
            translation: self.rotation * other.translation + self.translation,
            rotation: self.rotation * other.rotation,
        }
    }

    pub fn inverse(&self) -> Pose {
        let rotation = self.rotation.inverse();
        Pose {
            translation: -(rotation * self.translation),
            rotation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    pub fn rotate_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * v
    }

    /// Angle of the relative rotation between two orientations, radians
    pub fn angle_to(&self, other: &Pose) -> f64 {
        let delta = self.rotation.inverse() * other.rotation;
        let q = delta.quaternion();
        2.0 * q.imag().norm().atan2(q.w.abs())
    }

    /// Finite components and a unit quaternion
    pub fn is_valid(&self) -> bool {
        let q = self.rotation.quaternion();
        self.translation.iter().all(|v| v.is_finite())
            && q.coords.iter().all(|v| v.is_finite())
            && (q.norm() - 1.0).abs() < UNIT_TOLERANCE
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation), self.rotation)
    }

    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        Self::from_parts(iso.translation.vector, iso.rotation)
    }

    /// Position followed by the (x, y, z, w) quaternion
    pub fn to_array(&self) -> [f64; 7] {
        let q = self.rotation.quaternion();
        [
            self.translation.x,
            self.translation.y,
            self.translation.z,
            q.i,
            q.j,
            q.k,
            q.w,
        ]
    }
}

impl From<Isometry3<f64>> for Pose {
    fn from(iso: Isometry3<f64>) -> Self {
        Pose::from_isometry(&iso)
    }
}

impl From<Pose> for Isometry3<f64> {
    fn from(pose: Pose) -> Self {
        pose.to_isometry()
    }
}

/// Angle between two directions in radians; 0 if either is degenerate
pub fn angle_between(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let na = a.norm();
    let nb = b.norm();
    if na < f64::EPSILON || nb < f64::EPSILON {
        return 0.0;
    }
    (a.dot(b) / (na * nb)).clamp(-1.0, 1.0).acos()
}

/// Device self-reported pose (left-handed, x right, y up, z forward) to the
/// right-handed tracking convention: mirror z and adjust the quaternion.
pub fn convert_left_handed_pose(raw: &Pose) -> Pose {
    let q = raw.rotation.quaternion();
    let t = raw.translation;
    Pose {
        translation: Vector3::new(t.x, t.y, -t.z),
        rotation: UnitQuaternion::new_unchecked(Quaternion::new(q.w, -q.i, -q.j, q.k)),
    }
}

/// Converted device pose to its optical-camera frame (x right, y down, z forward).
///
/// Result is `T(t) ∘ Rx(180°) ∘ R(q) ∘ Rz(+90°)`, the last factor being the
/// portrait-to-landscape sensor mounting.
pub fn device_pose_to_camera_convention(converted: &Pose) -> Pose {
    let camera_convention = Pose::from_axis_angle(&Vector3::x(), PI);
    let portrait_to_landscape = Pose::from_axis_angle(&Vector3::z(), FRAC_PI_2);
    let just_rotation = Pose::from_rotation(converted.rotation).compose(&portrait_to_landscape);
    let just_translation = Pose::from_translation(converted.translation);
    just_translation.compose(&camera_convention).compose(&just_rotation)
}

/// Frames derived from one solved camera pose
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposedRegistration {
    /// Device optical frame expressed in the fixed camera's optical frame
    pub fixed_from_device: Pose,
    /// Device optical frame in world coordinates
    pub world_from_device: Pose,
    /// Device tracking origin in world coordinates
    pub world_from_tracking_origin: Pose,
}

/// Composes the solver output with the static camera-to-world transform and
/// the device's own (converted) pose.
///
/// `device_from_fixed` maps fixed-camera points into the device camera, as
/// returned by the PnP solver. With `Pr` the measured world pose of the device
/// and `Pa` its self-reported pose, the tracking origin `A` satisfies
/// `A ∘ Pa = Pr`, hence `A = Pr ∘ Pa⁻¹`.
pub fn compose_registration(
    world_from_fixed: &Pose,
    device_from_fixed: &Pose,
    device_pose_in_own_frame: &Pose,
) -> ComposedRegistration {
    let fixed_from_device = device_from_fixed.inverse();
    let world_from_device = world_from_fixed.compose(&fixed_from_device);
    let world_from_tracking_origin = world_from_device.compose(&device_pose_in_own_frame.inverse());
    ComposedRegistration {
        fixed_from_device,
        world_from_device,
        world_from_tracking_origin,
    }
}
