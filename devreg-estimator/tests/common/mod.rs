#![allow(dead_code)]

use std::time::Duration;

use devreg_core::{CameraIntrinsics, DepthImage, Descriptor, GrayImage, Keypoint, DESCRIPTOR_BYTES};
use devreg_estimator::{DeviceFeatureFrame, DeviceFrame, FeatureSet, FixedCameraFrame, FixedCameraSetup, Pose};
use nalgebra::{UnitQuaternion, Vector3};

pub const WIDTH: usize = 640;
pub const HEIGHT: usize = 480;

pub const FIXED_K: CameraIntrinsics = CameraIntrinsics { fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0 };
pub const DEVICE_K: CameraIntrinsics = CameraIntrinsics { fx: 600.0, fy: 600.0, cx: 320.0, cy: 240.0 };

/// Point every synthetic device looks at, fixed camera frame
const TARGET: [f64; 3] = [0.0, 0.0, 1.75];

pub fn world_from_camera() -> Pose {
    Pose::from_parts(
        Vector3::new(0.5, -0.2, 1.2),
        UnitQuaternion::from_euler_angles(-std::f64::consts::FRAC_PI_2, 0.0, 0.3),
    )
}

pub fn setup() -> FixedCameraSetup {
    FixedCameraSetup::new(FIXED_K, world_from_camera()).unwrap()
}

/// Pseudo-random descriptor, distinct per index
pub fn descriptor(i: usize) -> Descriptor {
    let mut state = (i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ 0xdead_beef;
    let mut d = [0u8; DESCRIPTOR_BYTES];
    for byte in d.iter_mut() {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        *byte = (state >> 56) as u8;
    }
    d
}

/// Device 1.5 m from the target, optical axis tilted `angle_deg` about the
/// fixed camera's y axis
pub fn fixed_from_device(angle_deg: f64) -> Pose {
    let rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angle_deg.to_radians());
    let axis = rotation * Vector3::z();
    let target = Vector3::from(TARGET);
    Pose::from_parts(target - axis * 1.5, rotation)
}

pub struct Scene {
    pub fixed: FixedCameraFrame,
    pub fixed_features: FeatureSet,
    pub device: DeviceFeatureFrame,
    pub device_from_fixed: Pose,
}

impl Scene {
    pub fn device_frame(&self) -> DeviceFrame {
        DeviceFrame::from_features(self.device.clone()).unwrap()
    }
}

fn depth_mm(i: usize) -> u16 {
    1500 + ((i * 137) % 500) as u16
}

fn fixed_pixel(i: usize) -> (usize, usize) {
    (100 + (i % 8) * 60, 100 + (i / 8) * 50)
}

/// `n` (<= 48) fixed keypoints with exact depth, seen by a device at
/// `fixed_from_device`; device keypoints are listed in reverse order
pub fn scene(fixed_from_device: &Pose, n: usize, timestamp: Duration) -> Scene {
    assert!(n <= 48);
    let device_from_fixed = fixed_from_device.inverse();

    let mut depth = vec![0u16; WIDTH * HEIGHT];
    let mut fixed_kps = Vec::with_capacity(n);
    let mut fixed_desc = Vec::with_capacity(n);
    let mut device_kps = Vec::with_capacity(n);
    let mut device_desc = Vec::with_capacity(n);

    for i in 0..n {
        let (u, v) = fixed_pixel(i);
        depth[v * WIDTH + u] = depth_mm(i);
        fixed_kps.push(Keypoint::new(u as f32, v as f32));
        fixed_desc.push(descriptor(i));
    }
    for i in (0..n).rev() {
        let (u, v) = fixed_pixel(i);
        let [x, y, z] = FIXED_K.unproject(u as f64, v as f64, depth_mm(i) as f64 * 0.001);
        let pd = device_from_fixed.transform_point(&Vector3::new(x, y, z));
        let [du, dv] = DEVICE_K.project([pd.x, pd.y, pd.z]).unwrap();
        device_kps.push(Keypoint::new(du as f32, dv as f32));
        device_desc.push(descriptor(i));
    }

    let fixed = FixedCameraFrame::new(
        GrayImage::filled(WIDTH, HEIGHT, 0).unwrap(),
        DepthImage::from_millimetres(WIDTH, HEIGHT, depth).unwrap(),
        timestamp,
    )
    .unwrap();

    Scene {
        fixed,
        fixed_features: FeatureSet::new(fixed_kps, fixed_desc).unwrap(),
        device: DeviceFeatureFrame {
            keypoints: device_kps,
            descriptors: device_desc,
            image_width: WIDTH,
            image_height: HEIGHT,
            intrinsics: DEVICE_K,
            pose: Pose::identity(),
            timestamp,
        },
        device_from_fixed,
    }
}

/// Blobs of hashed size, offset and brightness on a dark background
pub fn textured_image(width: usize, height: usize) -> GrayImage {
    let hash = |a: usize, b: usize, salt: u64| -> usize {
        let mut h = (a as u64).wrapping_mul(0x9e37_79b9) ^ (b as u64).wrapping_mul(0x85eb_ca6b) ^ salt;
        h ^= h >> 13;
        h = h.wrapping_mul(0xc2b2_ae35);
        h ^= h >> 16;
        h as usize
    };

    let mut img = GrayImage::filled(width, height, 30).unwrap();
    for y in 0..height {
        for x in 0..width {
            let (cx, cy) = (x / 24, y / 24);
            let side = 6 + hash(cx, cy, 1) % 11;
            let ox = hash(cx, cy, 2) % 6;
            let oy = hash(cx, cy, 3) % 6;
            let (lx, ly) = (x % 24, y % 24);
            if lx >= ox && lx < ox + side && ly >= oy && ly < oy + side {
                img.set(x, y, 110 + (hash(cx, cy, 4) % 140) as u8);
            }
        }
    }
    img
}

pub fn assert_pose_close(a: &Pose, b: &Pose, tol: f64) {
    assert!((a.translation - b.translation).norm() < tol, "{:?} vs {:?}", a, b);
    assert!(a.angle_to(b) < tol, "{:?} vs {:?}", a, b);
}
