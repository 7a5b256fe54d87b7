//! File-level plumbing for the `devreg` binary: image loading, the JSON
//! request describing one update, the JSON report and debug drawing.

use std::path::Path;
use std::time::Duration;

use devreg_brief::{filter_matches, match_descriptors};
use devreg_core::{CameraIntrinsics, DepthImage, GrayImage, ImageError, Keypoint};
use devreg_estimator::{
    decode_descriptors, ConfigError, DeviceFeatureFrame, DeviceFrame, FeatureError, FixedCameraFrame,
    FixedCameraSetup, InputError, OrbExtractor, Pose, UpdateOutcome,
};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_circle_mut;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum CliError {
    Io(std::io::Error),
    Image(image::ImageError),
    Buffer(ImageError),
    Json(serde_json::Error),
    Input(InputError),
    Config(ConfigError),
    Feature(FeatureError),
    ThreadPool(rayon::ThreadPoolBuildError),
    MissingDevice,
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Io(e) => write!(f, "I/O error: {}", e),
            CliError::Image(e) => write!(f, "Image error: {}", e),
            CliError::Buffer(e) => write!(f, "Image buffer error: {}", e),
            CliError::Json(e) => write!(f, "JSON error: {}", e),
            CliError::Input(e) => write!(f, "Invalid input: {}", e),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Feature(e) => write!(f, "Feature error: {}", e),
            CliError::ThreadPool(e) => write!(f, "Thread pool error: {}", e),
            CliError::MissingDevice => write!(f, "Request carries no device features and no --device image was given"),
        }
    }
}

impl std::error::Error for CliError {}

macro_rules! impl_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(impl From<$ty> for CliError {
            fn from(err: $ty) -> Self {
                CliError::$variant(err)
            }
        })*
    };
}

impl_from!(
    Io(std::io::Error),
    Image(image::ImageError),
    Buffer(ImageError),
    Json(serde_json::Error),
    Input(InputError),
    Config(ConfigError),
    Feature(FeatureError),
    ThreadPool(rayon::ThreadPoolBuildError),
);

pub type CliResult<T> = Result<T, CliError>;

/// Keypoints and packed descriptors computed on the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturePayload {
    pub image_width: usize,
    pub image_height: usize,
    pub keypoints: Vec<Keypoint>,
    /// 32 bytes per keypoint, concatenated
    pub descriptors: Vec<u8>,
}

/// Everything about one update that is not an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    pub device_intrinsics: CameraIntrinsics,
    /// Device self pose, left-handed tracking convention
    pub device_position: [f64; 3],
    /// (x, y, z, w)
    pub device_orientation: [f64; 4],
    pub device_timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_features: Option<FeaturePayload>,
    pub fixed_intrinsics: CameraIntrinsics,
    pub fixed_timestamp_ms: u64,
    pub world_from_fixed_position: [f64; 3],
    pub world_from_fixed_orientation: [f64; 4],
    /// Metres per raw depth unit
    #[serde(default = "default_depth_scale")]
    pub depth_scale: f64,
    /// Processing time; the newer of the two capture times when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub now_ms: Option<u64>,
}

fn default_device_id() -> String {
    "device".to_string()
}

fn default_depth_scale() -> f64 {
    0.001
}

impl RegistrationRequest {
    pub fn load<P: AsRef<Path>>(path: P) -> CliResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn device_pose(&self) -> Result<Pose, InputError> {
        Pose::from_raw(self.device_position, self.device_orientation)
    }

    pub fn fixed_setup(&self) -> Result<FixedCameraSetup, InputError> {
        let world_from_camera = Pose::from_raw(self.world_from_fixed_position, self.world_from_fixed_orientation)?;
        FixedCameraSetup::new(self.fixed_intrinsics, world_from_camera)
    }

    pub fn device_timestamp(&self) -> Duration {
        Duration::from_millis(self.device_timestamp_ms)
    }

    pub fn fixed_timestamp(&self) -> Duration {
        Duration::from_millis(self.fixed_timestamp_ms)
    }

    pub fn now(&self) -> Duration {
        Duration::from_millis(self.now_ms.unwrap_or(self.device_timestamp_ms.max(self.fixed_timestamp_ms)))
    }

    /// Device frame from the precomputed features, if the request has them
    pub fn device_feature_frame(&self) -> Option<Result<DeviceFrame, InputError>> {
        let payload = self.device_features.as_ref()?;
        Some(self.build_feature_frame(payload))
    }

    fn build_feature_frame(&self, payload: &FeaturePayload) -> Result<DeviceFrame, InputError> {
        DeviceFrame::from_features(DeviceFeatureFrame {
            keypoints: payload.keypoints.clone(),
            descriptors: decode_descriptors(&payload.descriptors)?,
            image_width: payload.image_width,
            image_height: payload.image_height,
            intrinsics: self.device_intrinsics,
            pose: self.device_pose()?,
            timestamp: self.device_timestamp(),
        })
    }
}

/// Position plus (x, y, z, w) quaternion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub position: [f64; 3],
    pub orientation: [f64; 4],
}

impl From<&Pose> for PoseRecord {
    fn from(pose: &Pose) -> Self {
        let [x, y, z, qx, qy, qz, qw] = pose.to_array();
        Self {
            position: [x, y, z],
            orientation: [qx, qy, qz, qw],
        }
    }
}

/// JSON printed for every update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationReport {
    pub device_id: String,
    pub status: i32,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_from_tracking_origin: Option<PoseRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_from_device: Option<PoseRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothed: Option<PoseRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inliers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correspondences: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reprojection_error: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation_deviation_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u128>,
}

impl RegistrationReport {
    pub fn from_outcome(device_id: &str, outcome: &UpdateOutcome) -> Self {
        let mut report = Self {
            device_id: device_id.to_string(),
            status: outcome.code(),
            accepted: outcome.is_accepted(),
            message: None,
            world_from_tracking_origin: None,
            world_from_device: None,
            smoothed: None,
            inliers: None,
            correspondences: None,
            reprojection_error: None,
            orientation_deviation_deg: None,
            timestamp_ms: None,
        };
        match outcome {
            UpdateOutcome::Accepted(reg) => {
                report.world_from_tracking_origin = Some((&reg.world_from_tracking_origin).into());
                report.world_from_device = Some((&reg.world_from_device).into());
                report.smoothed = reg.smoothed.as_ref().map(PoseRecord::from);
                report.inliers = Some(reg.inliers);
                report.correspondences = Some(reg.correspondences);
                report.reprojection_error = Some(reg.reprojection_error);
                report.orientation_deviation_deg = Some(reg.orientation_deviation_deg);
                report.timestamp_ms = Some(reg.timestamp.as_millis());
            }
            UpdateOutcome::Rejected(rejection) => report.message = Some(rejection.to_string()),
            UpdateOutcome::Dropped(error) => report.message = Some(error.to_string()),
        }
        report
    }

    pub fn to_json(&self) -> CliResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn load_gray<P: AsRef<Path>>(path: P) -> CliResult<GrayImage> {
    let img = image::open(path)?.to_luma8();
    let (w, h) = img.dimensions();
    Ok(GrayImage::new(w as usize, h as usize, img.into_raw())?)
}

/// 16-bit depth PNG; `scale` metres per unit
pub fn load_depth<P: AsRef<Path>>(path: P, scale: f64) -> CliResult<DepthImage> {
    let img = image::open(path)?.to_luma16();
    let (w, h) = img.dimensions();
    Ok(DepthImage::new(w as usize, h as usize, img.into_raw(), scale)?)
}

/// Circles every keypoint; highlighted ones in red, the rest in blue
pub fn draw_keypoints<P: AsRef<Path>>(
    img: &GrayImage,
    keypoints: &[Keypoint],
    highlighted: &[usize],
    path: P,
) -> CliResult<()> {
    let (w, h) = img.dimensions();
    let luma = image::GrayImage::from_raw(w as u32, h as u32, img.as_raw().to_vec())
        .ok_or(CliError::Buffer(ImageError::InvalidImageSize { width: w, height: h }))?;
    let mut output: RgbaImage = image::DynamicImage::ImageLuma8(luma).into_rgba8();

    let mut is_highlighted = vec![false; keypoints.len()];
    for &i in highlighted.iter().filter(|&&i| i < keypoints.len()) {
        is_highlighted[i] = true;
    }

    for (kp, &hit) in keypoints.iter().zip(&is_highlighted) {
        let (colour, radius) = if hit {
            (Rgba([255, 0, 0, 255]), 4)
        } else {
            (Rgba([0, 96, 255, 255]), 2)
        };
        draw_hollow_circle_mut(&mut output, (kp.x.round() as i32, kp.y.round() as i32), radius, colour);
    }

    output.save(path)?;
    Ok(())
}

/// Draws the fixed image with the keypoints that found a device match under `threshold`
pub fn draw_matches<P: AsRef<Path>>(
    fixed: &FixedCameraFrame,
    device: &DeviceFrame,
    extractor: &OrbExtractor,
    threshold: u32,
    path: P,
) -> CliResult<usize> {
    let fixed_features = extractor.extract(fixed.image())?;
    let matches = filter_matches(
        &match_descriptors(device.features().descriptors(), fixed_features.descriptors()),
        threshold,
    );
    let matched: Vec<usize> = matches.iter().map(|m| m.train_idx).collect();
    draw_keypoints(fixed.image(), fixed_features.keypoints(), &matched, path)?;
    Ok(matched.len())
}
