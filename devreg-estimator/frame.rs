//! Per-update inputs: device frames (raw image or precomputed features) and
//! the fixed camera's image/depth pair.

use std::time::Duration;

use devreg_core::{CameraIntrinsics, DepthImage, Descriptor, GrayImage, Keypoint, DESCRIPTOR_BYTES};

use crate::error::{InputError, RegistrationError};
use crate::extractor::{FeatureSet, OrbExtractor};
use crate::frames::Pose;

/// Device frame carrying a monochrome image; features are extracted here
#[derive(Debug, Clone)]
pub struct DeviceImageFrame {
    pub image: GrayImage,
    pub intrinsics: CameraIntrinsics,
    /// Self-reported pose in the device's left-handed tracking convention
    pub pose: Pose,
    pub timestamp: Duration,
}

/// Device frame with features computed on the device
#[derive(Debug, Clone)]
pub struct DeviceFeatureFrame {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
    pub image_width: usize,
    pub image_height: usize,
    pub intrinsics: CameraIntrinsics,
    pub pose: Pose,
    pub timestamp: Duration,
}

/// Validated device input, whichever way its features were obtained
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFrame {
    features: FeatureSet,
    image_size: (usize, usize),
    intrinsics: CameraIntrinsics,
    pose: Pose,
    timestamp: Duration,
}

fn check_common(intrinsics: &CameraIntrinsics, pose: &Pose, width: usize, height: usize) -> Result<(), InputError> {
    if width == 0 || height == 0 {
        return Err(InputError::InvalidImageSize { width, height });
    }
    if !intrinsics.is_valid() {
        return Err(InputError::InvalidIntrinsics);
    }
    if !pose.is_valid() {
        return Err(InputError::InvalidPose);
    }
    Ok(())
}

impl DeviceFrame {
    pub fn from_image(frame: DeviceImageFrame, extractor: &OrbExtractor) -> Result<Self, RegistrationError> {
        let (width, height) = frame.image.dimensions();
        check_common(&frame.intrinsics, &frame.pose, width, height)?;
        let features = extractor.extract(&frame.image)?;
        Ok(Self {
            features,
            image_size: (width, height),
            intrinsics: frame.intrinsics,
            pose: frame.pose,
            timestamp: frame.timestamp,
        })
    }

    pub fn from_features(frame: DeviceFeatureFrame) -> Result<Self, InputError> {
        check_common(&frame.intrinsics, &frame.pose, frame.image_width, frame.image_height)?;
        if frame.keypoints.is_empty() || frame.descriptors.is_empty() {
            return Err(InputError::EmptyFeatures {
                keypoints: frame.keypoints.len(),
                descriptors: frame.descriptors.len(),
            });
        }
        if let Some(index) = frame.keypoints.iter().position(|kp| !kp.x.is_finite() || !kp.y.is_finite()) {
            return Err(InputError::NonFiniteKeypoint { index });
        }
        let features = FeatureSet::new(frame.keypoints, frame.descriptors)?;
        Ok(Self {
            features,
            image_size: (frame.image_width, frame.image_height),
            intrinsics: frame.intrinsics,
            pose: frame.pose,
            timestamp: frame.timestamp,
        })
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn image_size(&self) -> (usize, usize) {
        self.image_size
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Raw self-reported pose, before any convention change
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

/// Splits a packed descriptor payload (one 32-byte row per keypoint)
pub fn decode_descriptors(bytes: &[u8]) -> Result<Vec<Descriptor>, InputError> {
    let chunks = bytes.chunks_exact(DESCRIPTOR_BYTES);
    if !chunks.remainder().is_empty() {
        return Err(InputError::DescriptorPayload { len: bytes.len(), row: DESCRIPTOR_BYTES });
    }
    Ok(chunks
        .map(|row| {
            let mut d = [0u8; DESCRIPTOR_BYTES];
            d.copy_from_slice(row);
            d
        })
        .collect())
}

/// Fixed camera image with its registered depth map
#[derive(Debug, Clone)]
pub struct FixedCameraFrame {
    image: GrayImage,
    depth: DepthImage,
    timestamp: Duration,
}

impl FixedCameraFrame {
    /// Image and depth must share one pixel grid
    pub fn new(image: GrayImage, depth: DepthImage, timestamp: Duration) -> Result<Self, InputError> {
        let (width, height) = image.dimensions();
        let (depth_width, depth_height) = depth.dimensions();
        if (width, height) != (depth_width, depth_height) {
            return Err(InputError::DepthSizeMismatch { width, height, depth_width, depth_height });
        }
        Ok(Self { image, depth, timestamp })
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn depth(&self) -> &DepthImage {
        &self.depth
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

/// Static description of the fixed camera, shared by every device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedCameraSetup {
    pub intrinsics: CameraIntrinsics,
    /// Fixed camera optical frame to world
    pub world_from_camera: Pose,
}

impl FixedCameraSetup {
    pub fn new(intrinsics: CameraIntrinsics, world_from_camera: Pose) -> Result<Self, InputError> {
        if !intrinsics.is_valid() {
            return Err(InputError::InvalidIntrinsics);
        }
        if !world_from_camera.is_valid() {
            return Err(InputError::InvalidPose);
        }
        Ok(Self { intrinsics, world_from_camera })
    }
}
