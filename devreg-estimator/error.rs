use devreg_brief::BriefError;
use devreg_core::ImageError;
use devreg_fast::FastError;
use thiserror::Error;

/// Numeric status reported for every update
pub mod status {
    pub const ACCEPTED: i32 = 0;
    pub const INSUFFICIENT_MATCHES: i32 = 1;
    pub const REPROJECTION_EXCEEDED: i32 = 2;
    pub const ORIENTATION_EXCEEDED: i32 = 3;
    pub const HEIGHT_OUT_OF_RANGE: i32 = 4;
    pub const INPUT_DECODE: i32 = -1;
    pub const FEATURE: i32 = -2;
    pub const STALE_FRAME: i32 = -3;
    pub const SOLVER_INTERNAL: i32 = -5;
    pub const GEOMETRY_INVALID: i32 = -8;
}

/// Malformed frame payloads
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("image error: {0}")]
    Image(#[from] ImageError),
    #[error("empty feature payload ({keypoints} keypoints, {descriptors} descriptors)")]
    EmptyFeatures { keypoints: usize, descriptors: usize },
    #[error("descriptor count {descriptors} does not match keypoint count {keypoints}")]
    DescriptorCountMismatch { keypoints: usize, descriptors: usize },
    #[error("descriptor payload of {len} bytes is not a multiple of {row} bytes")]
    DescriptorPayload { len: usize, row: usize },
    #[error("match ({query_idx}, {train_idx}) out of range for {query_len} query / {train_len} train keypoints")]
    MatchIndexOutOfRange {
        query_idx: usize,
        train_idx: usize,
        query_len: usize,
        train_len: usize,
    },
    #[error("depth grid {depth_width}x{depth_height} does not match image {width}x{height}")]
    DepthSizeMismatch {
        width: usize,
        height: usize,
        depth_width: usize,
        depth_height: usize,
    },
    #[error("invalid camera intrinsics")]
    InvalidIntrinsics,
    #[error("invalid image size {width}x{height}")]
    InvalidImageSize { width: usize, height: usize },
    #[error("keypoint {index} has a non-finite position")]
    NonFiniteKeypoint { index: usize },
    #[error("pose has non-finite components or a degenerate quaternion")]
    InvalidPose,
}

/// Feature extraction failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("no keypoints detected")]
    NoKeypoints,
    #[error("no descriptors computed")]
    NoDescriptors,
    #[error("detector error: {0}")]
    Detector(#[from] FastError),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] BriefError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("need at least 4 correspondences, got {found}")]
    InsufficientCorrespondences { found: usize },
    #[error("{points} points but {pixels} pixels")]
    LengthMismatch { points: usize, pixels: usize },
    #[error("invalid device intrinsics")]
    InvalidIntrinsics,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("filter queried before the first measurement")]
    NotInitialized,
    #[error("invalid noise parameter {name}: {value}")]
    InvalidNoise { name: &'static str, value: f64 },
    #[error("invalid time step: {0}")]
    InvalidTimeStep(f64),
    #[error("innovation covariance is singular")]
    SingularInnovation,
    #[error("measurement has non-finite components")]
    NonFiniteMeasurement,
    #[error("filter state became non-finite")]
    Diverged,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
}

/// Reasons a frame is dropped before or during the pipeline
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("frame is {age_ms} ms old (limit {limit_ms} ms)")]
    StaleFrame { age_ms: u128, limit_ms: u128 },
    #[error("composed transform is not a valid rigid motion")]
    GeometryInvalid,
}

impl RegistrationError {
    pub fn code(&self) -> i32 {
        match self {
            RegistrationError::Input(_) => status::INPUT_DECODE,
            RegistrationError::Feature(_) => status::FEATURE,
            RegistrationError::StaleFrame { .. } => status::STALE_FRAME,
            RegistrationError::Solver(_) | RegistrationError::Filter(_) => status::SOLVER_INTERNAL,
            RegistrationError::GeometryInvalid => status::GEOMETRY_INVALID,
        }
    }
}
