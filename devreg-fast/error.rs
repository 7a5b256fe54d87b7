use devreg_core::ImageError;

#[derive(Debug, Clone, PartialEq)]
pub enum FastError {
    InvalidImageSize { width: usize, height: usize },
    InvalidImageData { expected_len: usize, actual_len: usize },
    InvalidThreshold(u8),
    InvalidPatchSize { patch_size: usize, min_image_dim: usize },
    ImageTooSmall { width: usize, height: usize, min_size: usize },
    InvalidScaleFactor(f32),
    InvalidLevelCount(usize),
    InvalidFeatureBudget(usize),
    Image(ImageError),
}

impl std::fmt::Display for FastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FastError::InvalidImageSize { width, height } => {
                write!(f, "Invalid image dimensions: {}x{} (must be > 0)", width, height)
            }
            FastError::InvalidImageData { expected_len, actual_len } => {
                write!(f, "Image data length mismatch: expected {}, got {}", expected_len, actual_len)
            }
            FastError::InvalidThreshold(t) => {
                write!(f, "Invalid threshold: {} (must be 1-127)", t)
            }
            FastError::InvalidPatchSize { patch_size, min_image_dim } => {
                write!(f, "Patch size {} invalid for minimum image dimension {} (must be odd and smaller)", patch_size, min_image_dim)
            }
            FastError::ImageTooSmall { width, height, min_size } => {
                write!(f, "Image {}x{} too small (minimum {}x{})", width, height, min_size, min_size)
            }
            FastError::InvalidScaleFactor(s) => {
                write!(f, "Invalid pyramid scale factor: {} (must be > 1)", s)
            }
            FastError::InvalidLevelCount(n) => {
                write!(f, "Invalid pyramid level count: {} (must be 1-32)", n)
            }
            FastError::InvalidFeatureBudget(n) => {
                write!(f, "Invalid feature budget: {} (must be > 0)", n)
            }
            FastError::Image(err) => write!(f, "Image error: {}", err),
        }
    }
}

impl std::error::Error for FastError {}

impl From<ImageError> for FastError {
    fn from(err: ImageError) -> Self {
        FastError::Image(err)
    }
}

pub type FastResult<T> = Result<T, FastError>;
