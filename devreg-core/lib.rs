#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Row-major 8-bit grayscale image
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

/// Row-major 16-bit depth map; a zero sample means "unknown"
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    width: usize,
    height: usize,
    data: Vec<u16>,
    /// Metres per raw depth unit (0.001 for millimetre maps)
    scale: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageError {
    InvalidImageSize { width: usize, height: usize },
    InvalidImageData { expected_len: usize, actual_len: usize },
    InvalidDepthScale(f64),
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::InvalidImageSize { width, height } => {
                write!(f, "Invalid image dimensions: {}x{} (must be > 0)", width, height)
            }
            ImageError::InvalidImageData { expected_len, actual_len } => {
                write!(f, "Image data length mismatch: expected {}, got {}", expected_len, actual_len)
            }
            ImageError::InvalidDepthScale(s) => {
                write!(f, "Invalid depth scale: {} (must be finite and > 0)", s)
            }
        }
    }
}

impl std::error::Error for ImageError {}

fn check_buffer(width: usize, height: usize, len: usize) -> Result<(), ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidImageSize { width, height });
    }
    let expected_len = width * height;
    if len != expected_len {
        return Err(ImageError::InvalidImageData { expected_len, actual_len: len });
    }
    Ok(())
}

impl GrayImage {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self, ImageError> {
        check_buffer(width, height, data.len())?;
        Ok(Self { width, height, data })
    }

    /// Uniform image, mostly useful for tests and placeholders
    pub fn filled(width: usize, height: usize, value: u8) -> Result<Self, ImageError> {
        Self::new(width, height, vec![value; width * height])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    /// Pixel lookup with coordinates clamped to the image border
    #[inline]
    pub fn get_clamped(&self, x: i32, y: i32) -> u8 {
        let xx = x.clamp(0, self.width as i32 - 1) as usize;
        let yy = y.clamp(0, self.height as i32 - 1) as usize;
        self.data[yy * self.width + xx]
    }
}

impl DepthImage {
    pub fn new(width: usize, height: usize, data: Vec<u16>, scale: f64) -> Result<Self, ImageError> {
        check_buffer(width, height, data.len())?;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ImageError::InvalidDepthScale(scale));
        }
        Ok(Self { width, height, data, scale })
    }

    /// Depth map in millimetres, the usual RGB-D driver output
    pub fn from_millimetres(width: usize, height: usize, data: Vec<u16>) -> Result<Self, ImageError> {
        Self::new(width, height, data, 0.001)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn as_raw(&self) -> &[u16] {
        &self.data
    }

    #[inline]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u16 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u16) {
        self.data[y * self.width + x] = value;
    }

    /// Converts a raw sample to metres
    #[inline]
    pub fn to_metres(&self, raw: u16) -> f64 {
        raw as f64 * self.scale
    }
}

/// One level of a scale pyramid; level coordinates times `scale` give level-0 pixels
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidLevel {
    pub image: GrayImage,
    pub scale: f32,
}

/// Oriented multi-scale keypoint with subpixel position (level-0 pixels)
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Diameter of the described neighbourhood
    pub size: f32,
    /// Orientation, radians
    pub angle: f32,
    pub response: f32,
    /// Pyramid level the keypoint was detected on
    pub octave: i32,
    pub class_id: i32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            size: 31.0,
            angle: 0.0,
            response: 0.0,
            octave: 0,
            class_id: -1,
        }
    }
}

pub const DESCRIPTOR_BYTES: usize = 32;

/// 256-bit binary descriptor = 32 bytes
pub type Descriptor = [u8; DESCRIPTOR_BYTES];

/// Number of differing bits between two descriptors
#[inline]
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Pinhole intrinsics, pixels
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    pub fn is_valid(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy].iter().all(|v| v.is_finite())
            && self.fx > 0.0
            && self.fy > 0.0
    }

    /// Pixel + metric depth to a point in the camera optical frame
    #[inline]
    pub fn unproject(&self, px: f64, py: f64, depth: f64) -> [f64; 3] {
        [
            (px - self.cx) * depth / self.fx,
            (py - self.cy) * depth / self.fy,
            depth,
        ]
    }

    /// Point in the optical frame to pixel; `None` behind the camera
    #[inline]
    pub fn project(&self, p: [f64; 3]) -> Option<[f64; 2]> {
        if p[2] <= f64::EPSILON {
            return None;
        }
        Some([
            self.fx * p[0] / p[2] + self.cx,
            self.fy * p[1] / p[2] + self.cy,
        ])
    }
}

/// ORB detection parameters shared by the detector and the descriptor stage
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrbConfig {
    /// Maximum number of keypoints retained over all levels
    pub max_features: usize,
    /// Pyramid decimation ratio, > 1
    pub scale_factor: f32,
    pub n_levels: usize,
    /// FAST intensity threshold
    pub threshold: u8,
    /// Orientation/descriptor patch size, odd
    pub patch_size: usize,
    pub n_threads: usize,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            max_features: 500,
            scale_factor: 1.2,
            n_levels: 8,
            threshold: 20,
            patch_size: 31,
            n_threads: num_cpus::get().max(1),
        }
    }
}

/// Initialize Rayon thread pool with the specified number of threads
pub fn init_thread_pool(n_threads: usize) -> Result<(), rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build_global()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_buffer_validation() {
        assert!(GrayImage::new(4, 4, vec![0; 16]).is_ok());
        assert!(matches!(
            GrayImage::new(4, 4, vec![0; 15]),
            Err(ImageError::InvalidImageData { expected_len: 16, actual_len: 15 })
        ));
        assert!(matches!(
            GrayImage::new(0, 4, vec![]),
            Err(ImageError::InvalidImageSize { .. })
        ));
    }

    #[test]
    fn test_depth_scale_validation() {
        assert!(DepthImage::new(2, 2, vec![0; 4], 0.0).is_err());
        assert!(DepthImage::new(2, 2, vec![0; 4], f64::NAN).is_err());
        let depth = DepthImage::from_millimetres(2, 2, vec![0, 1500, 0, 0]).unwrap();
        assert_eq!(depth.scale(), 0.001);
        assert!((depth.to_metres(depth.get(1, 0)) - 1.5).abs() < 1e-12);
        assert!((depth.to_metres(1870) - 1.87).abs() < 1e-12);
    }

    #[test]
    fn test_hamming_distance() {
        let a = [0u8; DESCRIPTOR_BYTES];
        let mut b = [0u8; DESCRIPTOR_BYTES];
        assert_eq!(hamming_distance(&a, &b), 0);
        b[0] = 0b1011;
        b[31] = 0xff;
        assert_eq!(hamming_distance(&a, &b), 11);
    }

    #[test]
    fn test_project_unproject() {
        let k = CameraIntrinsics::new(525.0, 520.0, 319.5, 239.5);
        let p = k.unproject(400.0, 100.0, 2.0);
        let uv = k.project(p).unwrap();
        assert!((uv[0] - 400.0).abs() < 1e-9);
        assert!((uv[1] - 100.0).abs() < 1e-9);
        assert!(k.project([0.0, 0.0, -1.0]).is_none());
    }
}
