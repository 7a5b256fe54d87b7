//! Steered BRIEF descriptors and brute-force Hamming matching.

pub mod matcher;

pub use matcher::{distance_range, filter_matches, match_descriptors, Match};

use devreg_core::{Descriptor, GrayImage, Keypoint, PyramidLevel, DESCRIPTOR_BYTES};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Number of intensity comparisons per descriptor
pub const DESCRIPTOR_BITS: usize = DESCRIPTOR_BYTES * 8;

/// Fixed seed so every generator builds the same sampling pattern
const PATTERN_SEED: u64 = 0x0b1e_f00d;

#[derive(Debug, Clone, PartialEq)]
pub enum BriefError {
    InvalidPatchSize(usize),
    InvalidOctave { octave: i32, levels: usize },
    EmptyPyramid,
}

impl std::fmt::Display for BriefError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BriefError::InvalidPatchSize(p) => {
                write!(f, "Invalid BRIEF patch size: {} (must be odd and >= 7)", p)
            }
            BriefError::InvalidOctave { octave, levels } => {
                write!(f, "Keypoint octave {} outside pyramid with {} levels", octave, levels)
            }
            BriefError::EmptyPyramid => write!(f, "Cannot describe keypoints without pyramid levels"),
        }
    }
}

impl std::error::Error for BriefError {}

pub type BriefResult<T> = Result<T, BriefError>;

/// Rotated BRIEF over a smoothed pyramid level.
///
/// The 256 test pairs are drawn once, uniformly inside a disc small enough
/// that any rotation of the pattern stays within the keypoint's patch.
#[derive(Debug, Clone)]
pub struct BriefGenerator {
    patch_size: usize,
    pairs: Vec<[(f32, f32); 2]>,
}

impl BriefGenerator {
    pub fn new(patch_size: usize) -> BriefResult<Self> {
        if patch_size % 2 == 0 || patch_size < 7 {
            return Err(BriefError::InvalidPatchSize(patch_size));
        }
        // One pixel for the box filter, one for bilinear interpolation
        let radius = (patch_size / 2) as f32 - 2.0;

        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut sample_point = || loop {
            let x: f32 = rng.gen_range(-radius..=radius);
            let y: f32 = rng.gen_range(-radius..=radius);
            if x * x + y * y <= radius * radius {
                break (x, y);
            }
        };

        let mut pairs = Vec::with_capacity(DESCRIPTOR_BITS);
        while pairs.len() < DESCRIPTOR_BITS {
            let a = sample_point();
            let b = sample_point();
            if (a.0 - b.0).abs() + (a.1 - b.1).abs() >= 1.0 {
                pairs.push([a, b]);
            }
        }

        Ok(Self { patch_size, pairs })
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Describes every keypoint on the pyramid level named by its `octave`.
    ///
    /// Output order and length match `kps`.
    pub fn generate_descriptors(&self, pyramid: &[PyramidLevel], kps: &[Keypoint]) -> BriefResult<Vec<Descriptor>> {
        if pyramid.is_empty() {
            return Err(BriefError::EmptyPyramid);
        }
        if let Some(kp) = kps.iter().find(|kp| kp.octave < 0 || kp.octave as usize >= pyramid.len()) {
            return Err(BriefError::InvalidOctave { octave: kp.octave, levels: pyramid.len() });
        }

        let smoothed: Vec<GrayImage> = pyramid.par_iter().map(|level| box_blur_3x3(&level.image)).collect();

        Ok(kps
            .par_iter()
            .map(|kp| {
                let octave = kp.octave as usize;
                let scale = pyramid[octave].scale;
                self.describe(&smoothed[octave], kp.x / scale, kp.y / scale, kp.angle)
            })
            .collect())
    }

    /// Descriptor at level coordinates (cx, cy) steered by `angle`
    pub fn describe(&self, img: &GrayImage, cx: f32, cy: f32, angle: f32) -> Descriptor {
        let (s, c) = angle.sin_cos();
        let mut d = [0u8; DESCRIPTOR_BYTES];

        for (i, [(dx1, dy1), (dx2, dy2)]) in self.pairs.iter().enumerate() {
            let val1 = bilinear_sample(img, cx + c * dx1 - s * dy1, cy + s * dx1 + c * dy1);
            let val2 = bilinear_sample(img, cx + c * dx2 - s * dy2, cy + s * dx2 + c * dy2);
            d[i / 8] |= ((val1 < val2) as u8) << (i % 8);
        }
        d
    }
}

/// 3x3 mean filter with clamped borders
fn box_blur_3x3(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut out = img.clone();
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0u32;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    sum += img.get_clamped(x as i32 + dx, y as i32 + dy) as u32;
                }
            }
            out.set(x, y, ((sum + 4) / 9) as u8);
        }
    }
    out
}

/// Bilinear interpolation, clamped to the image border
fn bilinear_sample(img: &GrayImage, x: f32, y: f32) -> f32 {
    let (w, h) = img.dimensions();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let dx = x - x0 as f32;
    let dy = y - y0 as f32;

    let top = img.get(x0, y0) as f32 * (1.0 - dx) + img.get(x1, y0) as f32 * dx;
    let bottom = img.get(x0, y1) as f32 * (1.0 - dx) + img.get(x1, y1) as f32 * dx;
    top * (1.0 - dy) + bottom * dy
}
