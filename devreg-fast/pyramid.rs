use devreg_core::{GrayImage, PyramidLevel};
use rayon::prelude::*;
use crate::error::{FastError, FastResult};
use crate::types::ScaleLevel;

/// Image pyramid operations for multi-scale feature detection
pub struct ImagePyramid;

impl ImagePyramid {
    /// Generate scale levels for image pyramid and split `max_features` across them.
    ///
    /// Level `i` is `scale_factor^i` smaller than the base. Generation stops early when a
    /// level would be smaller than `min_size` on either side. The budget decays
    /// geometrically with the level area ratio so coarse levels get fewer keypoints.
    pub fn generate_scale_levels(
        width: usize,
        height: usize,
        scale_factor: f32,
        n_levels: usize,
        max_features: usize,
        min_size: usize,
    ) -> FastResult<Vec<ScaleLevel>> {
        if !scale_factor.is_finite() || scale_factor <= 1.0 {
            return Err(FastError::InvalidScaleFactor(scale_factor));
        }
        if n_levels == 0 || n_levels > 32 {
            return Err(FastError::InvalidLevelCount(n_levels));
        }
        if max_features == 0 {
            return Err(FastError::InvalidFeatureBudget(max_features));
        }

        let mut levels = Vec::with_capacity(n_levels);
        let mut current_scale = 1.0f32;

        for level in 0..n_levels {
            let scaled_width = ((width as f32) / current_scale).round() as usize;
            let scaled_height = ((height as f32) / current_scale).round() as usize;

            if scaled_width < min_size || scaled_height < min_size {
                break;
            }

            levels.push(ScaleLevel {
                level,
                scale: current_scale,
                width: scaled_width,
                height: scaled_height,
                budget: 0,
            });

            current_scale *= scale_factor;
        }

        if levels.is_empty() {
            return Err(FastError::ImageTooSmall { width, height, min_size });
        }

        Self::distribute_budget(&mut levels, scale_factor, max_features);
        Ok(levels)
    }

    fn distribute_budget(levels: &mut [ScaleLevel], scale_factor: f32, max_features: usize) {
        let factor = 1.0 / scale_factor as f64;
        let n = levels.len() as i32;
        let first = max_features as f64 * (1.0 - factor) / (1.0 - factor.powi(n));

        let mut assigned = 0usize;
        let mut share = first;
        let last = levels.len() - 1;
        for (i, level) in levels.iter_mut().enumerate() {
            if i == last {
                level.budget = max_features.saturating_sub(assigned);
            } else {
                level.budget = (share.round() as usize).min(max_features - assigned);
                assigned += level.budget;
                share *= factor;
            }
        }
    }

    /// Build image pyramid from base image
    pub fn build_image_pyramid(img: &GrayImage, scale_levels: &[ScaleLevel]) -> FastResult<Vec<PyramidLevel>> {
        scale_levels
            .iter()
            .map(|scale_level| {
                let image = if scale_level.level == 0 {
                    img.clone()
                } else {
                    Self::downsample_image(img, scale_level.width, scale_level.height)?
                };
                Ok(PyramidLevel { image, scale: scale_level.scale })
            })
            .collect()
    }

    /// Downsample image using bilinear interpolation at pixel centres
    fn downsample_image(img: &GrayImage, target_width: usize, target_height: usize) -> FastResult<GrayImage> {
        let (src_width, src_height) = img.dimensions();
        let x_ratio = src_width as f32 / target_width as f32;
        let y_ratio = src_height as f32 / target_height as f32;

        let mut downsampled = vec![0u8; target_width * target_height];
        downsampled
            .par_chunks_mut(target_width)
            .enumerate()
            .for_each(|(y, row)| {
                let src_y = ((y as f32 + 0.5) * y_ratio - 0.5).max(0.0);
                for (x, out) in row.iter_mut().enumerate() {
                    let src_x = ((x as f32 + 0.5) * x_ratio - 0.5).max(0.0);
                    *out = Self::bilinear_sample(img, src_x, src_y).round().clamp(0.0, 255.0) as u8;
                }
            });

        Ok(GrayImage::new(target_width, target_height, downsampled)?)
    }

    /// Sample image at fractional coordinates using bilinear interpolation
    pub fn bilinear_sample(img: &GrayImage, x: f32, y: f32) -> f32 {
        let (width, height) = img.dimensions();
        let x1 = (x.floor() as usize).min(width - 1);
        let y1 = (y.floor() as usize).min(height - 1);
        let x2 = (x1 + 1).min(width - 1);
        let y2 = (y1 + 1).min(height - 1);

        let fx = (x - x1 as f32).clamp(0.0, 1.0);
        let fy = (y - y1 as f32).clamp(0.0, 1.0);

        let p11 = img.get(x1, y1) as f32;
        let p12 = img.get(x2, y1) as f32;
        let p21 = img.get(x1, y2) as f32;
        let p22 = img.get(x2, y2) as f32;

        let interpolated_top = p11 * (1.0 - fx) + p12 * fx;
        let interpolated_bottom = p21 * (1.0 - fx) + p22 * fx;

        interpolated_top * (1.0 - fy) + interpolated_bottom * fy
    }
}
