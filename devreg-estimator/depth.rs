//! Repair of missing depth samples at matched fixed-camera pixels.

use devreg_core::DepthImage;

/// Two-stage search for a usable depth value around a zero sample.
///
/// First the nearest non-zero pixel (Euclidean distance, bounded by
/// `max_search_radius`) is located; then the lowest non-zero depth within the
/// ring between that distance and `ring_width` pixels further out is taken.
/// The depth grid is never modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthResolver {
    max_search_radius: usize,
    ring_width: usize,
}

impl Default for DepthResolver {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEARCH_RADIUS, Self::DEFAULT_RING_WIDTH)
    }
}

impl DepthResolver {
    pub const DEFAULT_SEARCH_RADIUS: usize = 100;
    pub const DEFAULT_RING_WIDTH: usize = 10;

    pub fn new(max_search_radius: usize, ring_width: usize) -> Self {
        Self { max_search_radius, ring_width }
    }

    pub fn max_search_radius(&self) -> usize {
        self.max_search_radius
    }

    pub fn ring_width(&self) -> usize {
        self.ring_width
    }

    /// Raw depth at the pixel nearest to (x, y), repaired if zero.
    /// `None` when the pixel lies outside the grid or nothing non-zero is in reach.
    pub fn resolve(&self, depth: &DepthImage, x: f32, y: f32) -> Option<u16> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let px = x.round() as i64;
        let py = y.round() as i64;
        if !depth.contains(px, py) {
            return None;
        }

        let raw = depth.get(px as usize, py as usize);
        if raw != 0 {
            return Some(raw);
        }

        let (nx, ny) = self.nearest_non_zero(depth, px, py)?;
        let dist = (((nx - px).pow(2) + (ny - py).pow(2)) as f64).sqrt();
        self.lowest_in_ring(depth, px, py, dist, dist + self.ring_width as f64)
    }

    /// Nearest non-zero pixel by Euclidean distance; ties go to the first in
    /// row-major order.
    pub fn nearest_non_zero(&self, depth: &DepthImage, px: i64, py: i64) -> Option<(i64, i64)> {
        let max_r = self.max_search_radius as i64;
        let max_r2 = max_r * max_r;
        let mut best: Option<(i64, i64, i64)> = None; // (dist², y, x)

        for r in 1..=max_r {
            // Every pixel on Chebyshev ring r is at least r away
            if let Some((d2, _, _)) = best {
                if r * r > d2 {
                    break;
                }
            }
            for (x, y) in square_ring(px, py, r) {
                if !depth.contains(x, y) || depth.get(x as usize, y as usize) == 0 {
                    continue;
                }
                let d2 = (x - px).pow(2) + (y - py).pow(2);
                if d2 > max_r2 {
                    continue;
                }
                let candidate = (d2, y, x);
                if best.map_or(true, |b| candidate < b) {
                    best = Some(candidate);
                }
            }
        }

        best.map(|(_, y, x)| (x, y))
    }

    /// Lowest non-zero value with `inner <= distance <= outer` from (px, py)
    pub fn lowest_in_ring(&self, depth: &DepthImage, px: i64, py: i64, inner: f64, outer: f64) -> Option<u16> {
        let reach = outer.ceil() as i64;
        let (inner2, outer2) = (inner * inner, outer * outer);
        let mut lowest: Option<u16> = None;

        for y in (py - reach).max(0)..=(py + reach).min(depth.height() as i64 - 1) {
            for x in (px - reach).max(0)..=(px + reach).min(depth.width() as i64 - 1) {
                let d2 = ((x - px).pow(2) + (y - py).pow(2)) as f64;
                // Small slack so the first-stage pixel itself always counts
                if d2 + 1e-9 < inner2 || d2 > outer2 + 1e-9 {
                    continue;
                }
                let v = depth.get(x as usize, y as usize);
                if v != 0 && lowest.map_or(true, |l| v < l) {
                    lowest = Some(v);
                }
            }
        }
        lowest
    }
}

/// Pixels at Chebyshev distance exactly `r` from (cx, cy)
fn square_ring(cx: i64, cy: i64, r: i64) -> impl Iterator<Item = (i64, i64)> {
    (-r..=r).flat_map(move |dy| {
        let xs: Box<dyn Iterator<Item = i64>> = if dy.abs() == r {
            Box::new(-r..=r)
        } else {
            Box::new([-r, r].into_iter())
        };
        xs.map(move |dx| (cx + dx, cy + dy))
    })
}
