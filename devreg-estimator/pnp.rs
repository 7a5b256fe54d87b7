//! Robust perspective-n-point solving.
//!
//! Minimal hypotheses come from a law-of-cosines P3P solver on three points,
//! disambiguated by a fourth. RANSAC keeps the hypothesis with the largest
//! consensus, an optional seed pose competes as the initial hypothesis, and
//! the winner is polished with Levenberg-Marquardt over its inliers.

use devreg_core::CameraIntrinsics;
use nalgebra::{DMatrix, Matrix2x3, Matrix2x6, Matrix3, Matrix6, Rotation3, Schur, UnitQuaternion, Vector2, Vector3, Vector6};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, trace};

use crate::error::SolverError;
use crate::frames::Pose;
use crate::gate::{ReprojectionAveraging, MIN_PNP_POINTS};

const LM_MAX_ITERATIONS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnpParams {
    /// Inlier threshold, pixels
    pub reprojection_error_px: f64,
    pub confidence: f64,
    pub max_iterations: usize,
    /// RNG seed for sample selection
    pub seed: u64,
}

impl Default for PnpParams {
    fn default() -> Self {
        Self {
            reprojection_error_px: 5.0,
            confidence: 0.99,
            max_iterations: 1000,
            seed: 0,
        }
    }
}

/// Best pose found by the solver.
///
/// `pose` maps points from the fixed camera's optical frame into the device
/// camera's optical frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PnpSolution {
    pub pose: Pose,
    /// Indices into the correspondence list, ascending
    pub inliers: Vec<usize>,
    /// Sum of inlier reprojection distances, pixels
    pub inlier_error_sum: f64,
    pub correspondences: usize,
    pub iterations: usize,
    /// The seed pose won the consensus
    pub from_seed: bool,
    pub refined: bool,
}

impl PnpSolution {
    pub fn is_valid(&self) -> bool {
        !self.inliers.is_empty() && self.pose.is_valid()
    }

    pub fn reprojection_error(&self, averaging: ReprojectionAveraging) -> f64 {
        averaging.average(self.inlier_error_sum, self.inliers.len(), self.correspondences)
    }
}

/// Pixel distance between `pixel` and the projection of `point`; infinite behind the camera
pub fn reprojection_residual(pose: &Pose, k: &CameraIntrinsics, point: &Vector3<f64>, pixel: &Vector2<f64>) -> f64 {
    let pc = pose.transform_point(point);
    match k.project([pc.x, pc.y, pc.z]) {
        Some([u, v]) => (u - pixel.x).hypot(v - pixel.y),
        None => f64::INFINITY,
    }
}

fn consensus(
    pose: &Pose,
    k: &CameraIntrinsics,
    points: &[Vector3<f64>],
    pixels: &[Vector2<f64>],
    threshold: f64,
) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut sum = 0.0;
    for (i, (p, px)) in points.iter().zip(pixels).enumerate() {
        let err = reprojection_residual(pose, k, p, px);
        if err <= threshold {
            inliers.push(i);
            sum += err;
        }
    }
    (inliers, sum)
}

/// RANSAC trials needed to draw one all-inlier sample with `confidence`
fn required_iterations(inlier_ratio: f64, confidence: f64, max_iterations: usize) -> usize {
    let all_inlier = inlier_ratio.powi(MIN_PNP_POINTS as i32);
    if all_inlier >= 1.0 - f64::EPSILON {
        return 0;
    }
    let denom = (1.0 - all_inlier).ln();
    if denom > -f64::EPSILON {
        return max_iterations;
    }
    let n = ((1.0 - confidence).ln() / denom).ceil();
    if n.is_finite() && n >= 0.0 {
        (n as usize).min(max_iterations)
    } else {
        max_iterations
    }
}

/// Robust PnP over `points` (fixed camera frame) and `pixels` (device image).
///
/// Fails only for mismatched or too few inputs; otherwise returns the best
/// pose found, with empty inliers when every sample was degenerate.
pub fn solve_pnp_ransac(
    points: &[Vector3<f64>],
    pixels: &[Vector2<f64>],
    k: &CameraIntrinsics,
    params: &PnpParams,
    seed_pose: Option<&Pose>,
) -> Result<PnpSolution, SolverError> {
    if points.len() != pixels.len() {
        return Err(SolverError::LengthMismatch { points: points.len(), pixels: pixels.len() });
    }
    let n = points.len();
    if n < MIN_PNP_POINTS {
        return Err(SolverError::InsufficientCorrespondences { found: n });
    }
    if !k.is_valid() {
        return Err(SolverError::InvalidIntrinsics);
    }

    let threshold = params.reprojection_error_px;
    let mut best: Option<(Pose, Vec<usize>, f64)> = None;
    let mut from_seed = false;
    let mut needed = params.max_iterations;

    if let Some(seed) = seed_pose.filter(|p| p.is_valid()) {
        let (inliers, sum) = consensus(seed, k, points, pixels, threshold);
        trace!(inliers = inliers.len(), "seed hypothesis");
        if !inliers.is_empty() {
            needed = required_iterations(inliers.len() as f64 / n as f64, params.confidence, params.max_iterations);
        }
        best = Some((*seed, inliers, sum));
        from_seed = true;
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut iterations = 0;
    while iterations < needed {
        iterations += 1;
        let sample = rand::seq::index::sample(&mut rng, n, MIN_PNP_POINTS).into_vec();
        let Some(hypothesis) = minimal_hypothesis(points, pixels, k, &sample) else {
            continue;
        };
        let (inliers, sum) = consensus(&hypothesis, k, points, pixels, threshold);
        let improves = match &best {
            None => true,
            Some((_, best_inliers, best_sum)) => {
                inliers.len() > best_inliers.len() || (inliers.len() == best_inliers.len() && sum < *best_sum)
            }
        };
        if improves {
            if !inliers.is_empty() {
                needed = required_iterations(inliers.len() as f64 / n as f64, params.confidence, params.max_iterations);
            }
            best = Some((hypothesis, inliers, sum));
            from_seed = false;
        }
    }

    let Some((pose, inliers, sum)) = best else {
        debug!(iterations, "every PnP sample was degenerate");
        return Ok(PnpSolution {
            pose: Pose::identity(),
            inliers: Vec::new(),
            inlier_error_sum: 0.0,
            correspondences: n,
            iterations,
            from_seed: false,
            refined: false,
        });
    };

    let mut solution = PnpSolution {
        pose,
        inliers,
        inlier_error_sum: sum,
        correspondences: n,
        iterations,
        from_seed,
        refined: false,
    };

    if solution.inliers.len() >= MIN_PNP_POINTS {
        let refined = refine_pose(&solution.pose, k, points, pixels, &solution.inliers);
        let (inliers, sum) = consensus(&refined, k, points, pixels, threshold);
        if inliers.len() >= solution.inliers.len() {
            solution.pose = refined;
            solution.inliers = inliers;
            solution.inlier_error_sum = sum;
            solution.refined = true;
        }
    }

    debug!(
        correspondences = n,
        inliers = solution.inliers.len(),
        iterations,
        from_seed = solution.from_seed,
        "PnP RANSAC finished"
    );
    Ok(solution)
}

/// P3P on the first three sample indices, the candidate that best explains the fourth
fn minimal_hypothesis(
    points: &[Vector3<f64>],
    pixels: &[Vector2<f64>],
    k: &CameraIntrinsics,
    sample: &[usize],
) -> Option<Pose> {
    let world = [points[sample[0]], points[sample[1]], points[sample[2]]];
    let image = [pixels[sample[0]], pixels[sample[1]], pixels[sample[2]]];
    let (check_point, check_pixel) = (&points[sample[3]], &pixels[sample[3]]);

    p3p(&world, &image, k)
        .into_iter()
        .map(|pose| (reprojection_residual(&pose, k, check_point, check_pixel), pose))
        .filter(|(err, _)| err.is_finite())
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, pose)| pose)
}

fn bearing(k: &CameraIntrinsics, pixel: &Vector2<f64>) -> Vector3<f64> {
    Vector3::new((pixel.x - k.cx) / k.fx, (pixel.y - k.cy) / k.fy, 1.0).normalize()
}

fn poly_mul(a: &[f64; 5], b: &[f64; 5]) -> [f64; 5] {
    let mut out = [0.0; 5];
    for i in 0..5 {
        for j in 0..5 - i {
            out[i + j] += a[i] * b[j];
        }
    }
    out
}

/// Law-of-cosines P3P: up to four poses mapping `world` onto the rays of `image`.
///
/// With distances x, y = u·x, z = v·x along the three rays, eliminating v
/// leaves a quartic in u whose real roots give the candidate depths.
pub fn p3p(world: &[Vector3<f64>; 3], image: &[Vector2<f64>; 3], k: &CameraIntrinsics) -> Vec<Pose> {
    let bearings = image.map(|px| bearing(k, &px));

    let a = (world[1] - world[2]).norm();
    let b = (world[0] - world[2]).norm();
    let c = (world[0] - world[1]).norm();
    if a <= 1e-9 || b <= 1e-9 || c <= 1e-9 {
        return Vec::new();
    }

    let cos_alpha = bearings[1].dot(&bearings[2]);
    let cos_beta = bearings[0].dot(&bearings[2]);
    let cos_gamma = bearings[0].dot(&bearings[1]);

    let (a2, b2, c2) = (a * a, b * b, c * c);
    let d = (b2 - a2) / c2;
    let e = b2 / c2;

    let n_poly = [1.0 - d, 2.0 * d * cos_gamma, -(1.0 + d), 0.0, 0.0];
    let d_poly = [2.0 * cos_beta, -2.0 * cos_alpha, 0.0, 0.0, 0.0];
    let e_poly = [1.0 - e, 2.0 * e * cos_gamma, -e, 0.0, 0.0];

    let n2 = poly_mul(&n_poly, &n_poly);
    let nd = poly_mul(&n_poly, &d_poly);
    let ed2 = poly_mul(&e_poly, &poly_mul(&d_poly, &d_poly));
    let quartic: Vec<f64> = (0..5).map(|i| n2[i] - 2.0 * cos_beta * nd[i] + ed2[i]).collect();

    let mut poses = Vec::new();
    for u in real_polynomial_roots(&quartic) {
        let den = d_poly[0] + d_poly[1] * u;
        let k_val = 1.0 + u * u - 2.0 * u * cos_gamma;
        if den.abs() < 1e-12 || k_val <= 1e-12 {
            continue;
        }
        let v = (n_poly[0] + n_poly[1] * u + n_poly[2] * u * u) / den;
        let x = (c2 / k_val).sqrt();
        let (y, z) = (u * x, v * x);
        if x <= 0.0 || y <= 0.0 || z <= 0.0 {
            continue;
        }
        let camera = [bearings[0] * x, bearings[1] * y, bearings[2] * z];
        if let Some(pose) = pose_from_points(world, &camera) {
            poses.push(pose);
        }
    }
    poses
}

/// Rigid alignment (Kabsch) returning the pose that maps `world` onto `camera`
pub fn pose_from_points(world: &[Vector3<f64>], camera: &[Vector3<f64>]) -> Option<Pose> {
    if world.len() != camera.len() || world.len() < 3 {
        return None;
    }
    let n = world.len() as f64;
    let c_w = world.iter().sum::<Vector3<f64>>() / n;
    let c_c = camera.iter().sum::<Vector3<f64>>() / n;

    let mut h = Matrix3::zeros();
    for (pw, pc) in world.iter().zip(camera) {
        h += (pc - c_c) * (pw - c_w).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        r = u_fix * v_t;
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let translation = c_c - rotation * c_w;
    Some(Pose::from_parts(translation, rotation))
}

/// Real roots of `coeffs[0] + coeffs[1]·x + ...`, ascending and deduplicated.
///
/// Companion-matrix eigenvalues, each polished with two Newton steps.
pub fn real_polynomial_roots(coeffs: &[f64]) -> Vec<f64> {
    let scale = coeffs.iter().fold(0.0f64, |m, c| m.max(c.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return Vec::new();
    }
    let mut degree = coeffs.len().saturating_sub(1);
    while degree > 0 && coeffs[degree].abs() <= 1e-12 * scale {
        degree -= 1;
    }
    match degree {
        0 => return Vec::new(),
        1 => return vec![-coeffs[0] / coeffs[1]],
        _ => {}
    }

    let lead = coeffs[degree];
    let mut companion = DMatrix::<f64>::zeros(degree, degree);
    for j in 0..degree {
        companion[(0, j)] = -coeffs[degree - 1 - j] / lead;
    }
    for i in 1..degree {
        companion[(i, i - 1)] = 1.0;
    }

    let eigenvalues = Schur::new(companion).complex_eigenvalues();
    let eval = |x: f64| coeffs[..=degree].iter().rev().fold(0.0, |acc, c| acc * x + c);
    let deriv = |x: f64| {
        (1..=degree)
            .rev()
            .fold(0.0, |acc, i| acc * x + i as f64 * coeffs[i])
    };

    let mut roots: Vec<f64> = eigenvalues
        .iter()
        .filter(|z| z.im.abs() < 1e-8 * (1.0 + z.re.abs()))
        .map(|z| {
            let mut x = z.re;
            for _ in 0..2 {
                let dp = deriv(x);
                if dp.abs() > f64::EPSILON {
                    x -= eval(x) / dp;
                }
            }
            x
        })
        .filter(|x| x.is_finite())
        .collect();

    roots.sort_by(|a, b| a.total_cmp(b));
    roots.dedup_by(|a, b| (*a - *b).abs() < 1e-10);
    roots
}

fn squared_error(pose: &Pose, k: &CameraIntrinsics, points: &[Vector3<f64>], pixels: &[Vector2<f64>], indices: &[usize]) -> f64 {
    indices
        .iter()
        .map(|&i| reprojection_residual(pose, k, &points[i], &pixels[i]).powi(2))
        .sum()
}

/// Levenberg-Marquardt on the summed squared reprojection error of `indices`.
///
/// Rotation updates are applied on the left: `R ← exp(ω)·R`, `t ← t + δt`.
pub fn refine_pose(
    initial: &Pose,
    k: &CameraIntrinsics,
    points: &[Vector3<f64>],
    pixels: &[Vector2<f64>],
    indices: &[usize],
) -> Pose {
    let mut pose = *initial;
    let mut cost = squared_error(&pose, k, points, pixels, indices);
    if !cost.is_finite() {
        return pose;
    }
    let mut lambda = 1e-3;

    for _ in 0..LM_MAX_ITERATIONS {
        let mut h = Matrix6::<f64>::zeros();
        let mut g = Vector6::<f64>::zeros();

        for &i in indices {
            let rotated = pose.rotation * points[i];
            let pc = rotated + pose.translation;
            let inv_z = 1.0 / pc.z;
            let residual = Vector2::new(
                k.fx * pc.x * inv_z + k.cx - pixels[i].x,
                k.fy * pc.y * inv_z + k.cy - pixels[i].y,
            );
            let j_proj = Matrix2x3::new(
                k.fx * inv_z, 0.0, -k.fx * pc.x * inv_z * inv_z,
                0.0, k.fy * inv_z, -k.fy * pc.y * inv_z * inv_z,
            );
            let mut j = Matrix2x6::<f64>::zeros();
            j.fixed_view_mut::<2, 3>(0, 0).copy_from(&(-j_proj * rotated.cross_matrix()));
            j.fixed_view_mut::<2, 3>(0, 3).copy_from(&j_proj);

            h += j.transpose() * j;
            g += j.transpose() * residual;
        }

        let mut damped = h;
        for d in 0..6 {
            damped[(d, d)] += lambda * h[(d, d)].max(1e-9);
        }
        let Some(delta) = damped.cholesky().map(|c| c.solve(&(-g))) else {
            lambda *= 10.0;
            continue;
        };

        let omega = Vector3::new(delta[0], delta[1], delta[2]);
        let candidate = Pose::from_parts(
            pose.translation + Vector3::new(delta[3], delta[4], delta[5]),
            UnitQuaternion::from_scaled_axis(omega) * pose.rotation,
        );
        let candidate_cost = squared_error(&candidate, k, points, pixels, indices);

        if candidate_cost < cost {
            let gain = cost - candidate_cost;
            pose = candidate;
            cost = candidate_cost;
            lambda = (lambda * 0.1).max(1e-12);
            if gain <= 1e-14 * (1.0 + cost) || delta.norm() < 1e-12 {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e10 {
                break;
            }
        }
    }
    pose
}
