//! Constant-acceleration Kalman filter for device position smoothing
//!
//! State vector: [x, y, z, vx, vy, vz, ax, ay, az]ᵀ, measurement: [x, y, z]ᵀ.
//! Updates arrive at irregular intervals, so F and Q are rebuilt per step.

use nalgebra::{SMatrix, SVector, Vector3};
use tracing::trace;

use crate::error::FilterError;
use crate::frames::Pose;

/// 9-element state vector type
pub type State = SVector<f64, 9>;
/// 9x9 matrix type
pub type Matrix9 = SMatrix<f64, 9, 9>;
/// 3x9 matrix type (observation)
type Matrix3x9 = SMatrix<f64, 3, 9>;
/// 9x3 matrix type (noise input, Kalman gain)
type Matrix9x3 = SMatrix<f64, 9, 3>;
type Matrix3 = SMatrix<f64, 3, 3>;

const INITIAL_COVARIANCE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct PositionKalmanFilter {
    state: State,
    covariance: Matrix9,
    measurement_variance: f64,
    process_noise_factor: f64,
    initialized: bool,
}

fn check_noise(name: &'static str, value: f64) -> Result<(), FilterError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(FilterError::InvalidNoise { name, value });
    }
    Ok(())
}

fn check_time_step(dt: f64) -> Result<(), FilterError> {
    if !dt.is_finite() || dt < 0.0 {
        return Err(FilterError::InvalidTimeStep(dt));
    }
    Ok(())
}

fn is_finite(state: &State, covariance: &Matrix9) -> bool {
    state.iter().chain(covariance.iter()).all(|v| v.is_finite())
}

impl PositionKalmanFilter {
    pub fn new(measurement_variance: f64, process_noise_factor: f64) -> Result<Self, FilterError> {
        check_noise("measurement_variance", measurement_variance)?;
        check_noise("process_noise_factor", process_noise_factor)?;
        Ok(Self {
            state: State::zeros(),
            covariance: Matrix9::identity() * INITIAL_COVARIANCE,
            measurement_variance,
            process_noise_factor,
            initialized: false,
        })
    }

    /// Kinematic transition for time step `dt`
    ///
    /// ```text
    /// | I  dt·I  dt²/2·I |
    /// | 0  I     dt·I    |
    /// | 0  0     I       |
    /// ```
    pub fn transition_matrix(dt: f64) -> Matrix9 {
        let half_dt2 = 0.5 * dt * dt;
        let mut f = Matrix9::identity();
        for i in 0..3 {
            f[(i, 3 + i)] = dt;
            f[(i, 6 + i)] = half_dt2;
            f[(3 + i, 6 + i)] = dt;
        }
        f
    }

    /// White noise on acceleration: Q = G·Gᵀ·factor with G = [dt²/2, dt, 1] per axis
    pub fn process_noise(&self, dt: f64) -> Matrix9 {
        let mut g = Matrix9x3::zeros();
        for i in 0..3 {
            g[(i, i)] = 0.5 * dt * dt;
            g[(3 + i, i)] = dt;
            g[(6 + i, i)] = 1.0;
        }
        g * g.transpose() * self.process_noise_factor
    }

    fn observation_matrix() -> Matrix3x9 {
        let mut h = Matrix3x9::zeros();
        for i in 0..3 {
            h[(i, i)] = 1.0;
        }
        h
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Feeds one position measurement taken `dt` seconds after the previous
    /// one and returns the corrected position. The first measurement
    /// initializes the state with zero velocity and acceleration.
    pub fn update(&mut self, measurement: &Vector3<f64>, dt: f64) -> Result<Vector3<f64>, FilterError> {
        self.update_with_variance(measurement, dt, self.measurement_variance)
    }

    /// As [`update`](Self::update) with a one-off measurement variance
    pub fn update_with_variance(
        &mut self,
        measurement: &Vector3<f64>,
        dt: f64,
        variance: f64,
    ) -> Result<Vector3<f64>, FilterError> {
        check_noise("measurement_variance", variance)?;
        if !measurement.iter().all(|v| v.is_finite()) {
            return Err(FilterError::NonFiniteMeasurement);
        }
        if !self.initialized {
            self.state = State::zeros();
            self.state.fixed_rows_mut::<3>(0).copy_from(measurement);
            self.initialized = true;
            trace!(?measurement, "kalman filter initialized");
            return Ok(*measurement);
        }

        let (predicted, predicted_cov) = self.propagate(dt)?;

        let h = Self::observation_matrix();
        let r = Matrix3::identity() * variance;
        let innovation = measurement - h * predicted;
        let s = h * predicted_cov * h.transpose() + r;
        let s_inv = s.try_inverse().ok_or(FilterError::SingularInnovation)?;
        let gain = predicted_cov * h.transpose() * s_inv;

        let state = predicted + gain * innovation;
        let covariance = (Matrix9::identity() - gain * h) * predicted_cov;
        if !is_finite(&state, &covariance) {
            return Err(FilterError::Diverged);
        }

        self.state = state;
        self.covariance = covariance;
        self.position()
    }

    /// Advances state and covariance by `dt` without a measurement
    pub fn predict(&mut self, dt: f64) -> Result<Vector3<f64>, FilterError> {
        let (state, covariance) = self.propagate(dt)?;
        self.state = state;
        self.covariance = covariance;
        self.position()
    }

    /// Predicted state and covariance after `dt`; `self` is left untouched
    fn propagate(&self, dt: f64) -> Result<(State, Matrix9), FilterError> {
        if !self.initialized {
            return Err(FilterError::NotInitialized);
        }
        check_time_step(dt)?;
        let f = Self::transition_matrix(dt);
        let state = f * self.state;
        let covariance = f * self.covariance * f.transpose() + self.process_noise(dt);
        if !is_finite(&state, &covariance) {
            return Err(FilterError::Diverged);
        }
        Ok((state, covariance))
    }

    pub fn position(&self) -> Result<Vector3<f64>, FilterError> {
        if !self.initialized {
            return Err(FilterError::NotInitialized);
        }
        Ok(self.state.fixed_rows::<3>(0).into_owned())
    }

    pub fn velocity(&self) -> Result<Vector3<f64>, FilterError> {
        if !self.initialized {
            return Err(FilterError::NotInitialized);
        }
        Ok(self.state.fixed_rows::<3>(3).into_owned())
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn covariance(&self) -> &Matrix9 {
        &self.covariance
    }

    pub fn set_parameters(&mut self, measurement_variance: f64, process_noise_factor: f64) -> Result<(), FilterError> {
        check_noise("measurement_variance", measurement_variance)?;
        check_noise("process_noise_factor", process_noise_factor)?;
        self.measurement_variance = measurement_variance;
        self.process_noise_factor = process_noise_factor;
        Ok(())
    }

    /// Forgets the state; the next update bootstraps again
    pub fn reset(&mut self) {
        self.state = State::zeros();
        self.covariance = Matrix9::identity() * INITIAL_COVARIANCE;
        self.initialized = false;
    }
}

/// Smooths the translation of a pose stream; rotation passes through
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSmoother {
    filter: PositionKalmanFilter,
    last_estimate: Option<Pose>,
}

impl PoseSmoother {
    pub fn new(measurement_variance: f64, process_noise_factor: f64) -> Result<Self, FilterError> {
        Ok(Self {
            filter: PositionKalmanFilter::new(measurement_variance, process_noise_factor)?,
            last_estimate: None,
        })
    }

    pub fn update(&mut self, pose: &Pose, dt: f64) -> Result<Pose, FilterError> {
        let position = self.filter.update(&pose.translation, dt)?;
        Ok(self.store(pose, position))
    }

    pub fn update_with_variance(&mut self, pose: &Pose, dt: f64, variance: f64) -> Result<Pose, FilterError> {
        let position = self.filter.update_with_variance(&pose.translation, dt, variance)?;
        Ok(self.store(pose, position))
    }

    fn store(&mut self, pose: &Pose, position: Vector3<f64>) -> Pose {
        let estimate = Pose::from_parts(position, pose.rotation);
        self.last_estimate = Some(estimate);
        estimate
    }

    pub fn last_estimate(&self) -> Result<Pose, FilterError> {
        self.last_estimate.ok_or(FilterError::NotInitialized)
    }

    pub fn filter(&self) -> &PositionKalmanFilter {
        &self.filter
    }

    pub fn set_parameters(&mut self, measurement_variance: f64, process_noise_factor: f64) -> Result<(), FilterError> {
        self.filter.set_parameters(measurement_variance, process_noise_factor)
    }

    pub fn reset(&mut self) {
        self.filter.reset();
        self.last_estimate = None;
    }
}
