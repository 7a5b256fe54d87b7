//! Per-device registration pipeline and its persistent state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use devreg_brief::{distance_range, filter_matches, match_descriptors};
use tracing::{debug, info, warn};

use crate::config::EstimatorConfig;
use crate::correspondence::build_correspondences;
use crate::depth::DepthResolver;
use crate::error::{status, ConfigError, FilterError, RegistrationError};
use crate::extractor::{FeatureSet, OrbExtractor};
use crate::frame::{DeviceFeatureFrame, DeviceFrame, DeviceImageFrame, FixedCameraFrame, FixedCameraSetup};
use crate::frames::{compose_registration, convert_left_handed_pose, device_pose_to_camera_convention, Pose};
use crate::gate::{GateThresholds, Rejection};
use crate::kalman::PoseSmoother;
use crate::pnp::{solve_pnp_ransac, PnpParams};

/// An accepted estimate
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// Device tracking origin in world coordinates
    pub world_from_tracking_origin: Pose,
    pub world_from_device: Pose,
    pub fixed_from_device: Pose,
    /// Raw solver output
    pub device_from_fixed: Pose,
    /// Capture time of the device frame
    pub timestamp: Duration,
    pub inliers: usize,
    pub correspondences: usize,
    pub reprojection_error: f64,
    pub orientation_deviation_deg: f64,
    /// Smoothed tracking origin, when smoothing is enabled
    pub smoothed: Option<Pose>,
}

impl Registration {
    pub fn smoothed_position(&self) -> Option<[f64; 3]> {
        self.smoothed.map(|p| [p.translation.x, p.translation.y, p.translation.z])
    }
}

/// Result of one update; never an error at this boundary
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Accepted(Registration),
    /// Frame processed but the estimate failed a quality check
    Rejected(Rejection),
    /// Frame could not be processed
    Dropped(RegistrationError),
}

impl UpdateOutcome {
    pub fn code(&self) -> i32 {
        match self {
            UpdateOutcome::Accepted(_) => status::ACCEPTED,
            UpdateOutcome::Rejected(r) => r.code(),
            UpdateOutcome::Dropped(e) => e.code(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, UpdateOutcome::Accepted(_))
    }

    pub fn registration(&self) -> Option<&Registration> {
        match self {
            UpdateOutcome::Accepted(r) => Some(r),
            _ => None,
        }
    }
}

enum Failure {
    Rejected(Rejection),
    Dropped(RegistrationError),
}

impl From<Rejection> for Failure {
    fn from(r: Rejection) -> Self {
        Failure::Rejected(r)
    }
}

impl From<RegistrationError> for Failure {
    fn from(e: RegistrationError) -> Self {
        Failure::Dropped(e)
    }
}

/// What survives between updates. Only accepted estimates change it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistentEstimatorState {
    last_transform: Option<Pose>,
    last_solver_pose: Option<Pose>,
    last_inliers: usize,
    last_reprojection_error: f64,
    last_timestamp: Option<Duration>,
}

impl PersistentEstimatorState {
    pub fn has_estimate(&self) -> bool {
        self.last_transform.is_some()
    }

    /// Last accepted world-from-tracking-origin transform
    pub fn last_transform(&self) -> Option<&Pose> {
        self.last_transform.as_ref()
    }

    /// Last accepted solver pose; seeds the next RANSAC run
    pub fn last_solver_pose(&self) -> Option<&Pose> {
        self.last_solver_pose.as_ref()
    }

    pub fn last_inliers(&self) -> usize {
        self.last_inliers
    }

    pub fn last_reprojection_error(&self) -> f64 {
        self.last_reprojection_error
    }

    pub fn last_timestamp(&self) -> Option<Duration> {
        self.last_timestamp
    }

    fn accept(&mut self, registration: &Registration) {
        self.last_transform = Some(registration.world_from_tracking_origin);
        self.last_solver_pose = Some(registration.device_from_fixed);
        self.last_inliers = registration.inliers;
        self.last_reprojection_error = registration.reprojection_error;
        self.last_timestamp = Some(registration.timestamp);
    }
}

/// Registration pipeline for one device against the shared fixed camera.
///
/// Updates take `&mut self`, so one estimator processes frames strictly in
/// sequence; share it behind a mutex to feed it from several threads.
#[derive(Debug, Clone)]
pub struct DeviceEstimator {
    device_id: String,
    config: EstimatorConfig,
    setup: Arc<FixedCameraSetup>,
    extractor: Arc<OrbExtractor>,
    pnp: PnpParams,
    gate: GateThresholds,
    depth_resolver: DepthResolver,
    state: PersistentEstimatorState,
    smoother: Option<PoseSmoother>,
}

fn smoother_for(config: &EstimatorConfig) -> Result<Option<PoseSmoother>, ConfigError> {
    if !config.enable_smoothing {
        return Ok(None);
    }
    PoseSmoother::new(config.measurement_noise_variance, config.process_noise_variance_factor)
        .map(Some)
        .map_err(|e| ConfigError::Invalid { field: "measurementNoiseVariance", reason: e.to_string() })
}

impl DeviceEstimator {
    pub fn new(
        device_id: impl Into<String>,
        config: EstimatorConfig,
        setup: Arc<FixedCameraSetup>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let extractor = OrbExtractor::new(config.detector_config())
            .map_err(|e| ConfigError::Invalid { field: "orb", reason: e.to_string() })?;
        Self::with_extractor(device_id, config, setup, Arc::new(extractor))
    }

    /// Reuses an extractor built elsewhere, e.g. one shared by a registry
    pub fn with_extractor(
        device_id: impl Into<String>,
        config: EstimatorConfig,
        setup: Arc<FixedCameraSetup>,
        extractor: Arc<OrbExtractor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let smoother = smoother_for(&config)?;
        Ok(Self {
            device_id: device_id.into(),
            pnp: config.pnp_params(),
            gate: config.gate_thresholds(),
            depth_resolver: config.depth_resolver(),
            config,
            setup,
            extractor,
            state: PersistentEstimatorState::default(),
            smoother,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub(crate) fn renamed(mut self, device_id: &str) -> Self {
        self.device_id = device_id.to_string();
        self
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn setup(&self) -> &FixedCameraSetup {
        &self.setup
    }

    pub fn extractor(&self) -> &OrbExtractor {
        &self.extractor
    }

    pub fn state(&self) -> &PersistentEstimatorState {
        &self.state
    }

    /// Latest smoothed tracking origin
    pub fn smoothed_pose(&self) -> Result<Pose, FilterError> {
        match &self.smoother {
            Some(s) => s.last_estimate(),
            None => Err(FilterError::NotInitialized),
        }
    }

    /// Changes smoother noise levels without losing its state
    pub fn set_noise_parameters(&mut self, measurement_variance: f64, process_noise_factor: f64) -> Result<(), FilterError> {
        if let Some(s) = &mut self.smoother {
            s.set_parameters(measurement_variance, process_noise_factor)?;
        }
        self.config.measurement_noise_variance = measurement_variance;
        self.config.process_noise_variance_factor = process_noise_factor;
        Ok(())
    }

    /// Forgets every accepted estimate
    pub fn reset(&mut self) {
        self.state = PersistentEstimatorState::default();
        if let Some(s) = &mut self.smoother {
            s.reset();
        }
    }

    fn check_age(&self, captured: Duration, now: Duration) -> Result<(), RegistrationError> {
        let age = now.saturating_sub(captured);
        let limit = self.config.max_frame_age();
        if age > limit {
            return Err(RegistrationError::StaleFrame {
                age_ms: age.as_millis(),
                limit_ms: limit.as_millis(),
            });
        }
        Ok(())
    }

    fn check_staleness(&self, device_ts: Duration, fixed_ts: Duration, now: Duration) -> Result<(), RegistrationError> {
        self.check_age(device_ts, now)?;
        self.check_age(fixed_ts, now)
    }

    fn drop_frame(&self, error: RegistrationError) -> UpdateOutcome {
        warn!(device = %self.device_id, code = error.code(), %error, "frame dropped");
        UpdateOutcome::Dropped(error)
    }

    /// Raw device image: extract on both sides, then run the pipeline
    pub fn update_with_image(&mut self, frame: DeviceImageFrame, fixed: &FixedCameraFrame, now: Duration) -> UpdateOutcome {
        if let Err(e) = self.check_staleness(frame.timestamp, fixed.timestamp(), now) {
            return self.drop_frame(e);
        }
        match DeviceFrame::from_image(frame, &self.extractor) {
            Ok(device) => self.extract_and_run(&device, fixed),
            Err(e) => self.drop_frame(e),
        }
    }

    /// Features computed on the device
    pub fn update_with_features(&mut self, frame: DeviceFeatureFrame, fixed: &FixedCameraFrame, now: Duration) -> UpdateOutcome {
        if let Err(e) = self.check_staleness(frame.timestamp, fixed.timestamp(), now) {
            return self.drop_frame(e);
        }
        match DeviceFrame::from_features(frame) {
            Ok(device) => self.extract_and_run(&device, fixed),
            Err(e) => self.drop_frame(e.into()),
        }
    }

    /// Extracts fixed-camera features, then runs the pipeline
    pub fn update(&mut self, device: &DeviceFrame, fixed: &FixedCameraFrame, now: Duration) -> UpdateOutcome {
        if let Err(e) = self.check_staleness(device.timestamp(), fixed.timestamp(), now) {
            return self.drop_frame(e);
        }
        self.extract_and_run(device, fixed)
    }

    /// Pipeline with fixed-camera features already extracted from `fixed`'s image
    pub fn update_with_fixed_features(
        &mut self,
        device: &DeviceFrame,
        fixed: &FixedCameraFrame,
        fixed_features: &FeatureSet,
        now: Duration,
    ) -> UpdateOutcome {
        if let Err(e) = self.check_staleness(device.timestamp(), fixed.timestamp(), now) {
            return self.drop_frame(e);
        }
        self.run(device, fixed, fixed_features)
    }

    fn extract_and_run(&mut self, device: &DeviceFrame, fixed: &FixedCameraFrame) -> UpdateOutcome {
        let started = Instant::now();
        let fixed_features = match self.extractor.extract(fixed.image()) {
            Ok(f) => f,
            Err(e) => return self.drop_frame(e.into()),
        };
        debug!(
            device = %self.device_id,
            keypoints = fixed_features.len(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
            "fixed camera features"
        );
        self.run(device, fixed, &fixed_features)
    }

    fn run(&mut self, device: &DeviceFrame, fixed: &FixedCameraFrame, fixed_features: &FeatureSet) -> UpdateOutcome {
        let started = Instant::now();
        let mut registration = match self.evaluate(device, fixed, fixed_features) {
            Ok(r) => r,
            Err(Failure::Rejected(rejection)) => {
                info!(device = %self.device_id, code = rejection.code(), %rejection, "estimate rejected");
                return UpdateOutcome::Rejected(rejection);
            }
            Err(Failure::Dropped(error)) => return self.drop_frame(error),
        };

        if let Some(smoother) = &mut self.smoother {
            let dt = self
                .state
                .last_timestamp()
                .map(|t| registration.timestamp.saturating_sub(t).as_secs_f64())
                .unwrap_or(0.0);
            match smoother.update(&registration.world_from_tracking_origin, dt) {
                Ok(p) => registration.smoothed = Some(p),
                Err(e) => return self.drop_frame(e.into()),
            }
        }

        self.state.accept(&registration);
        info!(
            device = %self.device_id,
            inliers = registration.inliers,
            correspondences = registration.correspondences,
            reprojection_error = registration.reprojection_error,
            orientation_deg = registration.orientation_deviation_deg,
            elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
            "registration accepted"
        );
        UpdateOutcome::Accepted(registration)
    }

    /// Match, solve, gate, compose. Reads the state, never writes it.
    fn evaluate(
        &self,
        device: &DeviceFrame,
        fixed: &FixedCameraFrame,
        fixed_features: &FeatureSet,
    ) -> Result<Registration, Failure> {
        let stage = Instant::now();
        let matches = match_descriptors(device.features().descriptors(), fixed_features.descriptors());
        let filtered = filter_matches(&matches, self.config.matching_threshold);
        if let Some((best, worst)) = distance_range(&filtered) {
            debug!(device = %self.device_id, total = matches.len(), kept = filtered.len(), best, worst, "descriptor matches");
        } else {
            debug!(device = %self.device_id, total = matches.len(), "no match under the distance threshold");
        }

        let correspondences = build_correspondences(
            &filtered,
            device.features().keypoints(),
            fixed_features.keypoints(),
            fixed.depth(),
            &self.setup.intrinsics,
            &self.depth_resolver,
        )
        .map_err(RegistrationError::from)?;
        debug!(
            device = %self.device_id,
            correspondences = correspondences.len(),
            elapsed_ms = stage.elapsed().as_secs_f64() * 1e3,
            "correspondences built"
        );
        self.gate.check_count(correspondences.len())?;

        let stage = Instant::now();
        let solution = solve_pnp_ransac(
            &correspondences.points,
            &correspondences.pixels,
            device.intrinsics(),
            &self.pnp,
            self.state.last_solver_pose(),
        )
        .map_err(RegistrationError::from)?;
        let reprojection_error = solution.reprojection_error(self.gate.averaging);
        debug!(
            device = %self.device_id,
            inliers = solution.inliers.len(),
            iterations = solution.iterations,
            reprojection_error,
            elapsed_ms = stage.elapsed().as_secs_f64() * 1e3,
            "pose solved"
        );
        self.gate.check_count(solution.inliers.len())?;
        self.gate.check_reprojection(reprojection_error)?;

        let device_pose = device_pose_to_camera_convention(&convert_left_handed_pose(device.pose()));
        let composed = compose_registration(&self.setup.world_from_camera, &solution.pose, &device_pose);
        if !(composed.world_from_tracking_origin.is_valid() && composed.world_from_device.is_valid()) {
            return Err(RegistrationError::GeometryInvalid.into());
        }

        let orientation_deviation_deg = self.gate.check_orientation(&composed.fixed_from_device)?;
        self.gate.check_height(&composed.world_from_device)?;

        Ok(Registration {
            world_from_tracking_origin: composed.world_from_tracking_origin,
            world_from_device: composed.world_from_device,
            fixed_from_device: composed.fixed_from_device,
            device_from_fixed: solution.pose,
            timestamp: device.timestamp(),
            inliers: solution.inliers.len(),
            correspondences: correspondences.len(),
            reprojection_error,
            orientation_deviation_deg,
            smoothed: None,
        })
    }
}
