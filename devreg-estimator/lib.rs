//! Registration of AR devices against a fixed RGB-D camera.
//!
//! Each update matches ORB features seen by the device against features of
//! the fixed camera, lifts the fixed-camera matches to 3D through its depth
//! map, solves a RANSAC PnP seeded with the previous estimate, gates the
//! result and composes the transform from the device's tracking origin to
//! the world. Accepted estimates can be smoothed with a constant-acceleration
//! Kalman filter.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use devreg_core::CameraIntrinsics;
//! use devreg_estimator::{DeviceEstimator, EstimatorConfig, FixedCameraSetup, Pose};
//!
//! let setup = FixedCameraSetup::new(CameraIntrinsics::new(525.0, 525.0, 319.5, 239.5), Pose::identity())?;
//! let mut estimator = DeviceEstimator::new("phone", EstimatorConfig::default(), Arc::new(setup))?;
//! # let (device, fixed): (devreg_estimator::DeviceFrame, devreg_estimator::FixedCameraFrame) = unimplemented!();
//! let outcome = estimator.update(&device, &fixed, Duration::from_secs(10));
//! println!("status {}", outcome.code());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod correspondence;
pub mod depth;
pub mod error;
pub mod estimator;
pub mod extractor;
pub mod frame;
pub mod frames;
pub mod gate;
pub mod kalman;
pub mod pnp;
pub mod registry;

pub use config::EstimatorConfig;
pub use correspondence::{build_correspondences, Correspondences};
pub use depth::DepthResolver;
pub use error::{status, ConfigError, FeatureError, FilterError, InputError, RegistrationError, SolverError};
pub use estimator::{DeviceEstimator, PersistentEstimatorState, Registration, UpdateOutcome};
pub use extractor::{FeatureSet, OrbExtractor};
pub use frame::{decode_descriptors, DeviceFeatureFrame, DeviceFrame, DeviceImageFrame, FixedCameraFrame, FixedCameraSetup};
pub use frames::{angle_between, compose_registration, ComposedRegistration, Pose};
pub use gate::{GateThresholds, Rejection, ReprojectionAveraging};
pub use kalman::{PoseSmoother, PositionKalmanFilter};
pub use pnp::{solve_pnp_ransac, PnpParams, PnpSolution};
pub use registry::DeviceRegistry;
