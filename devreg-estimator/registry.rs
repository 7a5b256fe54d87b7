//! Estimators for every device currently talking to the fixed camera.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::EstimatorConfig;
use crate::error::{ConfigError, RegistrationError};
use crate::estimator::{DeviceEstimator, UpdateOutcome};
use crate::extractor::OrbExtractor;
use crate::frame::{DeviceFrame, FixedCameraFrame, FixedCameraSetup};

pub type SharedEstimator = Arc<Mutex<DeviceEstimator>>;

#[derive(Debug)]
struct DeviceEntry {
    estimator: SharedEstimator,
    last_seen: Duration,
}

/// Creates an estimator the first time a device is heard from and forgets it
/// once it has been silent for longer than the configured device timeout.
///
/// Estimators share the fixed camera setup and the feature extractor; each
/// sits behind its own mutex, so different devices update in parallel while
/// frames of one device are processed one at a time.
#[derive(Debug)]
pub struct DeviceRegistry {
    template: DeviceEstimator,
    devices: HashMap<String, DeviceEntry>,
}

impl DeviceRegistry {
    pub fn new(config: EstimatorConfig, setup: FixedCameraSetup) -> Result<Self, ConfigError> {
        let template = DeviceEstimator::new("", config, Arc::new(setup))?;
        Ok(Self {
            template,
            devices: HashMap::new(),
        })
    }

    pub fn config(&self) -> &EstimatorConfig {
        self.template.config()
    }

    pub fn extractor(&self) -> &OrbExtractor {
        self.template.extractor()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Sorted ids of the known devices
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn estimator(&self, device_id: &str) -> Option<SharedEstimator> {
        self.devices.get(device_id).map(|e| Arc::clone(&e.estimator))
    }

    /// Records activity for `device_id`, creating its estimator if needed
    pub fn heartbeat(&mut self, device_id: &str, now: Duration) -> SharedEstimator {
        if let Some(entry) = self.devices.get_mut(device_id) {
            entry.last_seen = entry.last_seen.max(now);
            return Arc::clone(&entry.estimator);
        }

        let mut estimator = self.template.clone();
        estimator.reset();
        let estimator = Arc::new(Mutex::new(estimator.renamed(device_id)));
        info!(device = device_id, devices = self.devices.len() + 1, "new device");
        self.devices.insert(
            device_id.to_string(),
            DeviceEntry {
                estimator: Arc::clone(&estimator),
                last_seen: now,
            },
        );
        estimator
    }

    /// Drops devices silent for longer than the device timeout; returns their ids, sorted
    pub fn remove_idle(&mut self, now: Duration) -> Vec<String> {
        let timeout = self.template.config().device_timeout();
        let mut removed: Vec<String> = self
            .devices
            .iter()
            .filter(|(_, e)| now.saturating_sub(e.last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        removed.sort();
        for id in &removed {
            self.devices.remove(id);
            info!(device = %id, "device timed out");
        }
        removed
    }

    /// Runs one update per frame against a single fixed camera frame.
    ///
    /// Fixed-camera features are extracted once; devices are then processed
    /// in parallel. Output order follows `frames`.
    pub fn process_batch(
        &mut self,
        frames: Vec<(String, DeviceFrame)>,
        fixed: &FixedCameraFrame,
        now: Duration,
    ) -> Vec<(String, UpdateOutcome)> {
        let fixed_features = match self.template.extractor().extract(fixed.image()) {
            Ok(f) => f,
            Err(e) => {
                let error = RegistrationError::from(e);
                return frames
                    .into_iter()
                    .map(|(id, _)| (id, UpdateOutcome::Dropped(error.clone())))
                    .collect();
            }
        };
        debug!(devices = frames.len(), keypoints = fixed_features.len(), "processing batch");

        let jobs: Vec<(String, SharedEstimator, DeviceFrame)> = frames
            .into_iter()
            .map(|(id, frame)| {
                let estimator = self.heartbeat(&id, now);
                (id, estimator, frame)
            })
            .collect();

        jobs.into_par_iter()
            .map(|(id, estimator, frame)| {
                let outcome = estimator
                    .lock()
                    .update_with_fixed_features(&frame, fixed, &fixed_features, now);
                (id, outcome)
            })
            .collect()
    }
}
