//! Monitoring loop: sensor samples in, captures out.
//!
//! Each sample goes through the gate on the reading thread. A trigger submits
//! an acquisition to the controller and returns at once; finished attempts are
//! reaped on later samples and at shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::camera::DisplayRotation;
use crate::controller::{CameraController, PendingCapture};
use crate::error::{CaptureError, CaptureResult};
use crate::gate::{SensorSample, SensorTriggerGate, Trigger};
use crate::persist::PersistedImage;
use crate::sensor::SensorSource;

pub trait RotationProvider: Send + Sync {
    fn current_rotation(&self) -> DisplayRotation;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FixedRotation(pub DisplayRotation);

impl RotationProvider for FixedRotation {
    fn current_rotation(&self) -> DisplayRotation {
        self.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub samples: u64,
    pub triggers: u64,
    pub captured: u64,
    pub busy: u64,
    pub failed: u64,
}

pub struct Monitor {
    gate: SensorTriggerGate,
    controller: Arc<CameraController>,
    camera_id: String,
    rotation: Arc<dyn RotationProvider>,
    pending: Vec<PendingCapture>,
    stats: MonitorStats,
}

impl Monitor {
    pub fn new(
        gate: SensorTriggerGate,
        controller: Arc<CameraController>,
        camera_id: String,
    ) -> Self {
        Self {
            gate,
            controller,
            camera_id,
            rotation: Arc::new(FixedRotation::default()),
            pending: Vec::new(),
            stats: MonitorStats::default(),
        }
    }

    pub fn with_rotation(mut self, rotation: Arc<dyn RotationProvider>) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn gate(&self) -> &SensorTriggerGate {
        &self.gate
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Feed one sample. Returns the trigger if one fired.
    pub fn handle_sample(&mut self, sample: &SensorSample) -> Option<Trigger> {
        self.stats.samples += 1;
        self.reap();
        let trigger = self.gate.on_sample(sample)?;
        self.stats.triggers += 1;
        match self
            .controller
            .submit_camera(&self.camera_id, self.rotation.current_rotation())
        {
            Ok(pending) => self.pending.push(pending),
            Err(err) => self.record(Err(err)),
        }
        Some(trigger)
    }

    /// Collect attempts that have finished.
    pub fn reap(&mut self) {
        let mut still_running = Vec::with_capacity(self.pending.len());
        for pending in std::mem::take(&mut self.pending) {
            match pending.try_wait() {
                Some(result) => self.record(result),
                None => still_running.push(pending),
            }
        }
        self.pending = still_running;
    }

    /// Pump `source` until it is exhausted or `running` is cleared.
    pub fn run(
        &mut self,
        source: &mut dyn SensorSource,
        running: &AtomicBool,
    ) -> Result<MonitorStats> {
        while running.load(Ordering::SeqCst) {
            match source.next_sample()? {
                Some(sample) => {
                    self.handle_sample(&sample);
                }
                None => {
                    log::info!("sensor source exhausted");
                    break;
                }
            }
        }
        Ok(self.stats)
    }

    /// Wait for in-flight captures, then stop the capture worker.
    pub fn shutdown(mut self) -> Result<MonitorStats> {
        for pending in std::mem::take(&mut self.pending) {
            let result = pending.wait();
            self.record(result);
        }
        self.controller.shutdown()?;
        log::info!(
            "monitor stopped: {} samples, {} triggers, {} captured, {} busy, {} failed",
            self.stats.samples,
            self.stats.triggers,
            self.stats.captured,
            self.stats.busy,
            self.stats.failed
        );
        Ok(self.stats)
    }

    fn record(&mut self, result: CaptureResult<PersistedImage>) {
        match result {
            Ok(image) => {
                self.stats.captured += 1;
                log::info!("pickup photo stored at {}", image.path.display());
            }
            Err(err @ CaptureError::DeviceBusy) => {
                self.stats.busy += 1;
                log::warn!("camera {}: trigger dropped: {}", self.camera_id, err);
            }
            Err(err) => {
                self.stats.failed += 1;
                log::error!("camera {}: capture failed [{}]: {}", self.camera_id, err.code(), err);
            }
        }
    }
}
