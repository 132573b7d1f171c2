//! Sensor trigger gate.
//!
//! Turns a stream of noisy sensor samples into at most one `Trigger` per
//! debounce window. A spike on the lateral accelerometer axis fires only
//! while the device is locked, the surroundings are dark and no capture is
//! running. Light samples only update the darkness latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lock::ExclusiveCameraLock;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);
/// Lateral acceleration (m/s^2) above which a sample counts as a pickup spike.
pub const DEFAULT_SPIKE_THRESHOLD: f32 = 4.0;
/// Illuminance (lux) at or below which the surroundings count as dark.
pub const DEFAULT_DARK_LUX_THRESHOLD: f32 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Accelerometer,
    Light,
    /// Platform motion detector. Logged, never fires.
    MotionDetect,
}

/// One reading from the sensor subsystem.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorSample {
    pub kind: SensorKind,
    /// Accelerometer: x, y (lateral), z. Light: lux in `values[0]`.
    pub values: [f32; 3],
    /// Monotonic time since the sensor stream started.
    pub timestamp: Duration,
}

impl SensorSample {
    pub fn accelerometer(lateral: f32, timestamp: Duration) -> Self {
        Self {
            kind: SensorKind::Accelerometer,
            values: [0.0, lateral, 0.0],
            timestamp,
        }
    }

    pub fn light(lux: f32, timestamp: Duration) -> Self {
        Self {
            kind: SensorKind::Light,
            values: [lux, 0.0, 0.0],
            timestamp,
        }
    }

    pub fn lateral(&self) -> f32 {
        self.values[1]
    }

    pub fn illuminance(&self) -> f32 {
        self.values[0]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GateSettings {
    pub debounce: Duration,
    pub spike_threshold: f32,
    pub dark_lux_threshold: f32,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            spike_threshold: DEFAULT_SPIKE_THRESHOLD,
            dark_lux_threshold: DEFAULT_DARK_LUX_THRESHOLD,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GateState {
    /// `None` until the first trigger; the first spike is always past the window.
    pub last_trigger: Option<Duration>,
    pub ambient_is_dark: bool,
}

/// Capture conditions were met at `at`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trigger {
    pub at: Duration,
    pub lateral: f32,
}

/// Whether the device is locked (owner absent). Queried, never owned.
pub trait LockStateProvider: Send + Sync {
    fn is_locked(&self) -> bool;
}

impl<F> LockStateProvider for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_locked(&self) -> bool {
        self()
    }
}

/// Lock state set by whoever observes the platform's lock events.
#[derive(Debug, Default)]
pub struct SharedLockState(AtomicBool);

impl SharedLockState {
    pub fn new(locked: bool) -> Self {
        Self(AtomicBool::new(locked))
    }

    pub fn set_locked(&self, locked: bool) {
        self.0.store(locked, Ordering::SeqCst);
    }
}

impl LockStateProvider for SharedLockState {
    fn is_locked(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Whether an acquisition is currently running.
pub trait CaptureActivity: Send + Sync {
    fn capture_in_progress(&self) -> bool;
}

impl CaptureActivity for ExclusiveCameraLock {
    fn capture_in_progress(&self) -> bool {
        self.is_held()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoCaptureActivity;

impl CaptureActivity for NoCaptureActivity {
    fn capture_in_progress(&self) -> bool {
        false
    }
}

pub struct SensorTriggerGate {
    settings: GateSettings,
    state: Mutex<GateState>,
    lock_state: Arc<dyn LockStateProvider>,
    activity: Arc<dyn CaptureActivity>,
}

impl SensorTriggerGate {
    pub fn new(settings: GateSettings, lock_state: Arc<dyn LockStateProvider>) -> Self {
        Self {
            settings,
            state: Mutex::new(GateState::default()),
            lock_state,
            activity: Arc::new(NoCaptureActivity),
        }
    }

    /// Suppress triggers while `activity` reports a capture in flight.
    pub fn with_activity(mut self, activity: Arc<dyn CaptureActivity>) -> Self {
        self.activity = activity;
        self
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    pub fn state(&self) -> GateState {
        *self.lock_state_guard()
    }

    /// Evaluate one sample. Never blocks beyond the internal state mutex.
    ///
    /// The debounce check and the `last_trigger` update happen under one
    /// lock, so two samples delivered concurrently can't both fire.
    pub fn on_sample(&self, sample: &SensorSample) -> Option<Trigger> {
        match sample.kind {
            SensorKind::Light => {
                let dark = sample.illuminance() <= self.settings.dark_lux_threshold;
                let mut state = self.lock_state_guard();
                if state.ambient_is_dark != dark {
                    log::debug!(
                        "ambient {} ({:.1} lux)",
                        if dark { "dark" } else { "light" },
                        sample.illuminance()
                    );
                }
                state.ambient_is_dark = dark;
                None
            }
            SensorKind::MotionDetect => {
                log::debug!("motion detected at {:?}", sample.timestamp);
                None
            }
            SensorKind::Accelerometer => self.on_acceleration(sample),
        }
    }

    fn on_acceleration(&self, sample: &SensorSample) -> Option<Trigger> {
        let lateral = sample.lateral();
        if lateral <= self.settings.spike_threshold {
            return None;
        }
        let now = sample.timestamp;
        let mut state = self.lock_state_guard();
        if let Some(last) = state.last_trigger {
            if now.saturating_sub(last) < self.settings.debounce {
                return None;
            }
        }
        if !state.ambient_is_dark {
            log::debug!("spike {:.2} ignored: ambient light", lateral);
            return None;
        }
        if !self.lock_state.is_locked() {
            log::debug!("spike {:.2} ignored: device unlocked", lateral);
            return None;
        }
        if self.activity.capture_in_progress() {
            log::debug!("spike {:.2} ignored: capture in progress", lateral);
            return None;
        }
        state.last_trigger = Some(now);
        log::info!("pickup detected at {:?} (lateral {:.2})", now, lateral);
        Some(Trigger { at: now, lateral })
    }

    fn lock_state_guard(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn dark_locked_gate() -> SensorTriggerGate {
        let locked = Arc::new(SharedLockState::new(true));
        let gate = SensorTriggerGate::new(GateSettings::default(), locked);
        gate.on_sample(&SensorSample::light(2.0, secs(0)));
        gate
    }

    #[test]
    fn spikes_fire_once_per_window() {
        let gate = dark_locked_gate();
        assert!(gate.on_sample(&SensorSample::accelerometer(5.0, secs(0))).is_some());
        assert!(gate.on_sample(&SensorSample::accelerometer(5.0, secs(5))).is_none());
        assert!(gate.on_sample(&SensorSample::accelerometer(5.0, secs(11))).is_some());
    }

    #[test]
    fn window_is_measured_from_last_trigger_not_last_sample() {
        let gate = dark_locked_gate();
        assert!(gate.on_sample(&SensorSample::accelerometer(6.0, secs(0))).is_some());
        for t in [3, 6, 9] {
            assert!(gate.on_sample(&SensorSample::accelerometer(6.0, secs(t))).is_none());
        }
        assert!(gate.on_sample(&SensorSample::accelerometer(6.0, secs(10))).is_some());
        assert_eq!(gate.state().last_trigger, Some(secs(10)));
    }

    #[test]
    fn threshold_is_exclusive() {
        let gate = dark_locked_gate();
        assert!(gate.on_sample(&SensorSample::accelerometer(4.0, secs(0))).is_none());
        assert!(gate.on_sample(&SensorSample::accelerometer(-9.0, secs(1))).is_none());
        assert_eq!(gate.state().last_trigger, None);
        assert!(gate.on_sample(&SensorSample::accelerometer(4.01, secs(2))).is_some());
    }

    #[test]
    fn unlocked_device_never_fires() {
        let lock_state = Arc::new(SharedLockState::new(false));
        let gate = SensorTriggerGate::new(GateSettings::default(), lock_state.clone());
        gate.on_sample(&SensorSample::light(0.0, secs(0)));
        assert!(gate.on_sample(&SensorSample::accelerometer(8.0, secs(0))).is_none());
        assert_eq!(gate.state().last_trigger, None);

        lock_state.set_locked(true);
        assert!(gate.on_sample(&SensorSample::accelerometer(8.0, secs(1))).is_some());
    }

    #[test]
    fn darkness_latch_follows_latest_light_sample() {
        let gate = SensorTriggerGate::new(GateSettings::default(), Arc::new(|| true));
        assert!(!gate.state().ambient_is_dark);
        assert!(gate.on_sample(&SensorSample::accelerometer(8.0, secs(0))).is_none());

        assert!(gate.on_sample(&SensorSample::light(10.0, secs(1))).is_none());
        assert!(gate.state().ambient_is_dark);
        gate.on_sample(&SensorSample::light(10.5, secs(2)));
        assert!(gate.on_sample(&SensorSample::accelerometer(8.0, secs(3))).is_none());

        gate.on_sample(&SensorSample::light(3.0, secs(4)));
        assert!(gate.on_sample(&SensorSample::accelerometer(8.0, secs(5))).is_some());
    }

    #[test]
    fn motion_samples_leave_state_untouched() {
        let gate = dark_locked_gate();
        let before = gate.state();
        let motion = SensorSample {
            kind: SensorKind::MotionDetect,
            values: [1.0, 9.0, 1.0],
            timestamp: secs(1),
        };
        assert!(gate.on_sample(&motion).is_none());
        assert_eq!(gate.state(), before);
    }

    #[test]
    fn capture_in_progress_suppresses_without_consuming_window() {
        let lock = ExclusiveCameraLock::new();
        let locked = Arc::new(SharedLockState::new(true));
        let gate =
            SensorTriggerGate::new(GateSettings::default(), locked).with_activity(lock.clone());
        gate.on_sample(&SensorSample::light(1.0, secs(0)));

        let guard = lock.try_acquire().expect("lock");
        assert!(gate.on_sample(&SensorSample::accelerometer(7.0, secs(0))).is_none());
        drop(guard);
        assert!(gate.on_sample(&SensorSample::accelerometer(7.0, secs(1))).is_some());
    }

    #[test]
    fn concurrent_spikes_fire_exactly_once() {
        let gate = Arc::new(dark_locked_gate());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || {
                    let at = Duration::from_millis(20_000 + i);
                    gate.on_sample(&SensorSample::accelerometer(9.0, at)).is_some()
                })
            })
            .collect();
        let fired = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .filter(|fired| *fired)
            .count();
        assert_eq!(fired, 1);
    }
}
