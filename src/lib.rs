//! Pickup Sentinel
//!
//! Takes a covert still photo when a locked device is picked up in the dark.
//!
//! # Architecture
//!
//! Sensor samples flow through a debounced gate; a trigger asks the camera
//! controller for one acquisition, which runs entirely on a dedicated capture
//! worker:
//!
//! ```text
//! SensorSource -> SensorTriggerGate -> CameraController -> CaptureWorker
//!                                         |                   |
//!                               ExclusiveCameraLock     CaptureSession -> ImageStore
//! ```
//!
//! A few rules hold by construction:
//!
//! 1. **One camera, one attempt**: at most one capture session is outside
//!    `Closed` at any time; a second request fails fast with `DeviceBusy`.
//! 2. **One trigger per window**: the gate fires at most once per debounce
//!    window, measured from the previous trigger.
//! 3. **No stage skipped**: Opening, Open, Configuring, Ready, Capturing,
//!    Closing, Closed; failures go straight to Closing.
//! 4. **Nothing leaks**: device, session and frame buffer are released on
//!    every exit path.
//!
//! # Module Structure
//!
//! - `gate`, `sensor`: trigger detection and sample sources
//! - `controller`, `camera`, `lock`, `worker`: exclusive one-shot acquisition
//! - `size`, `persist`, `frame`: size selection, still buffers and storage
//! - `monitor`: wiring for the daemon
//! - `config`, `error`: configuration and typed failures

pub mod camera;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod gate;
pub mod lock;
pub mod monitor;
pub mod persist;
pub mod sensor;
pub mod size;
pub mod worker;

pub use camera::{
    CameraIdentity, CameraPlatform, CaptureMode, CaptureSession, DisplayRotation, LensFacing,
    SessionState, StubCameraPlatform,
};
#[cfg(feature = "camera-v4l2")]
pub use camera::V4l2Platform;
pub use config::SentinelConfig;
pub use controller::{select_camera, CameraController, ControllerSettings, PendingCapture};
pub use error::{CaptureError, CaptureResult};
pub use frame::StillFrame;
pub use gate::{
    GateSettings, GateState, LockStateProvider, SensorKind, SensorSample, SensorTriggerGate,
    SharedLockState, Trigger,
};
pub use lock::{CameraLockGuard, ExclusiveCameraLock};
pub use monitor::{Monitor, MonitorStats};
pub use persist::{ImageStore, PersistedImage};
pub use sensor::{ScriptedSensorSource, SensorSource, SyntheticSensorSource};
pub use size::{choose_optimal_size, AspectRatio, Size};
pub use worker::CaptureWorker;

/// Build the camera platform named by `camera_id`: `stub://...` selects the
/// synthetic platform, anything else a V4L2 device when that backend is
/// compiled in.
pub fn platform_for(camera_id: &str) -> anyhow::Result<std::sync::Arc<dyn CameraPlatform>> {
    if camera_id.starts_with("stub://") {
        return Ok(std::sync::Arc::new(StubCameraPlatform::new()));
    }
    #[cfg(feature = "camera-v4l2")]
    {
        Ok(std::sync::Arc::new(V4l2Platform::new()))
    }
    #[cfg(not(feature = "camera-v4l2"))]
    {
        Err(anyhow::anyhow!(
            "camera {} needs the camera-v4l2 feature; rebuild with --features camera-v4l2",
            camera_id
        ))
    }
}
