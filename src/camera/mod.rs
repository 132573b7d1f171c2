//! Camera platform seam.
//!
//! The hardware API is callback driven: opening a device, configuring a
//! session and issuing a capture each return immediately, and the outcome
//! arrives later as a `CameraEvent`. Platforms push those events into a
//! `CameraEventSink`; the acquisition that owns the matching receiver consumes
//! them on the capture worker, one at a time, in arrival order.
//!
//! Backends:
//! - `stub://` synthetic cameras (tests, demos, failure injection)
//! - Linux V4L2 devices (feature: camera-v4l2)

pub mod session;
pub mod stub;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use std::fmt;
use std::sync::mpsc::{self, Receiver, SendError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::frame::StillFrame;
use crate::lock::CameraLockGuard;
use crate::size::Size;

pub use session::{CaptureSession, SessionSettings, SessionState};
pub use stub::{FailurePoint, StubCameraPlatform};
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Platform;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensFacing {
    Front,
    Back,
    External,
}

/// Static description of one camera, queried from the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraIdentity {
    pub id: String,
    /// Clockwise rotation (degrees) of the sensor relative to the device.
    pub sensor_orientation: u32,
    /// Still-image resolutions in platform enumeration order.
    pub supported_still_sizes: Vec<Size>,
    pub lens_facing: LensFacing,
}

/// Current display rotation, supplied by the orchestrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayRotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl DisplayRotation {
    pub fn degrees(self) -> u32 {
        match self {
            DisplayRotation::Deg0 => 0,
            DisplayRotation::Deg90 => 90,
            DisplayRotation::Deg180 => 180,
            DisplayRotation::Deg270 => 270,
        }
    }

    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(DisplayRotation::Deg0),
            90 => Some(DisplayRotation::Deg90),
            180 => Some(DisplayRotation::Deg180),
            270 => Some(DisplayRotation::Deg270),
            _ => None,
        }
    }
}

/// JPEG orientation tag value for a capture.
pub fn jpeg_orientation(sensor_orientation: u32, rotation: DisplayRotation) -> u32 {
    (sensor_orientation + rotation.degrees()) % 360
}

/// Surfaces requested when configuring a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// A single JPEG surface.
    #[default]
    Still,
    /// A preview surface plus the JPEG surface; only the JPEG surface is
    /// targeted by the still request.
    PreviewAndStill,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceRole {
    Preview,
    Still,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Yuv420,
}

/// One output surface of a capture session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputTarget {
    pub role: SurfaceRole,
    pub size: Size,
    pub format: ImageFormat,
    /// Images the surface may hold at once.
    pub max_images: u32,
}

impl OutputTarget {
    pub fn still(size: Size) -> Self {
        Self {
            role: SurfaceRole::Still,
            size,
            format: ImageFormat::Jpeg,
            max_images: 1,
        }
    }

    pub fn preview(size: Size) -> Self {
        Self {
            role: SurfaceRole::Preview,
            size,
            format: ImageFormat::Yuv420,
            max_images: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoFocusMode {
    Off,
    ContinuousPicture,
}

/// A one-shot still-capture request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StillCaptureRequest {
    pub target: OutputTarget,
    pub auto_focus: AutoFocusMode,
    pub jpeg_orientation: u32,
}

// ----------------------------------------------------------------------------
// Platform traits
// ----------------------------------------------------------------------------

/// Entry point into a camera subsystem.
///
/// `open` only starts the operation; its outcome arrives on `events` as
/// `Opened`, `Disconnected` or `DeviceError`.
pub trait CameraPlatform: Send + Sync {
    fn name(&self) -> &'static str;

    fn camera_ids(&self) -> Result<Vec<String>>;

    fn identity(&self, camera_id: &str) -> Result<CameraIdentity>;

    fn open(&self, camera_id: &str, events: CameraEventSink) -> Result<()>;
}

/// An open camera device. Must be closed exactly once by its owner.
pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    /// Start session configuration; outcome arrives as `Configured` or
    /// `ConfigureFailed`.
    fn create_session(&mut self, outputs: &[OutputTarget], events: CameraEventSink) -> Result<()>;

    fn close(&mut self);
}

/// A configured capture session. Must be closed before its device.
pub trait SessionHandle: Send {
    /// Issue one still capture; progress arrives as `CaptureStarted`,
    /// `ImageAvailable`, `CaptureCompleted` or `CaptureFailed`.
    fn capture(&mut self, request: &StillCaptureRequest, events: CameraEventSink) -> Result<()>;

    fn close(&mut self);
}

/// Callback from the camera subsystem, delivered as a message.
pub enum CameraEvent {
    Opened(Box<dyn CameraDevice>),
    Disconnected,
    DeviceError(String),
    Configured(Box<dyn SessionHandle>),
    ConfigureFailed(String),
    CaptureStarted { timestamp_ns: u64, frame_number: u64 },
    ImageAvailable(StillFrame),
    CaptureCompleted { frame_number: u64 },
    CaptureFailed(String),
}

impl CameraEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CameraEvent::Opened(_) => "opened",
            CameraEvent::Disconnected => "disconnected",
            CameraEvent::DeviceError(_) => "device_error",
            CameraEvent::Configured(_) => "configured",
            CameraEvent::ConfigureFailed(_) => "configure_failed",
            CameraEvent::CaptureStarted { .. } => "capture_started",
            CameraEvent::ImageAvailable(_) => "image_available",
            CameraEvent::CaptureCompleted { .. } => "capture_completed",
            CameraEvent::CaptureFailed(_) => "capture_failed",
        }
    }

    /// Close any handle carried by an event nobody is going to consume.
    /// Frames are released by their own drop.
    pub(crate) fn discard(self) {
        match self {
            CameraEvent::Opened(mut device) => {
                log::warn!("closing unclaimed camera device {}", device.id());
                device.close();
            }
            CameraEvent::Configured(mut session) => {
                log::warn!("closing unclaimed capture session");
                session.close();
            }
            _ => {}
        }
    }
}

impl fmt::Debug for CameraEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            CameraEvent::DeviceError(msg) => write!(f, "DeviceError({})", msg),
            CameraEvent::ConfigureFailed(msg) => write!(f, "ConfigureFailed({})", msg),
            CameraEvent::CaptureStarted {
                timestamp_ns,
                frame_number,
            } => write!(
                f,
                "CaptureStarted(frame={}, ts={})",
                frame_number, timestamp_ns
            ),
            CameraEvent::ImageAvailable(frame) => write!(f, "ImageAvailable({:?})", frame),
            CameraEvent::CaptureCompleted { frame_number } => {
                write!(f, "CaptureCompleted(frame={})", frame_number)
            }
            CameraEvent::CaptureFailed(msg) => write!(f, "CaptureFailed({})", msg),
            other => f.write_str(other.name()),
        }
    }
}

/// Where a platform delivers callbacks for one acquisition attempt.
///
/// Cloneable and usable from any thread. Once the attempt closes, intake is
/// shut under the same mutex `deliver` sends under: late events are refused
/// and any device or session they carry is closed here, so a slow callback
/// cannot leak a handle.
///
/// An attempt that gave up while the platform still owed it a device or a
/// session parks its camera lock guard here. The guard is released by the
/// first late event, or when the last sink clone is dropped.
#[derive(Clone)]
pub struct CameraEventSink {
    shared: Arc<Mutex<SinkState>>,
}

struct SinkState {
    tx: Option<Sender<CameraEvent>>,
    parked: Option<CameraLockGuard>,
}

impl CameraEventSink {
    pub(crate) fn channel() -> (Self, Receiver<CameraEvent>) {
        let (tx, rx) = mpsc::channel();
        let state = SinkState {
            tx: Some(tx),
            parked: None,
        };
        (
            Self {
                shared: Arc::new(Mutex::new(state)),
            },
            rx,
        )
    }

    /// Returns false when the attempt is gone and the event was discarded.
    pub fn deliver(&self, event: CameraEvent) -> bool {
        let mut state = self.state();
        let event = match state.tx.as_ref() {
            Some(tx) => match tx.send(event) {
                Ok(()) => return true,
                Err(SendError(event)) => event,
            },
            None => event,
        };
        let parked = state.parked.take();
        drop(state);
        log::warn!("late camera event '{}' after session closed", event.name());
        event.discard();
        if parked.is_some() {
            log::info!("outstanding camera operation resolved; releasing camera lock");
        }
        false
    }

    /// Stop accepting events. `parked` stays held until a late event arrives
    /// or every clone of this sink is gone.
    pub(crate) fn close(&self, parked: Option<CameraLockGuard>) {
        let mut state = self.state();
        state.tx = None;
        state.parked = parked;
    }

    /// Drop a parked guard whose outstanding operation was answered before
    /// intake closed.
    pub(crate) fn release_parked(&self) {
        let parked = self.state().parked.take();
        drop(parked);
    }

    pub fn is_open(&self) -> bool {
        self.state().tx.is_some()
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for CameraEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraEventSink")
            .field("open", &self.is_open())
            .finish()
    }
}
