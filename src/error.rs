//! Typed failures of a single acquisition attempt.
//!
//! Every variant is terminal for the attempt that produced it. The session is
//! already closed and the camera lock released by the time the caller sees one
//! of these. None of them is fatal to the process: the next debounced trigger
//! starts a fresh attempt.

use std::io;

pub type CaptureResult<T> = Result<T, CaptureError>;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The exclusive camera lock was not acquired within the bounded wait.
    #[error("camera busy: exclusive access not granted within the lock timeout")]
    DeviceBusy,

    /// The platform denied or failed to open the device.
    #[error("camera open failed: {0}")]
    OpenFailed(String),

    /// The capture session configuration was rejected.
    #[error("capture session configuration failed: {0}")]
    ConfigFailed(String),

    /// The still-capture request was rejected or reported failure.
    #[error("still capture failed: {0}")]
    CaptureFailed(String),

    /// Writing the frame to storage failed. The frame buffer is still released.
    #[error("image write failed: {0}")]
    Io(#[from] io::Error),

    /// The platform stopped delivering callbacks before the attempt finished.
    #[error("capture interrupted: {0}")]
    Interrupted(String),

    /// The capture worker no longer accepts work.
    #[error("capture worker is shut down")]
    WorkerStopped,
}

impl CaptureError {
    /// Short stable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::DeviceBusy => "DEVICE_BUSY",
            CaptureError::OpenFailed(_) => "OPEN_FAILED",
            CaptureError::ConfigFailed(_) => "CONFIG_FAILED",
            CaptureError::CaptureFailed(_) => "CAPTURE_FAILED",
            CaptureError::Io(_) => "IO_ERROR",
            CaptureError::Interrupted(_) => "INTERRUPTED",
            CaptureError::WorkerStopped => "WORKER_STOPPED",
        }
    }
}
