//! Synthetic camera platform (`stub://` ids).
//!
//! Behaves like a callback-driven camera subsystem: every operation returns at
//! once and its outcome is pushed into the event sink, either inline or from a
//! helper thread after a configurable delay. Frames are real JPEGs of the
//! requested size with a generated test pattern.
//!
//! Any stage can be made to fail, and the platform counts open devices, open
//! sessions and released frames so callers can prove nothing leaked.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use super::{
    CameraDevice, CameraEvent, CameraEventSink, CameraIdentity, CameraPlatform, LensFacing,
    OutputTarget, SessionHandle, StillCaptureRequest,
};
use crate::frame::StillFrame;
use crate::size::Size;

/// Where the stub platform should fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePoint {
    /// `open` itself returns an error.
    OpenCall,
    /// The open callback reports a device error.
    OpenCallback,
    /// The device disconnects before it is granted.
    DisconnectOnOpen,
    /// `create_session` returns an error.
    ConfigureCall,
    /// The configuration callback reports failure.
    ConfigureCallback,
    /// The device disconnects while the session is being configured.
    DisconnectOnConfigure,
    /// The device reports an error while the session is being configured.
    DeviceErrorOnConfigure,
    /// `capture` returns an error.
    CaptureCall,
    /// The capture starts, then reports failure.
    CaptureCallback,
    /// The capture starts, then the device disconnects.
    DisconnectDuringCapture,
    /// The capture starts but no image ever arrives.
    NoImage,
    /// The image arrives without a preceding capture-started callback.
    SkipCaptureStarted,
}

#[derive(Clone)]
pub struct StubCameraPlatform {
    inner: Arc<StubState>,
}

struct StubState {
    cameras: Vec<CameraIdentity>,
    failure: Mutex<Option<FailurePoint>>,
    callback_delay: Mutex<Duration>,
    open_calls: AtomicUsize,
    open_devices: AtomicUsize,
    open_sessions: AtomicUsize,
    frames_delivered: AtomicUsize,
    frames_released: Arc<AtomicUsize>,
    frame_counter: AtomicU64,
    requests: Mutex<Vec<StillCaptureRequest>>,
    configured_outputs: Mutex<Vec<OutputTarget>>,
    hardware_threads: Mutex<Vec<ThreadId>>,
}

impl StubCameraPlatform {
    /// A front camera (`stub://front`) and a back camera (`stub://back`).
    pub fn new() -> Self {
        Self::with_cameras(vec![
            CameraIdentity {
                id: "stub://back".to_string(),
                sensor_orientation: 90,
                supported_still_sizes: vec![Size::new(640, 480), Size::new(320, 240)],
                lens_facing: LensFacing::Back,
            },
            CameraIdentity {
                id: "stub://front".to_string(),
                sensor_orientation: 270,
                supported_still_sizes: vec![Size::new(640, 480), Size::new(320, 240)],
                lens_facing: LensFacing::Front,
            },
        ])
    }

    pub fn with_cameras(cameras: Vec<CameraIdentity>) -> Self {
        Self {
            inner: Arc::new(StubState {
                cameras,
                failure: Mutex::new(None),
                callback_delay: Mutex::new(Duration::ZERO),
                open_calls: AtomicUsize::new(0),
                open_devices: AtomicUsize::new(0),
                open_sessions: AtomicUsize::new(0),
                frames_delivered: AtomicUsize::new(0),
                frames_released: Arc::new(AtomicUsize::new(0)),
                frame_counter: AtomicU64::new(0),
                requests: Mutex::new(Vec::new()),
                configured_outputs: Mutex::new(Vec::new()),
                hardware_threads: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn failing_at(self, point: FailurePoint) -> Self {
        self.set_failure(Some(point));
        self
    }

    /// Deliver every callback from a helper thread after `delay`.
    pub fn with_callback_delay(self, delay: Duration) -> Self {
        *lock(&self.inner.callback_delay) = delay;
        self
    }

    pub fn set_failure(&self, point: Option<FailurePoint>) {
        *lock(&self.inner.failure) = point;
    }

    pub fn open_calls(&self) -> usize {
        self.inner.open_calls.load(Ordering::SeqCst)
    }

    pub fn outstanding_devices(&self) -> usize {
        self.inner.open_devices.load(Ordering::SeqCst)
    }

    pub fn outstanding_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    pub fn outstanding_handles(&self) -> usize {
        self.outstanding_devices() + self.outstanding_sessions()
    }

    pub fn frames_delivered(&self) -> usize {
        self.inner.frames_delivered.load(Ordering::SeqCst)
    }

    pub fn frames_released(&self) -> usize {
        self.inner.frames_released.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<StillCaptureRequest> {
        lock(&self.inner.requests).last().copied()
    }

    /// Surfaces passed to the most recent `create_session`.
    pub fn last_outputs(&self) -> Vec<OutputTarget> {
        lock(&self.inner.configured_outputs).clone()
    }

    /// Threads that issued hardware calls, in call order.
    pub fn hardware_threads(&self) -> Vec<ThreadId> {
        lock(&self.inner.hardware_threads).clone()
    }
}

impl Default for StubCameraPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl StubState {
    fn failure(&self) -> Option<FailurePoint> {
        *lock(&self.failure)
    }

    fn fails_at(&self, point: FailurePoint) -> bool {
        self.failure() == Some(point)
    }

    fn record_call(&self) {
        lock(&self.hardware_threads).push(thread::current().id());
    }

    /// Push callbacks in order, inline or from a helper thread.
    fn deliver(&self, sink: CameraEventSink, events: Vec<CameraEvent>) {
        let delay = *lock(&self.callback_delay);
        if delay.is_zero() {
            for event in events {
                sink.deliver(event);
            }
            return;
        }
        thread::spawn(move || {
            thread::sleep(delay);
            for event in events {
                sink.deliver(event);
            }
        });
    }
}

impl CameraPlatform for StubCameraPlatform {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn camera_ids(&self) -> Result<Vec<String>> {
        Ok(self.inner.cameras.iter().map(|c| c.id.clone()).collect())
    }

    fn identity(&self, camera_id: &str) -> Result<CameraIdentity> {
        self.inner
            .cameras
            .iter()
            .find(|c| c.id == camera_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown stub camera '{}'", camera_id))
    }

    fn open(&self, camera_id: &str, events: CameraEventSink) -> Result<()> {
        self.inner.record_call();
        self.inner.open_calls.fetch_add(1, Ordering::SeqCst);
        let identity = self.identity(camera_id)?;
        let event = match self.inner.failure() {
            Some(FailurePoint::OpenCall) => bail!("camera service refused {}", camera_id),
            Some(FailurePoint::OpenCallback) => {
                CameraEvent::DeviceError(format!("{}: ERROR_CAMERA_DEVICE", camera_id))
            }
            Some(FailurePoint::DisconnectOnOpen) => CameraEvent::Disconnected,
            _ => {
                self.inner.open_devices.fetch_add(1, Ordering::SeqCst);
                CameraEvent::Opened(Box::new(StubDevice {
                    identity,
                    state: Arc::clone(&self.inner),
                    closed: false,
                }))
            }
        };
        self.inner.deliver(events, vec![event]);
        Ok(())
    }
}

struct StubDevice {
    identity: CameraIdentity,
    state: Arc<StubState>,
    closed: bool,
}

impl CameraDevice for StubDevice {
    fn id(&self) -> &str {
        &self.identity.id
    }

    fn create_session(&mut self, outputs: &[OutputTarget], events: CameraEventSink) -> Result<()> {
        self.state.record_call();
        if self.closed {
            bail!("device {} already closed", self.identity.id);
        }
        if outputs.is_empty() {
            bail!("no output surfaces");
        }
        *lock(&self.state.configured_outputs) = outputs.to_vec();
        let event = match self.state.failure() {
            Some(FailurePoint::ConfigureCall) => bail!("invalid output configuration"),
            Some(FailurePoint::ConfigureCallback) => {
                CameraEvent::ConfigureFailed("stream configuration rejected".to_string())
            }
            Some(FailurePoint::DisconnectOnConfigure) => CameraEvent::Disconnected,
            Some(FailurePoint::DeviceErrorOnConfigure) => {
                CameraEvent::DeviceError("ERROR_CAMERA_SERVICE".to_string())
            }
            _ => {
                self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
                CameraEvent::Configured(Box::new(StubSession {
                    state: Arc::clone(&self.state),
                    outputs: outputs.to_vec(),
                    closed: false,
                }))
            }
        };
        self.state.deliver(events, vec![event]);
        Ok(())
    }

    fn close(&mut self) {
        self.state.record_call();
        if !self.closed {
            self.closed = true;
            self.state.open_devices.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct StubSession {
    state: Arc<StubState>,
    outputs: Vec<OutputTarget>,
    closed: bool,
}

impl SessionHandle for StubSession {
    fn capture(&mut self, request: &StillCaptureRequest, events: CameraEventSink) -> Result<()> {
        self.state.record_call();
        if self.closed {
            bail!("session already closed");
        }
        if !self.outputs.contains(&request.target) {
            bail!("request targets a surface outside the session");
        }
        lock(&self.state.requests).push(*request);
        if self.state.fails_at(FailurePoint::CaptureCall) {
            bail!("capture request rejected");
        }

        let frame_number = self.state.frame_counter.fetch_add(1, Ordering::SeqCst);
        let timestamp_ns = frame_number * 33_000_000;
        let started = CameraEvent::CaptureStarted {
            timestamp_ns,
            frame_number,
        };
        let sequence = match self.state.failure() {
            Some(FailurePoint::CaptureCallback) => vec![
                started,
                CameraEvent::CaptureFailed("frame dropped by sensor".to_string()),
            ],
            Some(FailurePoint::DisconnectDuringCapture) => vec![started, CameraEvent::Disconnected],
            Some(FailurePoint::NoImage) => vec![started],
            Some(FailurePoint::SkipCaptureStarted) => vec![
                CameraEvent::ImageAvailable(self.frame(request, timestamp_ns)?),
                CameraEvent::CaptureCompleted { frame_number },
            ],
            _ => vec![
                started,
                CameraEvent::ImageAvailable(self.frame(request, timestamp_ns)?),
                CameraEvent::CaptureCompleted { frame_number },
            ],
        };
        self.state.deliver(events, sequence);
        Ok(())
    }

    fn close(&mut self) {
        self.state.record_call();
        if !self.closed {
            self.closed = true;
            self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl StubSession {
    fn frame(&self, request: &StillCaptureRequest, timestamp_ns: u64) -> Result<StillFrame> {
        let size = request.target.size;
        let jpeg = synthetic_jpeg(size, timestamp_ns)?;
        self.state.frames_delivered.fetch_add(1, Ordering::SeqCst);
        let released = Arc::clone(&self.state.frames_released);
        Ok(StillFrame::new(jpeg, size)
            .with_timestamp(timestamp_ns)
            .with_release(move || {
                released.fetch_add(1, Ordering::SeqCst);
            }))
    }
}

/// Gradient test pattern encoded as JPEG.
fn synthetic_jpeg(size: Size, seed: u64) -> Result<Vec<u8>> {
    let shade = (seed % 256) as u8;
    let pattern = image::RgbImage::from_fn(size.width, size.height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, shade])
    });
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 80).encode_image(&pattern)?;
    Ok(out)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_front_and_back_cameras() -> Result<()> {
        let platform = StubCameraPlatform::new();
        assert_eq!(platform.camera_ids()?, vec!["stub://back", "stub://front"]);
        assert_eq!(platform.identity("stub://front")?.lens_facing, LensFacing::Front);
        assert!(platform.identity("stub://side").is_err());
        Ok(())
    }

    #[test]
    fn synthetic_frames_are_jpeg() -> Result<()> {
        let jpeg = synthetic_jpeg(Size::new(48, 64), 3)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        Ok(())
    }

    #[test]
    fn open_delivers_a_device_and_counts_it() -> Result<()> {
        let platform = StubCameraPlatform::new();
        let (sink, rx) = CameraEventSink::channel();
        platform.open("stub://front", sink)?;
        match rx.recv()? {
            CameraEvent::Opened(mut device) => {
                assert_eq!(platform.outstanding_devices(), 1);
                device.close();
                device.close();
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(platform.outstanding_devices(), 0);
        Ok(())
    }

    #[test]
    fn delayed_callbacks_arrive_from_another_thread() -> Result<()> {
        let platform = StubCameraPlatform::new().with_callback_delay(Duration::from_millis(10));
        let (sink, rx) = CameraEventSink::channel();
        platform.open("stub://front", sink)?;
        assert!(rx.try_recv().is_err());
        let event = rx.recv_timeout(Duration::from_secs(2))?;
        assert_eq!(event.name(), "opened");
        event.discard();
        assert_eq!(platform.outstanding_devices(), 0);
        Ok(())
    }
}
