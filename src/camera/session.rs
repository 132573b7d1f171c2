//! Capture-session state machine.
//!
//! One `CaptureSession` is one acquisition attempt. It owns everything the
//! attempt touches: the camera lock guard, the device handle, the session
//! handle, the event receiver and the target file. Nothing outside the attempt
//! can reach them. Each platform callback is handled by a named transition
//! function; the only legal path is
//!
//! `Closed -> Opening -> Open -> Configuring -> Ready -> Capturing -> Closing -> Closed`
//!
//! and any failure goes straight to `Closing -> Closed`. Closing releases the
//! session, then the device, then the lock, on every exit path including
//! unwinding.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use rand::Rng;

use super::{
    jpeg_orientation, AutoFocusMode, CameraDevice, CameraEvent, CameraEventSink, CameraIdentity,
    CameraPlatform, CaptureMode, DisplayRotation, OutputTarget, SessionHandle,
    StillCaptureRequest,
};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::StillFrame;
use crate::lock::CameraLockGuard;
use crate::persist::{ImageStore, PersistedImage};
use crate::size::{choose_optimal_size, AspectRatio};

/// Default bound on how long one stage may wait for its callback.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Configuring,
    Ready,
    Capturing,
    Closing,
}

impl SessionState {
    /// Legal single-step transitions.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, Opening)
            | (Opening, Open)
            | (Open, Configuring)
            | (Configuring, Ready)
            | (Ready, Capturing)
            | (Closing, Closed) => true,
            (Closed | Closing, Closing) => false,
            (_, Closing) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub target_aspect: AspectRatio,
    pub capture_mode: CaptureMode,
    pub stage_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            target_aspect: AspectRatio::default(),
            capture_mode: CaptureMode::default(),
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }
}

pub struct CaptureSession {
    id: String,
    identity: CameraIdentity,
    rotation: DisplayRotation,
    settings: SessionSettings,
    state: SessionState,
    history: Vec<SessionState>,
    device: Option<Box<dyn CameraDevice>>,
    session: Option<Box<dyn SessionHandle>>,
    target_file: Option<PathBuf>,
    sink: CameraEventSink,
    events: Receiver<CameraEvent>,
    /// The platform still owes a device or session callback.
    awaiting_handle: bool,
    lock: Option<CameraLockGuard>,
}

impl CaptureSession {
    /// A new attempt in `Closed`, holding exclusive camera access.
    pub fn new(
        lock: CameraLockGuard,
        identity: CameraIdentity,
        rotation: DisplayRotation,
        settings: SessionSettings,
    ) -> Self {
        let (sink, events) = CameraEventSink::channel();
        Self {
            id: format!("{:016x}", rand::thread_rng().gen::<u64>()),
            identity,
            rotation,
            settings,
            state: SessionState::Closed,
            history: vec![SessionState::Closed],
            device: None,
            session: None,
            target_file: None,
            sink,
            events,
            awaiting_handle: false,
            lock: Some(lock),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state visited so far, starting with `Closed`.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Drive the attempt to completion and close it.
    pub fn run(
        &mut self,
        platform: &dyn CameraPlatform,
        store: &ImageStore,
    ) -> CaptureResult<PersistedImage> {
        let result = self.drive(platform, store);
        match &result {
            Ok(image) => log::info!(
                "session {}: saved {} ({} bytes) from camera {}",
                self.id,
                image.path.display(),
                image.byte_length,
                self.identity.id
            ),
            Err(err) => log::warn!(
                "session {}: camera {} failed in {:?}: {} [{}]",
                self.id,
                self.identity.id,
                self.state,
                err,
                err.code()
            ),
        }
        self.close();
        result
    }

    fn drive(
        &mut self,
        platform: &dyn CameraPlatform,
        store: &ImageStore,
    ) -> CaptureResult<PersistedImage> {
        self.advance(SessionState::Opening);
        platform
            .open(&self.identity.id, self.sink.clone())
            .map_err(|err| CaptureError::OpenFailed(format!("{:#}", err)))?;
        self.awaiting_handle = true;
        let event = self.next_event()?;
        self.on_open_result(event)?;

        self.begin_configuration()?;
        let event = self.next_event()?;
        self.on_configure_result(event)?;

        self.begin_capture()?;
        loop {
            match self.next_event()? {
                CameraEvent::CaptureStarted {
                    timestamp_ns,
                    frame_number,
                } => self.on_capture_started(store, timestamp_ns, frame_number)?,
                CameraEvent::CaptureCompleted { frame_number } => {
                    self.on_capture_completed(frame_number)
                }
                CameraEvent::ImageAvailable(frame) => {
                    return self.on_image_available(store, frame);
                }
                CameraEvent::CaptureFailed(reason) => {
                    return Err(CaptureError::CaptureFailed(reason));
                }
                CameraEvent::Disconnected => {
                    return Err(CaptureError::Interrupted(
                        "camera disconnected during capture".to_string(),
                    ));
                }
                CameraEvent::DeviceError(reason) => {
                    return Err(CaptureError::Interrupted(format!(
                        "camera error during capture: {}",
                        reason
                    )));
                }
                unexpected => self.on_unexpected(unexpected),
            }
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn on_open_result(&mut self, event: CameraEvent) -> CaptureResult<()> {
        match event {
            CameraEvent::Opened(device) => {
                self.on_opened(device);
                Ok(())
            }
            CameraEvent::Disconnected => Err(CaptureError::OpenFailed(
                "camera disconnected while opening".to_string(),
            )),
            CameraEvent::DeviceError(reason) => Err(CaptureError::OpenFailed(reason)),
            unexpected => {
                let name = unexpected.name();
                self.on_unexpected(unexpected);
                Err(CaptureError::OpenFailed(format!(
                    "unexpected '{}' while opening",
                    name
                )))
            }
        }
    }

    fn on_opened(&mut self, device: Box<dyn CameraDevice>) {
        log::debug!("session {}: camera {} opened", self.id, device.id());
        self.device = Some(device);
        self.advance(SessionState::Open);
    }

    fn begin_configuration(&mut self) -> CaptureResult<()> {
        self.advance(SessionState::Configuring);
        let outputs = self.output_targets()?;
        let sink = self.sink.clone();
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| CaptureError::ConfigFailed("no open device".to_string()))?;
        device
            .create_session(&outputs, sink)
            .map_err(|err| CaptureError::ConfigFailed(format!("{:#}", err)))?;
        self.awaiting_handle = true;
        Ok(())
    }

    fn on_configure_result(&mut self, event: CameraEvent) -> CaptureResult<()> {
        match event {
            CameraEvent::Configured(session) => {
                self.on_configured(session);
                Ok(())
            }
            CameraEvent::ConfigureFailed(reason) => Err(CaptureError::ConfigFailed(reason)),
            CameraEvent::Disconnected => Err(CaptureError::Interrupted(
                "camera disconnected while configuring".to_string(),
            )),
            CameraEvent::DeviceError(reason) => Err(CaptureError::Interrupted(format!(
                "camera error while configuring: {}",
                reason
            ))),
            unexpected => {
                let name = unexpected.name();
                self.on_unexpected(unexpected);
                Err(CaptureError::ConfigFailed(format!(
                    "unexpected '{}' while configuring",
                    name
                )))
            }
        }
    }

    fn on_configured(&mut self, session: Box<dyn SessionHandle>) {
        log::debug!("session {}: capture session configured", self.id);
        self.session = Some(session);
        self.advance(SessionState::Ready);
    }

    fn begin_capture(&mut self) -> CaptureResult<()> {
        let request = self.still_request()?;
        self.advance(SessionState::Capturing);
        let sink = self.sink.clone();
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CaptureError::CaptureFailed("no configured session".to_string()))?;
        log::debug!(
            "session {}: still request {} jpeg_orientation={}",
            self.id,
            request.target.size,
            request.jpeg_orientation
        );
        session
            .capture(&request, sink)
            .map_err(|err| CaptureError::CaptureFailed(format!("{:#}", err)))
    }

    fn on_capture_started(
        &mut self,
        store: &ImageStore,
        timestamp_ns: u64,
        frame_number: u64,
    ) -> CaptureResult<()> {
        log::debug!(
            "session {}: capture started (frame {}, ts {})",
            self.id,
            frame_number,
            timestamp_ns
        );
        if self.target_file.is_none() {
            let path = store.begin_naming(&self.id)?;
            log::info!("session {}: file created {}", self.id, path.display());
            self.target_file = Some(path);
        }
        Ok(())
    }

    fn on_capture_completed(&mut self, frame_number: u64) {
        log::info!("session {}: picture captured (frame {})", self.id, frame_number);
    }

    fn on_image_available(
        &mut self,
        store: &ImageStore,
        frame: StillFrame,
    ) -> CaptureResult<PersistedImage> {
        let path = match self.target_file.take() {
            Some(path) => path,
            None => {
                log::warn!(
                    "session {}: image arrived before capture start; naming now",
                    self.id
                );
                match store.begin_naming(&self.id) {
                    Ok(path) => path,
                    Err(err) => {
                        drop(frame);
                        return Err(err.into());
                    }
                }
            }
        };
        store.save(&path, frame)
    }

    fn on_unexpected(&mut self, event: CameraEvent) {
        log::warn!(
            "session {}: ignoring '{}' in {:?}",
            self.id,
            event.name(),
            self.state
        );
        event.discard();
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn output_targets(&self) -> CaptureResult<Vec<OutputTarget>> {
        let size = choose_optimal_size(
            &self.identity.supported_still_sizes,
            self.settings.target_aspect,
        )
        .ok_or_else(|| {
            CaptureError::ConfigFailed(format!(
                "camera {} reports no still sizes",
                self.identity.id
            ))
        })?;
        log::debug!("session {}: still surface {}", self.id, size);
        Ok(match self.settings.capture_mode {
            CaptureMode::Still => vec![OutputTarget::still(size)],
            CaptureMode::PreviewAndStill => {
                vec![OutputTarget::preview(size), OutputTarget::still(size)]
            }
        })
    }

    fn still_request(&self) -> CaptureResult<StillCaptureRequest> {
        let target = self
            .output_targets()?
            .into_iter()
            .find(|target| target.role == super::SurfaceRole::Still)
            .ok_or_else(|| CaptureError::CaptureFailed("no still surface".to_string()))?;
        Ok(StillCaptureRequest {
            target,
            auto_focus: AutoFocusMode::ContinuousPicture,
            jpeg_orientation: jpeg_orientation(self.identity.sensor_orientation, self.rotation),
        })
    }

    fn next_event(&mut self) -> CaptureResult<CameraEvent> {
        match self.events.recv_timeout(self.settings.stage_timeout) {
            Ok(event) => {
                log::debug!("session {}: {:?} in {:?}", self.id, event, self.state);
                self.awaiting_handle = false;
                Ok(event)
            }
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Interrupted(format!(
                "no camera callback within {:?} while {:?}",
                self.settings.stage_timeout, self.state
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Interrupted(
                "camera event channel closed".to_string(),
            )),
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        log::debug!("session {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Release session, device and lock. Idempotent.
    ///
    /// Intake is shut before the receiver is drained, so nothing can slip in
    /// afterwards. When a device or session grant is still outstanding the
    /// lock guard moves into the sink and is released once that grant has
    /// been discarded.
    fn close(&mut self) {
        if self.state == SessionState::Closed && !self.sink.is_open() {
            return;
        }
        if !matches!(self.state, SessionState::Closed | SessionState::Closing) {
            self.advance(SessionState::Closing);
        }
        let parked = if self.awaiting_handle {
            log::warn!(
                "session {}: camera {} still owes a callback; holding the camera lock",
                self.id,
                self.identity.id
            );
            self.lock.take()
        } else {
            None
        };
        self.sink.close(parked);
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        if let Some(mut device) = self.device.take() {
            device.close();
            log::info!("session {}: camera {} closed", self.id, self.identity.id);
        }
        let mut drained = false;
        while let Ok(event) = self.events.try_recv() {
            drained = true;
            event.discard();
        }
        if drained && self.awaiting_handle {
            self.sink.release_parked();
        }
        self.awaiting_handle = false;
        if self.state != SessionState::Closed {
            self.advance(SessionState::Closed);
        }
        self.lock.take();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::stub::{FailurePoint, StubCameraPlatform};
    use crate::camera::{ImageFormat, SurfaceRole};
    use crate::lock::ExclusiveCameraLock;
    use crate::size::Size;
    use SessionState::*;

    fn settings() -> SessionSettings {
        SessionSettings {
            stage_timeout: Duration::from_millis(200),
            ..SessionSettings::default()
        }
    }

    fn run_with(
        platform: &StubCameraPlatform,
        store: &ImageStore,
    ) -> (CaptureResult<PersistedImage>, Vec<SessionState>) {
        let lock = ExclusiveCameraLock::new();
        let guard = lock.try_acquire().expect("lock");
        let identity = platform.identity("stub://front").expect("identity");
        let mut session = CaptureSession::new(guard, identity, DisplayRotation::Deg0, settings());
        let result = session.run(platform, store);
        assert!(!lock.is_held());
        (result, session.history().to_vec())
    }

    #[test]
    fn transition_table_only_allows_the_linear_path() {
        assert!(Closed.can_advance_to(Opening));
        assert!(Capturing.can_advance_to(Closing));
        assert!(Opening.can_advance_to(Closing));
        assert!(!Opening.can_advance_to(Configuring));
        assert!(!Open.can_advance_to(Ready));
        assert!(!Closed.can_advance_to(Closing));
        assert!(!Closing.can_advance_to(Opening));
        assert!(!Ready.can_advance_to(Closed));
    }

    #[test]
    fn successful_capture_visits_every_stage_in_order() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::new(temp_dir.path()).expect("store");
        let platform = StubCameraPlatform::new();

        let (result, history) = run_with(&platform, &store);

        let image = result.expect("capture");
        assert!(image.byte_length > 0);
        assert_eq!(
            history,
            vec![Closed, Opening, Open, Configuring, Ready, Capturing, Closing, Closed]
        );
        assert_eq!(platform.outstanding_handles(), 0);
    }

    #[test]
    fn config_failure_skips_straight_to_closing() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::new(temp_dir.path()).expect("store");
        let platform = StubCameraPlatform::new().failing_at(FailurePoint::ConfigureCallback);

        let (result, history) = run_with(&platform, &store);

        assert!(matches!(result, Err(CaptureError::ConfigFailed(_))));
        assert_eq!(history, vec![Closed, Opening, Open, Configuring, Closing, Closed]);
        assert_eq!(platform.outstanding_handles(), 0);
    }

    #[test]
    fn image_before_capture_start_is_still_named_and_saved() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::new(temp_dir.path()).expect("store");
        let platform = StubCameraPlatform::new().failing_at(FailurePoint::SkipCaptureStarted);

        let (result, _) = run_with(&platform, &store);

        let image = result.expect("capture");
        assert!(image.path.starts_with(store.root()));
        assert_eq!(platform.frames_released(), 1);
    }

    #[test]
    fn request_carries_orientation_and_portrait_size() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::new(temp_dir.path()).expect("store");
        let platform = StubCameraPlatform::with_cameras(vec![CameraIdentity {
            id: "stub://front".to_string(),
            sensor_orientation: 270,
            supported_still_sizes: vec![Size::new(320, 240), Size::new(1080, 768)],
            lens_facing: crate::camera::LensFacing::Front,
        }]);
        let lock = ExclusiveCameraLock::new();
        let identity = platform.identity("stub://front").expect("identity");
        let mut session = CaptureSession::new(
            lock.try_acquire().expect("lock"),
            identity,
            DisplayRotation::Deg90,
            settings(),
        );

        session.run(&platform, &store).expect("capture");

        let request = platform.last_request().expect("request recorded");
        assert_eq!(request.jpeg_orientation, 0);
        assert_eq!(request.auto_focus, AutoFocusMode::ContinuousPicture);
        assert_eq!(request.target.size, Size::new(768, 1080));
    }

    #[test]
    fn device_error_while_configuring_interrupts_the_attempt() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::new(temp_dir.path()).expect("store");
        let platform = StubCameraPlatform::new().failing_at(FailurePoint::DeviceErrorOnConfigure);

        let (result, history) = run_with(&platform, &store);

        assert!(matches!(result, Err(CaptureError::Interrupted(_))));
        assert_eq!(history, vec![Closed, Opening, Open, Configuring, Closing, Closed]);
        assert_eq!(platform.outstanding_handles(), 0);
    }

    #[test]
    fn device_granted_after_open_timeout_is_closed() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::new(temp_dir.path()).expect("store");
        let platform = StubCameraPlatform::new().with_callback_delay(Duration::from_millis(300));
        let lock = ExclusiveCameraLock::new();
        let identity = platform.identity("stub://front").expect("identity");
        let mut session = CaptureSession::new(
            lock.try_acquire().expect("lock"),
            identity,
            DisplayRotation::Deg0,
            SessionSettings {
                stage_timeout: Duration::from_millis(100),
                ..SessionSettings::default()
            },
        );

        let result = session.run(&platform, &store);
        assert!(matches!(result, Err(CaptureError::Interrupted(_))));
        assert_eq!(session.state(), Closed);
        // The grant is still owed, so the camera stays reserved.
        assert!(lock.is_held());

        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(platform.outstanding_devices(), 0);
        assert!(!lock.is_held());

        drop(session);
        assert_eq!(platform.outstanding_handles(), 0);
    }

    #[test]
    fn preview_and_still_mode_targets_only_the_still_surface() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::new(temp_dir.path()).expect("store");
        let platform = StubCameraPlatform::new();
        let lock = ExclusiveCameraLock::new();
        let identity = platform.identity("stub://front").expect("identity");
        let mut session = CaptureSession::new(
            lock.try_acquire().expect("lock"),
            identity,
            DisplayRotation::Deg0,
            SessionSettings {
                capture_mode: CaptureMode::PreviewAndStill,
                ..settings()
            },
        );

        session.run(&platform, &store).expect("capture");

        let outputs = platform.last_outputs();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].role, SurfaceRole::Preview);
        assert_eq!(outputs[1].role, SurfaceRole::Still);
        let request = platform.last_request().expect("request recorded");
        assert_eq!(request.target.role, SurfaceRole::Still);
        assert_eq!(request.target.format, ImageFormat::Jpeg);
        assert_eq!(platform.outstanding_handles(), 0);
    }
}
