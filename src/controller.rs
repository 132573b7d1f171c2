//! Camera controller: exclusive, fail-fast, one-shot still acquisition.
//!
//! The controller takes the camera lock on the caller's context with a bounded
//! wait, then hands the guard and a fresh `CaptureSession` to the capture
//! worker. A second request while one is in flight therefore waits at most the
//! lock timeout and fails with `DeviceBusy`; it never queues behind the first.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::camera::{
    CameraIdentity, CameraPlatform, CaptureSession, DisplayRotation, LensFacing, SessionSettings,
};
use crate::error::{CaptureError, CaptureResult};
use crate::lock::{CameraLockGuard, ExclusiveCameraLock, DEFAULT_LOCK_TIMEOUT};
use crate::persist::{ImageStore, PersistedImage};
use crate::worker::CaptureWorker;

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Bounded wait for exclusive camera access.
    pub lock_timeout: Duration,
    pub session: SessionSettings,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            session: SessionSettings::default(),
        }
    }
}

pub struct CameraController {
    platform: Arc<dyn CameraPlatform>,
    store: Arc<ImageStore>,
    lock: Arc<ExclusiveCameraLock>,
    worker: Arc<CaptureWorker>,
    settings: ControllerSettings,
}

impl CameraController {
    pub fn new(
        platform: Arc<dyn CameraPlatform>,
        store: ImageStore,
        worker: Arc<CaptureWorker>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            platform,
            store: Arc::new(store),
            lock: ExclusiveCameraLock::new(),
            worker,
            settings,
        }
    }

    /// Share an existing lock, e.g. with another controller for the same
    /// hardware.
    pub fn with_lock(mut self, lock: Arc<ExclusiveCameraLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn lock(&self) -> &Arc<ExclusiveCameraLock> {
        &self.lock
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    pub fn platform(&self) -> &Arc<dyn CameraPlatform> {
        &self.platform
    }

    /// True while an acquisition holds the camera.
    pub fn is_busy(&self) -> bool {
        self.lock.is_held()
    }

    /// Capture one still from `identity` and wait for the outcome.
    pub fn acquire_and_capture(
        &self,
        identity: CameraIdentity,
        rotation: DisplayRotation,
    ) -> CaptureResult<PersistedImage> {
        self.submit(identity, rotation)?.wait()
    }

    /// Start an acquisition and return without waiting for it.
    pub fn submit(
        &self,
        identity: CameraIdentity,
        rotation: DisplayRotation,
    ) -> CaptureResult<PendingCapture> {
        let guard = self.acquire_lock(&identity.id)?;
        let camera_id = identity.id.clone();
        let platform = Arc::clone(&self.platform);
        let store = Arc::clone(&self.store);
        let settings = self.settings.session.clone();
        let results = self.worker.submit(move || {
            let mut session = CaptureSession::new(guard, identity, rotation, settings);
            session.run(platform.as_ref(), &store)
        })?;
        Ok(PendingCapture { camera_id, results })
    }

    /// Like `submit`, but the camera identity is queried on the worker at the
    /// start of the attempt so it is fresh for every acquisition.
    pub fn submit_camera(
        &self,
        camera_id: &str,
        rotation: DisplayRotation,
    ) -> CaptureResult<PendingCapture> {
        let guard = self.acquire_lock(camera_id)?;
        let id = camera_id.to_string();
        let platform = Arc::clone(&self.platform);
        let store = Arc::clone(&self.store);
        let settings = self.settings.session.clone();
        let results = self.worker.submit(move || {
            let identity = platform.identity(&id).map_err(|err| {
                log::warn!("camera {}: characteristics unavailable: {:#}", id, err);
                CaptureError::OpenFailed(format!("{:#}", err))
            })?;
            let mut session = CaptureSession::new(guard, identity, rotation, settings);
            session.run(platform.as_ref(), &store)
        })?;
        Ok(PendingCapture {
            camera_id: camera_id.to_string(),
            results,
        })
    }

    /// Drain the capture worker. In-flight attempts finish and release their
    /// handles before this returns.
    pub fn shutdown(&self) -> Result<()> {
        self.worker.shutdown()
    }

    fn acquire_lock(&self, camera_id: &str) -> CaptureResult<CameraLockGuard> {
        self.lock
            .try_acquire_for(self.settings.lock_timeout)
            .ok_or_else(|| {
                log::warn!(
                    "camera {}: lock not acquired within {:?}",
                    camera_id,
                    self.settings.lock_timeout
                );
                CaptureError::DeviceBusy
            })
    }
}

/// An acquisition running on the capture worker.
#[derive(Debug)]
pub struct PendingCapture {
    camera_id: String,
    results: Receiver<CaptureResult<PersistedImage>>,
}

impl PendingCapture {
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Block until the attempt reaches `Closed`.
    pub fn wait(self) -> CaptureResult<PersistedImage> {
        self.results.recv().unwrap_or_else(|_| {
            Err(CaptureError::Interrupted(
                "capture worker dropped the attempt".to_string(),
            ))
        })
    }

    /// `None` while the attempt is still running.
    pub fn try_wait(&self) -> Option<CaptureResult<PersistedImage>> {
        match self.results.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(CaptureError::Interrupted(
                "capture worker dropped the attempt".to_string(),
            ))),
        }
    }
}

/// The first camera facing `facing`, or the first camera at all.
pub fn select_camera(platform: &dyn CameraPlatform, facing: LensFacing) -> Result<CameraIdentity> {
    let mut first = None;
    for id in platform.camera_ids()? {
        let identity = match platform.identity(&id) {
            Ok(identity) => identity,
            Err(err) => {
                log::warn!("camera {}: skipped: {:#}", id, err);
                continue;
            }
        };
        if identity.lens_facing == facing {
            return Ok(identity);
        }
        first.get_or_insert(identity);
    }
    first.ok_or_else(|| anyhow!("{} platform reports no cameras", platform.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::StubCameraPlatform;
    use crate::size::Size;

    fn controller(
        platform: StubCameraPlatform,
        worker: CaptureWorker,
    ) -> (CameraController, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::new(temp_dir.path()).expect("store");
        let settings = ControllerSettings {
            lock_timeout: Duration::from_millis(100),
            session: SessionSettings {
                stage_timeout: Duration::from_millis(500),
                ..SessionSettings::default()
            },
        };
        (
            CameraController::new(Arc::new(platform), store, Arc::new(worker), settings),
            temp_dir,
        )
    }

    #[test]
    fn select_camera_prefers_requested_facing() -> Result<()> {
        let platform = StubCameraPlatform::new();
        assert_eq!(select_camera(&platform, LensFacing::Front)?.id, "stub://front");
        assert_eq!(select_camera(&platform, LensFacing::Back)?.id, "stub://back");
        assert_eq!(select_camera(&platform, LensFacing::External)?.id, "stub://back");
        Ok(())
    }

    #[test]
    fn select_camera_fails_without_cameras() {
        let platform = StubCameraPlatform::with_cameras(Vec::new());
        assert!(select_camera(&platform, LensFacing::Front).is_err());
    }

    #[test]
    fn inline_capture_completes_synchronously() {
        let platform = StubCameraPlatform::new();
        let (controller, _dir) = controller(platform.clone(), CaptureWorker::inline());
        let identity = platform.identity("stub://front").expect("identity");

        let image = controller
            .acquire_and_capture(identity, DisplayRotation::Deg0)
            .expect("capture");

        assert!(image.path.exists());
        assert_eq!(platform.last_request().map(|r| r.target.size), Some(Size::new(480, 640)));
        assert!(!controller.is_busy());
    }

    #[test]
    fn busy_lock_fails_fast_without_touching_hardware() {
        let platform = StubCameraPlatform::new();
        let (controller, _dir) = controller(platform.clone(), CaptureWorker::inline());
        let _held = controller.lock().try_acquire().expect("hold lock");
        let identity = platform.identity("stub://front").expect("identity");

        let result = controller.acquire_and_capture(identity, DisplayRotation::Deg0);

        assert!(matches!(result, Err(CaptureError::DeviceBusy)));
        assert_eq!(platform.open_calls(), 0);
    }

    #[test]
    fn unknown_camera_releases_the_lock() -> Result<()> {
        let platform = StubCameraPlatform::new();
        let (controller, _dir) = controller(platform, CaptureWorker::start("test-unknown")?);

        let result = controller
            .submit_camera("stub://missing", DisplayRotation::Deg0)?
            .wait();

        assert!(matches!(result, Err(CaptureError::OpenFailed(_))));
        assert!(!controller.is_busy());
        Ok(())
    }

    #[test]
    fn submit_after_shutdown_reports_stopped_worker() -> Result<()> {
        let platform = StubCameraPlatform::new();
        let (controller, _dir) = controller(platform, CaptureWorker::start("test-stopped")?);
        controller.shutdown()?;

        let result = controller.submit_camera("stub://front", DisplayRotation::Deg0);

        assert!(matches!(result, Err(CaptureError::WorkerStopped)));
        assert!(!controller.is_busy());
        Ok(())
    }
}
