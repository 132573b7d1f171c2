//! Exclusive camera access.
//!
//! `ExclusiveCameraLock` is a binary mutex with a bounded acquire. The guard is
//! owned (`'static`) so an attempt can move it onto the capture worker and
//! release it there when its session reaches `Closed`.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default bounded wait for exclusive camera access.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2500);

#[derive(Debug, Default)]
pub struct ExclusiveCameraLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl ExclusiveCameraLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait up to `timeout` for exclusive access. `None` means the lock stayed
    /// held for the whole wait; the caller must not retry on its own.
    pub fn try_acquire_for(self: &Arc<Self>, timeout: Duration) -> Option<CameraLockGuard> {
        let deadline = Instant::now() + timeout;
        let mut held = self.state();
        while *held {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            held = match self.released.wait_timeout(held, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *held = true;
        Some(CameraLockGuard {
            lock: Arc::clone(self),
        })
    }

    /// Non-blocking acquire.
    pub fn try_acquire(self: &Arc<Self>) -> Option<CameraLockGuard> {
        self.try_acquire_for(Duration::ZERO)
    }

    pub fn is_held(&self) -> bool {
        *self.state()
    }

    fn release(&self) {
        let mut held = self.state();
        *held = false;
        drop(held);
        self.released.notify_one();
    }

    // The flag is a plain bool, so a poisoned mutex still holds a valid value.
    fn state(&self) -> MutexGuard<'_, bool> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Proof of exclusive camera access. Dropping it releases the lock.
#[derive(Debug)]
pub struct CameraLockGuard {
    lock: Arc<ExclusiveCameraLock>,
}

impl Drop for CameraLockGuard {
    fn drop(&mut self) {
        self.lock.release();
        log::debug!("camera lock released");
    }
}
