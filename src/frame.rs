//! Still-frame buffers handed from the camera to persistence.
//!
//! A `StillFrame` owns the encoded JPEG bytes of one capture together with the
//! hook that returns the underlying buffer to its producer. The hook fires
//! exactly once, when the frame is dropped, whatever happened to the bytes in
//! between. The bytes are zeroized at the same moment.

use std::fmt;

use zeroize::Zeroize;

use crate::size::Size;

type ReleaseHook = Box<dyn FnOnce() + Send + 'static>;

/// One encoded still image. No `Clone`: there is a single owner at a time.
pub struct StillFrame {
    /// JPEG bytes of the single image plane.
    data: Vec<u8>,

    pub size: Size,

    /// Sensor timestamp of the exposure, when the platform reports one.
    pub timestamp_ns: Option<u64>,

    release: Option<ReleaseHook>,
}

impl StillFrame {
    pub fn new(data: Vec<u8>, size: Size) -> Self {
        Self {
            data,
            size,
            timestamp_ns: None,
            release: None,
        }
    }

    /// Attach the producer's release function.
    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub fn with_timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = Some(timestamp_ns);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl Drop for StillFrame {
    fn drop(&mut self) {
        self.data.zeroize();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for StillFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StillFrame")
            .field("size", &self.size)
            .field("byte_len", &self.data.len())
            .field("timestamp_ns", &self.timestamp_ns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn release_hook_runs_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let frame = StillFrame::new(vec![0xFF, 0xD8, 0xFF], Size::new(1, 1))
            .with_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        assert_eq!(frame.byte_len(), 3);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_output_omits_image_bytes() {
        let frame = StillFrame::new(vec![42; 16], Size::new(4, 4));
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("byte_len: 16"));
        assert!(!rendered.contains("42, 42"));
    }
}
