//! V4L2 camera platform.
//!
//! Camera ids are device nodes (e.g. `/dev/video0`). A still is one MJPEG
//! frame pulled from a short-lived mmap stream, so the device only streams
//! while a capture is actually running. V4L2 calls are synchronous; their
//! outcomes are delivered to the sink before each call returns, which keeps
//! the event ordering identical to callback-driven platforms.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use v4l::buffer::Type;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::FourCC;

use super::{
    CameraDevice, CameraEvent, CameraEventSink, CameraIdentity, CameraPlatform, LensFacing,
    OutputTarget, SessionHandle, StillCaptureRequest, SurfaceRole,
};
use crate::frame::StillFrame;
use crate::size::Size;

const MJPEG: &[u8; 4] = b"MJPG";
const STREAM_BUFFERS: u32 = 2;
/// Frames discarded while auto exposure settles.
const WARMUP_FRAMES: u32 = 3;

#[derive(Clone, Debug, Default)]
pub struct V4l2Platform;

impl V4l2Platform {
    pub fn new() -> Self {
        Self
    }
}

impl CameraPlatform for V4l2Platform {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn camera_ids(&self) -> Result<Vec<String>> {
        Ok(v4l::context::enum_devices()
            .into_iter()
            .map(|node| node.path().display().to_string())
            .collect())
    }

    fn identity(&self, camera_id: &str) -> Result<CameraIdentity> {
        let device = open_device(camera_id)?;
        let sizes = device
            .enum_framesizes(FourCC::new(MJPEG))
            .with_context(|| format!("enumerate MJPEG sizes on {}", camera_id))?;
        let mut supported = Vec::new();
        for frame_size in sizes {
            match frame_size.size {
                FrameSizeEnum::Discrete(discrete) => {
                    supported.push(Size::new(discrete.width, discrete.height))
                }
                FrameSizeEnum::Stepwise(stepwise) => {
                    supported.push(Size::new(stepwise.max_width, stepwise.max_height))
                }
            }
        }
        Ok(CameraIdentity {
            id: camera_id.to_string(),
            sensor_orientation: 0,
            supported_still_sizes: supported,
            lens_facing: LensFacing::External,
        })
    }

    fn open(&self, camera_id: &str, events: CameraEventSink) -> Result<()> {
        match open_device(camera_id) {
            Ok(device) => {
                log::info!("V4l2Platform: opened {}", camera_id);
                events.deliver(CameraEvent::Opened(Box::new(V4l2Device {
                    id: camera_id.to_string(),
                    shared: Arc::new(Mutex::new(Some(device))),
                })));
            }
            Err(err) => {
                events.deliver(CameraEvent::DeviceError(format!("{:#}", err)));
            }
        }
        Ok(())
    }
}

fn open_device(camera_id: &str) -> Result<v4l::Device> {
    v4l::Device::with_path(Path::new(camera_id))
        .with_context(|| format!("open v4l2 device {}", camera_id))
}

type SharedDevice = Arc<Mutex<Option<v4l::Device>>>;

fn lock_device(shared: &SharedDevice) -> MutexGuard<'_, Option<v4l::Device>> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct V4l2Device {
    id: String,
    shared: SharedDevice,
}

impl CameraDevice for V4l2Device {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_session(&mut self, outputs: &[OutputTarget], events: CameraEventSink) -> Result<()> {
        let still = outputs
            .iter()
            .find(|target| target.role == SurfaceRole::Still)
            .copied()
            .ok_or_else(|| anyhow!("no still surface requested"))?;
        let negotiated = {
            let guard = lock_device(&self.shared);
            let device = guard.as_ref().ok_or_else(|| anyhow!("device {} closed", self.id))?;
            negotiate_mjpeg(device, still.size)
        };
        match negotiated {
            Ok(size) => {
                events.deliver(CameraEvent::Configured(Box::new(V4l2Session {
                    shared: Arc::clone(&self.shared),
                    size,
                    frames: 0,
                })));
            }
            Err(err) => {
                events.deliver(CameraEvent::ConfigureFailed(format!("{:#}", err)));
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if lock_device(&self.shared).take().is_some() {
            log::info!("V4l2Platform: closed {}", self.id);
        }
    }
}

/// Set an MJPEG format as close to `wanted` as the driver allows. V4L2 sizes
/// are landscape, so portrait requests are swapped back first.
fn negotiate_mjpeg(device: &v4l::Device, wanted: Size) -> Result<Size> {
    let (width, height) = if wanted.width < wanted.height {
        (wanted.height, wanted.width)
    } else {
        (wanted.width, wanted.height)
    };
    let mut format = device.format().context("read v4l2 format")?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(MJPEG);
    let applied = device.set_format(&format).context("set v4l2 format")?;
    if applied.fourcc != FourCC::new(MJPEG) {
        return Err(anyhow!("device does not deliver MJPEG (got {})", applied.fourcc));
    }
    if applied.width != width || applied.height != height {
        log::warn!(
            "V4l2Platform: requested {}x{}, driver chose {}x{}",
            width,
            height,
            applied.width,
            applied.height
        );
    }
    Ok(Size::new(applied.width, applied.height))
}

struct V4l2Session {
    shared: SharedDevice,
    size: Size,
    frames: u64,
}

impl SessionHandle for V4l2Session {
    fn capture(&mut self, request: &StillCaptureRequest, events: CameraEventSink) -> Result<()> {
        let mut guard = lock_device(&self.shared);
        let device = guard.as_mut().ok_or_else(|| anyhow!("device closed"))?;
        let mut stream = MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
            .context("create v4l2 buffer stream")?;
        for _ in 0..WARMUP_FRAMES {
            if let Err(err) = stream.next() {
                events.deliver(CameraEvent::CaptureFailed(format!("warm-up frame: {}", err)));
                return Ok(());
            }
        }
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(err) => {
                events.deliver(CameraEvent::CaptureFailed(err.to_string()));
                return Ok(());
            }
        };
        let used = (meta.bytesused as usize).min(buf.len());
        let data = buf[..used].to_vec();
        let frame_number = u64::from(meta.sequence);
        let timestamp_ns = chrono::Utc::now()
            .timestamp_nanos_opt()
            .map(|ns| ns.max(0) as u64)
            .unwrap_or_default();
        self.frames += 1;
        log::debug!(
            "V4l2Platform: frame {} ({} bytes, orientation {})",
            frame_number,
            used,
            request.jpeg_orientation
        );
        events.deliver(CameraEvent::CaptureStarted {
            timestamp_ns,
            frame_number,
        });
        events.deliver(CameraEvent::CaptureCompleted { frame_number });
        events.deliver(CameraEvent::ImageAvailable(
            StillFrame::new(data, self.size).with_timestamp(timestamp_ns),
        ));
        Ok(())
    }

    fn close(&mut self) {
        log::debug!("V4l2Platform: session closed after {} frame(s)", self.frames);
    }
}
