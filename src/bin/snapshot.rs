//! snapshot - capture one still right now.
//!
//! Runs the same exclusive acquisition as the daemon, bypassing the sensor
//! gate, and prints the stored path.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pickup_sentinel::camera::DisplayRotation;
use pickup_sentinel::config::parse_aspect;
use pickup_sentinel::{
    platform_for, select_camera, CameraController, CaptureMode, CaptureWorker, ImageStore,
    LensFacing, SentinelConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture a single still from a camera")]
struct Args {
    /// Camera id (`stub://front`, `/dev/video0`, ...). Defaults to the configured camera.
    #[arg(long, env = "SENTINEL_CAMERA_ID")]
    camera: Option<String>,
    /// Pick the first camera with this lens facing instead of a fixed id.
    #[arg(long, value_enum)]
    facing: Option<Facing>,
    /// Display rotation in degrees (0, 90, 180, 270).
    #[arg(long, default_value_t = 0)]
    rotation: u32,
    /// Pictures folder; images land in its `security` subfolder.
    #[arg(long, env = "SENTINEL_PICTURES_DIR")]
    pictures_dir: Option<PathBuf>,
    /// Target aspect ratio as W:H.
    #[arg(long)]
    aspect: Option<String>,
    /// Configure a preview surface alongside the still surface.
    #[arg(long)]
    with_preview: bool,
    /// Bounded wait for the camera lock, in milliseconds.
    #[arg(long)]
    lock_timeout_ms: Option<u64>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Facing {
    Front,
    Back,
    External,
}

impl From<Facing> for LensFacing {
    fn from(facing: Facing) -> Self {
        match facing {
            Facing::Front => LensFacing::Front,
            Facing::Back => LensFacing::Back,
            Facing::External => LensFacing::External,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = SentinelConfig::load()?;

    let rotation = DisplayRotation::from_degrees(args.rotation)
        .ok_or_else(|| anyhow!("rotation must be 0, 90, 180 or 270, got {}", args.rotation))?;
    let camera_hint = args.camera.clone().unwrap_or_else(|| cfg.camera.id.clone());
    let platform = platform_for(&camera_hint)?;
    let identity = match args.facing {
        Some(facing) => select_camera(platform.as_ref(), facing.into())?,
        None => platform.identity(&camera_hint)?,
    };

    let mut settings = cfg.controller_settings();
    if let Some(aspect) = args.aspect.as_deref() {
        settings.session.target_aspect = parse_aspect(aspect)?;
    }
    if args.with_preview {
        settings.session.capture_mode = CaptureMode::PreviewAndStill;
    }
    if let Some(ms) = args.lock_timeout_ms {
        settings.lock_timeout = Duration::from_millis(ms);
    }

    let pictures_dir = args.pictures_dir.unwrap_or(cfg.pictures_dir);
    let store = ImageStore::new(&pictures_dir)?;
    let worker = Arc::new(CaptureWorker::start("capture-worker")?);
    let controller = CameraController::new(platform, store, worker, settings);

    let outcome = controller.acquire_and_capture(identity, rotation);
    controller.shutdown()?;
    let image = outcome.map_err(|err| anyhow!("capture failed [{}]: {}", err.code(), err))?;
    println!("{} ({} bytes)", image.path.display(), image.byte_length);
    Ok(())
}
