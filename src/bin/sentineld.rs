//! sentineld - pickup sentinel daemon
//!
//! This daemon:
//! 1. Loads configuration (file from SENTINEL_CONFIG, then environment)
//! 2. Starts the capture worker and camera controller
//! 3. Feeds sensor samples (scripted replay or synthetic) through the trigger gate
//! 4. Captures one still per trigger into <pictures>/security
//! 5. Drains in-flight captures on Ctrl-C or when the sensor script ends

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pickup_sentinel::{
    platform_for, select_camera, CameraController, CameraPlatform, CaptureWorker, ImageStore,
    Monitor, ScriptedSensorSource, SensorSource, SensorTriggerGate, SentinelConfig,
    SharedLockState, SyntheticSensorSource,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture a photo when a locked device is picked up")]
struct Args {
    /// Treat the device as unlocked (no captures will fire).
    #[arg(long)]
    unlocked: bool,
    /// Replay the sensor script as fast as possible instead of in real time.
    #[arg(long)]
    fast: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = SentinelConfig::load()?;

    let platform = platform_for(&cfg.camera.id)?;
    let camera_id = resolve_camera(platform.as_ref(), &cfg)?;
    let store = ImageStore::new(&cfg.pictures_dir)
        .with_context(|| format!("prepare image folder under {}", cfg.pictures_dir.display()))?;
    log::info!(
        "sentineld: camera {} via {}, images in {}",
        camera_id,
        platform.name(),
        store.root().display()
    );

    let worker = Arc::new(CaptureWorker::start("capture-worker")?);
    let controller = Arc::new(CameraController::new(
        platform,
        store,
        worker,
        cfg.controller_settings(),
    ));
    let lock_state = Arc::new(SharedLockState::new(!args.unlocked));
    let gate = SensorTriggerGate::new(cfg.gate, lock_state)
        .with_activity(controller.lock().clone());
    let mut monitor = Monitor::new(gate, controller, camera_id);

    let mut source: Box<dyn SensorSource> = match &cfg.samples_path {
        Some(path) => {
            let script = ScriptedSensorSource::load(path)?;
            if args.fast {
                Box::new(script)
            } else {
                Box::new(script.realtime())
            }
        }
        None => {
            log::info!("sentineld: no sensor script configured, using synthetic samples");
            Box::new(SyntheticSensorSource::default())
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    log::info!("sentineld: monitoring (Ctrl-C to stop)");
    let run_result = monitor.run(source.as_mut(), &running);
    let stats = monitor.shutdown()?;
    run_result?;
    log::info!(
        "sentineld: {} photo(s) captured from {} trigger(s)",
        stats.captured,
        stats.triggers
    );
    Ok(())
}

/// The configured camera if the platform reports it, otherwise the first
/// camera with the configured lens facing.
fn resolve_camera(platform: &dyn CameraPlatform, cfg: &SentinelConfig) -> Result<String> {
    let ids = platform.camera_ids()?;
    if ids.iter().any(|id| id == &cfg.camera.id) {
        return Ok(cfg.camera.id.clone());
    }
    let identity = select_camera(platform, cfg.camera.lens_facing)?;
    log::warn!(
        "sentineld: camera {} not found, using {} ({:?})",
        cfg.camera.id,
        identity.id,
        identity.lens_facing
    );
    Ok(identity.id)
}
