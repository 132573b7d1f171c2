use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use pickup_sentinel::camera::{CaptureMode, LensFacing};
use pickup_sentinel::size::AspectRatio;
use pickup_sentinel::SentinelConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_PICTURES_DIR",
        "SENTINEL_CAMERA_ID",
        "SENTINEL_DEBOUNCE_SECS",
        "SENTINEL_LOCK_TIMEOUT_MS",
        "SENTINEL_STAGE_TIMEOUT_MS",
        "SENTINEL_SAMPLES",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "pictures_dir": "/srv/sentinel",
        "camera": {
            "id": "/dev/video2",
            "lens_facing": "back",
            "lock_timeout_ms": 1200,
            "stage_timeout_ms": 4000,
            "target_aspect": "4:3",
            "capture_mode": "preview_and_still"
        },
        "gate": {
            "debounce_secs": 30,
            "spike_threshold": 3.5,
            "dark_lux_threshold": 5.0
        },
        "sensors": {
            "samples_path": "/srv/sentinel/samples.json"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_CAMERA_ID", "stub://back");
    std::env::set_var("SENTINEL_DEBOUNCE_SECS", "15");

    let cfg = SentinelConfig::load().expect("load config");

    assert_eq!(cfg.pictures_dir, PathBuf::from("/srv/sentinel"));
    assert_eq!(cfg.camera.id, "stub://back");
    assert_eq!(cfg.camera.lens_facing, LensFacing::Back);
    assert_eq!(cfg.camera.lock_timeout, Duration::from_millis(1200));
    assert_eq!(cfg.camera.stage_timeout, Duration::from_millis(4000));
    assert_eq!(cfg.camera.target_aspect, AspectRatio::new(4, 3));
    assert_eq!(cfg.camera.capture_mode, CaptureMode::PreviewAndStill);
    assert_eq!(cfg.gate.debounce, Duration::from_secs(15));
    assert_eq!(cfg.gate.spike_threshold, 3.5);
    assert_eq!(cfg.gate.dark_lux_threshold, 5.0);
    assert_eq!(
        cfg.samples_path,
        Some(PathBuf::from("/srv/sentinel/samples.json"))
    );

    let settings = cfg.controller_settings();
    assert_eq!(settings.lock_timeout, Duration::from_millis(1200));
    assert_eq!(settings.session.capture_mode, CaptureMode::PreviewAndStill);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
pictures_dir = "/tmp/pictures"

[camera]
id = "stub://front"
lock_timeout_ms = 900

[gate]
debounce_secs = 20
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("SENTINEL_CONFIG", file.path());

    let cfg = SentinelConfig::load().expect("load config");

    assert_eq!(cfg.pictures_dir, PathBuf::from("/tmp/pictures"));
    assert_eq!(cfg.camera.lock_timeout, Duration::from_millis(900));
    assert_eq!(cfg.camera.stage_timeout, Duration::from_secs(10));
    assert_eq!(cfg.gate.debounce, Duration::from_secs(20));
    assert_eq!(cfg.gate.spike_threshold, 4.0);
    assert_eq!(cfg.camera.target_aspect, AspectRatio::new(1080, 768));

    clear_env();
}

#[test]
fn env_only_config_uses_defaults() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();
    std::env::set_var("SENTINEL_PICTURES_DIR", "/var/lib/sentinel");
    std::env::set_var("SENTINEL_SAMPLES", "/var/lib/sentinel/script.toml");

    let cfg = SentinelConfig::load().expect("load config");

    assert_eq!(cfg.pictures_dir, PathBuf::from("/var/lib/sentinel"));
    assert_eq!(cfg.camera.id, "stub://front");
    assert_eq!(cfg.camera.lens_facing, LensFacing::Front);
    assert_eq!(cfg.gate.debounce, Duration::from_secs(10));
    assert_eq!(
        cfg.samples_path,
        Some(PathBuf::from("/var/lib/sentinel/script.toml"))
    );

    clear_env();
}

#[test]
fn rejects_zero_debounce_and_bad_numbers() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    std::env::set_var("SENTINEL_DEBOUNCE_SECS", "0");
    assert!(SentinelConfig::load().is_err());

    std::env::set_var("SENTINEL_DEBOUNCE_SECS", "ten");
    assert!(SentinelConfig::load().is_err());
    clear_env();

    std::env::set_var("SENTINEL_LOCK_TIMEOUT_MS", "0");
    assert!(SentinelConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_invalid_aspect_ratio_in_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"camera": {"target_aspect": "1080:0"}}"#)
        .expect("write config");
    std::env::set_var("SENTINEL_CONFIG", file.path());

    assert!(SentinelConfig::load().is_err());

    clear_env();
}
