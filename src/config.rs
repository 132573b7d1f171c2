use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::{CaptureMode, LensFacing, SessionSettings};
use crate::controller::ControllerSettings;
use crate::gate::{GateSettings, DEFAULT_DARK_LUX_THRESHOLD, DEFAULT_SPIKE_THRESHOLD};
use crate::size::AspectRatio;

const DEFAULT_CAMERA_ID: &str = "stub://front";
const DEFAULT_DEBOUNCE_SECS: u64 = 10;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2500;
const DEFAULT_STAGE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_TARGET_ASPECT: &str = "1080:768";
const FALLBACK_PICTURES_DIR: &str = "Pictures";

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    pictures_dir: Option<PathBuf>,
    camera: Option<CameraConfigFile>,
    gate: Option<GateConfigFile>,
    sensors: Option<SensorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    id: Option<String>,
    lens_facing: Option<LensFacing>,
    lock_timeout_ms: Option<u64>,
    stage_timeout_ms: Option<u64>,
    target_aspect: Option<String>,
    capture_mode: Option<CaptureMode>,
}

#[derive(Debug, Deserialize, Default)]
struct GateConfigFile {
    debounce_secs: Option<u64>,
    spike_threshold: Option<f32>,
    dark_lux_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SensorConfigFile {
    samples_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub pictures_dir: PathBuf,
    pub camera: CameraConfig,
    pub gate: GateSettings,
    /// Sensor script to replay; `None` runs the synthetic source.
    pub samples_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub id: String,
    pub lens_facing: LensFacing,
    pub lock_timeout: Duration,
    pub stage_timeout: Duration,
    pub target_aspect: AspectRatio,
    pub capture_mode: CaptureMode,
}

impl SentinelConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            lock_timeout: self.camera.lock_timeout,
            session: SessionSettings {
                target_aspect: self.camera.target_aspect,
                capture_mode: self.camera.capture_mode,
                stage_timeout: self.camera.stage_timeout,
            },
        }
    }

    fn from_file(file: SentinelConfigFile) -> Result<Self> {
        let pictures_dir = file.pictures_dir.unwrap_or_else(default_pictures_dir);
        let camera = file.camera.unwrap_or_default();
        let target_aspect = parse_aspect(
            camera
                .target_aspect
                .as_deref()
                .unwrap_or(DEFAULT_TARGET_ASPECT),
        )?;
        let camera = CameraConfig {
            id: camera.id.unwrap_or_else(|| DEFAULT_CAMERA_ID.to_string()),
            lens_facing: camera.lens_facing.unwrap_or(LensFacing::Front),
            lock_timeout: Duration::from_millis(
                camera.lock_timeout_ms.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS),
            ),
            stage_timeout: Duration::from_millis(
                camera.stage_timeout_ms.unwrap_or(DEFAULT_STAGE_TIMEOUT_MS),
            ),
            target_aspect,
            capture_mode: camera.capture_mode.unwrap_or_default(),
        };
        let gate_file = file.gate.unwrap_or_default();
        let gate = GateSettings {
            debounce: Duration::from_secs(gate_file.debounce_secs.unwrap_or(DEFAULT_DEBOUNCE_SECS)),
            spike_threshold: gate_file.spike_threshold.unwrap_or(DEFAULT_SPIKE_THRESHOLD),
            dark_lux_threshold: gate_file
                .dark_lux_threshold
                .unwrap_or(DEFAULT_DARK_LUX_THRESHOLD),
        };
        Ok(Self {
            pictures_dir,
            camera,
            gate,
            samples_path: file.sensors.and_then(|sensors| sensors.samples_path),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("SENTINEL_PICTURES_DIR") {
            if !dir.trim().is_empty() {
                self.pictures_dir = PathBuf::from(dir);
            }
        }
        if let Ok(id) = std::env::var("SENTINEL_CAMERA_ID") {
            if !id.trim().is_empty() {
                self.camera.id = id.trim().to_string();
            }
        }
        if let Ok(debounce) = std::env::var("SENTINEL_DEBOUNCE_SECS") {
            let seconds: u64 = debounce.trim().parse().map_err(|_| {
                anyhow!("SENTINEL_DEBOUNCE_SECS must be an integer number of seconds")
            })?;
            self.gate.debounce = Duration::from_secs(seconds);
        }
        if let Ok(timeout) = std::env::var("SENTINEL_LOCK_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("SENTINEL_LOCK_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.camera.lock_timeout = Duration::from_millis(millis);
        }
        if let Ok(timeout) = std::env::var("SENTINEL_STAGE_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("SENTINEL_STAGE_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.camera.stage_timeout = Duration::from_millis(millis);
        }
        if let Ok(path) = std::env::var("SENTINEL_SAMPLES") {
            if !path.trim().is_empty() {
                self.samples_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.gate.debounce.is_zero() {
            return Err(anyhow!("debounce window must be greater than zero"));
        }
        if self.camera.lock_timeout.is_zero() {
            return Err(anyhow!("lock timeout must be greater than zero"));
        }
        if self.camera.stage_timeout.is_zero() {
            return Err(anyhow!("stage timeout must be greater than zero"));
        }
        if !self.gate.spike_threshold.is_finite() || !self.gate.dark_lux_threshold.is_finite() {
            return Err(anyhow!("gate thresholds must be finite numbers"));
        }
        if self.camera.id.trim().is_empty() {
            return Err(anyhow!("camera id must not be empty"));
        }
        Ok(())
    }
}

/// `.toml` files are parsed as TOML, anything else as JSON.
fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg = if path.extension().and_then(|ext| ext.to_str()) == Some("toml") {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn default_pictures_dir() -> PathBuf {
    dirs::picture_dir().unwrap_or_else(|| PathBuf::from(FALLBACK_PICTURES_DIR))
}

/// Parse `W:H` with both components positive.
pub fn parse_aspect(value: &str) -> Result<AspectRatio> {
    let (width, height) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("aspect ratio must look like W:H, got {:?}", value))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| anyhow!("aspect ratio width must be an integer, got {:?}", value))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| anyhow!("aspect ratio height must be an integer, got {:?}", value))?;
    if width == 0 || height == 0 {
        return Err(anyhow!("aspect ratio components must be greater than zero"));
    }
    Ok(AspectRatio::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aspect_ratios() -> Result<()> {
        assert_eq!(parse_aspect("1080:768")?, AspectRatio::new(1080, 768));
        assert_eq!(parse_aspect(" 4 : 3 ")?, AspectRatio::new(4, 3));
        assert!(parse_aspect("16x9").is_err());
        assert!(parse_aspect("0:9").is_err());
        Ok(())
    }

    #[test]
    fn empty_file_yields_defaults() -> Result<()> {
        let cfg = SentinelConfig::from_file(SentinelConfigFile::default())?;
        assert_eq!(cfg.camera.id, "stub://front");
        assert_eq!(cfg.camera.lens_facing, LensFacing::Front);
        assert_eq!(cfg.camera.lock_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.camera.capture_mode, CaptureMode::Still);
        assert_eq!(cfg.gate, GateSettings::default());
        assert!(cfg.samples_path.is_none());
        cfg.validate()
    }
}
