//! Sensor sample sources.
//!
//! A source yields samples in timestamp order until it is exhausted. Scripted
//! sources replay a recorded or hand-written sequence from JSON or TOML; the
//! synthetic source emits a dark room with a pickup spike every few readings.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::gate::{SensorKind, SensorSample};

/// Hardware-limited delivery period of the sensor subsystem.
pub const DEFAULT_SAMPLE_PERIOD: Duration = Duration::from_secs(3);

pub trait SensorSource: Send {
    /// `Ok(None)` once the source is exhausted.
    fn next_sample(&mut self) -> Result<Option<SensorSample>>;
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ScriptedSample {
    pub at_ms: u64,
    pub kind: SensorKind,
    pub values: Vec<f32>,
}

impl ScriptedSample {
    fn to_sample(&self) -> Result<SensorSample> {
        if self.values.is_empty() || self.values.len() > 3 {
            return Err(anyhow!(
                "sample at {} ms: expected 1 to 3 values, got {}",
                self.at_ms,
                self.values.len()
            ));
        }
        let mut values = [0.0f32; 3];
        values[..self.values.len()].copy_from_slice(&self.values);
        Ok(SensorSample {
            kind: self.kind,
            values,
            timestamp: Duration::from_millis(self.at_ms),
        })
    }
}

#[derive(Deserialize)]
struct SampleScript {
    #[serde(default, rename = "sample")]
    samples: Vec<ScriptedSample>,
}

/// Replays a fixed sample list, optionally paced in real time.
#[derive(Debug)]
pub struct ScriptedSensorSource {
    samples: std::vec::IntoIter<SensorSample>,
    paced_from: Option<Instant>,
    realtime: bool,
}

impl ScriptedSensorSource {
    pub fn new(samples: Vec<SensorSample>) -> Self {
        let mut samples = samples;
        samples.sort_by_key(|s| s.timestamp);
        Self {
            samples: samples.into_iter(),
            paced_from: None,
            realtime: false,
        }
    }

    /// Load a script. `.toml` files hold `[[sample]]` tables; anything else is
    /// read as a JSON array of samples.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read sensor script {}", path.display()))?;
        let scripted: Vec<ScriptedSample> =
            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                toml::from_str::<SampleScript>(&raw)
                    .with_context(|| format!("parse sensor script {}", path.display()))?
                    .samples
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("parse sensor script {}", path.display()))?
            };
        let samples = scripted
            .iter()
            .map(ScriptedSample::to_sample)
            .collect::<Result<Vec<_>>>()?;
        log::info!("loaded {} sensor samples from {}", samples.len(), path.display());
        Ok(Self::new(samples))
    }

    /// Sleep until each sample's timestamp (relative to the first read).
    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }
}

impl SensorSource for ScriptedSensorSource {
    fn next_sample(&mut self) -> Result<Option<SensorSample>> {
        let Some(sample) = self.samples.next() else {
            return Ok(None);
        };
        if self.realtime {
            let start = *self.paced_from.get_or_insert_with(Instant::now);
            let due = start + sample.timestamp;
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }
        Ok(Some(sample))
    }
}

/// Endless dark-room stream: a light reading and an accelerometer reading per
/// period, with a lateral spike every `spike_every` periods.
#[derive(Debug)]
pub struct SyntheticSensorSource {
    period: Duration,
    spike_every: u64,
    tick: u64,
    pending_light: bool,
    paced: bool,
}

impl SyntheticSensorSource {
    pub fn new(period: Duration, spike_every: u64) -> Self {
        Self {
            period,
            spike_every: spike_every.max(1),
            tick: 0,
            pending_light: true,
            paced: true,
        }
    }

    /// Emit samples as fast as they are read.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

impl Default for SyntheticSensorSource {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_PERIOD, 4)
    }
}

impl SensorSource for SyntheticSensorSource {
    fn next_sample(&mut self) -> Result<Option<SensorSample>> {
        let at = self.period * self.tick as u32;
        if self.pending_light {
            self.pending_light = false;
            return Ok(Some(SensorSample::light(2.5, at)));
        }
        let lateral = if self.tick % self.spike_every == self.spike_every - 1 {
            6.5
        } else {
            0.3
        };
        self.tick += 1;
        self.pending_light = true;
        if self.paced {
            thread::sleep(self.period);
        }
        Ok(Some(SensorSample::accelerometer(lateral, at)))
    }
}
