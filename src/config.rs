use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Environment variables with this prefix override file values,
/// e.g. `OPUS_RELAY__AUDIO__FRAME_DURATION_MS=20`.
pub const ENV_PREFIX: &str = "OPUS_RELAY";

/// Sample rates the Opus codec accepts.
pub const OPUS_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Codec-legal frame durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum FrameDuration {
    Ms2_5,
    Ms5,
    Ms10,
    Ms20,
    Ms40,
    Ms60,
}

impl FrameDuration {
    pub const ALL: [FrameDuration; 6] = [
        FrameDuration::Ms2_5,
        FrameDuration::Ms5,
        FrameDuration::Ms10,
        FrameDuration::Ms20,
        FrameDuration::Ms40,
        FrameDuration::Ms60,
    ];

    pub fn as_micros(self) -> u32 {
        match self {
            FrameDuration::Ms2_5 => 2_500,
            FrameDuration::Ms5 => 5_000,
            FrameDuration::Ms10 => 10_000,
            FrameDuration::Ms20 => 20_000,
            FrameDuration::Ms40 => 40_000,
            FrameDuration::Ms60 => 60_000,
        }
    }

    pub fn as_millis_f64(self) -> f64 {
        self.as_micros() as f64 / 1000.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_micros(self.as_micros() as u64)
    }

    /// Samples per channel covered by one frame at `sample_rate`.
    pub fn samples_per_channel(self, sample_rate: u32) -> usize {
        (sample_rate as u64 * self.as_micros() as u64 / 1_000_000) as usize
    }
}

impl TryFrom<f64> for FrameDuration {
    type Error = PipelineError;

    fn try_from(ms: f64) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|d| (d.as_millis_f64() - ms).abs() < 1e-9)
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "frame duration {}ms is not one of 2.5, 5, 10, 20, 40, 60",
                    ms
                ))
            })
    }
}

impl From<FrameDuration> for f64 {
    fn from(d: FrameDuration) -> Self {
        d.as_millis_f64()
    }
}

impl fmt::Display for FrameDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.as_millis_f64())
    }
}

/// Opus application profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CodecApplication {
    #[default]
    Voip,
    Audio,
    LowDelay,
}

impl CodecApplication {
    pub fn to_opus(self) -> opus::Application {
        match self {
            CodecApplication::Voip => opus::Application::Voip,
            CodecApplication::Audio => opus::Application::Audio,
            CodecApplication::LowDelay => opus::Application::LowDelay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Capture -> Opus -> WebRTC track
    #[default]
    Relay,
    /// Capture -> Opus -> decode -> local playback
    Loopback,
}

/// Stream parameters shared by every stage. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub channels: u32,
    #[serde(rename = "frame_duration_ms")]
    pub frame_duration: FrameDuration,
    pub application: CodecApplication,
    /// Encoder bitrate in bits/s; codec default when unset.
    pub bitrate: Option<i32>,
    /// Worst-case encoded size of one frame, in bytes.
    pub max_payload_size: usize,
    /// Slots in each inter-stage queue.
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            frame_duration: FrameDuration::Ms60,
            application: CodecApplication::Voip,
            bitrate: None,
            max_payload_size: 1000,
            queue_capacity: 1,
        }
    }
}

impl PipelineConfig {
    pub fn samples_per_channel(&self) -> usize {
        self.frame_duration.samples_per_channel(self.sample_rate)
    }

    /// Interleaved samples in one PCM frame: channels × duration × rate.
    pub fn frame_samples(&self) -> usize {
        self.samples_per_channel() * self.channels as usize
    }

    /// Bytes of S16LE audio in one PCM frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * 2
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration.as_duration()
    }

    pub fn validate(&self) -> Result<()> {
        if !OPUS_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(PipelineError::Config(format!(
                "sample rate {} is not supported by opus (expected one of {:?})",
                self.sample_rate, OPUS_SAMPLE_RATES
            )));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(PipelineError::Config(format!(
                "channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.max_payload_size == 0 {
            return Err(PipelineError::Config("max_payload_size must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config("queue_capacity must be >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// ALSA capture PCM (e.g. "default", "plughw:0,0")
    pub capture: String,
    /// ALSA playback PCM
    pub playback: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            capture: "default".to_string(),
            playback: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub report_interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: 2000,
        }
    }
}

impl StatsConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    pub stun_servers: Vec<String>,
    pub track_id: String,
    pub stream_id: String,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            track_id: "audio".to_string(),
            stream_id: "opus-relay".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub audio: PipelineConfig,
    pub devices: DeviceConfig,
    pub stats: StatsConfig,
    pub webrtc: WebRtcConfig,
}

impl Config {
    /// Load defaults, then `path` (if it exists), then `OPUS_RELAY__*` variables.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`Config::load`], reading overrides from `env` instead of the
    /// process environment when it is given.
    fn load_with_env(path: &Path, env: Option<config::Map<String, String>>) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()
    }
}
