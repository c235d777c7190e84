//! Configuration management for the Minstrel voice player
//!
//! Two-tier configuration:
//! 1. **TOML file** (optional): port, media root, transcoder, playback tuning
//! 2. **Built-in defaults**: defined in code, used for anything the file omits
//!
//! # Settings sources priority
//!
//! 1. Command-line arguments (--port, --media-root)
//! 2. Environment variables (MINSTREL_VP_PORT, MINSTREL_MEDIA_ROOT)
//! 3. TOML configuration file
//! 4. Built-in defaults
//!
//! The pre-buffer watermark is never a stored byte count: it is derived from
//! the output profile's byte rate and `prebuffer_ms`, so switching bitrate
//! keeps startup latency constant instead of silently changing it.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Output sample rate fixed by the voice transport profile
pub const SAMPLE_RATE: u32 = 48_000;

/// Output channel count fixed by the voice transport profile
pub const CHANNELS: u16 = 2;

/// Output format profile for the transcode pipeline
///
/// Opus keeps CPU and bandwidth low; raw PCM is the fallback for sinks that
/// do their own encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum OutputProfile {
    /// Opus in an Ogg container at the given bitrate
    Opus { bitrate_bps: u32 },
    /// Interleaved signed 16-bit little-endian PCM
    Pcm,
}

impl OutputProfile {
    /// Steady-state output byte rate for this profile
    ///
    /// PCM: 48 kHz * 2 ch * 2 bytes. Opus: encoder bitrate / 8 (container
    /// overhead is small enough to ignore for buffer sizing).
    pub fn bytes_per_second(&self) -> u64 {
        match self {
            OutputProfile::Opus { bitrate_bps } => (*bitrate_bps as u64) / 8,
            OutputProfile::Pcm => SAMPLE_RATE as u64 * CHANNELS as u64 * 2,
        }
    }

    /// Pre-buffer watermark in bytes for the given duration
    ///
    /// Derived, not constant: a few hundred milliseconds of audio at this
    /// profile's rate. Oversizing this causes the exposed stream to run far
    /// ahead of the sink's wall-clock pacing.
    pub fn watermark_bytes(&self, prebuffer_ms: u64) -> usize {
        (self.bytes_per_second() * prebuffer_ms / 1000) as usize
    }
}

impl Default for OutputProfile {
    fn default() -> Self {
        OutputProfile::Opus {
            bitrate_bps: 128_000,
        }
    }
}

/// Transcoder subprocess settings
#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderSettings {
    /// Transcoder executable (resolved via PATH if not absolute)
    #[serde(default = "default_transcoder_binary")]
    pub binary: PathBuf,

    /// Bound on pipeline opening (spawn + pre-buffer); a stall past this is
    /// treated as a decode error, never an indefinite hang
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,
}

impl TranscoderSettings {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }
}

impl Default for TranscoderSettings {
    fn default() -> Self {
        Self {
            binary: default_transcoder_binary(),
            open_timeout_secs: default_open_timeout_secs(),
        }
    }
}

/// Playback engine tuning
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackSettings {
    /// Output format profile
    #[serde(default)]
    pub profile: OutputProfile,

    /// Pre-buffer watermark duration before a stream is exposed to the sink
    #[serde(default = "default_prebuffer_ms")]
    pub prebuffer_ms: u64,

    /// Bounded in-flight buffer between pipeline and sink; sized to smooth
    /// scheduling jitter without introducing multi-second lag
    #[serde(default = "default_stream_buffer_ms")]
    pub stream_buffer_ms: u64,

    /// Grace period an idle session holds its voice connection before
    /// releasing it and leaving the registry
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Cap on consecutive skip-on-error advances before the queue is
    /// abandoned (guards against a directory of broken files)
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Base URL for translating relative remote locations into fetchable
    /// URLs, when the deployment serves local media over HTTP
    #[serde(default)]
    pub remote_base_url: Option<String>,
}

impl PlaybackSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Watermark for the configured profile
    pub fn watermark_bytes(&self) -> usize {
        self.profile.watermark_bytes(self.prebuffer_ms)
    }

    /// In-flight buffer size in bytes for the configured profile
    pub fn stream_buffer_bytes(&self) -> usize {
        (self.profile.bytes_per_second() * self.stream_buffer_ms / 1000) as usize
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            profile: OutputProfile::default(),
            prebuffer_ms: default_prebuffer_ms(),
            stream_buffer_ms: default_stream_buffer_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
            remote_base_url: None,
        }
    }
}

/// Complete application settings
///
/// Log filtering is environment-driven (`RUST_LOG`), initialized in
/// `main.rs`, so it has no place here.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root folder local file locations are resolved against
    #[serde(default)]
    pub media_root: Option<PathBuf>,

    #[serde(default)]
    pub transcoder: TranscoderSettings,

    #[serde(default)]
    pub playback: PlaybackSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: default_port(),
            media_root: None,
            transcoder: TranscoderSettings::default(),
            playback: PlaybackSettings::default(),
        }
    }
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub port: Option<u16>,
    pub media_root: Option<PathBuf>,
}

impl Settings {
    /// Load settings from an optional TOML file, then apply CLI overrides
    pub async fn load(toml_path: Option<&Path>, overrides: SettingsOverrides) -> Result<Self> {
        let mut settings = match toml_path {
            Some(path) => {
                let toml_str = tokio::fs::read_to_string(path).await.map_err(|e| {
                    Error::Config(format!("Failed to read config file {:?}: {}", path, e))
                })?;
                let parsed: Settings = toml::from_str(&toml_str)
                    .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
                info!("Loaded configuration from {:?}", path);
                parsed
            }
            None => Settings::default(),
        };

        if let Some(port) = overrides.port {
            settings.port = port;
        }
        if let Some(media_root) = overrides.media_root {
            settings.media_root = Some(media_root);
        }

        Ok(settings)
    }
}

fn default_port() -> u16 {
    5760
}

fn default_transcoder_binary() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_open_timeout_secs() -> u64 {
    20
}

fn default_prebuffer_ms() -> u64 {
    400
}

fn default_stream_buffer_ms() -> u64 {
    2000
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_max_consecutive_failures() -> u32 {
    5
}
