//! Core playback types shared across the engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Input file extensions accepted before a pipeline is opened
///
/// The transcoder decodes most things; this allow-list keeps obviously
/// non-audio inputs from ever spawning a subprocess.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["mp3", "wav", "ogg", "opus", "flac", "m4a", "aac", "webm"];

/// Guild identifier (the per-voice-channel session key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(pub u64);

impl std::fmt::Display for GuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a track's bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "lowercase")]
pub enum TrackSource {
    /// Local file path (already resolved against the media root)
    File(PathBuf),
    /// Remote URL (attachment CDN link, served directory entry, stream)
    Remote(String),
}

/// One playable input, as produced by the command layer
///
/// Immutable once created; the queue stores these in session order.
/// Uniqueness is not enforced — the same track may be queued twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRequest {
    pub source: TrackSource,

    /// User-facing name for replies, logs and events
    pub display_name: String,

    /// Per-track volume (0-100) taking precedence over the session default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_override: Option<u8>,
}

impl TrackRequest {
    /// Build a request for a local file, deriving the display name from the
    /// file name when possible
    pub fn local(path: PathBuf) -> Self {
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            source: TrackSource::File(path),
            display_name,
            volume_override: None,
        }
    }

    /// Build a request for a remote URL
    pub fn remote(url: String) -> Self {
        let display_name = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(url.as_str())
            .to_string();
        Self {
            source: TrackSource::Remote(url),
            display_name,
            volume_override: None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.source, TrackSource::Remote(_))
    }

    /// Location string handed to the transcoder
    pub fn location(&self) -> String {
        match &self.source {
            TrackSource::File(path) => path.to_string_lossy().into_owned(),
            TrackSource::Remote(url) => url.clone(),
        }
    }

    /// Whether the location's extension is on the allow-list
    ///
    /// For remote URLs any query string is ignored; a URL without an
    /// extension (e.g. a stream endpoint) is rejected here and must be
    /// resolved by the command layer into a direct media link first.
    pub fn extension_supported(&self) -> bool {
        let location = match &self.source {
            TrackSource::File(path) => path.to_string_lossy().into_owned(),
            TrackSource::Remote(url) => {
                url.split(['?', '#']).next().unwrap_or(url.as_str()).to_string()
            }
        };
        extension_of(&location)
            .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }
}

/// Lowercased extension of a path-like string
fn extension_of(location: &str) -> Option<String> {
    let name = location.rsplit(['/', '\\']).next()?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}
