//! # Minstrel Voice Player Library (minstrel-vp)
//!
//! Per-guild audio playback engine for real-time voice channels.
//!
//! **Purpose:** Queue local or remote audio tracks per guild, transcode them
//! through an external subprocess to a fixed 48 kHz stereo profile, pre-buffer
//! to a bitrate-derived watermark, and feed the resulting stream to a
//! real-time frame sink — advancing automatically, surviving per-track decode
//! and network failures, and tearing idle sessions down on a grace timer.
//!
//! **Architecture:** One actor task per guild session; commands and
//! pipeline/sink signals funnel through the actor's mailbox so all session
//! state has a single writer. An HTTP/SSE surface (axum) drives the registry.

pub mod api;
pub mod config;
pub mod error;
pub mod playback;

pub use config::Settings;
pub use error::{Error, Result};
