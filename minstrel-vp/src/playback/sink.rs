//! Frame sink boundary
//!
//! The component that paces encoded audio into the voice channel's real-time
//! transport is an external collaborator; this module fixes its interface.
//! The session never assumes decode correctness of what reaches the sink —
//! sink-reported errors are handled exactly like pipeline errors.
//!
//! Each attached track carries a playback-instance UUID so the session can
//! discard signals from a track it already skipped or stopped.

use crate::config::OutputProfile;
use crate::error::Result;
use crate::playback::pipeline::TrackStream;
use crate::playback::types::GuildId;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Signals a sink emits back into the owning session's state machine
///
/// One-to-one mpsc (sink → session); each signal resolves to exactly one
/// state-machine transition.
#[derive(Debug, Clone)]
pub enum SinkSignal {
    /// First audio delivered to the transport
    Started { track_id: Uuid },
    /// Stream exhausted; the track ended naturally
    Ended { track_id: Uuid },
    /// Delivery failed; the session treats this like a decode error
    Errored { track_id: Uuid, reason: String },
}

impl SinkSignal {
    pub fn track_id(&self) -> Uuid {
        match self {
            SinkSignal::Started { track_id }
            | SinkSignal::Ended { track_id }
            | SinkSignal::Errored { track_id, .. } => *track_id,
        }
    }
}

/// One voice-channel transport endpoint for one guild
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Begin pacing `stream` into the transport, reporting lifecycle via
    /// `signals`; replaces any previously attached stream
    async fn attach(
        &self,
        track_id: Uuid,
        stream: TrackStream,
        signals: mpsc::UnboundedSender<SinkSignal>,
    ) -> Result<()>;

    /// Halt current delivery without emitting an `Ended` signal
    ///
    /// Used on skip/stop/reshuffle, where the session drives the transition
    /// itself.
    async fn detach(&self);

    /// Release the underlying voice connection
    async fn release(&self);
}

/// Creates one sink per guild session
pub trait SinkFactory: Send + Sync {
    fn connect(&self, guild: GuildId) -> Arc<dyn FrameSink>;
}

// ========================================
// Real-time pacing stand-in
// ========================================

/// Sink that paces the stream at the profile's wall-clock byte rate and
/// discards it
///
/// This is the integration point for a voice-transport implementation: a
/// real transport sink replaces the discard with packet delivery and keeps
/// the same signal contract. It also keeps local deployments honest about
/// timing — a session feeding this sink advances at real-track speed.
pub struct DiscardSink {
    guild: GuildId,
    bytes_per_second: u64,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl DiscardSink {
    pub fn new(guild: GuildId, profile: OutputProfile) -> Self {
        Self {
            guild,
            bytes_per_second: profile.bytes_per_second().max(1),
            current: Mutex::new(None),
        }
    }

    fn replace_task(&self, task: Option<JoinHandle<()>>) {
        let mut current = self.current.lock().unwrap();
        if let Some(previous) = current.take() {
            previous.abort();
        }
        *current = task;
    }
}

#[async_trait]
impl FrameSink for DiscardSink {
    async fn attach(
        &self,
        track_id: Uuid,
        mut stream: TrackStream,
        signals: mpsc::UnboundedSender<SinkSignal>,
    ) -> Result<()> {
        let guild = self.guild;
        let bytes_per_second = self.bytes_per_second;
        let task = tokio::spawn(async move {
            let mut started = false;
            while let Some(chunk) = stream.next_chunk().await {
                if !started {
                    started = true;
                    let _ = signals.send(SinkSignal::Started { track_id });
                }
                // Wall-clock pacing: one chunk's worth of audio per sleep
                let micros = chunk.len() as u64 * 1_000_000 / bytes_per_second;
                tokio::time::sleep(Duration::from_micros(micros)).await;
            }
            stream.close();
            if started {
                let _ = signals.send(SinkSignal::Ended { track_id });
            } else {
                warn!("Sink for guild {} saw an empty stream", guild);
                let _ = signals.send(SinkSignal::Errored {
                    track_id,
                    reason: "stream ended before any audio was delivered".into(),
                });
            }
        });
        self.replace_task(Some(task));
        Ok(())
    }

    async fn detach(&self) {
        debug!("Detaching sink for guild {}", self.guild);
        self.replace_task(None);
    }

    async fn release(&self) {
        info!("Releasing voice connection for guild {}", self.guild);
        self.replace_task(None);
    }
}

/// Factory for the pacing stand-in sink
pub struct DiscardSinkFactory {
    profile: OutputProfile,
}

impl DiscardSinkFactory {
    pub fn new(profile: OutputProfile) -> Self {
        Self { profile }
    }
}

impl SinkFactory for DiscardSinkFactory {
    fn connect(&self, guild: GuildId) -> Arc<dyn FrameSink> {
        Arc::new(DiscardSink::new(guild, self.profile))
    }
}
