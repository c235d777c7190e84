//! Event types for the Minstrel event system
//!
//! Provides the shared event vocabulary and the EventBus used by all
//! Minstrel modules.
//!
//! # Architecture
//!
//! Minstrel uses hybrid communication:
//! - **EventBus** (tokio::broadcast): one-to-many event broadcasting
//! - **Command channels** (tokio::mpsc): request → single handler
//!
//! Internal component-to-session signals (pipeline results, sink signals)
//! are NOT broadcast here; they travel over dedicated mpsc channels inside
//! the voice player. Only externally observable state changes go on the bus.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Playback session phase
///
/// A session is `Idle` between tracks, `Loading` while a pipeline is being
/// opened and pre-buffered, `Playing` while the frame sink is being fed,
/// and `Stopped` once torn down (terminal for that session instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Loading,
    Playing,
    Stopped,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Loading => write!(f, "loading"),
            SessionPhase::Playing => write!(f, "playing"),
            SessionPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why a queue's contents changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueChangeTrigger {
    Enqueued,
    Advanced,
    Cleared,
    Reshuffled,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// Explicit stop command
    Stopped,
    /// Idle grace period elapsed with nothing to play
    IdleTimeout,
}

/// Minstrel event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// All events carry the guild they concern; track events carry the
/// user-facing display name rather than internal request structs so the
/// wire format stays stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MinstrelEvent {
    /// Session phase changed (Idle ↔ Loading ↔ Playing, or → Stopped)
    PhaseChanged {
        guild_id: u64,
        old_phase: SessionPhase,
        new_phase: SessionPhase,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track reached the frame sink and started playing
    TrackStarted {
        guild_id: u64,
        track: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track finished, naturally or by skip
    TrackFinished {
        guild_id: u64,
        track: String,
        /// false when the sink reported a natural end, true on skip
        skipped: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track could not be opened or delivered; the session advances past it
    TrackFailed {
        guild_id: u64,
        track: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue contents changed
    QueueChanged {
        guild_id: u64,
        queue_len: usize,
        trigger: QueueChangeTrigger,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Too many consecutive track failures; the queue was abandoned
    QueueHalted {
        guild_id: u64,
        consecutive_failures: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session default volume changed (applies from the next track)
    VolumeChanged {
        guild_id: u64,
        volume: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session became idle with an empty queue (idle timer armed)
    SessionIdle {
        guild_id: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session torn down and removed from the registry
    SessionEnded {
        guild_id: u64,
        reason: SessionEndReason,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl MinstrelEvent {
    /// Event type string used as the SSE `event:` field
    pub fn type_str(&self) -> &'static str {
        match self {
            MinstrelEvent::PhaseChanged { .. } => "PhaseChanged",
            MinstrelEvent::TrackStarted { .. } => "TrackStarted",
            MinstrelEvent::TrackFinished { .. } => "TrackFinished",
            MinstrelEvent::TrackFailed { .. } => "TrackFailed",
            MinstrelEvent::QueueChanged { .. } => "QueueChanged",
            MinstrelEvent::QueueHalted { .. } => "QueueHalted",
            MinstrelEvent::VolumeChanged { .. } => "VolumeChanged",
            MinstrelEvent::SessionIdle { .. } => "SessionIdle",
            MinstrelEvent::SessionEnded { .. } => "SessionEnded",
        }
    }

    /// Guild the event concerns
    pub fn guild_id(&self) -> u64 {
        match self {
            MinstrelEvent::PhaseChanged { guild_id, .. }
            | MinstrelEvent::TrackStarted { guild_id, .. }
            | MinstrelEvent::TrackFinished { guild_id, .. }
            | MinstrelEvent::TrackFailed { guild_id, .. }
            | MinstrelEvent::QueueChanged { guild_id, .. }
            | MinstrelEvent::QueueHalted { guild_id, .. }
            | MinstrelEvent::VolumeChanged { guild_id, .. }
            | MinstrelEvent::SessionIdle { guild_id, .. }
            | MinstrelEvent::SessionEnded { guild_id, .. } => *guild_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Wraps tokio::broadcast, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MinstrelEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Capacity bounds how many events a slow subscriber may lag behind
    /// before it starts missing events. 1000 is comfortable for desktop
    /// deployments; tests can use 10-100.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MinstrelEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` otherwise.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: MinstrelEvent,
    ) -> Result<usize, broadcast::error::SendError<MinstrelEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    ///
    /// Playback must not care whether an SSE client is connected.
    pub fn emit_lossy(&self, event: MinstrelEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
