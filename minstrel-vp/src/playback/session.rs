//! Per-guild playback session
//!
//! The state machine tying queue, transcoding pipeline and frame sink
//! together. Each session is one actor task: every command and every
//! external signal (pipeline open results, sink lifecycle) arrives as a
//! message in the actor's `select!` loop, so all session state has exactly
//! one writer and each event maps to exactly one transition.
//!
//! Pipeline opening runs in a spawned task reporting back by message, so a
//! `stop` issued mid-open stays responsive: aborting the load task drops the
//! half-open pipeline, whose guard kills the subprocess before its watermark
//! was ever reached.

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::playback::pipeline::{TrackOpener, TrackStream};
use crate::playback::queue::{shuffle_slice, TrackQueue};
use crate::playback::sink::{FrameSink, SinkSignal};
use crate::playback::types::{GuildId, TrackRequest};
use crate::playback::volume::VolumeController;
use minstrel_common::events::{
    EventBus, MinstrelEvent, QueueChangeTrigger, SessionEndReason, SessionPhase,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of a skip command
#[derive(Debug)]
pub enum SkipOutcome {
    Skipped { track: String },
    NothingPlaying,
}

/// Result of a shuffle command
#[derive(Debug)]
pub enum ShuffleOutcome {
    /// Not playing (or no snapshot): only the mode flag changed
    ModeToggled { enabled: bool },
    /// Playing: the snapshot was reshuffled and reloaded from position 0
    Reshuffled { queue_len: usize },
}

/// Result of an end-after-current command
#[derive(Debug)]
pub enum EndOutcome {
    /// Queue cleared; playback ends when this track finishes
    Armed { track: String, dropped: usize },
    NothingPlaying,
}

/// Point-in-time view of a session for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub guild_id: u64,
    pub phase: SessionPhase,
    pub current_track: Option<String>,
    pub queue: Vec<String>,
    pub volume: u8,
    pub shuffle_enabled: bool,
    pub end_after_current: bool,
}

/// Commands accepted by the session actor
enum SessionCommand {
    Enqueue {
        tracks: Vec<TrackRequest>,
        start: bool,
        reply: oneshot::Sender<usize>,
    },
    Skip {
        reply: oneshot::Sender<SkipOutcome>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Shuffle {
        reply: oneshot::Sender<ShuffleOutcome>,
    },
    EndAfterCurrent {
        reply: oneshot::Sender<EndOutcome>,
    },
    SetVolume {
        level: u8,
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
}

/// Completed pipeline open, reported back into the actor loop
struct LoadResult {
    track_id: Uuid,
    track: TrackRequest,
    result: Result<TrackStream>,
}

/// Cloneable handle to one session's mailbox
#[derive(Clone)]
pub struct SessionHandle {
    guild: GuildId,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn guild(&self) -> GuildId {
        self.guild
    }

    /// Append tracks; when `start` is set and the session is idle, playback
    /// begins with the queue head. Returns the number of tracks queued.
    pub async fn enqueue(&self, tracks: Vec<TrackRequest>, start: bool) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Enqueue { tracks, start, reply })?;
        rx.await.map_err(|_| terminated())
    }

    pub async fn skip(&self) -> Result<SkipOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Skip { reply })?;
        rx.await.map_err(|_| terminated())
    }

    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Stop { reply })?;
        rx.await.map_err(|_| terminated())
    }

    pub async fn shuffle(&self) -> Result<ShuffleOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Shuffle { reply })?;
        rx.await.map_err(|_| terminated())
    }

    pub async fn end_after_current(&self) -> Result<EndOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::EndAfterCurrent { reply })?;
        rx.await.map_err(|_| terminated())
    }

    pub async fn set_volume(&self, level: u8) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::SetVolume { level, reply })?;
        rx.await.map_err(|_| terminated())
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Status { reply })?;
        rx.await.map_err(|_| terminated())
    }

    fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| terminated())
    }
}

fn terminated() -> Error {
    Error::InvalidState("session terminated".into())
}

/// Spawn a session actor for one guild
///
/// Normally called by the `SessionRegistry`, which also watches the returned
/// join handle to remove the registry entry when the actor exits.
pub fn spawn(
    guild: GuildId,
    settings: Arc<Settings>,
    opener: Arc<dyn TrackOpener>,
    sink: Arc<dyn FrameSink>,
    bus: EventBus,
) -> (SessionHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (load_tx, load_rx) = mpsc::unbounded_channel();
    let (sink_tx, sink_rx) = mpsc::unbounded_channel();

    let session = PlaybackSession {
        guild,
        settings,
        opener,
        sink,
        bus,
        queue: TrackQueue::new(),
        phase: SessionPhase::Idle,
        current: None,
        current_track_id: None,
        volume: VolumeController::default(),
        shuffle_enabled: false,
        end_after_current: false,
        consecutive_failures: 0,
        load_task: None,
        load_tx,
        sink_tx,
        idle_since: None,
    };

    let task = tokio::spawn(session.run(cmd_rx, load_rx, sink_rx));
    (SessionHandle { guild, cmd_tx }, task)
}

struct PlaybackSession {
    guild: GuildId,
    settings: Arc<Settings>,
    opener: Arc<dyn TrackOpener>,
    sink: Arc<dyn FrameSink>,
    bus: EventBus,

    queue: TrackQueue,
    phase: SessionPhase,
    current: Option<TrackRequest>,
    /// Playback-instance id of the loading/playing track; signals carrying
    /// any other id are stale and discarded
    current_track_id: Option<Uuid>,
    volume: VolumeController,
    shuffle_enabled: bool,
    end_after_current: bool,
    consecutive_failures: u32,
    load_task: Option<JoinHandle<()>>,
    load_tx: mpsc::UnboundedSender<LoadResult>,
    sink_tx: mpsc::UnboundedSender<SinkSignal>,
    /// Set while Idle with an empty queue; drives the teardown timer
    idle_since: Option<Instant>,
}

impl PlaybackSession {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
        mut load_rx: mpsc::UnboundedReceiver<LoadResult>,
        mut sink_rx: mpsc::UnboundedReceiver<SinkSignal>,
    ) {
        info!("Session started for guild {}", self.guild);
        self.enter_idle();

        loop {
            let idle_deadline = self
                .idle_since
                .map(|since| since + self.settings.playback.idle_timeout());
            let idle_timer = async move {
                match idle_deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                Some(cmd) = cmd_rx.recv() => {
                    if self.handle_command(cmd).await {
                        break;
                    }
                }
                Some(result) = load_rx.recv() => {
                    self.handle_load_result(result).await;
                }
                Some(signal) = sink_rx.recv() => {
                    self.handle_sink_signal(signal).await;
                }
                _ = idle_timer => {
                    info!("Idle grace period elapsed for guild {}", self.guild);
                    self.teardown(SessionEndReason::IdleTimeout).await;
                    break;
                }
                else => break,
            }
        }

        info!("Session terminated for guild {}", self.guild);
    }

    /// Returns true when the session must exit its loop
    async fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Enqueue { tracks, start, reply } => {
                let count = tracks.len();
                self.queue.append(tracks);
                if self.shuffle_enabled && count > 0 {
                    self.queue.shuffle_in_place(&mut rand::thread_rng());
                }
                if count > 0 {
                    // Teardown timer only runs while idle with nothing queued
                    self.idle_since = None;
                    self.emit_queue_changed(QueueChangeTrigger::Enqueued);
                }
                debug!(
                    "Guild {}: queued {} tracks ({} pending)",
                    self.guild,
                    count,
                    self.queue.len()
                );
                if start && self.phase == SessionPhase::Idle {
                    self.begin_next().await;
                }
                let _ = reply.send(count);
                false
            }

            SessionCommand::Skip { reply } => {
                let outcome = if self.phase == SessionPhase::Playing {
                    let track = self
                        .current
                        .as_ref()
                        .map(|t| t.display_name.clone())
                        .unwrap_or_default();
                    self.sink.detach().await;
                    let end_was_armed = self.end_after_current;
                    self.finish_current(true);
                    if end_was_armed {
                        self.enter_idle();
                    } else {
                        self.begin_next().await;
                    }
                    SkipOutcome::Skipped { track }
                } else {
                    SkipOutcome::NothingPlaying
                };
                let _ = reply.send(outcome);
                false
            }

            SessionCommand::Stop { reply } => {
                self.teardown(SessionEndReason::Stopped).await;
                let _ = reply.send(());
                true
            }

            SessionCommand::Shuffle { reply } => {
                self.shuffle_enabled = !self.shuffle_enabled;
                let snapshot_len = self.queue.snapshot_for_reshuffle().len();
                let outcome = if self.phase == SessionPhase::Playing && snapshot_len > 0 {
                    // Reshuffle the original load order, not the current
                    // (possibly already shuffled) queue, and restart from
                    // the new head
                    let mut order = self.queue.snapshot_for_reshuffle().to_vec();
                    shuffle_slice(&mut order, &mut rand::thread_rng());
                    self.queue.clear();
                    self.queue.replace_pending(order);
                    self.emit_queue_changed(QueueChangeTrigger::Reshuffled);

                    self.sink.detach().await;
                    self.finish_current(true);
                    let queue_len = self.queue.len();
                    self.begin_next().await;
                    ShuffleOutcome::Reshuffled { queue_len }
                } else {
                    ShuffleOutcome::ModeToggled {
                        enabled: self.shuffle_enabled,
                    }
                };
                let _ = reply.send(outcome);
                false
            }

            SessionCommand::EndAfterCurrent { reply } => {
                let outcome = if self.phase == SessionPhase::Playing {
                    self.end_after_current = true;
                    let dropped = self.queue.clear();
                    if dropped > 0 {
                        self.emit_queue_changed(QueueChangeTrigger::Cleared);
                    }
                    let track = self
                        .current
                        .as_ref()
                        .map(|t| t.display_name.clone())
                        .unwrap_or_default();
                    info!(
                        "Guild {}: ending after {} ({} queued tracks dropped)",
                        self.guild, track, dropped
                    );
                    EndOutcome::Armed { track, dropped }
                } else {
                    EndOutcome::NothingPlaying
                };
                let _ = reply.send(outcome);
                false
            }

            SessionCommand::SetVolume { level, reply } => {
                self.volume.set_level(level);
                // Gain rides the transcoder's filter graph, so the new level
                // applies from the next opened track
                self.bus.emit_lossy(MinstrelEvent::VolumeChanged {
                    guild_id: self.guild.0,
                    volume: self.volume.level(),
                    timestamp: chrono::Utc::now(),
                });
                let _ = reply.send(());
                false
            }

            SessionCommand::Status { reply } => {
                let _ = reply.send(self.status());
                false
            }
        }
    }

    async fn handle_load_result(&mut self, result: LoadResult) {
        if self.phase != SessionPhase::Loading || Some(result.track_id) != self.current_track_id {
            // A skip/stop/reshuffle replaced this track mid-open; dropping
            // the stream kills its subprocess
            debug!(
                "Guild {}: discarding stale load result for {}",
                self.guild, result.track.display_name
            );
            return;
        }
        self.load_task = None;

        match result.result {
            Ok(stream) => {
                match self
                    .sink
                    .attach(result.track_id, stream, self.sink_tx.clone())
                    .await
                {
                    Ok(()) => {
                        self.set_phase(SessionPhase::Playing);
                    }
                    Err(e) => self.note_track_failure(result.track, e).await,
                }
            }
            Err(e) => self.note_track_failure(result.track, e).await,
        }
    }

    async fn handle_sink_signal(&mut self, signal: SinkSignal) {
        if Some(signal.track_id()) != self.current_track_id {
            debug!("Guild {}: discarding stale sink signal", self.guild);
            return;
        }

        match signal {
            SinkSignal::Started { .. } => {
                self.consecutive_failures = 0;
                if let Some(track) = &self.current {
                    info!("Guild {}: now playing {}", self.guild, track.display_name);
                    self.bus.emit_lossy(MinstrelEvent::TrackStarted {
                        guild_id: self.guild.0,
                        track: track.display_name.clone(),
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
            SinkSignal::Ended { .. } => {
                let end_was_armed = self.end_after_current;
                self.finish_current(false);
                if end_was_armed {
                    self.enter_idle();
                } else {
                    self.begin_next().await;
                }
            }
            SinkSignal::Errored { reason, .. } => {
                self.sink.detach().await;
                if let Some(track) = self.current.take() {
                    self.current_track_id = None;
                    self.note_track_failure(track, Error::SinkDelivery(reason)).await;
                }
            }
        }
    }

    /// Pop the next queue entry and open its pipeline, or go idle
    async fn begin_next(&mut self) {
        match self.queue.pop_next() {
            Some(track) => {
                self.set_phase(SessionPhase::Loading);
                self.emit_queue_changed(QueueChangeTrigger::Advanced);
                self.idle_since = None;

                let track_id = Uuid::new_v4();
                self.current = Some(track.clone());
                self.current_track_id = Some(track_id);

                let level = self.volume.effective_level(track.volume_override);
                info!(
                    "Guild {}: loading {} (volume {})",
                    self.guild, track.display_name, level
                );

                let opener = Arc::clone(&self.opener);
                let load_tx = self.load_tx.clone();
                self.load_task = Some(tokio::spawn(async move {
                    let result = opener.open(&track, level).await;
                    let _ = load_tx.send(LoadResult {
                        track_id,
                        track,
                        result,
                    });
                }));
            }
            None => self.enter_idle(),
        }
    }

    /// Record a failed track and advance, bounded by the failure guard
    async fn note_track_failure(&mut self, track: TrackRequest, error: Error) {
        warn!(
            "Guild {}: track {} failed: {}",
            self.guild, track.display_name, error
        );
        self.bus.emit_lossy(MinstrelEvent::TrackFailed {
            guild_id: self.guild.0,
            track: track.display_name,
            reason: error.to_string(),
            timestamp: chrono::Utc::now(),
        });

        self.current = None;
        self.current_track_id = None;
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.settings.playback.max_consecutive_failures {
            error!(
                "Guild {}: {} consecutive failures, abandoning queue",
                self.guild, self.consecutive_failures
            );
            let dropped = self.queue.clear();
            if dropped > 0 {
                self.emit_queue_changed(QueueChangeTrigger::Cleared);
            }
            self.bus.emit_lossy(MinstrelEvent::QueueHalted {
                guild_id: self.guild.0,
                consecutive_failures: self.consecutive_failures,
                timestamp: chrono::Utc::now(),
            });
            self.consecutive_failures = 0;
            self.enter_idle();
        } else {
            self.begin_next().await;
        }
    }

    /// Close out the current track, resetting the end-after-current flag
    fn finish_current(&mut self, skipped: bool) {
        if let Some(track) = self.current.take() {
            self.bus.emit_lossy(MinstrelEvent::TrackFinished {
                guild_id: self.guild.0,
                track: track.display_name,
                skipped,
                timestamp: chrono::Utc::now(),
            });
        }
        self.current_track_id = None;
        self.end_after_current = false;
    }

    fn enter_idle(&mut self) {
        self.set_phase(SessionPhase::Idle);
        self.current = None;
        self.current_track_id = None;
        if self.queue.is_empty() {
            self.idle_since = Some(Instant::now());
            self.bus.emit_lossy(MinstrelEvent::SessionIdle {
                guild_id: self.guild.0,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// Final teardown: cancel any in-flight open, clear the queue, release
    /// the voice connection, and let the actor exit
    async fn teardown(&mut self, reason: SessionEndReason) {
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        self.queue.clear();
        self.current = None;
        self.current_track_id = None;
        self.end_after_current = false;
        self.sink.detach().await;
        self.sink.release().await;
        self.set_phase(SessionPhase::Stopped);
        self.bus.emit_lossy(MinstrelEvent::SessionEnded {
            guild_id: self.guild.0,
            reason,
            timestamp: chrono::Utc::now(),
        });
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!("Guild {}: {} -> {}", self.guild, self.phase, phase);
            self.bus.emit_lossy(MinstrelEvent::PhaseChanged {
                guild_id: self.guild.0,
                old_phase: self.phase,
                new_phase: phase,
                timestamp: chrono::Utc::now(),
            });
            self.phase = phase;
        }
    }

    fn emit_queue_changed(&self, trigger: QueueChangeTrigger) {
        self.bus.emit_lossy(MinstrelEvent::QueueChanged {
            guild_id: self.guild.0,
            queue_len: self.queue.len(),
            trigger,
            timestamp: chrono::Utc::now(),
        });
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            guild_id: self.guild.0,
            phase: self.phase,
            current_track: self.current.as_ref().map(|t| t.display_name.clone()),
            queue: self.queue.iter().map(|t| t.display_name.clone()).collect(),
            volume: self.volume.level(),
            shuffle_enabled: self.shuffle_enabled,
            end_after_current: self.end_after_current,
        }
    }
}
