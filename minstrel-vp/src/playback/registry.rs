//! Process-wide guild → session registry
//!
//! Sessions are created on demand and never destroyed implicitly except by
//! idle timeout or explicit stop. Creation is atomic under the registry
//! lock, so two near-simultaneous commands for one guild always land on the
//! same session. A per-session watcher task removes the map entry when the
//! actor exits; an epoch counter keeps a stale watcher from evicting a
//! replacement session created for the same guild.

use crate::config::Settings;
use crate::error::Result;
use crate::playback::pipeline::TrackOpener;
use crate::playback::session::{self, SessionHandle};
use crate::playback::sink::SinkFactory;
use crate::playback::types::GuildId;
use minstrel_common::events::EventBus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

struct SessionSlot {
    handle: SessionHandle,
    epoch: u64,
}

/// Guild → session map with single-writer-per-guild discipline
///
/// The registry hands out mailbox handles; all session state lives inside
/// the actor tasks.
pub struct SessionRegistry {
    settings: Arc<Settings>,
    opener: Arc<dyn TrackOpener>,
    sinks: Arc<dyn SinkFactory>,
    bus: EventBus,
    sessions: Mutex<HashMap<u64, SessionSlot>>,
    next_epoch: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        settings: Arc<Settings>,
        opener: Arc<dyn TrackOpener>,
        sinks: Arc<dyn SinkFactory>,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            opener,
            sinks,
            bus,
            sessions: Mutex::new(HashMap::new()),
            next_epoch: AtomicU64::new(0),
        })
    }

    /// Handle for an existing session, if any
    pub fn session(&self, guild: GuildId) -> Option<SessionHandle> {
        self.sessions
            .lock()
            .unwrap()
            .get(&guild.0)
            .map(|slot| slot.handle.clone())
    }

    /// Existing session for the guild, or a freshly spawned one
    ///
    /// Atomic under the registry lock: concurrent calls for the same guild
    /// get the same handle.
    pub fn get_or_create(self: &Arc<Self>, guild: GuildId) -> SessionHandle {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(slot) = sessions.get(&guild.0) {
            return slot.handle.clone();
        }

        info!("Creating session for guild {}", guild);
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let sink = self.sinks.connect(guild);
        let (handle, task) = session::spawn(
            guild,
            Arc::clone(&self.settings),
            Arc::clone(&self.opener),
            sink,
            self.bus.clone(),
        );
        sessions.insert(
            guild.0,
            SessionSlot {
                handle: handle.clone(),
                epoch,
            },
        );

        // Remove the entry when the actor exits (stop or idle timeout); the
        // epoch check protects a newer session under the same guild id
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let _ = task.await;
            registry.remove_if_epoch(guild, epoch);
        });

        handle
    }

    /// Stop a session; a no-op returning false when the guild has none
    ///
    /// Idempotent: stopping twice, or stopping a guild that never played,
    /// is not an error.
    pub async fn stop(&self, guild: GuildId) -> Result<bool> {
        let handle = self.session(guild);
        match handle {
            Some(handle) => {
                // The actor exits after replying; the watcher then removes
                // the map entry. A send failure means it already terminated.
                let _ = handle.stop().await;
                Ok(true)
            }
            None => {
                debug!("Stop for guild {} with no session (no-op)", guild);
                Ok(false)
            }
        }
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_if_epoch(&self, guild: GuildId, epoch: u64) {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.get(&guild.0).map(|slot| slot.epoch) == Some(epoch) {
            sessions.remove(&guild.0);
            debug!("Removed session entry for guild {}", guild);
        }
    }
}
