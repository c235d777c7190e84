//! Shared test helpers: scripted opener, manual sink, wait utilities
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use minstrel_common::events::{EventBus, MinstrelEvent, SessionPhase};
use minstrel_vp::config::Settings;
use minstrel_vp::error::{Error, Result};
use minstrel_vp::playback::pipeline::{TrackOpener, TrackStream};
use minstrel_vp::playback::registry::SessionRegistry;
use minstrel_vp::playback::session::SessionHandle;
use minstrel_vp::playback::sink::{FrameSink, SinkFactory, SinkSignal};
use minstrel_vp::playback::types::{GuildId, TrackRequest};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Scripted pipeline opener keyed off track display names:
/// - `bad*` fails with a spawn error
/// - `slow*` hangs until cancelled (recording the cancellation)
/// - anything else yields a short detached stream
pub struct StubOpener {
    opened: Mutex<Vec<String>>,
    hang_cancelled: Arc<AtomicBool>,
}

impl StubOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            opened: Mutex::new(Vec::new()),
            hang_cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Display names of every track whose open was attempted, in order
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    /// Whether a hanging open was dropped (cancelled) at least once
    pub fn hang_cancelled(&self) -> bool {
        self.hang_cancelled.load(Ordering::SeqCst)
    }
}

struct CancelFlag(Arc<AtomicBool>);

impl Drop for CancelFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TrackOpener for StubOpener {
    async fn open(&self, request: &TrackRequest, _volume_level: u8) -> Result<TrackStream> {
        self.opened.lock().unwrap().push(request.display_name.clone());

        if request.display_name.starts_with("bad") {
            return Err(Error::PipelineSpawn(format!(
                "stub refuses {}",
                request.display_name
            )));
        }
        if request.display_name.starts_with("slow") {
            let _flag = CancelFlag(Arc::clone(&self.hang_cancelled));
            std::future::pending::<()>().await;
            unreachable!("pending future completed");
        }

        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(b"0123456789abcdef"))
            .await
            .expect("stub channel full");
        drop(tx);
        Ok(TrackStream::detached(rx))
    }
}

/// Frame sink driven by the test: emits `Started` on attach, then waits for
/// the test to complete or fail the current track
pub struct ManualSink {
    inner: Mutex<ManualSinkInner>,
}

#[derive(Default)]
struct ManualSinkInner {
    current: Option<(Uuid, mpsc::UnboundedSender<SinkSignal>)>,
    attach_count: usize,
    detach_count: usize,
    release_count: usize,
}

impl ManualSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ManualSinkInner::default()),
        })
    }

    pub fn attach_count(&self) -> usize {
        self.inner.lock().unwrap().attach_count
    }

    pub fn detach_count(&self) -> usize {
        self.inner.lock().unwrap().detach_count
    }

    pub fn release_count(&self) -> usize {
        self.inner.lock().unwrap().release_count
    }

    /// Simulate the current track ending naturally
    pub fn complete_current(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((track_id, signals)) = inner.current.take() {
            let _ = signals.send(SinkSignal::Ended { track_id });
        }
    }

    /// Simulate a delivery failure for the current track
    pub fn fail_current(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((track_id, signals)) = inner.current.take() {
            let _ = signals.send(SinkSignal::Errored {
                track_id,
                reason: reason.to_string(),
            });
        }
    }
}

#[async_trait]
impl FrameSink for ManualSink {
    async fn attach(
        &self,
        track_id: Uuid,
        stream: TrackStream,
        signals: mpsc::UnboundedSender<SinkSignal>,
    ) -> Result<()> {
        drop(stream);
        let mut inner = self.inner.lock().unwrap();
        inner.attach_count += 1;
        let _ = signals.send(SinkSignal::Started { track_id });
        inner.current = Some((track_id, signals));
        Ok(())
    }

    async fn detach(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.detach_count += 1;
        inner.current = None;
    }

    async fn release(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.release_count += 1;
        inner.current = None;
    }
}

/// Factory returning the same shared ManualSink for every guild
pub struct ManualSinkFactory {
    sink: Arc<ManualSink>,
}

impl ManualSinkFactory {
    pub fn new(sink: Arc<ManualSink>) -> Arc<Self> {
        Arc::new(Self { sink })
    }
}

impl SinkFactory for ManualSinkFactory {
    fn connect(&self, _guild: GuildId) -> Arc<dyn FrameSink> {
        Arc::clone(&self.sink) as Arc<dyn FrameSink>
    }
}

/// Settings tuned for tests (override fields as needed after)
pub fn test_settings() -> Settings {
    Settings::default()
}

/// Registry wired to the scripted opener and manual sink
pub fn test_registry(
    settings: Settings,
    opener: Arc<StubOpener>,
    sink: Arc<ManualSink>,
) -> (Arc<SessionRegistry>, EventBus) {
    let bus = EventBus::new(100);
    let registry = SessionRegistry::new(
        Arc::new(settings),
        opener,
        ManualSinkFactory::new(sink),
        bus.clone(),
    );
    (registry, bus)
}

/// Track request for a local file that does not need to exist (stub opener
/// never touches the filesystem)
pub fn track(name: &str) -> TrackRequest {
    TrackRequest::local(PathBuf::from(format!("/music/{}", name)))
}

pub fn tracks(names: &[&str]) -> Vec<TrackRequest> {
    names.iter().map(|n| track(n)).collect()
}

/// Poll until the condition holds; false on timeout
pub async fn wait_until<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll a session's status until it reaches the given phase
pub async fn wait_for_phase(handle: &SessionHandle, phase: SessionPhase, timeout_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Ok(status) = handle.status().await {
            if status.phase == phase {
                return true;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll a session's status until the given track is current
pub async fn wait_for_current(handle: &SessionHandle, name: &str, timeout_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Ok(status) = handle.status().await {
            if status.phase == SessionPhase::Playing
                && status.current_track.as_deref() == Some(name)
            {
                return true;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Receive events until one matches, or panic on timeout
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<MinstrelEvent>,
    timeout_ms: u64,
    mut matches: F,
) -> MinstrelEvent
where
    F: FnMut(&MinstrelEvent) -> bool,
{
    let result = tokio::time::timeout(Duration::from_millis(timeout_ms), async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await;
    result.expect("timed out waiting for event")
}
