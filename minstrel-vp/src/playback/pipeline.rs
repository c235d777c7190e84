//! Transcoding pipeline
//!
//! Wraps one external decode/encode subprocess per track and exposes its
//! output as a pre-buffered, backpressured byte stream. The subprocess is a
//! scoped resource: `PipelineGuard` kills it on every exit path, including
//! timeouts and errors, via `kill_on_drop` — callers never check-and-destroy
//! manually.
//!
//! Opening suspends the caller until the pre-buffer watermark is reached or
//! the source proves exhausted (short-track flush) or failed. The watermark
//! is derived from the output profile's byte rate, so it always corresponds
//! to a few hundred milliseconds of audio regardless of bitrate.

use crate::config::{OutputProfile, Settings, CHANNELS, SAMPLE_RATE};
use crate::error::{Error, Result};
use crate::playback::types::{TrackRequest, TrackSource};
use crate::playback::volume;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Read granularity from the transcoder's stdout
const CHUNK_SIZE: usize = 8192;

/// stderr lines retained for error reports
const STDERR_TAIL_LINES: usize = 8;

/// Opens one track into a flowing byte stream
///
/// The seam between the session state machine and the subprocess world;
/// tests substitute a scripted implementation.
#[async_trait]
pub trait TrackOpener: Send + Sync {
    /// Open a pipeline for `request` at the given 0-100 volume level
    ///
    /// Suspends until the pre-buffer watermark is reached or the source is
    /// exhausted/failed. Bounded by the configured open timeout.
    async fn open(&self, request: &TrackRequest, volume_level: u8) -> Result<TrackStream>;
}

/// Pre-buffered output stream of one transcoder subprocess
///
/// Dropping the stream (or calling `close`) terminates the subprocess and
/// its pump tasks. `close` is idempotent and safe from error handlers.
pub struct TrackStream {
    rx: mpsc::Receiver<Bytes>,
    guard: Option<PipelineGuard>,
}

impl TrackStream {
    /// Next chunk of transcoded audio; `None` at end of stream
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Tear down the pipeline; repeated calls are no-ops
    pub fn close(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.close();
        }
        self.rx.close();
    }

    /// A stream fed directly from a channel, with no subprocess behind it
    ///
    /// Used by tests and by sinks that synthesize their own input.
    pub fn detached(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx, guard: None }
    }
}

impl std::fmt::Debug for TrackStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackStream")
            .field("piped", &self.guard.is_some())
            .finish()
    }
}

/// Scoped owner of the subprocess and its pump/stderr tasks
struct PipelineGuard {
    child: Option<Child>,
    pump: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl PipelineGuard {
    fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(stderr_task) = self.stderr_task.take() {
            stderr_task.abort();
        }
        if let Some(mut child) = self.child.take() {
            // kill_on_drop covers the drop path; this covers explicit close
            let _ = child.start_kill();
        }
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        self.close();
    }
}

/// Production pipeline backed by an ffmpeg-style transcoder binary
pub struct TranscodingPipeline {
    settings: Arc<Settings>,
}

impl TranscodingPipeline {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    async fn open_inner(&self, request: &TrackRequest, volume_level: u8) -> Result<TrackStream> {
        let profile = self.settings.playback.profile;
        let location = request.location();
        let args = build_transcode_args(&location, request.is_remote(), volume::gain(volume_level), profile);
        debug!(
            "Spawning transcoder for {} ({} args)",
            request.display_name,
            args.len()
        );

        let binary = &self.settings.transcoder.binary;
        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::PipelineSpawn(format!("{}: {}", binary.display(), e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::PipelineSpawn("transcoder stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::PipelineSpawn("transcoder stderr unavailable".into()))?;

        // Drain stderr continuously; keep a short tail for error reports
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let tail_handle = Arc::clone(&stderr_tail);
        let track_name = request.display_name.clone();
        let mut stderr_task = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("transcoder[{}]: {}", track_name, line);
                let mut tail = tail_handle.lock().unwrap();
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }));

        // Accumulate output without exposing it until the watermark is
        // reached, or the source is exhausted first (short-track flush)
        let watermark = self.settings.playback.watermark_bytes();
        let mut reader = stdout;
        let mut cached: Vec<Bytes> = Vec::new();
        let mut cached_bytes = 0usize;
        let mut exhausted = false;
        while cached_bytes < watermark {
            match read_chunk(&mut reader).await {
                Ok(Some(chunk)) => {
                    cached_bytes += chunk.len();
                    cached.push(chunk);
                }
                Ok(None) => {
                    exhausted = true;
                    break;
                }
                Err(e) => {
                    if let Some(task) = stderr_task.take() {
                        task.abort();
                    }
                    return Err(Error::PipelineDecode(format!(
                        "reading transcoder output for {}: {}",
                        request.display_name, e
                    )));
                }
            }
        }

        let child = if exhausted {
            // Source ended before the watermark: distinguish a legitimately
            // short track from a decode/source failure via the exit status
            let status = child.wait().await?;
            if let Some(task) = stderr_task.take() {
                let _ = task.await;
            }
            if !status.success() {
                let tail = stderr_tail
                    .lock()
                    .unwrap()
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; ");
                let msg = format!(
                    "transcoder exited with {} for {}{}{}",
                    status,
                    request.display_name,
                    if tail.is_empty() { "" } else { ": " },
                    tail
                );
                return Err(match &request.source {
                    TrackSource::Remote(_) => Error::PipelineSource(msg),
                    TrackSource::File(_) => Error::PipelineDecode(msg),
                });
            }
            if cached_bytes == 0 {
                return Err(Error::PipelineDecode(format!(
                    "transcoder produced no output for {}",
                    request.display_name
                )));
            }
            debug!(
                "Short track {}: flushing {} bytes below the {} byte watermark",
                request.display_name, cached_bytes, watermark
            );
            None
        } else {
            Some(child)
        };

        // Bounded channel after the watermark: if the sink cannot keep up,
        // the pump's send suspends and the subprocess blocks on its pipe
        let capacity = (self.settings.playback.stream_buffer_bytes() / CHUNK_SIZE).max(1);
        let (tx, rx) = mpsc::channel::<Bytes>(capacity);
        let pump = tokio::spawn(pump_stream(cached, reader, tx));

        Ok(TrackStream {
            rx,
            guard: Some(PipelineGuard {
                child,
                pump: Some(pump),
                stderr_task,
            }),
        })
    }
}

#[async_trait]
impl TrackOpener for TranscodingPipeline {
    async fn open(&self, request: &TrackRequest, volume_level: u8) -> Result<TrackStream> {
        if !request.extension_supported() {
            return Err(Error::UnsupportedFormat(request.location()));
        }
        if let TrackSource::File(path) = &request.source {
            if tokio::fs::metadata(path).await.is_err() {
                return Err(Error::InputNotFound(path.display().to_string()));
            }
        }

        let open_timeout = self.settings.transcoder.open_timeout();
        // On timeout the open future is dropped, which drops the child and
        // kills the subprocess before its watermark was ever reached
        timeout(open_timeout, self.open_inner(request, volume_level))
            .await
            .map_err(|_| {
                Error::PipelineDecode(format!(
                    "opening {} timed out after {}s",
                    request.display_name, open_timeout.as_secs()
                ))
            })?
    }
}

/// Read one chunk from the transcoder; `None` on end of output
async fn read_chunk(reader: &mut ChildStdout) -> std::io::Result<Option<Bytes>> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(Bytes::from(buf)))
}

/// Feed the cached pre-buffer, then relay the rest of the subprocess output
async fn pump_stream(cached: Vec<Bytes>, mut reader: ChildStdout, tx: mpsc::Sender<Bytes>) {
    for chunk in cached {
        if tx.send(chunk).await.is_err() {
            return;
        }
    }
    loop {
        match read_chunk(&mut reader).await {
            Ok(Some(chunk)) => {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("transcoder stream read error: {}", e);
                return;
            }
        }
    }
}

/// Fixed transcoder argument list for one track
///
/// Reconnect-on-stall flags are added only for remote sources; the volume
/// gain rides the filter graph so no inline gain stage is needed later.
fn build_transcode_args(
    location: &str,
    remote: bool,
    gain: f32,
    profile: OutputProfile,
) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning", "-nostdin"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if remote {
        args.extend(
            ["-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "5"]
                .iter()
                .map(|s| s.to_string()),
        );
    }

    args.push("-i".into());
    args.push(location.into());

    // Audio stream only
    args.push("-vn".into());
    args.push("-map".into());
    args.push("0:a:0".into());

    args.push("-af".into());
    args.push(format!("volume={:.2}", gain));

    match profile {
        OutputProfile::Opus { bitrate_bps } => {
            args.extend(
                ["-c:a", "libopus", "-b:a"].iter().map(|s| s.to_string()),
            );
            args.push(bitrate_bps.to_string());
            args.push("-ar".into());
            args.push(SAMPLE_RATE.to_string());
            args.push("-ac".into());
            args.push(CHANNELS.to_string());
            args.push("-f".into());
            args.push("ogg".into());
        }
        OutputProfile::Pcm => {
            args.push("-f".into());
            args.push("s16le".into());
            args.push("-ar".into());
            args.push(SAMPLE_RATE.to_string());
            args.push("-ac".into());
            args.push(CHANNELS.to_string());
        }
    }

    args.push("-".into());
    args
}
