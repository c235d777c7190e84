//! HTTP request handlers
//!
//! Implements the session control endpoints. Input validation (volume
//! range, extension allow-list, local-file existence) happens here, before
//! anything is enqueued — a rejected track never reaches a pipeline.

use crate::api::AppContext;
use crate::error::Error;
use crate::playback::session::{EndOutcome, SessionStatus, ShuffleOutcome, SkipOutcome};
use crate::playback::types::{GuildId, TrackRequest, TrackSource};
use crate::playback::volume;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use minstrel_common::events::SessionPhase;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackDto {
    /// Local path (absolute or relative to the media root) or http(s) URL
    pub location: String,
    /// Display name override; defaults to the file name
    pub display_name: Option<String>,
    /// Per-track volume override, 0-100
    pub volume: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub tracks: Vec<TrackDto>,
    /// Start playback immediately if the session is idle (default true)
    pub start: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    queued: usize,
}

#[derive(Debug, Serialize)]
pub struct SkipResponse {
    skipped: bool,
    message: String,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    stopped: bool,
}

#[derive(Debug, Serialize)]
pub struct ShuffleResponse {
    shuffle_enabled: Option<bool>,
    reshuffled: bool,
    queue_len: Option<usize>,
    message: String,
}

#[derive(Debug, Serialize)]
pub struct EndResponse {
    armed: bool,
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    /// 0-100 user-facing scale
    volume: i64,
}

#[derive(Debug, Serialize)]
pub struct VolumeResponse {
    applied: bool,
    volume: u8,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    current_track: Option<String>,
    queue: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(error: Error) -> ApiError {
    let status = match &error {
        Error::InputNotFound(_) => StatusCode::NOT_FOUND,
        Error::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Error::InvalidVolume(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        Error::InvalidState(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - health check
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "voice_player".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Session Control Endpoints
// ============================================================================

/// POST /sessions/:guild_id/enqueue - queue tracks, optionally starting
/// playback
///
/// Creates the guild's session on first use. Every track is validated
/// before any of them is enqueued, so a bad batch is rejected whole.
pub async fn enqueue(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(request): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let start = request.start.unwrap_or(true);

    let mut tracks = Vec::with_capacity(request.tracks.len());
    for dto in request.tracks {
        tracks.push(resolve_track(&ctx, dto).await.map_err(error_response)?);
    }
    if tracks.is_empty() {
        return Err(error_response(Error::BadRequest(
            "no tracks in request".into(),
        )));
    }

    info!(
        "Enqueue {} tracks for guild {} (start: {})",
        tracks.len(),
        guild_id,
        start
    );
    let handle = ctx.registry.get_or_create(GuildId(guild_id));
    let queued = handle
        .enqueue(tracks, start)
        .await
        .map_err(error_response)?;

    Ok(Json(EnqueueResponse { queued }))
}

/// POST /sessions/:guild_id/skip - skip the current track
pub async fn skip(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
) -> Result<Json<SkipResponse>, ApiError> {
    let Some(handle) = ctx.registry.session(GuildId(guild_id)) else {
        return Ok(nothing_playing_skip());
    };
    match handle.skip().await {
        Ok(SkipOutcome::Skipped { track }) => Ok(Json(SkipResponse {
            skipped: true,
            message: format!("Skipped {}", track),
        })),
        Ok(SkipOutcome::NothingPlaying) => Ok(nothing_playing_skip()),
        // Session terminated between lookup and command: same as absent
        Err(_) => Ok(nothing_playing_skip()),
    }
}

fn nothing_playing_skip() -> Json<SkipResponse> {
    Json(SkipResponse {
        skipped: false,
        message: "Nothing is playing".to_string(),
    })
}

/// POST /sessions/:guild_id/stop - stop playback, clear the queue, release
/// the voice connection
///
/// Idempotent: stopping an absent or already-stopped session reports
/// `stopped: false` and is not an error.
pub async fn stop(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
) -> Result<Json<StopResponse>, ApiError> {
    let stopped = ctx
        .registry
        .stop(GuildId(guild_id))
        .await
        .map_err(error_response)?;
    Ok(Json(StopResponse { stopped }))
}

/// POST /sessions/:guild_id/shuffle - toggle shuffle mode, reshuffling the
/// current playlist when one is playing
pub async fn shuffle(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
) -> Result<Json<ShuffleResponse>, ApiError> {
    let Some(handle) = ctx.registry.session(GuildId(guild_id)) else {
        return Ok(Json(ShuffleResponse {
            shuffle_enabled: None,
            reshuffled: false,
            queue_len: None,
            message: "No active session".to_string(),
        }));
    };
    match handle.shuffle().await {
        Ok(ShuffleOutcome::ModeToggled { enabled }) => Ok(Json(ShuffleResponse {
            shuffle_enabled: Some(enabled),
            reshuffled: false,
            queue_len: None,
            message: format!(
                "Shuffle mode {}",
                if enabled { "enabled" } else { "disabled" }
            ),
        })),
        Ok(ShuffleOutcome::Reshuffled { queue_len }) => Ok(Json(ShuffleResponse {
            shuffle_enabled: None,
            reshuffled: true,
            queue_len: Some(queue_len),
            message: "Reshuffled current playlist".to_string(),
        })),
        Err(e) => Err(error_response(e)),
    }
}

/// POST /sessions/:guild_id/end - finish the current track, then stop
pub async fn end_after_current(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
) -> Result<Json<EndResponse>, ApiError> {
    let Some(handle) = ctx.registry.session(GuildId(guild_id)) else {
        return Ok(nothing_playing_end());
    };
    match handle.end_after_current().await {
        Ok(EndOutcome::Armed { track, dropped }) => Ok(Json(EndResponse {
            armed: true,
            message: format!(
                "Ending after {} ({} queued tracks dropped)",
                track, dropped
            ),
        })),
        Ok(EndOutcome::NothingPlaying) => Ok(nothing_playing_end()),
        Err(_) => Ok(nothing_playing_end()),
    }
}

fn nothing_playing_end() -> Json<EndResponse> {
    Json(EndResponse {
        armed: false,
        message: "Nothing is playing".to_string(),
    })
}

/// POST /sessions/:guild_id/volume - set the session default volume
///
/// Takes effect from the next opened track. Returns `applied: false` when
/// the guild has no session to remember the level.
pub async fn set_volume(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(request): Json<VolumeRequest>,
) -> Result<Json<VolumeResponse>, ApiError> {
    let level = volume::validate(request.volume).map_err(error_response)?;
    let Some(handle) = ctx.registry.session(GuildId(guild_id)) else {
        return Ok(Json(VolumeResponse {
            applied: false,
            volume: level,
        }));
    };
    match handle.set_volume(level).await {
        Ok(()) => Ok(Json(VolumeResponse {
            applied: true,
            volume: level,
        })),
        Err(_) => Ok(Json(VolumeResponse {
            applied: false,
            volume: level,
        })),
    }
}

/// GET /sessions/:guild_id/queue - pending tracks and the current one
pub async fn get_queue(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
) -> Result<Json<QueueResponse>, ApiError> {
    match session_status(&ctx, guild_id).await {
        Some(status) => Ok(Json(QueueResponse {
            current_track: status.current_track,
            queue: status.queue,
        })),
        None => Ok(Json(QueueResponse {
            current_track: None,
            queue: Vec::new(),
        })),
    }
}

/// GET /sessions/:guild_id/state - full session status
///
/// Absent sessions report an idle placeholder rather than an error, so
/// front-ends can poll unconditionally.
pub async fn get_state(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
) -> Result<Json<SessionStatus>, ApiError> {
    let status = session_status(&ctx, guild_id)
        .await
        .unwrap_or_else(|| SessionStatus {
            guild_id,
            phase: SessionPhase::Idle,
            current_track: None,
            queue: Vec::new(),
            volume: volume::DEFAULT_VOLUME,
            shuffle_enabled: false,
            end_after_current: false,
        });
    Ok(Json(status))
}

async fn session_status(ctx: &AppContext, guild_id: u64) -> Option<SessionStatus> {
    let handle = ctx.registry.session(GuildId(guild_id))?;
    handle.status().await.ok()
}

// ============================================================================
// Input Resolution
// ============================================================================

/// Turn a track DTO into a validated TrackRequest
///
/// Rejections happen here, before the queue: volume out of range, extension
/// outside the allow-list, missing local files. `http(s)` locations stay
/// remote; relative locations become remote when a `remote_base_url` is
/// configured, otherwise they resolve against the media root.
async fn resolve_track(ctx: &AppContext, dto: TrackDto) -> crate::error::Result<TrackRequest> {
    let volume_override = match dto.volume {
        Some(level) => Some(volume::validate(level)?),
        None => None,
    };

    let is_http = dto.location.starts_with("http://") || dto.location.starts_with("https://");
    let mut request = if is_http {
        TrackRequest::remote(dto.location)
    } else if let Some(base) = &ctx.settings.playback.remote_base_url {
        let url = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            dto.location.trim_start_matches('/')
        );
        TrackRequest::remote(url)
    } else {
        let path = PathBuf::from(&dto.location);
        let path = match (&ctx.settings.media_root, path.is_absolute()) {
            (Some(root), false) => root.join(path),
            _ => path,
        };
        TrackRequest::local(path)
    };

    if !request.extension_supported() {
        return Err(Error::UnsupportedFormat(request.location()));
    }
    if let TrackSource::File(path) = &request.source {
        if tokio::fs::metadata(path).await.is_err() {
            return Err(Error::InputNotFound(path.display().to_string()));
        }
    }

    if let Some(name) = dto.display_name {
        request.display_name = name;
    }
    request.volume_override = volume_override;
    Ok(request)
}
