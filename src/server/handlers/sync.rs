//! Sync endpoint handlers: start/progress/pause/resume/cancel/resume-check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::models::SyncMode;
use crate::state::Status;
use crate::sync::{CatalogSyncWorker, SyncWorkerConfig};

use super::super::{app_error_response, AppState};

#[derive(Debug, Deserialize)]
pub struct StartSyncRequest {
    pub username: String,
    pub batch_size: i32,
    pub sync_mode: String,
    pub folder_id: Option<i64>,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn progress_json(progress: &crate::models::SyncProgress) -> serde_json::Value {
    serde_json::json!({
        "status": progress.status.as_str(),
        "current_page": progress.current_page,
        "processed": progress.processed,
        "total": progress.total,
        "sync_mode": progress.sync_mode.as_str(),
        "current_folder": progress.current_folder,
        "folder_index": progress.folder_index,
        "folders": progress.folders,
        "last_activity": progress.last_activity.to_rfc3339(),
    })
}

/// `POST /sync/start`: refuses a new run while one is active (409), or
/// reports a resumable leftover progress row instead of starting fresh
/// (spec §4.8).
pub async fn start(State(state): State<AppState>, Json(req): Json<StartSyncRequest>) -> Response {
    let snapshot = state.sync_state.get_state().await;
    if snapshot.status != Status::Idle {
        return error(StatusCode::CONFLICT, "sync already running");
    }

    let existing = match state.sync_progress.load() {
        Ok(p) => p,
        Err(e) => return app_error_response(e.into()),
    };
    if let Some(progress) = existing {
        if progress.status != crate::models::SyncStatus::Idle {
            return Json(serde_json::json!({
                "resumable": true,
                "progress": progress_json(&progress),
            }))
            .into_response();
        }
    }

    let Some(sync_mode) = SyncMode::from_str(&req.sync_mode) else {
        return error(StatusCode::BAD_REQUEST, "invalid sync_mode");
    };

    let config = SyncWorkerConfig {
        username: req.username,
        batch_size: req.batch_size.max(1),
        sync_mode,
        folder_id: req.folder_id,
    };

    let worker = CatalogSyncWorker::new(
        state.discogs.clone(),
        state.albums.clone(),
        state.sync_logs.clone(),
        state.sync_progress.clone(),
        state.sync_state.clone(),
    );
    let ctx = CancellationToken::new();
    *state.sync_cancel.write().await = Some(ctx.clone());

    tokio::spawn(async move {
        if let Err(e) = worker.run(config, ctx).await {
            error!(error = %e, "sync worker exited with error");
        }
    });

    Json(serde_json::json!({ "started": true })).into_response()
}

/// `GET /sync/progress`: merges the persisted progress row with the live
/// rate-limiter readout (spec §6 exact field set).
pub async fn progress(State(state): State<AppState>) -> Response {
    let progress = match state.sync_progress.load() {
        Ok(p) => p,
        Err(e) => return app_error_response(e.into()),
    };

    let is_rate_limited = state.auth_limiter.is_limited().await || state.anon_limiter.is_limited().await;
    let rate_limit_retry_at = if is_rate_limited {
        let secs = state
            .auth_limiter
            .seconds_until_reset()
            .await
            .max(state.anon_limiter.seconds_until_reset().await);
        Some((chrono::Utc::now() + chrono::Duration::seconds(secs)).to_rfc3339())
    } else {
        None
    };

    let is_paused = state.sync_state.get_state().await.status == Status::Paused;
    let status = if is_rate_limited {
        "rate_limited".to_string()
    } else {
        progress
            .as_ref()
            .map(|p| p.status.as_str().to_string())
            .unwrap_or_else(|| "idle".to_string())
    };

    Json(serde_json::json!({
        "status": status,
        "current_page": progress.as_ref().map(|p| p.current_page).unwrap_or(0),
        "total_pages": serde_json::Value::Null,
        "processed": progress.as_ref().map(|p| p.processed).unwrap_or(0),
        "total": progress.as_ref().map(|p| p.total).unwrap_or(0),
        "sync_mode": progress.as_ref().map(|p| p.sync_mode.as_str()),
        "current_folder": progress.as_ref().map(|p| p.current_folder).unwrap_or(0),
        "folder_index": progress.as_ref().map(|p| p.folder_index).unwrap_or(0),
        "folders": progress.as_ref().map(|p| p.folders.clone()).unwrap_or_default(),
        "api_remaining": state.auth_limiter.remaining_auth().await,
        "anon_remaining": state.anon_limiter.remaining_anon().await,
        "is_paused": is_paused,
        "last_activity": progress.as_ref().map(|p| p.last_activity.to_rfc3339()),
        "is_rate_limited": is_rate_limited,
        "rate_limit_retry_at": rate_limit_retry_at,
        "rate_limit_message": is_rate_limited.then_some("rate limit threshold reached"),
    }))
    .into_response()
}

pub async fn pause(State(state): State<AppState>) -> Response {
    if !state.sync_state.request_pause().await {
        return error(StatusCode::CONFLICT, "sync is not running");
    }
    Json(serde_json::json!({ "ok": true })).into_response()
}

pub async fn resume(State(state): State<AppState>) -> Response {
    if !state.sync_state.request_resume().await {
        return error(StatusCode::CONFLICT, "sync is not paused");
    }
    Json(serde_json::json!({ "ok": true })).into_response()
}

pub async fn cancel(State(state): State<AppState>) -> Response {
    if !state.sync_state.request_cancel().await {
        return error(StatusCode::CONFLICT, "sync is not active");
    }
    if let Some(ctx) = state.sync_cancel.read().await.as_ref() {
        ctx.cancel();
    }
    Json(serde_json::json!({ "ok": true })).into_response()
}

/// `GET /sync/resume`: whether a leftover progress row can be resumed,
/// i.e. no active run in this process and the row isn't already idle.
pub async fn resumable(State(state): State<AppState>) -> Response {
    let progress = match state.sync_progress.load() {
        Ok(p) => p,
        Err(e) => return app_error_response(e.into()),
    };

    let no_active_run = state.sync_state.get_state().await.status == Status::Idle;
    let resumable = no_active_run
        && progress
            .as_ref()
            .is_some_and(|p| p.status != crate::models::SyncStatus::Idle);

    Json(serde_json::json!({
        "resumable": resumable,
        "progress": progress.as_ref().map(progress_json),
    }))
    .into_response()
}
