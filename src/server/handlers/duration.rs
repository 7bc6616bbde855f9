//! Duration resolver endpoint handlers: bulk start/progress/pause/resume/
//! cancel/resume-check, plus the review and manual-override surface.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::models::SyncStatus;
use crate::repository::duration::DurationResolverProgress;
use crate::resolver::DurationResolverWorker;
use crate::state::Status;

use super::super::{app_error_response, AppState};

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn worker(state: &AppState) -> DurationResolverWorker {
    DurationResolverWorker::new(
        (*state.providers).clone(),
        state.albums.clone(),
        state.durations.clone(),
        state.duration_progress.clone(),
        state.duration_state.clone(),
    )
}

fn progress_json(progress: &DurationResolverProgress) -> serde_json::Value {
    serde_json::json!({
        "status": progress.status.as_str(),
        "processed": progress.processed,
        "total": progress.total,
        "resolved": progress.resolved,
        "needs_review": progress.needs_review,
        "failed": progress.failed,
        "skipped": progress.skipped,
        "current_track_id": progress.current_track_id,
        "last_activity": progress.last_activity.to_rfc3339(),
    })
}

/// `POST /duration/start`: bulk-resolve every track with a zero duration.
pub async fn start(State(state): State<AppState>) -> Response {
    let snapshot = state.duration_state.get_state().await;
    if snapshot.status != Status::Idle {
        return error(StatusCode::CONFLICT, "duration resolver already running");
    }

    let existing = match state.duration_progress.load() {
        Ok(p) => p,
        Err(e) => return app_error_response(e.into()),
    };
    if let Some(progress) = existing {
        if progress.status != SyncStatus::Idle {
            return Json(serde_json::json!({
                "resumable": true,
                "progress": progress_json(&progress),
            }))
            .into_response();
        }
    }

    let resolver = worker(&state);
    let ctx = CancellationToken::new();
    *state.duration_cancel.write().await = Some(ctx.clone());

    tokio::spawn(async move {
        if let Err(e) = resolver.run_bulk(ctx).await {
            error!(error = %e, "duration resolver worker exited with error");
        }
    });

    Json(serde_json::json!({ "started": true })).into_response()
}

pub async fn progress(State(state): State<AppState>) -> Response {
    let progress = match state.duration_progress.load() {
        Ok(p) => p,
        Err(e) => return app_error_response(e.into()),
    };
    let is_paused = state.duration_state.get_state().await.status == Status::Paused;

    Json(serde_json::json!({
        "status": progress.as_ref().map(|p| p.status.as_str()).unwrap_or("idle"),
        "processed": progress.as_ref().map(|p| p.processed).unwrap_or(0),
        "total": progress.as_ref().map(|p| p.total).unwrap_or(0),
        "resolved": progress.as_ref().map(|p| p.resolved).unwrap_or(0),
        "needs_review": progress.as_ref().map(|p| p.needs_review).unwrap_or(0),
        "failed": progress.as_ref().map(|p| p.failed).unwrap_or(0),
        "skipped": progress.as_ref().map(|p| p.skipped).unwrap_or(0),
        "current_track_id": progress.as_ref().and_then(|p| p.current_track_id.clone()),
        "is_paused": is_paused,
        "last_activity": progress.as_ref().map(|p| p.last_activity.to_rfc3339()),
    }))
    .into_response()
}

pub async fn pause(State(state): State<AppState>) -> Response {
    if !state.duration_state.request_pause().await {
        return error(StatusCode::CONFLICT, "duration resolver is not running");
    }
    Json(serde_json::json!({ "ok": true })).into_response()
}

pub async fn resume(State(state): State<AppState>) -> Response {
    if !state.duration_state.request_resume().await {
        return error(StatusCode::CONFLICT, "duration resolver is not paused");
    }
    Json(serde_json::json!({ "ok": true })).into_response()
}

pub async fn cancel(State(state): State<AppState>) -> Response {
    if !state.duration_state.request_cancel().await {
        return error(StatusCode::CONFLICT, "duration resolver is not active");
    }
    if let Some(ctx) = state.duration_cancel.read().await.as_ref() {
        ctx.cancel();
    }
    Json(serde_json::json!({ "ok": true })).into_response()
}

pub async fn resumable(State(state): State<AppState>) -> Response {
    let progress = match state.duration_progress.load() {
        Ok(p) => p,
        Err(e) => return app_error_response(e.into()),
    };

    let no_active_run = state.duration_state.get_state().await.status == Status::Idle;
    let resumable = no_active_run && progress.as_ref().is_some_and(|p| p.status != SyncStatus::Idle);

    Json(serde_json::json!({
        "resumable": resumable,
        "progress": progress.as_ref().map(progress_json),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub action: String,
    pub duration: Option<i32>,
    pub notes: Option<String>,
}

/// `POST /duration/review/:id {action: "apply"|"reject"|"manual", duration?, notes?}`.
pub async fn review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> Response {
    let resolver = worker(&state);

    let result = match req.action.as_str() {
        "apply" => resolver.approve_review(&id, req.duration, req.notes),
        "reject" => resolver.reject_review(&id, req.notes),
        "manual" => {
            let Some(duration) = req.duration else {
                return error(StatusCode::BAD_REQUEST, "manual review requires duration");
            };
            let resolution = match state.durations.get(&id) {
                Ok(Some(r)) => r,
                Ok(None) => return error(StatusCode::NOT_FOUND, "resolution not found"),
                Err(e) => return app_error_response(e.into()),
            };
            resolver.manual_override(&resolution.track_id, duration, None, req.notes)
        }
        other => return error(StatusCode::BAD_REQUEST, format!("unknown action: {other}")),
    };

    match result {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => app_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ManualOverrideRequest {
    pub duration: i32,
    pub notes: Option<String>,
}

/// `POST /duration/track/:id/manual {duration, notes?}`.
pub async fn manual(
    State(state): State<AppState>,
    Path(track_id): Path<String>,
    Json(req): Json<ManualOverrideRequest>,
) -> Response {
    let resolver = worker(&state);
    match resolver.manual_override(&track_id, req.duration, None, req.notes) {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => app_error_response(e),
    }
}
