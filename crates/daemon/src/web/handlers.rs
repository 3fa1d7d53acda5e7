// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use aln_rpc_common::{AuthToken, ErrorBody, ErrorCode, TransactionSubmit};

use crate::fabric::sync;
use crate::offline::{OfflineEntryKind, OfflineQueueEntry};
use crate::sessions::EngineError;
use crate::video::{EnqueuePolicy, VideoControl, VideoError};
use crate::web::WebHost;

fn error_response(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(code, message))).into_response()
}

fn engine_error_response(e: EngineError) -> Response {
    let status = match &e {
        EngineError::NoSession | EngineError::SessionPaused | EngineError::SessionExists => {
            StatusCode::CONFLICT
        }
        EngineError::TransactionNotFound => StatusCode::NOT_FOUND,
        EngineError::DeviceCollision(_) => StatusCode::CONFLICT,
        EngineError::Terminated => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.error_code(), e.to_string())
}

/// Pull and validate the bearer token from the `Authorization` header.
fn require_bearer(host: &WebHost, headers: &HeaderMap) -> Result<(), Response> {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            ErrorCode::AuthRequired,
            "missing Authorization header",
        ));
    };
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| AuthToken(t.to_string()));
    let Some(token) = token else {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            ErrorCode::AuthRequired,
            "expected a bearer token",
        ));
    };
    host.auth.validate(&token).map_err(|code| {
        error_response(StatusCode::UNAUTHORIZED, code, "bearer token rejected")
    })
}

#[derive(Deserialize)]
pub struct AdminAuthRequest {
    password: String,
}

/// Exchange the shared admin password for a bearer token.
pub async fn admin_auth_handler(
    State(host): State<WebHost>,
    Json(request): Json<AdminAuthRequest>,
) -> Response {
    if !host.auth.check_password(&request.password) {
        warn!("Admin auth failed");
        return error_response(
            StatusCode::UNAUTHORIZED,
            ErrorCode::AuthInvalid,
            "bad password",
        );
    }
    let token = host.auth.mint();
    Json(json!({"token": token.0})).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    token_id: String,
    device_id: String,
    #[serde(default)]
    team_id: Option<String>,
}

/// Player-scanner ingress: fire-and-forget. Never touches scores; its only
/// game-visible effect is a video enqueue, which fails fast on conflict.
pub async fn scan_handler(State(host): State<WebHost>, Json(scan): Json<ScanRequest>) -> Response {
    if scan.token_id.is_empty() || scan.device_id.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::ValidationError,
            "tokenId and deviceId are required",
        );
    }

    let Some(token) = host.catalog.get(&scan.token_id).cloned() else {
        return error_response(
            StatusCode::NOT_FOUND,
            ErrorCode::ValidationError,
            format!("unknown token: {}", scan.token_id),
        );
    };

    let session_active = match host.engine.snapshot(None).await {
        Ok(snapshot) => snapshot.session.is_some(),
        Err(e) => return engine_error_response(e),
    };

    if !session_active {
        // Park it: the scan becomes a log entry once a session starts.
        let entry = OfflineQueueEntry {
            kind: OfflineEntryKind::PlayerScanLog,
            token_id: scan.token_id.clone(),
            device_id: scan.device_id.clone(),
            team_id: scan.team_id.clone(),
            client_timestamp: Utc::now(),
        };
        return match host.offline.push(entry) {
            Ok(_) => (
                StatusCode::ACCEPTED,
                Json(json!({"status": "queued", "queued": true, "offlineMode": true})),
            )
                .into_response(),
            Err(_) => error_response(
                StatusCode::CONFLICT,
                ErrorCode::QueueFull,
                "offline queue is full",
            ),
        };
    }

    let Some(video_path) = token.video_path().map(str::to_string) else {
        return Json(json!({
            "status": "accepted",
            "tokenId": token.id,
            "mediaAssets": token.media_assets,
        }))
        .into_response();
    };

    match host
        .video
        .enqueue(
            Some(scan.token_id.clone()),
            video_path,
            scan.device_id.clone(),
            EnqueuePolicy::RejectIfBusy,
        )
        .await
    {
        Ok(_) => {
            let status = host.video.status().await;
            Json(json!({
                "status": "accepted",
                "tokenId": token.id,
                "mediaAssets": token.media_assets,
                "videoQueued": true,
                "degraded": status.degraded,
            }))
            .into_response()
        }
        Err(VideoError::Busy { wait_time }) => (
            StatusCode::CONFLICT,
            Json(json!({
                "status": "rejected",
                "message": "Video playing",
                "waitTime": wait_time,
            })),
        )
            .into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            e.error_code(),
            e.to_string(),
        ),
    }
}

/// HTTP fallback for GM transactions; same decision path as the socket frame.
pub async fn transaction_submit_handler(
    State(host): State<WebHost>,
    headers: HeaderMap,
    Json(submit): Json<TransactionSubmit>,
) -> Response {
    if let Err(response) = require_bearer(&host, &headers) {
        return response;
    }
    if submit.token_id.is_empty() || submit.team_id.is_empty() || submit.device_id.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::ValidationError,
            "tokenId, teamId and deviceId are required",
        );
    }
    match host.engine.process_scan(submit).await {
        Ok(outcome) => Json(json!({
            "status": outcome.transaction.status,
            "points": outcome.transaction.points,
            "transactionId": outcome.transaction.id,
        }))
        .into_response(),
        Err(e) => engine_error_response(e),
    }
}

#[derive(Deserialize)]
pub struct SessionCreateRequest {
    name: String,
    teams: Vec<String>,
}

pub async fn session_create_handler(
    State(host): State<WebHost>,
    headers: HeaderMap,
    Json(request): Json<SessionCreateRequest>,
) -> Response {
    if let Err(response) = require_bearer(&host, &headers) {
        return response;
    }
    if request.name.trim().is_empty() || request.teams.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::ValidationError,
            "session needs a name and at least one team",
        );
    }
    match host.engine.create_session(request.name, request.teams).await {
        Ok(session) => {
            for entry in host.offline.drain() {
                info!(
                    token_id = entry.token_id,
                    device_id = entry.device_id,
                    "Replaying parked player scan"
                );
            }
            (StatusCode::CREATED, Json(session)).into_response()
        }
        Err(e) => engine_error_response(e),
    }
}

#[derive(Deserialize)]
pub struct SessionUpdateRequest {
    status: String,
}

pub async fn session_update_handler(
    State(host): State<WebHost>,
    headers: HeaderMap,
    Json(request): Json<SessionUpdateRequest>,
) -> Response {
    if let Err(response) = require_bearer(&host, &headers) {
        return response;
    }
    let result = match request.status.as_str() {
        "paused" => host.engine.pause_session().await,
        "active" => host.engine.resume_session().await,
        "ended" => host.engine.end_session().await,
        other => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorCode::ValidationError,
                format!("unknown session status: {other}"),
            );
        }
    };
    match result {
        Ok(session) => Json(session).into_response(),
        Err(e) => engine_error_response(e),
    }
}

/// Full state snapshot, same shape as the `state:sync` frame payload.
pub async fn state_handler(State(host): State<WebHost>) -> Response {
    match host.engine.snapshot(None).await {
        Ok(snapshot) => {
            let video = host.video.status().await;
            Json(sync::state_snapshot(snapshot, video)).into_response()
        }
        Err(e) => engine_error_response(e),
    }
}

pub async fn tokens_handler(State(host): State<WebHost>) -> Response {
    let mut tokens: Vec<_> = host.catalog.iter().cloned().collect();
    tokens.sort_by(|a, b| a.id.cmp(&b.id));
    Json(json!({"tokens": tokens, "count": tokens.len()})).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoControlRequest {
    command: String,
    #[serde(default)]
    token_id: Option<String>,
}

pub async fn video_control_handler(
    State(host): State<WebHost>,
    headers: HeaderMap,
    Json(request): Json<VideoControlRequest>,
) -> Response {
    if let Err(response) = require_bearer(&host, &headers) {
        return response;
    }
    let control = match VideoControl::parse(&request.command, request.token_id) {
        Ok(control) => control,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, e.error_code(), e.to_string());
        }
    };
    match host.video.control(control).await {
        Ok(status) => Json(json!({
            "success": true,
            "currentStatus": status.status,
            "degraded": status.degraded,
        }))
        .into_response(),
        Err(e) => {
            let status = host.video.status().await;
            Json(json!({
                "success": false,
                "currentStatus": status.status,
                "degraded": status.degraded,
                "message": e.to_string(),
            }))
            .into_response()
        }
    }
}

pub async fn health_handler(State(host): State<WebHost>) -> Response {
    let uptime = (Utc::now() - host.started_at).num_seconds();
    Json(json!({"status": "online", "uptimeSeconds": uptime, "timestamp": Utc::now()}))
        .into_response()
}

/// Coarse subsystem booleans for dashboards.
pub async fn status_handler(State(host): State<WebHost>) -> Response {
    let video = host.video.status().await;
    let session = host
        .engine
        .snapshot(None)
        .await
        .map(|s| s.session.is_some())
        .unwrap_or(false);
    Json(json!({
        "orchestrator": "online",
        "vlc": !video.degraded,
        "session": session,
    }))
    .into_response()
}
