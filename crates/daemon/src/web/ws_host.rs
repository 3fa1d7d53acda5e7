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

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::{info, warn};
use uuid::Uuid;

use aln_common::{DeviceConnection, DeviceType};
use aln_rpc_common::{AuthToken, ErrorBody, ErrorCode};

use crate::sessions::EngineError;
use crate::web::ws_connection::WsConnection;
use crate::web::WebHost;

/// Socket handshake fields, carried on the upgrade request's query string.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeQuery {
    #[serde(default)]
    pub token: Option<String>,
    pub device_id: String,
    pub device_type: DeviceType,
    #[serde(default)]
    pub version: Option<String>,
    /// Comma-separated team ids this station elects to follow.
    #[serde(default)]
    pub teams: Option<String>,
}

fn reject(status: StatusCode, code: ErrorCode, message: &str) -> Response {
    (status, Json(ErrorBody::new(code, message))).into_response()
}

/// WebSocket attach. GM sockets are authenticated here, before the upgrade
/// completes; a bad token never produces a connected socket. Device-id
/// collisions with a currently connected device are refused; reconnection of
/// a disconnected id is normal.
pub async fn ws_attach_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(host): State<WebHost>,
    Query(handshake): Query<HandshakeQuery>,
) -> Response {
    if host.fabric.ensure_accepting().is_err() {
        return reject(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError,
            "not accepting connections",
        );
    }
    if handshake.device_id.is_empty() {
        return reject(
            StatusCode::BAD_REQUEST,
            ErrorCode::ValidationError,
            "deviceId is required",
        );
    }

    if handshake.device_type == DeviceType::Gm {
        let Some(token) = handshake.token.clone() else {
            warn!(device_id = handshake.device_id, "GM handshake without token");
            return reject(
                StatusCode::UNAUTHORIZED,
                ErrorCode::AuthRequired,
                "GM connections require a token",
            );
        };
        if let Err(code) = host.auth.validate(&AuthToken(token)) {
            warn!(device_id = handshake.device_id, "GM handshake with bad token");
            return reject(StatusCode::UNAUTHORIZED, code, "token rejected");
        }
    }

    let device = DeviceConnection::new(
        &handshake.device_id,
        handshake.device_type,
        Some(addr.ip().to_string()),
    );
    let reconnection = match host.engine.register_device(device).await {
        Ok(reconnection) => reconnection,
        Err(EngineError::DeviceCollision(device_id)) => {
            warn!(device_id, "Device id collision on handshake");
            return reject(
                StatusCode::CONFLICT,
                ErrorCode::DeviceIdCollision,
                "device id is already connected",
            );
        }
        Err(e) => {
            return reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.error_code(),
                &e.to_string(),
            );
        }
    };

    let teams: Vec<String> = handshake
        .teams
        .as_deref()
        .map(|csv| {
            csv.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    info!(
        device_id = handshake.device_id,
        device_type = ?handshake.device_type,
        version = ?handshake.version,
        peer = %addr,
        reconnection,
        "Socket handshake accepted"
    );

    let connection = WsConnection {
        client_id: Uuid::new_v4(),
        device_id: handshake.device_id,
        device_type: handshake.device_type,
        teams,
        reconnection,
        engine: host.engine.clone(),
        video: host.video.clone(),
        registry: host.fabric.registry(),
        offline: host.offline.clone(),
    };

    ws.on_upgrade(move |socket| async move { connection.handle(socket).await })
}
