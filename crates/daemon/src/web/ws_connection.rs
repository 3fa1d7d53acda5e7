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

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use aln_common::DeviceType;
use aln_rpc_common::{ClientFrame, Envelope, ErrorCode, ServerEvent};

use crate::commands::{self, CommandContext};
use crate::fabric::rooms::RoomRegistry;
use crate::fabric::sync;
use crate::offline::OfflineQueue;
use crate::sessions::EngineHandle;
use crate::video::VideoHandle;

/// Offline drains larger than the protocol cap are refused outright.
const MAX_BATCH: usize = 100;

/// One attached socket: the inbound frame dispatcher and the outbound room
/// pump, in a single select loop.
pub struct WsConnection {
    pub client_id: Uuid,
    pub device_id: String,
    pub device_type: DeviceType,
    pub teams: Vec<String>,
    pub reconnection: bool,
    pub engine: EngineHandle,
    pub video: VideoHandle,
    pub registry: Arc<RoomRegistry>,
    pub offline: Arc<OfflineQueue>,
}

impl WsConnection {
    pub async fn handle(self, stream: WebSocket) {
        info!(device_id = self.device_id, "Socket attached");
        let (mut ws_sender, mut ws_receiver) = stream.split();

        let outbound =
            self.registry
                .register(self.client_id, &self.device_id, self.device_type);

        let session_id = match self.engine.snapshot(None).await {
            Ok(snapshot) => snapshot.session.map(|s| s.id),
            Err(_) => None,
        };

        // Join order is fixed; see the registry.
        match self.device_type {
            DeviceType::Gm => {
                self.registry.join_gm_rooms(
                    self.client_id,
                    &self.device_id,
                    &self.teams,
                    session_id,
                );
            }
            DeviceType::Player => {
                self.registry
                    .join_player_rooms(self.client_id, &self.device_id, session_id);
            }
        }

        if self.device_type == DeviceType::Gm {
            let identified = ServerEvent::GmIdentified {
                device_id: self.device_id.clone(),
                session_id,
            };
            if !Self::emit_event(&mut ws_sender, &identified).await {
                self.teardown();
                return;
            }
            let sync = self.compose_sync(self.reconnection).await;
            if !Self::emit_event(&mut ws_sender, &ServerEvent::SyncFull(sync)).await {
                self.teardown();
                return;
            }
        }

        debug!(client_id = ?self.client_id, "Entering frame dispatch loop");
        loop {
            tokio::select! {
                frame = ws_receiver.next() => {
                    let Some(Ok(message)) = frame else {
                        info!(device_id = self.device_id, "Connection closed");
                        break;
                    };
                    match message {
                        Message::Text(text) => {
                            if !self.process_frame(text.as_str(), &mut ws_sender).await {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                envelope = outbound.recv_async() => {
                    // The sending side disappears when the fabric cleans up.
                    let Ok(envelope) = envelope else { break };
                    if ws_sender
                        .send(Message::Text(envelope.to_json().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
        self.teardown();
    }

    fn teardown(&self) {
        self.registry.remove(self.client_id);
        self.engine.mark_device_disconnected(self.device_id.clone());
    }

    /// Dispatch one inbound frame. Returns false to close the connection.
    async fn process_frame(
        &self,
        text: &str,
        ws_sender: &mut SplitSink<WebSocket, Message>,
    ) -> bool {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = ?e, "Unparseable frame");
                return Self::emit_event(
                    ws_sender,
                    &ServerEvent::Error {
                        service: "socket".to_string(),
                        code: ErrorCode::ValidationError,
                        message: "unparseable frame".to_string(),
                    },
                )
                .await;
            }
        };

        match frame {
            ClientFrame::Heartbeat => {
                self.engine.heartbeat(self.device_id.clone());
                let status = sync::system_status(&self.video.status().await);
                Self::emit_event(ws_sender, &ServerEvent::HeartbeatAck(status)).await
            }
            ClientFrame::SyncRequest => {
                let payload = self.compose_sync(false).await;
                Self::emit_event(ws_sender, &ServerEvent::SyncFull(payload)).await
            }
            ClientFrame::StateRequest => {
                let snapshot = match self.engine.snapshot(None).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => return self.emit_engine_error(ws_sender, e).await,
                };
                let video = self.video.status().await;
                Self::emit_event(
                    ws_sender,
                    &ServerEvent::StateSync(sync::state_snapshot(snapshot, video)),
                )
                .await
            }
            ClientFrame::TransactionSubmit(submit) => {
                if self.device_type != DeviceType::Gm {
                    return self.emit_auth_required(ws_sender).await;
                }
                match self.engine.process_scan(submit).await {
                    // The transaction fan-out carries the outcome.
                    Ok(_) => true,
                    Err(e) => self.emit_engine_error(ws_sender, e).await,
                }
            }
            ClientFrame::TransactionBatch { transactions } => {
                if self.device_type != DeviceType::Gm {
                    return self.emit_auth_required(ws_sender).await;
                }
                if transactions.len() > MAX_BATCH {
                    return Self::emit_event(
                        ws_sender,
                        &ServerEvent::Error {
                            service: "session".to_string(),
                            code: ErrorCode::QueueFull,
                            message: format!("batch exceeds {MAX_BATCH} entries"),
                        },
                    )
                    .await;
                }
                // An empty drain is a no-op and emits nothing.
                if transactions.is_empty() {
                    return true;
                }
                let outcome = match self.engine.process_batch(transactions).await {
                    Ok(outcome) => outcome,
                    Err(e) => return self.emit_engine_error(ws_sender, e).await,
                };
                info!(
                    device_id = self.device_id,
                    processed = outcome.processed,
                    failed = outcome.failed,
                    "Offline queue drained"
                );
                if !Self::emit_event(
                    ws_sender,
                    &ServerEvent::QueueProcessed {
                        processed: outcome.processed,
                        failed: outcome.failed,
                    },
                )
                .await
                {
                    return false;
                }
                if outcome.processed > 0 {
                    // Erase any drift with a fresh snapshot.
                    let payload = self.compose_sync(true).await;
                    return Self::emit_event(ws_sender, &ServerEvent::SyncFull(payload)).await;
                }
                true
            }
            ClientFrame::GmCommand(action) => {
                let ctx = CommandContext {
                    engine: self.engine.clone(),
                    video: self.video.clone(),
                    offline: self.offline.clone(),
                };
                let event = commands::dispatch(action, self.device_type, &ctx).await;
                Self::emit_event(ws_sender, &event).await
            }
            ClientFrame::Disconnect => false,
        }
    }

    async fn compose_sync(&self, reconnection: bool) -> aln_rpc_common::SyncFullPayload {
        let snapshot = self
            .engine
            .snapshot(Some(self.device_id.clone()))
            .await
            .unwrap_or_else(|_| crate::sessions::EngineSnapshot {
                session: None,
                scores: Vec::new(),
                recent_transactions: Vec::new(),
                devices: Vec::new(),
                environment: Default::default(),
                device_scanned_tokens: Vec::new(),
            });
        let video = self.video.status().await;
        sync::sync_full(snapshot, video, reconnection)
    }

    async fn emit_auth_required(&self, ws_sender: &mut SplitSink<WebSocket, Message>) -> bool {
        Self::emit_event(
            ws_sender,
            &ServerEvent::Error {
                service: "session".to_string(),
                code: ErrorCode::AuthRequired,
                message: "only GM devices may submit transactions".to_string(),
            },
        )
        .await
    }

    async fn emit_engine_error(
        &self,
        ws_sender: &mut SplitSink<WebSocket, Message>,
        e: crate::sessions::EngineError,
    ) -> bool {
        Self::emit_event(
            ws_sender,
            &ServerEvent::Error {
                service: "session".to_string(),
                code: e.error_code(),
                message: e.to_string(),
            },
        )
        .await
    }

    /// Serialize an event into the wrapped frame and push it down the socket.
    async fn emit_event(
        ws_sender: &mut SplitSink<WebSocket, Message>,
        event: &ServerEvent,
    ) -> bool {
        let envelope = Envelope::wrap(event);
        if ws_sender
            .send(Message::Text(envelope.to_json().into()))
            .await
            .is_err()
        {
            warn!(event = envelope.event, "Unable to send frame to client");
            return false;
        }
        true
    }
}
