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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aln_common::{DeviceConnection, Session, TeamScore, Transaction};

use crate::ErrorCode;

/// Fan-out scoping primitive. Every server event is published to exactly one
/// room; sockets receive what their memberships admit.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Room {
    /// Every connected socket. Session create/update only.
    Global,
    /// All authenticated GM sockets.
    Gm,
    /// All sockets attached to one session.
    Session(Uuid),
    /// Exactly one socket.
    Device(String),
    /// Sockets electively following a team.
    Team(String),
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Room::Global => f.write_str("global"),
            Room::Gm => f.write_str("gm"),
            Room::Session(id) => write!(f, "session:{id}"),
            Room::Device(id) => write!(f, "device:{id}"),
            Room::Team(id) => write!(f, "team:{id}"),
        }
    }
}

/// The one shape every server-originated frame takes:
/// `{event, data, timestamp}`. `Envelope::wrap` is the only constructor, so a
/// frame without a timestamp cannot be built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn wrap(event: &ServerEvent) -> Self {
        Self {
            event: event.name().to_string(),
            data: event.data(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Envelope serialization cannot fail")
    }
}

/// Coarse subsystem health, carried in heartbeat acks and full syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub orchestrator: String,
    pub vlc: bool,
}

/// Venue environment snapshot. Defaults are reported when the corresponding
/// controls are unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSnapshot {
    pub bluetooth: bool,
    pub audio: bool,
    pub lighting: bool,
}

impl Default for EnvironmentSnapshot {
    fn default() -> Self {
        Self {
            bluetooth: false,
            audio: true,
            lighting: true,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoWireStatus {
    Loading,
    Started,
    Paused,
    Resumed,
    Completed,
    Failed,
    Idle,
}

/// The unified `video:status` payload; `status` is the discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatusPayload {
    pub status: VideoWireStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
    pub queue_length: usize,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_end_time: Option<DateTime<Utc>>,
}

impl VideoStatusPayload {
    pub fn idle() -> Self {
        Self {
            status: VideoWireStatus::Idle,
            token_id: None,
            video_path: None,
            queue_length: 0,
            degraded: false,
            expected_end_time: None,
        }
    }
}

/// The full state snapshot served by `GET /api/state` and the `state:sync`
/// frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub session: Option<Session>,
    pub scores: Vec<TeamScore>,
    pub recent_transactions: Vec<Transaction>,
    pub video_status: VideoStatusPayload,
    pub devices: Vec<DeviceConnection>,
    pub system_status: SystemStatus,
}

/// The reconciliation snapshot sent on GM identify and after an offline
/// drain. `device_scanned_tokens` is scoped to the receiving device only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFullPayload {
    pub session: Option<Session>,
    pub scores: Vec<TeamScore>,
    pub recent_transactions: Vec<Transaction>,
    pub video_status: VideoStatusPayload,
    pub devices: Vec<DeviceConnection>,
    pub system_status: SystemStatus,
    pub device_scanned_tokens: Vec<String>,
    pub reconnection: bool,
    pub environment: EnvironmentSnapshot,
}

/// Every event the orchestrator can send down a socket, with its typed
/// payload. `name()` is the wire event name; `data()` the payload as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Session create and update share one wire event; clients diff.
    SessionUpdate(Session),
    TransactionNew {
        transaction: Transaction,
    },
    ScoreUpdated(TeamScore),
    GroupCompleted {
        team_id: String,
        group: String,
        bonus_points: i64,
        completed_at: DateTime<Utc>,
    },
    ScoresReset {
        teams: Vec<String>,
    },
    StateSync(StateSnapshot),
    StateUpdate(serde_json::Value),
    SyncFull(SyncFullPayload),
    VideoStatus(VideoStatusPayload),
    DeviceConnected(DeviceConnection),
    DeviceDisconnected {
        device_id: String,
    },
    GmIdentified {
        device_id: String,
        session_id: Option<Uuid>,
    },
    GmCommandAck {
        action: String,
        success: bool,
        message: Option<String>,
    },
    HeartbeatAck(SystemStatus),
    QueueProcessed {
        processed: usize,
        failed: usize,
    },
    Error {
        service: String,
        code: ErrorCode,
        message: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::SessionUpdate(_) => "session:update",
            ServerEvent::TransactionNew { .. } => "transaction:new",
            ServerEvent::ScoreUpdated(_) => "score:updated",
            ServerEvent::GroupCompleted { .. } => "group:completed",
            ServerEvent::ScoresReset { .. } => "scores:reset",
            ServerEvent::StateSync(_) => "state:sync",
            ServerEvent::StateUpdate(_) => "state:update",
            ServerEvent::SyncFull(_) => "sync:full",
            ServerEvent::VideoStatus(_) => "video:status",
            ServerEvent::DeviceConnected(_) => "device:connected",
            ServerEvent::DeviceDisconnected { .. } => "device:disconnected",
            ServerEvent::GmIdentified { .. } => "gm:identified",
            ServerEvent::GmCommandAck { .. } => "gm:command:ack",
            ServerEvent::HeartbeatAck(_) => "heartbeat:ack",
            ServerEvent::QueueProcessed { .. } => "queue:processed",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn data(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            ServerEvent::SessionUpdate(session) => {
                serde_json::to_value(session).expect("serialize session")
            }
            ServerEvent::TransactionNew { transaction } => json!({"transaction": transaction}),
            ServerEvent::ScoreUpdated(score) => serde_json::to_value(score).expect("serialize score"),
            ServerEvent::GroupCompleted {
                team_id,
                group,
                bonus_points,
                completed_at,
            } => json!({
                "teamId": team_id,
                "group": group,
                "bonusPoints": bonus_points,
                "completedAt": completed_at,
            }),
            ServerEvent::ScoresReset { teams } => json!({"teams": teams}),
            ServerEvent::StateSync(snapshot) => {
                serde_json::to_value(snapshot).expect("serialize snapshot")
            }
            ServerEvent::StateUpdate(delta) => delta.clone(),
            ServerEvent::SyncFull(payload) => {
                serde_json::to_value(payload).expect("serialize sync payload")
            }
            ServerEvent::VideoStatus(payload) => {
                serde_json::to_value(payload).expect("serialize video status")
            }
            ServerEvent::DeviceConnected(device) => {
                serde_json::to_value(device).expect("serialize device")
            }
            ServerEvent::DeviceDisconnected { device_id } => json!({"deviceId": device_id}),
            ServerEvent::GmIdentified {
                device_id,
                session_id,
            } => json!({"deviceId": device_id, "sessionId": session_id}),
            ServerEvent::GmCommandAck {
                action,
                success,
                message,
            } => json!({"action": action, "success": success, "message": message}),
            ServerEvent::HeartbeatAck(status) => {
                serde_json::to_value(status).expect("serialize system status")
            }
            ServerEvent::QueueProcessed { processed, failed } => {
                json!({"processed": processed, "failed": failed})
            }
            ServerEvent::Error {
                service,
                code,
                message,
            } => json!({"service": service, "code": code, "message": message}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_envelope_has_event_data_timestamp() {
        let event = ServerEvent::DeviceDisconnected {
            device_id: "GM_A".to_string(),
        };
        let envelope = Envelope::wrap(&event);
        let v: serde_json::Value = serde_json::from_str(&envelope.to_json()).unwrap();
        assert_eq!(v["event"], "device:disconnected");
        assert_eq!(v["data"]["deviceId"], "GM_A");
        // RFC3339 UTC; chrono's serde emits the `T` separator and offset.
        let ts = v["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn room_names_match_wire_format() {
        let id = Uuid::nil();
        assert_eq!(Room::Gm.to_string(), "gm");
        assert_eq!(
            Room::Session(id).to_string(),
            format!("session:{id}")
        );
        assert_eq!(Room::Device("GM_A".into()).to_string(), "device:GM_A");
        assert_eq!(Room::Team("001".into()).to_string(), "team:001");
    }

    #[test]
    fn group_completed_payload_shape() {
        let now = Utc::now();
        let event = ServerEvent::GroupCompleted {
            team_id: "002".to_string(),
            group: "Marcus Sucks".to_string(),
            bonus_points: 7000,
            completed_at: now,
        };
        let data = event.data();
        assert_eq!(data["teamId"], "002");
        assert_eq!(data["group"], "Marcus Sucks");
        assert_eq!(data["bonusPoints"], 7000);
    }

    #[test]
    fn transaction_new_nests_transaction() {
        use aln_common::{ScanMode, Transaction, TransactionStatus};
        let tx = Transaction {
            id: Uuid::new_v4(),
            token_id: "jaw001".into(),
            team_id: "001".into(),
            device_id: "GM_A".into(),
            mode: ScanMode::Blackmarket,
            status: TransactionStatus::Accepted,
            points: 500,
            timestamp: Utc::now(),
            session_id: Uuid::new_v4(),
            rejection_reason: None,
        };
        let data = ServerEvent::TransactionNew { transaction: tx }.data();
        assert_eq!(data["transaction"]["deviceId"], "GM_A");
        assert!(data["transaction"].get("scannerId").is_none());
    }
}
