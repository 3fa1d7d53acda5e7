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

use aln_common::{DeviceType, ScanMode};

/// Handshake fields a socket must present before it is accepted. GM sockets
/// without a valid admin token are rejected at handshake, never later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAuth {
    #[serde(default)]
    pub token: Option<String>,
    pub device_id: String,
    pub device_type: DeviceType,
    #[serde(default)]
    pub version: Option<String>,
}

/// One GM scan intent. `client_timestamp` is stamped by the scanner at scan
/// time so drained offline submissions keep their original order and moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSubmit {
    pub token_id: String,
    pub team_id: String,
    pub device_id: String,
    pub mode: ScanMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_timestamp: Option<DateTime<Utc>>,
}

/// The closed verb set of the admin/GM command plane. Dispatched from the
/// `gm:command` frame's `action` field; every action is acked with
/// `gm:command:ack {action, success, message?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload")]
pub enum GmAction {
    #[serde(rename = "session:create", rename_all = "camelCase")]
    SessionCreate { name: String, teams: Vec<String> },
    #[serde(rename = "session:pause")]
    SessionPause,
    #[serde(rename = "session:resume")]
    SessionResume,
    #[serde(rename = "session:end")]
    SessionEnd,
    #[serde(rename = "transaction:delete", rename_all = "camelCase")]
    TransactionDelete { tx_id: Uuid },
    #[serde(rename = "score:adjust", rename_all = "camelCase")]
    ScoreAdjust {
        team_id: String,
        delta: i64,
        reason: String,
    },
    #[serde(rename = "scores:reset")]
    ScoresReset {
        #[serde(default)]
        teams: Option<Vec<String>>,
    },
    #[serde(rename = "video:play", rename_all = "camelCase")]
    VideoPlay {
        #[serde(default)]
        token_id: Option<String>,
    },
    #[serde(rename = "video:pause")]
    VideoPause,
    #[serde(rename = "video:resume")]
    VideoResume,
    #[serde(rename = "video:stop")]
    VideoStop,
    #[serde(rename = "video:skip")]
    VideoSkip,
    #[serde(rename = "video:queue:add", rename_all = "camelCase")]
    VideoQueueAdd { video_path: String },
    #[serde(rename = "video:queue:reorder")]
    VideoQueueReorder { order: Vec<Uuid> },
    #[serde(rename = "video:queue:clear")]
    VideoQueueClear,
    #[serde(rename = "device:reset", rename_all = "camelCase")]
    DeviceReset { device_id: String },
    /// Venue environment controls. Absent hardware degrades to a stored
    /// snapshot; the ack still succeeds.
    #[serde(rename = "environment:set")]
    EnvironmentSet {
        #[serde(default)]
        bluetooth: Option<bool>,
        #[serde(default)]
        audio: Option<bool>,
        #[serde(default)]
        lighting: Option<bool>,
    },
}

impl GmAction {
    /// The wire name echoed back in the ack.
    pub fn action_name(&self) -> &'static str {
        match self {
            GmAction::SessionCreate { .. } => "session:create",
            GmAction::SessionPause => "session:pause",
            GmAction::SessionResume => "session:resume",
            GmAction::SessionEnd => "session:end",
            GmAction::TransactionDelete { .. } => "transaction:delete",
            GmAction::ScoreAdjust { .. } => "score:adjust",
            GmAction::ScoresReset { .. } => "scores:reset",
            GmAction::VideoPlay { .. } => "video:play",
            GmAction::VideoPause => "video:pause",
            GmAction::VideoResume => "video:resume",
            GmAction::VideoStop => "video:stop",
            GmAction::VideoSkip => "video:skip",
            GmAction::VideoQueueAdd { .. } => "video:queue:add",
            GmAction::VideoQueueReorder { .. } => "video:queue:reorder",
            GmAction::VideoQueueClear => "video:queue:clear",
            GmAction::DeviceReset { .. } => "device:reset",
            GmAction::EnvironmentSet { .. } => "environment:set",
        }
    }
}

/// Every frame a client may send. Inbound frames mirror the outbound envelope
/// shape minus the timestamp: `{event, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "sync:request")]
    SyncRequest,
    #[serde(rename = "state:request")]
    StateRequest,
    #[serde(rename = "transaction:submit")]
    TransactionSubmit(TransactionSubmit),
    /// Offline drain: queued intents in FIFO order, at most 100.
    #[serde(rename = "transaction:batch")]
    TransactionBatch { transactions: Vec<TransactionSubmit> },
    #[serde(rename = "gm:command")]
    GmCommand(GmAction),
    #[serde(rename = "disconnect")]
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_transaction_submit_frame() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"event": "transaction:submit",
                "data": {"tokenId": "jaw001", "teamId": "001",
                         "deviceId": "GM_A", "mode": "blackmarket"}}"#,
        )
        .unwrap();
        let ClientFrame::TransactionSubmit(submit) = frame else {
            panic!("wrong frame variant");
        };
        assert_eq!(submit.token_id, "jaw001");
        assert_eq!(submit.mode, ScanMode::Blackmarket);
        assert_eq!(submit.client_timestamp, None);
    }

    #[test]
    fn parses_gm_command_with_and_without_payload() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"event": "gm:command",
                "data": {"action": "score:adjust",
                         "payload": {"teamId": "001", "delta": -500, "reason": "penalty"}}}"#,
        )
        .unwrap();
        let ClientFrame::GmCommand(GmAction::ScoreAdjust { team_id, delta, .. }) = frame else {
            panic!("wrong frame variant");
        };
        assert_eq!(team_id, "001");
        assert_eq!(delta, -500);

        let frame: ClientFrame = serde_json::from_str(
            r#"{"event": "gm:command", "data": {"action": "session:pause"}}"#,
        )
        .unwrap();
        assert_eq!(frame, ClientFrame::GmCommand(GmAction::SessionPause));
    }

    #[test]
    fn parses_bare_heartbeat() {
        let frame: ClientFrame = serde_json::from_str(r#"{"event": "heartbeat"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Heartbeat);
    }

    #[test]
    fn action_names_round_trip() {
        let action = GmAction::DeviceReset {
            device_id: "GM_A".to_string(),
        };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["action"], action.action_name());
        assert_eq!(v["payload"]["deviceId"], "GM_A");
    }

    #[test]
    fn handshake_requires_device_fields() {
        let auth: HandshakeAuth = serde_json::from_str(
            r#"{"token": "v4.public.x", "deviceId": "GM_A",
                "deviceType": "gm", "version": "1.2.0"}"#,
        )
        .unwrap();
        assert_eq!(auth.device_id, "GM_A");
        assert_eq!(auth.device_type, DeviceType::Gm);

        // Player handshakes may omit the token.
        let auth: HandshakeAuth =
            serde_json::from_str(r#"{"deviceId": "PLAYER_1", "deviceType": "player"}"#).unwrap();
        assert_eq!(auth.token, None);
    }
}
