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
use uuid::Uuid;

use aln_common::{DeviceConnection, Session, TeamScore, Transaction};
use aln_rpc_common::{ErrorCode, VideoStatusPayload};

/// Internal pub/sub between the engine (and video worker) and the event
/// fabric. The engine publishes these and knows nothing about sockets or
/// rooms; the fabric's bridge translates each to exactly one wire event.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    SessionCreated(Session),
    SessionUpdated(Session),
    /// A scan was decided and appended. `score` is present when the scan
    /// changed a team's projection (accepted blackmarket scans).
    TransactionAdded {
        session_id: Uuid,
        transaction: Transaction,
        score: Option<TeamScore>,
    },
    TransactionDeleted {
        session_id: Uuid,
        tx_id: Uuid,
        /// Projections recomputed from scratch after the removal.
        scores: Vec<TeamScore>,
    },
    ScoreAdjusted {
        session_id: Uuid,
        score: TeamScore,
    },
    GroupCompleted {
        session_id: Uuid,
        team_id: String,
        group: String,
        bonus_points: i64,
        completed_at: DateTime<Utc>,
    },
    ScoresReset {
        session_id: Uuid,
        teams: Vec<String>,
    },
    DeviceConnected(DeviceConnection),
    DeviceDisconnected {
        device_id: String,
    },
    VideoStatus(VideoStatusPayload),
    /// Structural failure worth telling every client about.
    ServiceError {
        service: String,
        code: ErrorCode,
        message: String,
    },
}
