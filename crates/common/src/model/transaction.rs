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

/// The operational mode a GM scanner was in when it submitted a scan.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Scoring mode. Accepted scans award the token's value to the team.
    Blackmarket,
    /// Informational mode. Scans are logged but award zero points and do not
    /// advance group completion.
    Detective,
}

/// The recorded outcome of a scan. Rejections and duplicates are outcomes, not
/// errors; a transaction is written for every scan that reaches the engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Accepted,
    Rejected,
    Duplicate,
}

/// One GM scan decision, bound to exactly one session. Transactions never
/// mutate after being appended; admins delete rather than edit.
///
/// The wire field for the submitting device is `deviceId`. The legacy name
/// `scannerId` is banned from the serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub token_id: String,
    pub team_id: String,
    pub device_id: String,
    pub mode: ScanMode,
    pub status: TransactionStatus,
    pub points: i64,
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl Transaction {
    pub fn is_scoring(&self) -> bool {
        self.status == TransactionStatus::Accepted && self.mode == ScanMode::Blackmarket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tx() -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            token_id: "jaw001".to_string(),
            team_id: "001".to_string(),
            device_id: "GM_A".to_string(),
            mode: ScanMode::Blackmarket,
            status: TransactionStatus::Accepted,
            points: 500,
            timestamp: Utc::now(),
            session_id: Uuid::new_v4(),
            rejection_reason: None,
        }
    }

    #[test]
    fn serialized_form_uses_device_id_never_scanner_id() {
        let json = serde_json::to_string(&tx()).unwrap();
        assert!(json.contains("\"deviceId\""));
        assert!(!json.contains("scannerId"));
    }

    #[test]
    fn round_trips_through_json() {
        let tx = tx();
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, back);
    }

    #[test]
    fn duplicate_status_serializes_lowercase() {
        let mut t = tx();
        t.status = TransactionStatus::Duplicate;
        t.points = 0;
        let v: serde_json::Value = serde_json::to_value(&t).unwrap();
        assert_eq!(v["status"], "duplicate");
        assert_eq!(v["mode"], "blackmarket");
    }
}
