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

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::device::DeviceConnection;
use crate::model::transaction::Transaction;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Ended,
}

/// Bookkeeping the engine keeps per session outside the transaction log
/// proper. `scanned_tokens_by_device` is the per-device duplicate-detection
/// set: a token a device has already scored stays here for the lifetime of
/// the session, spanning disconnects and offline drains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default)]
    pub scanned_tokens_by_device: HashMap<String, BTreeSet<String>>,
    /// Per-team watermark set by an admin score reset. Score recomputation
    /// replays only transactions after a team's watermark, so projections
    /// stay derivable from the append-only log even across resets.
    #[serde(default)]
    pub score_reset_at: HashMap<String, DateTime<Utc>>,
}

/// One game instance: the unit of aggregation for transactions, scores and
/// the device roster. At most one session is not `Ended` at any time; that
/// invariant is enforced by the session engine, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub teams: Vec<String>,
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub devices: HashMap<String, DeviceConnection>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl Session {
    pub fn new(name: impl Into<String>, teams: Vec<String>) -> Self {
        let mut deduped = Vec::with_capacity(teams.len());
        for team in teams {
            if !deduped.contains(&team) {
                deduped.push(team);
            }
        }
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Active,
            teams: deduped,
            transactions: Vec::new(),
            devices: HashMap::new(),
            metadata: SessionMetadata::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status != SessionStatus::Ended
    }

    /// Whether this device has already scored this token in this session.
    pub fn device_has_scanned(&self, device_id: &str, token_id: &str) -> bool {
        self.metadata
            .scanned_tokens_by_device
            .get(device_id)
            .is_some_and(|set| set.contains(token_id))
    }

    /// Record a token against a device's scan set. Returns false if the token
    /// was already present; re-adding is a no-op.
    pub fn record_device_scan(&mut self, device_id: &str, token_id: &str) -> bool {
        self.metadata
            .scanned_tokens_by_device
            .entry(device_id.to_string())
            .or_default()
            .insert(token_id.to_string())
    }

    /// The scan set for one device, in stable order. Never leaks another
    /// device's set.
    pub fn scanned_tokens_for(&self, device_id: &str) -> Vec<String> {
        self.metadata
            .scanned_tokens_by_device
            .get(device_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_device_scans(&mut self, device_id: &str) {
        self.metadata.scanned_tokens_by_device.remove(device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_through_json() {
        let mut session = Session::new("Friday night", vec!["001".into(), "002".into()]);
        session.record_device_scan("GM_A", "jaw001");
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(session, back);
    }

    #[test]
    fn duplicate_team_ids_collapse_on_create() {
        let session = Session::new("s", vec!["001".into(), "001".into(), "002".into()]);
        assert_eq!(session.teams, vec!["001".to_string(), "002".to_string()]);
    }

    #[test]
    fn recording_same_scan_twice_is_noop() {
        let mut session = Session::new("s", vec!["001".into()]);
        assert!(session.record_device_scan("GM_A", "jaw001"));
        assert!(!session.record_device_scan("GM_A", "jaw001"));
        assert_eq!(session.scanned_tokens_for("GM_A"), vec!["jaw001".to_string()]);
    }

    #[test]
    fn scan_sets_are_device_scoped() {
        let mut session = Session::new("s", vec!["001".into()]);
        session.record_device_scan("GM_A", "jaw001");
        assert!(!session.device_has_scanned("GM_B", "jaw001"));
        assert!(session.scanned_tokens_for("GM_B").is_empty());
    }
}
