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

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::{KvStore, KEY_OFFLINE_QUEUE};

/// Queue cap, matching the client-side protocol bound.
pub const OFFLINE_QUEUE_CAP: usize = 100;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OfflineEntryKind {
    PlayerScanLog,
    GmTransaction,
}

/// A player scan that arrived while no session was active. Held (bounded)
/// and replayed as log entries when a session starts; never scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueEntry {
    pub kind: OfflineEntryKind,
    pub token_id: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub client_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("Offline queue is full")]
pub struct QueueFull;

/// Bounded FIFO persisted under the legacy `offlineQueue` key so entries
/// survive a restart and queues written by earlier deployments still drain.
pub struct OfflineQueue {
    entries: Mutex<VecDeque<OfflineQueueEntry>>,
    kv: Arc<dyn KvStore>,
}

impl OfflineQueue {
    pub fn load(kv: Arc<dyn KvStore>) -> Self {
        let entries = match kv.load(KEY_OFFLINE_QUEUE) {
            Ok(Some(value)) => match serde_json::from_value::<VecDeque<OfflineQueueEntry>>(value) {
                Ok(entries) => {
                    if !entries.is_empty() {
                        info!(count = entries.len(), "Restored offline queue");
                    }
                    entries
                }
                Err(e) => {
                    warn!(error = ?e, "Persisted offline queue is unreadable, discarding");
                    VecDeque::new()
                }
            },
            _ => VecDeque::new(),
        };
        Self {
            entries: Mutex::new(entries),
            kv,
        }
    }

    fn persist(&self, entries: &VecDeque<OfflineQueueEntry>) {
        if let Ok(value) = serde_json::to_value(entries)
            && let Err(e) = self.kv.save(KEY_OFFLINE_QUEUE, value)
        {
            warn!(error = ?e, "Failed to persist offline queue");
        }
    }

    /// Append, FIFO, bounded. Returns the entry's queue position.
    pub fn push(&self, entry: OfflineQueueEntry) -> Result<usize, QueueFull> {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= OFFLINE_QUEUE_CAP {
            return Err(QueueFull);
        }
        entries.push_back(entry);
        let position = entries.len() - 1;
        self.persist(&entries);
        Ok(position)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Take everything, FIFO. An empty drain is a no-op: nothing is
    /// persisted and nothing is emitted.
    pub fn drain(&self) -> Vec<OfflineQueueEntry> {
        let mut entries = self.entries.lock().unwrap();
        if entries.is_empty() {
            return Vec::new();
        }
        let drained: Vec<_> = entries.drain(..).collect();
        self.persist(&entries);
        info!(count = drained.len(), "Drained offline player-scan queue");
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;
    use pretty_assertions::assert_eq;

    fn entry(token: &str) -> OfflineQueueEntry {
        OfflineQueueEntry {
            kind: OfflineEntryKind::PlayerScanLog,
            token_id: token.to_string(),
            device_id: "PLAYER_1".to_string(),
            team_id: None,
            client_timestamp: Utc::now(),
        }
    }

    #[test]
    fn cap_accepts_one_hundred_then_rejects() {
        let queue = OfflineQueue::load(Arc::new(MemoryKv::new()));
        for n in 0..OFFLINE_QUEUE_CAP {
            assert_eq!(queue.push(entry(&format!("t{n}"))).unwrap(), n);
        }
        assert_eq!(queue.push(entry("overflow")), Err(QueueFull));
        assert_eq!(queue.len(), OFFLINE_QUEUE_CAP);
    }

    #[test]
    fn drain_is_fifo_and_empty_drain_is_noop() {
        let queue = OfflineQueue::load(Arc::new(MemoryKv::new()));
        assert!(queue.drain().is_empty());

        queue.push(entry("a")).unwrap();
        queue.push(entry("b")).unwrap();
        let drained = queue.drain();
        assert_eq!(
            drained.iter().map(|e| e.token_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn queue_survives_restart_via_legacy_key() {
        let kv = Arc::new(MemoryKv::new());
        {
            let queue = OfflineQueue::load(kv.clone());
            queue.push(entry("persisted")).unwrap();
        }
        let queue = OfflineQueue::load(kv);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain()[0].token_id, "persisted");
    }
}
