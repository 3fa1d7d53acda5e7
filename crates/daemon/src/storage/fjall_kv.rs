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

use std::path::Path;
use std::thread;
use std::time::Duration;

use eyre::Error;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use flume::{Receiver, Sender};
use tracing::{error, info};

use crate::storage::KvStore;

/// Messages for the background durability thread.
enum PersistenceMessage {
    Dirty,
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// fjall-backed store. Inserts land in the keyspace inline (memtable + WAL,
/// no fsync on the request path); a background thread makes them durable,
/// coalescing bursts. Reads observe writes immediately.
pub struct FjallKv {
    _keyspace: Keyspace,
    partition: PartitionHandle,
    persistence_sender: Sender<PersistenceMessage>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl FjallKv {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let keyspace = Config::new(path).open()?;
        let partition = keyspace.open_partition(
            "state",
            PartitionCreateOptions::default(),
        )?;
        info!(?path, "Opened state database");

        let (sender, receiver) = flume::unbounded();
        let persist_keyspace = keyspace.clone();
        let join_handle = thread::Builder::new()
            .name("aln-persist".to_string())
            .spawn(move || Self::persistence_loop(persist_keyspace, receiver))?;

        Ok(Self {
            _keyspace: keyspace,
            partition,
            persistence_sender: sender,
            join_handle: Some(join_handle),
        })
    }

    fn persistence_loop(keyspace: Keyspace, receiver: Receiver<PersistenceMessage>) {
        let mut dirty = false;
        loop {
            match receiver.recv_timeout(Duration::from_millis(500)) {
                Ok(PersistenceMessage::Dirty) => {
                    dirty = true;
                }
                Ok(PersistenceMessage::Flush(reply)) => {
                    if let Err(e) = keyspace.persist(PersistMode::SyncAll) {
                        error!(error = ?e, "Failed to persist state database");
                    }
                    dirty = false;
                    let _ = reply.send(());
                }
                Ok(PersistenceMessage::Shutdown) | Err(flume::RecvTimeoutError::Disconnected) => {
                    if let Err(e) = keyspace.persist(PersistMode::SyncAll) {
                        error!(error = ?e, "Failed final persist of state database");
                    }
                    break;
                }
                Err(flume::RecvTimeoutError::Timeout) => {
                    if dirty {
                        if let Err(e) = keyspace.persist(PersistMode::SyncAll) {
                            error!(error = ?e, "Failed to persist state database");
                        }
                        dirty = false;
                    }
                }
            }
        }
    }
}

impl KvStore for FjallKv {
    fn save(&self, key: &str, value: serde_json::Value) -> Result<(), Error> {
        let bytes = serde_json::to_vec(&value)?;
        self.partition.insert(key, bytes)?;
        let _ = self.persistence_sender.send(PersistenceMessage::Dirty);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        let Some(slice) = self.partition.get(key)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&slice)?))
    }

    fn delete(&self, key: &str) -> Result<(), Error> {
        self.partition.remove(key)?;
        let _ = self.persistence_sender.send(PersistenceMessage::Dirty);
        Ok(())
    }

    fn cleanup(&self) -> Result<(), Error> {
        let mut keys = Vec::new();
        for entry in self.partition.iter() {
            let (key, _) = entry?;
            keys.push(key);
        }
        for key in keys {
            self.partition.remove(key)?;
        }
        self.flush()
    }

    fn flush(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.persistence_sender
            .send(PersistenceMessage::Flush(tx))
            .map_err(|_| eyre::eyre!("Persistence thread is gone"))?;
        rx.recv_timeout(Duration::from_secs(5))
            .map_err(|_| eyre::eyre!("Timed out waiting for state flush"))?;
        Ok(())
    }
}

impl Drop for FjallKv {
    fn drop(&mut self) {
        let _ = self.persistence_sender.send(PersistenceMessage::Shutdown);
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fjall_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let kv = FjallKv::open(dir.path()).unwrap();
        kv.save("session:current", json!({"status": "active"}))
            .unwrap();
        assert_eq!(
            kv.load("session:current").unwrap(),
            Some(json!({"status": "active"}))
        );
        kv.flush().unwrap();
        kv.delete("session:current").unwrap();
        assert_eq!(kv.load("session:current").unwrap(), None);
    }

    #[test]
    fn saves_to_same_key_apply_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let kv = FjallKv::open(dir.path()).unwrap();
        for n in 0..50i64 {
            kv.save("gameState:current", json!({"n": n})).unwrap();
        }
        assert_eq!(
            kv.load("gameState:current").unwrap(),
            Some(json!({"n": 49}))
        );
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let kv = FjallKv::open(dir.path()).unwrap();
            kv.save("session:current", json!({"name": "Friday"})).unwrap();
            kv.flush().unwrap();
        }
        let kv = FjallKv::open(dir.path()).unwrap();
        assert_eq!(
            kv.load("session:current").unwrap(),
            Some(json!({"name": "Friday"}))
        );
    }
}
