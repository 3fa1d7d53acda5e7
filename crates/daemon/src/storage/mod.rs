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

use std::collections::HashMap;
use std::sync::Mutex;

use eyre::Error;

pub use fjall_kv::FjallKv;

mod fjall_kv;

/// Well-known keys. Everything else under `session:<uuid>` is per-session.
pub const KEY_CURRENT_SESSION: &str = "session:current";
pub const KEY_GAME_STATE: &str = "gameState:current";
/// Legacy key name, kept so state written by earlier deployments drains.
pub const KEY_OFFLINE_QUEUE: &str = "offlineQueue";

pub fn session_key(id: &uuid::Uuid) -> String {
    format!("session:{id}")
}

/// The opaque JSON key/value store the engine persists through. Writes may be
/// deferred; `flush` bounds the deferral at shutdown. Concurrent saves to one
/// key are applied in submission order.
pub trait KvStore: Send + Sync {
    fn save(&self, key: &str, value: serde_json::Value) -> Result<(), Error>;
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>, Error>;
    fn delete(&self, key: &str) -> Result<(), Error>;
    /// Drop everything. Test/teardown helper.
    fn cleanup(&self) -> Result<(), Error>;
    /// Block until deferred writes are durable.
    fn flush(&self) -> Result<(), Error>;
}

/// In-memory store for tests and for operators who choose to run without a
/// data directory.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn save(&self, key: &str, value: serde_json::Value) -> Result<(), Error> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), Error> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn cleanup(&self) -> Result<(), Error> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }

    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_kv_round_trip() {
        let kv = MemoryKv::new();
        kv.save("session:current", json!({"name": "s"})).unwrap();
        assert_eq!(
            kv.load("session:current").unwrap(),
            Some(json!({"name": "s"}))
        );
        kv.delete("session:current").unwrap();
        assert_eq!(kv.load("session:current").unwrap(), None);
    }
}
