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

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use flume::{Receiver, Sender};
use tracing::warn;
use uuid::Uuid;

use aln_common::DeviceType;
use aln_rpc_common::{Envelope, Room, ServerEvent};

pub type ClientId = Uuid;

/// Per-client outbound queue depth. Fan-out never blocks; a client that
/// cannot drain this many frames starts losing them (and its connection is
/// the thing that is broken).
const OUTBOUND_QUEUE_DEPTH: usize = 256;

struct ClientEntry {
    device_id: String,
    device_type: DeviceType,
    /// Rooms in join order. The order is part of the GM handshake contract.
    rooms: Vec<Room>,
    sender: Sender<Envelope>,
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<Room, HashSet<ClientId>>,
    clients: HashMap<ClientId, ClientEntry>,
}

/// Room membership and fan-out. One lock guards the whole registry; joins and
/// teardown are exclusive, publishes are try-send and never block the caller.
#[derive(Default)]
pub struct RoomRegistry {
    inner: Mutex<Inner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a client and hand back the receiving end of its outbound queue.
    pub fn register(
        &self,
        client_id: ClientId,
        device_id: &str,
        device_type: DeviceType,
    ) -> Receiver<Envelope> {
        let (sender, receiver) = flume::bounded(OUTBOUND_QUEUE_DEPTH);
        let mut inner = self.inner.lock().unwrap();
        inner.clients.insert(
            client_id,
            ClientEntry {
                device_id: device_id.to_string(),
                device_type,
                rooms: Vec::new(),
                sender,
            },
        );
        receiver
    }

    pub fn join(&self, client_id: ClientId, room: Room) {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.clients.get_mut(&client_id) else {
            return;
        };
        if !entry.rooms.contains(&room) {
            entry.rooms.push(room.clone());
            inner.rooms.entry(room).or_default().insert(client_id);
        }
    }

    /// Join every attached client to a room. Used when a session starts so
    /// stations connected beforehand receive its fan-out.
    pub fn join_all(&self, room: Room) {
        let mut inner = self.inner.lock().unwrap();
        let client_ids: Vec<ClientId> = inner.clients.keys().copied().collect();
        for client_id in client_ids {
            let Some(entry) = inner.clients.get_mut(&client_id) else {
                continue;
            };
            if !entry.rooms.contains(&room) {
                entry.rooms.push(room.clone());
                inner.rooms.entry(room.clone()).or_default().insert(client_id);
            }
        }
    }

    /// The fixed GM join order: `device:<id>` first, then `gm`, then each
    /// followed team, then the session room. Later joins filter messages the
    /// earlier ones must not see, so the order is load-bearing.
    pub fn join_gm_rooms(
        &self,
        client_id: ClientId,
        device_id: &str,
        teams: &[String],
        session_id: Option<Uuid>,
    ) {
        self.join(client_id, Room::Device(device_id.to_string()));
        self.join(client_id, Room::Gm);
        for team in teams {
            self.join(client_id, Room::Team(team.clone()));
        }
        if let Some(session_id) = session_id {
            self.join(client_id, Room::Session(session_id));
        }
    }

    pub fn join_player_rooms(
        &self,
        client_id: ClientId,
        device_id: &str,
        session_id: Option<Uuid>,
    ) {
        self.join(client_id, Room::Device(device_id.to_string()));
        if let Some(session_id) = session_id {
            self.join(client_id, Room::Session(session_id));
        }
    }

    /// A client's rooms in join order.
    pub fn client_rooms(&self, client_id: ClientId) -> Vec<Room> {
        let inner = self.inner.lock().unwrap();
        inner
            .clients
            .get(&client_id)
            .map(|entry| entry.rooms.clone())
            .unwrap_or_default()
    }

    /// Detach a client from every room and drop its outbound queue.
    pub fn remove(&self, client_id: ClientId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.clients.remove(&client_id) {
            for room in entry.rooms {
                if let Some(members) = inner.rooms.get_mut(&room) {
                    members.remove(&client_id);
                    if members.is_empty() {
                        inner.rooms.remove(&room);
                    }
                }
            }
        }
    }

    /// Wrap the event once and fan it out to every member of the room.
    /// `Room::Global` means every attached socket; membership is implicit.
    /// Returns how many clients it was queued for.
    pub fn publish(&self, room: &Room, event: &ServerEvent) -> usize {
        let envelope = Envelope::wrap(event);
        let inner = self.inner.lock().unwrap();
        let members: Vec<&ClientEntry> = match room {
            Room::Global => inner.clients.values().collect(),
            _ => {
                let Some(members) = inner.rooms.get(room) else {
                    return 0;
                };
                members
                    .iter()
                    .filter_map(|id| inner.clients.get(id))
                    .collect()
            }
        };
        let mut delivered = 0;
        for entry in members {
            match entry.sender.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(flume::TrySendError::Full(_)) => {
                    warn!(
                        device_id = entry.device_id,
                        event = envelope.event,
                        "Outbound queue full, dropping frame"
                    );
                }
                Err(flume::TrySendError::Disconnected(_)) => {}
            }
        }
        delivered
    }

    /// Targeted send to whichever client holds a device id.
    pub fn send_to_device(&self, device_id: &str, event: &ServerEvent) -> bool {
        self.publish(&Room::Device(device_id.to_string()), event) > 0
    }

    /// Device ids of every client joined to a session room.
    pub fn session_room_devices(&self, session_id: Uuid) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let Some(members) = inner.rooms.get(&Room::Session(session_id)) else {
            return Vec::new();
        };
        let mut devices: Vec<String> = members
            .iter()
            .filter_map(|id| inner.clients.get(id).map(|e| e.device_id.clone()))
            .collect();
        devices.sort();
        devices
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().unwrap().clients.len()
    }

    pub fn gm_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .clients
            .values()
            .filter(|entry| entry.device_type == DeviceType::Gm)
            .count()
    }

    /// Teardown: drop every client queue, which ends each connection's
    /// outbound pump.
    pub fn drain_and_disconnect(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.clients.clear();
        inner.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn gm_join_order_is_device_gm_teams_session() {
        let registry = RoomRegistry::new();
        let client = Uuid::new_v4();
        let session = Uuid::new_v4();
        registry.register(client, "GM_A", DeviceType::Gm);
        registry.join_gm_rooms(
            client,
            "GM_A",
            &["001".to_string(), "002".to_string()],
            Some(session),
        );

        assert_eq!(
            registry.client_rooms(client),
            vec![
                Room::Device("GM_A".to_string()),
                Room::Gm,
                Room::Team("001".to_string()),
                Room::Team("002".to_string()),
                Room::Session(session),
            ]
        );
    }

    #[test]
    fn publish_reaches_only_room_members() {
        let registry = RoomRegistry::new();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let in_s1 = Uuid::new_v4();
        let in_s2 = Uuid::new_v4();
        let rx1 = registry.register(in_s1, "GM_A", DeviceType::Gm);
        let rx2 = registry.register(in_s2, "GM_B", DeviceType::Gm);
        registry.join(in_s1, Room::Session(s1));
        registry.join(in_s2, Room::Session(s2));

        let delivered = registry.publish(
            &Room::Session(s1),
            &ServerEvent::ScoresReset {
                teams: vec!["001".to_string()],
            },
        );
        assert_eq!(delivered, 1);
        assert_eq!(rx1.try_recv().unwrap().event, "scores:reset");
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn per_client_queues_preserve_publish_order() {
        let registry = RoomRegistry::new();
        let client = Uuid::new_v4();
        let rx = registry.register(client, "GM_A", DeviceType::Gm);
        registry.join(client, Room::Gm);
        registry.join(client, Room::Session(Uuid::nil()));

        registry.publish(
            &Room::Session(Uuid::nil()),
            &ServerEvent::ScoresReset { teams: vec![] },
        );
        registry.publish(
            &Room::Gm,
            &ServerEvent::DeviceDisconnected {
                device_id: "GM_B".to_string(),
            },
        );

        assert_eq!(rx.try_recv().unwrap().event, "scores:reset");
        assert_eq!(rx.try_recv().unwrap().event, "device:disconnected");
    }

    #[test]
    fn removed_clients_stop_receiving() {
        let registry = RoomRegistry::new();
        let client = Uuid::new_v4();
        let _rx = registry.register(client, "GM_A", DeviceType::Gm);
        registry.join(client, Room::Gm);
        registry.remove(client);
        let delivered = registry.publish(
            &Room::Gm,
            &ServerEvent::DeviceDisconnected {
                device_id: "GM_A".to_string(),
            },
        );
        assert_eq!(delivered, 0);
        assert_eq!(registry.client_count(), 0);
    }
}
