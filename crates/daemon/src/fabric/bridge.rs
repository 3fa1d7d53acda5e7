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
use std::thread;
use std::time::Duration;

use flume::{Receiver, Sender};
use serde_json::json;
use tracing::{info, warn};

use aln_rpc_common::{Room, ServerEvent};

use crate::events::DomainEvent;
use crate::fabric::rooms::RoomRegistry;
use crate::fabric::sync;
use crate::sessions::EngineHandle;
use crate::video::VideoHandle;

/// A recorded subscription: the one thread that translates domain events to
/// wire frames. Stopping it is what "removing the service listeners" means.
pub struct BridgeHandle {
    shutdown: Sender<()>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl BridgeHandle {
    /// Stop the bridge and wait (bounded) for it to drain.
    pub fn stop(mut self, timeout: Duration) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.join_handle.take() {
            let deadline = std::time::Instant::now() + timeout;
            while !handle.is_finished() && std::time::Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("Bridge did not stop within {timeout:?}; detaching");
            }
        }
    }
}

/// Spawn the domain-to-wire bridge. Exactly one handler per domain event;
/// each translates to one wire event in the room the scoping table names.
pub fn spawn_bridge(
    events: Receiver<DomainEvent>,
    registry: Arc<RoomRegistry>,
    engine: EngineHandle,
    video: VideoHandle,
) -> BridgeHandle {
    let (shutdown_send, shutdown_recv) = flume::bounded(1);
    let join_handle = thread::Builder::new()
        .name("aln-bridge".to_string())
        .spawn(move || {
            info!("Event bridge running");
            loop {
                let event: Option<DomainEvent> = flume::Selector::new()
                    .recv(&events, |event| event.ok())
                    .recv(&shutdown_recv, |_| None)
                    .wait();
                let Some(event) = event else { break };
                handle_event(event, &registry, &engine, &video);
            }
            info!("Event bridge exiting");
        })
        .expect("Unable to spawn bridge thread");
    BridgeHandle {
        shutdown: shutdown_send,
        join_handle: Some(join_handle),
    }
}

fn handle_event(
    event: DomainEvent,
    registry: &RoomRegistry,
    engine: &EngineHandle,
    video: &VideoHandle,
) {
    match event {
        DomainEvent::SessionCreated(session) => {
            // Stations attached before the session existed join its room now,
            // before the create is announced.
            registry.join_all(Room::Session(session.id));
            registry.publish(&Room::Global, &ServerEvent::SessionUpdate(session));
        }
        DomainEvent::SessionUpdated(session) => {
            registry.publish(&Room::Global, &ServerEvent::SessionUpdate(session));
        }
        DomainEvent::TransactionAdded {
            session_id,
            transaction,
            score,
        } => {
            // The transaction frame must reach subscribers before the score
            // frame; both go out here, in this order, on one thread.
            registry.publish(
                &Room::Session(session_id),
                &ServerEvent::TransactionNew { transaction },
            );
            if let Some(score) = score {
                registry.publish(&Room::Gm, &ServerEvent::ScoreUpdated(score));
            }
        }
        DomainEvent::TransactionDeleted { tx_id, scores, .. } => {
            registry.publish(
                &Room::Gm,
                &ServerEvent::StateUpdate(json!({"transactionDeleted": tx_id})),
            );
            for score in scores {
                registry.publish(&Room::Gm, &ServerEvent::ScoreUpdated(score));
            }
        }
        DomainEvent::ScoreAdjusted { score, .. } => {
            registry.publish(&Room::Gm, &ServerEvent::ScoreUpdated(score));
        }
        DomainEvent::GroupCompleted {
            team_id,
            group,
            bonus_points,
            completed_at,
            ..
        } => {
            registry.publish(
                &Room::Gm,
                &ServerEvent::GroupCompleted {
                    team_id,
                    group,
                    bonus_points,
                    completed_at,
                },
            );
        }
        DomainEvent::ScoresReset { session_id, teams } => {
            // Session-scoped, and always paired with a fresh snapshot per
            // member device so nothing bleeds across sessions.
            registry.publish(&Room::Session(session_id), &ServerEvent::ScoresReset { teams });
            for device_id in registry.session_room_devices(session_id) {
                let Ok(snapshot) = engine.snapshot_blocking(Some(device_id.clone())) else {
                    continue;
                };
                let payload = sync::sync_full(snapshot, video.status_blocking(), false);
                registry.send_to_device(&device_id, &ServerEvent::SyncFull(payload));
            }
        }
        DomainEvent::DeviceConnected(device) => {
            registry.publish(&Room::Gm, &ServerEvent::DeviceConnected(device));
        }
        DomainEvent::DeviceDisconnected { device_id } => {
            registry.publish(&Room::Gm, &ServerEvent::DeviceDisconnected { device_id });
        }
        DomainEvent::VideoStatus(payload) => {
            registry.publish(&Room::Gm, &ServerEvent::VideoStatus(payload));
        }
        DomainEvent::ServiceError {
            service,
            code,
            message,
        } => {
            registry.publish(
                &Room::Global,
                &ServerEvent::Error {
                    service,
                    code,
                    message,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionEngine;
    use crate::storage::MemoryKv;
    use crate::video::{MockPlayer, PlayerClient, VideoQueue};
    use aln_common::{DeviceType, MediaAssets, TokenCatalog, TokenDef};
    use aln_rpc_common::{Envelope, TransactionSubmit};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn catalog() -> Arc<TokenCatalog> {
        Arc::new(TokenCatalog::new([TokenDef {
            id: "jaw001".to_string(),
            value: 500,
            memory_type: "Personal".to_string(),
            group_id: None,
            group_multiplier: None,
            media_assets: MediaAssets::default(),
        }]))
    }

    struct Rig {
        engine: crate::sessions::EngineHandle,
        registry: Arc<RoomRegistry>,
        bridge: Option<BridgeHandle>,
    }

    fn rig() -> Rig {
        let (events_tx, events_rx) = flume::unbounded();
        let (engine, _join) =
            SessionEngine::spawn(catalog(), Arc::new(MemoryKv::new()), events_tx.clone()).unwrap();
        let (video, _vjoin) =
            VideoQueue::spawn(PlayerClient::Mock(MockPlayer::new()), catalog(), events_tx);
        let registry = Arc::new(RoomRegistry::new());
        let bridge = spawn_bridge(events_rx, registry.clone(), engine.clone(), video);
        Rig {
            engine,
            registry,
            bridge: Some(bridge),
        }
    }

    fn recv_frame(rx: &flume::Receiver<Envelope>) -> Envelope {
        rx.recv_timeout(Duration::from_secs(2))
            .expect("expected a frame")
    }

    fn submit(token: &str, team: &str, device: &str) -> TransactionSubmit {
        TransactionSubmit {
            token_id: token.to_string(),
            team_id: team.to_string(),
            device_id: device.to_string(),
            mode: aln_common::ScanMode::Blackmarket,
            client_timestamp: None,
        }
    }

    #[tokio::test]
    async fn transaction_frame_precedes_score_frame() {
        let rig = rig();
        let session = rig
            .engine
            .create_session("s".to_string(), vec!["001".to_string()])
            .await
            .unwrap();

        let client = Uuid::new_v4();
        let rx = rig.registry.register(client, "GM_A", DeviceType::Gm);
        rig.registry
            .join_gm_rooms(client, "GM_A", &[], Some(session.id));

        rig.engine
            .process_scan(submit("jaw001", "001", "GM_A"))
            .await
            .unwrap();

        let first = recv_frame(&rx);
        assert_eq!(first.event, "transaction:new");
        assert_eq!(first.data["transaction"]["deviceId"], "GM_A");
        let second = recv_frame(&rx);
        assert_eq!(second.event, "score:updated");
        assert_eq!(second.data["currentScore"], 500);
    }

    #[tokio::test]
    async fn reset_stays_inside_its_session_room() {
        let rig = rig();
        let session = rig
            .engine
            .create_session("s1".to_string(), vec!["001".to_string()])
            .await
            .unwrap();

        let in_session = Uuid::new_v4();
        let rx_in = rig.registry.register(in_session, "GM_A", DeviceType::Gm);
        rig.registry.join(in_session, Room::Session(session.id));

        let elsewhere = Uuid::new_v4();
        let rx_out = rig.registry.register(elsewhere, "GM_B", DeviceType::Gm);
        rig.registry.join(elsewhere, Room::Session(Uuid::new_v4()));

        rig.engine.reset_scores(None).await.unwrap();

        let reset = recv_frame(&rx_in);
        assert_eq!(reset.event, "scores:reset");
        let sync = recv_frame(&rx_in);
        assert_eq!(sync.event, "sync:full");
        // The observer joined to a different session room sees neither.
        assert!(rx_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn session_updates_go_everywhere() {
        let rig = rig();
        let client = Uuid::new_v4();
        let rx = rig.registry.register(client, "PLAYER_1", DeviceType::Player);

        rig.engine
            .create_session("s".to_string(), vec!["001".to_string()])
            .await
            .unwrap();

        let frame = recv_frame(&rx);
        assert_eq!(frame.event, "session:update");
        assert_eq!(frame.data["status"], "active");
    }

    #[tokio::test]
    async fn stopped_bridge_stops_translating() {
        let mut rig = rig();
        let client = Uuid::new_v4();
        let rx = rig.registry.register(client, "GM_A", DeviceType::Gm);

        rig.bridge.take().unwrap().stop(Duration::from_secs(2));
        rig.engine
            .create_session("s".to_string(), vec!["001".to_string()])
            .await
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
