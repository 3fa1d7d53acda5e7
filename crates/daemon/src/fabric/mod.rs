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

use std::sync::{Arc, Mutex};
use std::time::Duration;

use flume::Receiver;
use thiserror::Error;
use tracing::info;

use crate::events::DomainEvent;
use crate::sessions::EngineHandle;
use crate::video::VideoHandle;

pub use bridge::{spawn_bridge, BridgeHandle};
pub use rooms::{ClientId, RoomRegistry};

pub mod bridge;
pub mod rooms;
pub mod sync;

/// How long teardown waits for listeners and sockets before detaching.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Server lifecycle. Transitions are strictly forward until cleanup resets
/// to `Uninitialized`; doing things out of order fails fast instead of
/// racing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LifecycleState {
    Uninitialized,
    ServicesReady,
    HandlersReady,
    Listening,
}

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("invalid lifecycle transition from {from:?}; expected {expected:?}")]
    BadTransition {
        from: LifecycleState,
        expected: LifecycleState,
    },
    #[error("sockets are not being accepted in {0:?}")]
    NotAccepting(LifecycleState),
}

/// A recorded service subscription, so teardown is authoritative rather than
/// hopeful: every listener the fabric attaches is in here, and `cleanup`
/// drains the list.
#[derive(Default)]
struct ListenerRegistry {
    entries: Vec<(String, BridgeHandle)>,
}

impl ListenerRegistry {
    fn record(&mut self, name: &str, handle: BridgeHandle) {
        self.entries.push((name.to_string(), handle));
    }

    fn remove_all(&mut self, timeout: Duration) {
        for (name, handle) in self.entries.drain(..) {
            info!(listener = name, "Removing service listener");
            handle.stop(timeout);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The event fabric: room registry, the domain-to-wire bridge, and the
/// lifecycle that guarantees service listeners exist before the first socket
/// and disappear before the servers close.
pub struct EventFabric {
    state: Mutex<LifecycleState>,
    registry: Arc<RoomRegistry>,
    listeners: Mutex<ListenerRegistry>,
}

impl EventFabric {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Uninitialized),
            registry: Arc::new(RoomRegistry::new()),
            listeners: Mutex::new(ListenerRegistry::default()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    fn advance(
        &self,
        expected: LifecycleState,
        next: LifecycleState,
    ) -> Result<(), FabricError> {
        let mut state = self.state.lock().unwrap();
        if *state != expected {
            return Err(FabricError::BadTransition {
                from: *state,
                expected,
            });
        }
        *state = next;
        info!(state = ?next, "Fabric lifecycle advanced");
        Ok(())
    }

    /// Attach the domain-to-wire bridge. Must happen before any wire handler
    /// or socket exists, so early connections cannot race past it.
    pub fn attach_services(
        &self,
        events: Receiver<DomainEvent>,
        engine: EngineHandle,
        video: VideoHandle,
    ) -> Result<(), FabricError> {
        let mut state = self.state.lock().unwrap();
        if *state != LifecycleState::Uninitialized {
            return Err(FabricError::BadTransition {
                from: *state,
                expected: LifecycleState::Uninitialized,
            });
        }
        let handle = spawn_bridge(events, self.registry.clone(), engine, video);
        self.listeners.lock().unwrap().record("domain-bridge", handle);
        *state = LifecycleState::ServicesReady;
        info!(state = ?*state, "Fabric lifecycle advanced");
        Ok(())
    }

    /// Mark the wire handlers mounted. Fails fast when services are not up.
    pub fn handlers_ready(&self) -> Result<(), FabricError> {
        self.advance(LifecycleState::ServicesReady, LifecycleState::HandlersReady)
    }

    pub fn listening(&self) -> Result<(), FabricError> {
        self.advance(LifecycleState::HandlersReady, LifecycleState::Listening)
    }

    /// Socket handshakes call this; connections are only admitted while the
    /// fabric is fully up.
    pub fn ensure_accepting(&self) -> Result<(), FabricError> {
        let state = *self.state.lock().unwrap();
        if state != LifecycleState::Listening {
            return Err(FabricError::NotAccepting(state));
        }
        Ok(())
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        self.registry.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Teardown, in the only safe order: domain listeners first, then the
    /// sockets are drained and dropped. The HTTP/socket servers and storage
    /// are the caller's to close after this returns. State ends at
    /// `Uninitialized`; cleanup is idempotent.
    pub fn cleanup(&self) {
        self.listeners.lock().unwrap().remove_all(CLEANUP_TIMEOUT);
        self.registry.drain_and_disconnect();
        *self.state.lock().unwrap() = LifecycleState::Uninitialized;
        info!("Fabric cleaned up");
    }
}

impl Default for EventFabric {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionEngine;
    use crate::storage::MemoryKv;
    use crate::video::{MockPlayer, PlayerClient, VideoQueue};
    use aln_common::{DeviceType, TokenCatalog};

    fn engine_and_handle() -> (EngineHandle, Receiver<DomainEvent>) {
        let (events_tx, events_rx) = flume::unbounded();
        let (handle, _join) = SessionEngine::spawn(
            Arc::new(TokenCatalog::default()),
            Arc::new(MemoryKv::new()),
            events_tx,
        )
        .unwrap();
        (handle, events_rx)
    }

    #[tokio::test]
    async fn lifecycle_enforces_order() {
        let fabric = EventFabric::new();
        assert_eq!(fabric.state(), LifecycleState::Uninitialized);

        // Handlers before services: fail fast.
        assert!(matches!(
            fabric.handlers_ready(),
            Err(FabricError::BadTransition { .. })
        ));
        // No sockets before listening.
        assert!(matches!(
            fabric.ensure_accepting(),
            Err(FabricError::NotAccepting(_))
        ));

        let (engine, events_rx) = engine_and_handle();
        let (video, _join) = VideoQueue::spawn(
            PlayerClient::Mock(MockPlayer::new()),
            Arc::new(TokenCatalog::default()),
            flume::unbounded().0,
        );
        fabric.attach_services(events_rx, engine, video).unwrap();
        assert_eq!(fabric.state(), LifecycleState::ServicesReady);
        fabric.handlers_ready().unwrap();
        fabric.listening().unwrap();
        assert!(fabric.ensure_accepting().is_ok());

        // Double attach is a bad transition.
        let (engine2, events_rx2) = engine_and_handle();
        let (video2, _join2) = VideoQueue::spawn(
            PlayerClient::Mock(MockPlayer::new()),
            Arc::new(TokenCatalog::default()),
            flume::unbounded().0,
        );
        assert!(fabric.attach_services(events_rx2, engine2, video2).is_err());
    }

    #[tokio::test]
    async fn cleanup_removes_every_listener_and_resets_state() {
        let fabric = EventFabric::new();
        let (engine, events_rx) = engine_and_handle();
        let (video, _join) = VideoQueue::spawn(
            PlayerClient::Mock(MockPlayer::new()),
            Arc::new(TokenCatalog::default()),
            flume::unbounded().0,
        );
        fabric.attach_services(events_rx, engine, video).unwrap();
        fabric.handlers_ready().unwrap();
        fabric.listening().unwrap();

        let registry = fabric.registry();
        let client = uuid::Uuid::new_v4();
        registry.register(client, "GM_A", DeviceType::Gm);
        assert_eq!(fabric.listener_count(), 1);

        fabric.cleanup();
        assert_eq!(fabric.listener_count(), 0);
        assert_eq!(registry.client_count(), 0);
        assert_eq!(fabric.state(), LifecycleState::Uninitialized);

        // Idempotent.
        fabric.cleanup();
        assert_eq!(fabric.state(), LifecycleState::Uninitialized);
    }
}
