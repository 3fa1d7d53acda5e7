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
use thiserror::Error;
use uuid::Uuid;

use aln_common::{DeviceConnection, Session, TeamScore, Transaction};
use aln_rpc_common::{EnvironmentSnapshot, ErrorCode, TransactionSubmit};

pub use engine::SessionEngine;

pub mod engine;
pub mod scoring;

/// Structural failures the engine raises to callers. Domain rejections
/// (duplicates, unknown tokens) are not here; those are transaction outcomes.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum EngineError {
    #[error("No active session")]
    NoSession,
    #[error("Session is paused")]
    SessionPaused,
    #[error("A session is already running")]
    SessionExists,
    #[error("No such transaction")]
    TransactionNotFound,
    #[error("Device id is in use by a connected device: {0}")]
    DeviceCollision(String),
    #[error("Session engine has terminated")]
    Terminated,
}

impl EngineError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            EngineError::NoSession => ErrorCode::NoSession,
            EngineError::SessionPaused => ErrorCode::SessionPaused,
            EngineError::SessionExists => ErrorCode::SessionExists,
            EngineError::TransactionNotFound => ErrorCode::ValidationError,
            EngineError::DeviceCollision(_) => ErrorCode::DeviceIdCollision,
            EngineError::Terminated => ErrorCode::InternalError,
        }
    }
}

/// What a group completion awarded, carried alongside the scan outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupCompletion {
    pub group: String,
    pub bonus_points: i64,
}

/// The decision for one scan: the recorded transaction, plus the updated
/// projection when the scan scored.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub transaction: Transaction,
    pub score: Option<TeamScore>,
    pub group_completed: Option<GroupCompletion>,
}

/// Result of draining a client's offline queue: per-item outcomes in FIFO
/// order, halted at the first structural failure.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub results: Vec<ScanOutcome>,
    pub processed: usize,
    pub failed: usize,
}

/// A read-only view of the engine's state, composed into snapshots and syncs.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub session: Option<Session>,
    pub scores: Vec<TeamScore>,
    pub recent_transactions: Vec<Transaction>,
    pub devices: Vec<DeviceConnection>,
    pub environment: EnvironmentSnapshot,
    /// Scan set of the device the snapshot was requested for; empty when the
    /// request named no device. Never another device's set.
    pub device_scanned_tokens: Vec<String>,
}

pub enum EngineRequest {
    CreateSession {
        name: String,
        teams: Vec<String>,
        reply: oneshot::Sender<Result<Session, EngineError>>,
    },
    EndSession {
        reply: oneshot::Sender<Result<Session, EngineError>>,
    },
    PauseSession {
        reply: oneshot::Sender<Result<Session, EngineError>>,
    },
    ResumeSession {
        reply: oneshot::Sender<Result<Session, EngineError>>,
    },
    ProcessScan {
        submit: TransactionSubmit,
        reply: oneshot::Sender<Result<ScanOutcome, EngineError>>,
    },
    ProcessBatch {
        transactions: Vec<TransactionSubmit>,
        reply: oneshot::Sender<Result<BatchOutcome, EngineError>>,
    },
    AdjustScore {
        team_id: String,
        delta: i64,
        reason: String,
        reply: oneshot::Sender<Result<TeamScore, EngineError>>,
    },
    ResetScores {
        teams: Option<Vec<String>>,
        reply: oneshot::Sender<Result<Vec<String>, EngineError>>,
    },
    DeleteTransaction {
        tx_id: Uuid,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    RegisterDevice {
        device: DeviceConnection,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    MarkDeviceDisconnected {
        device_id: String,
    },
    ResetDevice {
        device_id: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Heartbeat {
        device_id: String,
    },
    SweepHeartbeats {
        cutoff: DateTime<Utc>,
    },
    SetEnvironment {
        bluetooth: Option<bool>,
        audio: Option<bool>,
        lighting: Option<bool>,
        reply: oneshot::Sender<EnvironmentSnapshot>,
    },
    Snapshot {
        device_id: Option<String>,
        reply: oneshot::Sender<EngineSnapshot>,
    },
    Shutdown,
}

/// Cloneable handle to the engine actor. All mutation of session state goes
/// through this; the actor services one request at a time.
#[derive(Clone)]
pub struct EngineHandle {
    send: flume::Sender<EngineRequest>,
}

impl EngineHandle {
    pub(crate) fn new(send: flume::Sender<EngineRequest>) -> Self {
        Self { send }
    }

    fn submit<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<oneshot::Receiver<T>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send
            .send(make(tx))
            .map_err(|_| EngineError::Terminated)?;
        Ok(rx)
    }

    pub async fn create_session(
        &self,
        name: String,
        teams: Vec<String>,
    ) -> Result<Session, EngineError> {
        let rx = self.submit(|reply| EngineRequest::CreateSession { name, teams, reply })?;
        rx.await.map_err(|_| EngineError::Terminated)?
    }

    pub async fn end_session(&self) -> Result<Session, EngineError> {
        let rx = self.submit(|reply| EngineRequest::EndSession { reply })?;
        rx.await.map_err(|_| EngineError::Terminated)?
    }

    pub async fn pause_session(&self) -> Result<Session, EngineError> {
        let rx = self.submit(|reply| EngineRequest::PauseSession { reply })?;
        rx.await.map_err(|_| EngineError::Terminated)?
    }

    pub async fn resume_session(&self) -> Result<Session, EngineError> {
        let rx = self.submit(|reply| EngineRequest::ResumeSession { reply })?;
        rx.await.map_err(|_| EngineError::Terminated)?
    }

    pub async fn process_scan(&self, submit: TransactionSubmit) -> Result<ScanOutcome, EngineError> {
        let rx = self.submit(|reply| EngineRequest::ProcessScan { submit, reply })?;
        rx.await.map_err(|_| EngineError::Terminated)?
    }

    pub async fn process_batch(
        &self,
        transactions: Vec<TransactionSubmit>,
    ) -> Result<BatchOutcome, EngineError> {
        let rx = self.submit(|reply| EngineRequest::ProcessBatch {
            transactions,
            reply,
        })?;
        rx.await.map_err(|_| EngineError::Terminated)?
    }

    pub async fn adjust_score(
        &self,
        team_id: String,
        delta: i64,
        reason: String,
    ) -> Result<TeamScore, EngineError> {
        let rx = self.submit(|reply| EngineRequest::AdjustScore {
            team_id,
            delta,
            reason,
            reply,
        })?;
        rx.await.map_err(|_| EngineError::Terminated)?
    }

    pub async fn reset_scores(
        &self,
        teams: Option<Vec<String>>,
    ) -> Result<Vec<String>, EngineError> {
        let rx = self.submit(|reply| EngineRequest::ResetScores { teams, reply })?;
        rx.await.map_err(|_| EngineError::Terminated)?
    }

    pub async fn delete_transaction(&self, tx_id: Uuid) -> Result<(), EngineError> {
        let rx = self.submit(|reply| EngineRequest::DeleteTransaction { tx_id, reply })?;
        rx.await.map_err(|_| EngineError::Terminated)?
    }

    /// Returns whether this was a reconnection of a previously-seen device.
    pub async fn register_device(&self, device: DeviceConnection) -> Result<bool, EngineError> {
        let rx = self.submit(|reply| EngineRequest::RegisterDevice { device, reply })?;
        rx.await.map_err(|_| EngineError::Terminated)?
    }

    pub fn mark_device_disconnected(&self, device_id: String) {
        let _ = self
            .send
            .send(EngineRequest::MarkDeviceDisconnected { device_id });
    }

    pub async fn reset_device(&self, device_id: String) -> Result<(), EngineError> {
        let rx = self.submit(|reply| EngineRequest::ResetDevice { device_id, reply })?;
        rx.await.map_err(|_| EngineError::Terminated)?
    }

    pub fn heartbeat(&self, device_id: String) {
        let _ = self.send.send(EngineRequest::Heartbeat { device_id });
    }

    pub fn sweep_heartbeats(&self, cutoff: DateTime<Utc>) {
        let _ = self.send.send(EngineRequest::SweepHeartbeats { cutoff });
    }

    pub async fn set_environment(
        &self,
        bluetooth: Option<bool>,
        audio: Option<bool>,
        lighting: Option<bool>,
    ) -> Result<EnvironmentSnapshot, EngineError> {
        let rx = self.submit(|reply| EngineRequest::SetEnvironment {
            bluetooth,
            audio,
            lighting,
            reply,
        })?;
        rx.await.map_err(|_| EngineError::Terminated)
    }

    pub async fn snapshot(&self, device_id: Option<String>) -> Result<EngineSnapshot, EngineError> {
        let rx = self.submit(|reply| EngineRequest::Snapshot { device_id, reply })?;
        rx.await.map_err(|_| EngineError::Terminated)
    }

    /// Blocking variant for non-async callers (the fabric bridge thread).
    pub fn snapshot_blocking(
        &self,
        device_id: Option<String>,
    ) -> Result<EngineSnapshot, EngineError> {
        let rx = self.submit(|reply| EngineRequest::Snapshot { device_id, reply })?;
        rx.recv().map_err(|_| EngineError::Terminated)
    }

    pub fn shutdown(&self) {
        let _ = self.send.send(EngineRequest::Shutdown);
    }
}
