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
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use eyre::Error;
use flume::{Receiver, Sender};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use aln_common::{
    ConnectionStatus, DeviceConnection, ScanMode, Session, SessionStatus, TeamScore, TokenCatalog,
    Transaction, TransactionStatus,
};
use aln_rpc_common::{EnvironmentSnapshot, TransactionSubmit};

use crate::events::DomainEvent;
use crate::sessions::{
    scoring, BatchOutcome, EngineError, EngineHandle, EngineRequest, EngineSnapshot, GroupCompletion,
    ScanOutcome,
};
use crate::storage::{session_key, KvStore, KEY_CURRENT_SESSION, KEY_GAME_STATE};

/// How many transactions a snapshot carries.
const RECENT_TRANSACTIONS: usize = 100;

/// The single writer for all session state. Exactly one of these runs per
/// orchestrator, on its own thread, servicing requests one at a time; every
/// mutation funnels through it, which is what makes the scan algorithm's
/// critical section a plain sequence of statements.
pub struct SessionEngine {
    session: Option<Session>,
    scores: HashMap<String, TeamScore>,
    devices: HashMap<String, DeviceConnection>,
    environment: EnvironmentSnapshot,
    catalog: Arc<TokenCatalog>,
    kv: Arc<dyn KvStore>,
    events: Sender<DomainEvent>,
}

impl SessionEngine {
    /// Restore engine state from storage. A persisted non-ended session is
    /// resumed; its projections are recomputed from the transaction log, with
    /// the persisted game state supplying what the log cannot: admin
    /// adjustments and the environment snapshot.
    pub fn new(
        catalog: Arc<TokenCatalog>,
        kv: Arc<dyn KvStore>,
        events: Sender<DomainEvent>,
    ) -> Result<Self, Error> {
        let session = match kv.load(KEY_CURRENT_SESSION)? {
            Some(value) => match serde_json::from_value::<Session>(value) {
                Ok(session) if session.is_open() => {
                    info!(session = %session.id, name = session.name, "Resuming persisted session");
                    Some(session)
                }
                Ok(_) => None,
                Err(e) => {
                    warn!(error = ?e, "Persisted session is unreadable, starting fresh");
                    None
                }
            },
            None => None,
        };

        let (previous_scores, environment) = Self::load_game_state(&kv);

        let mut devices = HashMap::new();
        let scores = match &session {
            Some(session) => {
                // Anything in the roster predates this process; nothing is
                // connected yet.
                for (id, device) in &session.devices {
                    let mut device = device.clone();
                    device.connection_status = ConnectionStatus::Disconnected;
                    devices.insert(id.clone(), device);
                }
                scoring::recompute_scores(session, &catalog, &previous_scores)
            }
            None => HashMap::new(),
        };

        Ok(Self {
            session,
            scores,
            devices,
            environment,
            catalog,
            kv,
            events,
        })
    }

    /// Read back what `try_persist` wrote under the game-state key. The
    /// scores are only a carrier for the admin adjustments; everything else
    /// is re-derived from the transaction log.
    fn load_game_state(
        kv: &Arc<dyn KvStore>,
    ) -> (HashMap<String, TeamScore>, EnvironmentSnapshot) {
        let value = match kv.load(KEY_GAME_STATE) {
            Ok(Some(value)) => value,
            Ok(None) => return (HashMap::new(), EnvironmentSnapshot::default()),
            Err(e) => {
                warn!(error = ?e, "Unable to read persisted game state");
                return (HashMap::new(), EnvironmentSnapshot::default());
            }
        };
        let scores = value
            .get("scores")
            .cloned()
            .and_then(|scores| serde_json::from_value::<Vec<TeamScore>>(scores).ok())
            .map(|scores| {
                scores
                    .into_iter()
                    .map(|score| (score.team_id.clone(), score))
                    .collect()
            })
            .unwrap_or_else(|| {
                warn!("Persisted scores are unreadable, rebuilding from the log alone");
                HashMap::new()
            });
        let environment = value
            .get("environment")
            .cloned()
            .and_then(|env| serde_json::from_value::<EnvironmentSnapshot>(env).ok())
            .unwrap_or_default();
        (scores, environment)
    }

    /// Spawn the engine on its own thread and hand back the request handle.
    pub fn spawn(
        catalog: Arc<TokenCatalog>,
        kv: Arc<dyn KvStore>,
        events: Sender<DomainEvent>,
    ) -> Result<(EngineHandle, thread::JoinHandle<()>), Error> {
        let mut engine = Self::new(catalog, kv, events)?;
        let (sender, receiver) = flume::unbounded();
        let join_handle = thread::Builder::new()
            .name("aln-session".to_string())
            .spawn(move || engine.run(receiver))?;
        Ok((EngineHandle::new(sender), join_handle))
    }

    fn run(&mut self, receiver: Receiver<EngineRequest>) {
        info!("Session engine running");
        for request in receiver.iter() {
            match request {
                EngineRequest::CreateSession { name, teams, reply } => {
                    let _ = reply.send(self.create_session(name, teams));
                }
                EngineRequest::EndSession { reply } => {
                    let _ = reply.send(self.end_session());
                }
                EngineRequest::PauseSession { reply } => {
                    let _ = reply.send(self.set_session_status(SessionStatus::Paused));
                }
                EngineRequest::ResumeSession { reply } => {
                    let _ = reply.send(self.set_session_status(SessionStatus::Active));
                }
                EngineRequest::ProcessScan { submit, reply } => {
                    let _ = reply.send(self.process_scan(&submit));
                }
                EngineRequest::ProcessBatch {
                    transactions,
                    reply,
                } => {
                    let _ = reply.send(Ok(self.process_batch(&transactions)));
                }
                EngineRequest::AdjustScore {
                    team_id,
                    delta,
                    reason,
                    reply,
                } => {
                    let _ = reply.send(self.adjust_score(&team_id, delta, reason));
                }
                EngineRequest::ResetScores { teams, reply } => {
                    let _ = reply.send(self.reset_scores(teams));
                }
                EngineRequest::DeleteTransaction { tx_id, reply } => {
                    let _ = reply.send(self.delete_transaction(tx_id));
                }
                EngineRequest::RegisterDevice { device, reply } => {
                    let _ = reply.send(self.register_device(device));
                }
                EngineRequest::MarkDeviceDisconnected { device_id } => {
                    self.mark_device_disconnected(&device_id);
                }
                EngineRequest::ResetDevice { device_id, reply } => {
                    let _ = reply.send(self.reset_device(&device_id));
                }
                EngineRequest::Heartbeat { device_id } => {
                    if let Some(device) = self.devices.get_mut(&device_id) {
                        device.touch_heartbeat();
                    }
                }
                EngineRequest::SweepHeartbeats { cutoff } => {
                    self.sweep_heartbeats(cutoff);
                }
                EngineRequest::SetEnvironment {
                    bluetooth,
                    audio,
                    lighting,
                    reply,
                } => {
                    if let Some(on) = bluetooth {
                        self.environment.bluetooth = on;
                    }
                    if let Some(on) = audio {
                        self.environment.audio = on;
                    }
                    if let Some(on) = lighting {
                        self.environment.lighting = on;
                    }
                    let _ = reply.send(self.environment.clone());
                }
                EngineRequest::Snapshot { device_id, reply } => {
                    let _ = reply.send(self.snapshot(device_id.as_deref()));
                }
                EngineRequest::Shutdown => break,
            }
        }
        info!("Session engine exiting");
    }

    fn emit(&self, event: DomainEvent) {
        if self.events.send(event).is_err() {
            warn!("No subscriber for domain events; event dropped");
        }
    }

    /// Write the authoritative state through the KV interface. Session state
    /// goes under both `session:current` and its own id; the projections and
    /// environment go under the game-state key. A storage failure is reported
    /// on the wire and the session keeps running; the in-memory state is
    /// still the truth.
    fn persist(&self) {
        if let Err(e) = self.try_persist() {
            error!(error = ?e, "Failed to persist state");
            self.emit(DomainEvent::ServiceError {
                service: "storage".to_string(),
                code: aln_rpc_common::ErrorCode::InternalError,
                message: e.to_string(),
            });
        }
    }

    fn try_persist(&self) -> Result<(), Error> {
        if let Some(session) = &self.session {
            let mut session = session.clone();
            session.devices = self.devices.clone();
            let value = serde_json::to_value(&session)?;
            self.kv.save(&session_key(&session.id), value.clone())?;
            self.kv.save(KEY_CURRENT_SESSION, value)?;
        } else {
            self.kv.delete(KEY_CURRENT_SESSION)?;
        }
        let mut scores: Vec<_> = self.scores.values().cloned().collect();
        scores.sort_by(|a, b| a.team_id.cmp(&b.team_id));
        self.kv.save(
            KEY_GAME_STATE,
            json!({"scores": scores, "environment": self.environment}),
        )?;
        Ok(())
    }

    fn create_session(
        &mut self,
        name: String,
        teams: Vec<String>,
    ) -> Result<Session, EngineError> {
        if self.session.as_ref().is_some_and(Session::is_open) {
            return Err(EngineError::SessionExists);
        }
        let session = Session::new(name, teams);
        self.scores = session
            .teams
            .iter()
            .map(|team| (team.clone(), TeamScore::new(team.clone())))
            .collect();
        info!(session = %session.id, name = session.name, teams = ?session.teams, "Session created");
        self.session = Some(session.clone());
        self.persist();
        self.emit(DomainEvent::SessionCreated(session.clone()));
        Ok(session)
    }

    fn end_session(&mut self) -> Result<Session, EngineError> {
        let Some(session) = self.session.as_mut().filter(|s| s.is_open()) else {
            return Err(EngineError::NoSession);
        };
        session.status = SessionStatus::Ended;
        session.end_time = Some(Utc::now());
        let ended = session.clone();
        info!(session = %ended.id, "Session ended");
        self.persist();
        // The ended session stays in storage under its id; there is no
        // current session any more.
        self.session = None;
        if let Err(e) = self.kv.delete(KEY_CURRENT_SESSION) {
            error!(error = ?e, "Failed to clear current-session key");
        }
        self.emit(DomainEvent::SessionUpdated(ended.clone()));
        Ok(ended)
    }

    fn set_session_status(&mut self, status: SessionStatus) -> Result<Session, EngineError> {
        let Some(session) = self.session.as_mut().filter(|s| s.is_open()) else {
            return Err(EngineError::NoSession);
        };
        session.status = status;
        let updated = session.clone();
        self.persist();
        self.emit(DomainEvent::SessionUpdated(updated.clone()));
        Ok(updated)
    }

    /// The scan decision path. One call is one critical section; everything
    /// from the guards through persistence happens before the next request is
    /// looked at.
    fn process_scan(&mut self, submit: &TransactionSubmit) -> Result<ScanOutcome, EngineError> {
        match self.session.as_ref().filter(|s| s.is_open()) {
            None => return Err(EngineError::NoSession),
            Some(s) if s.status == SessionStatus::Paused => {
                return Err(EngineError::SessionPaused);
            }
            Some(_) => {}
        }
        let catalog = self.catalog.clone();
        let session = self
            .session
            .as_mut()
            .expect("session presence checked above");

        let timestamp = submit.client_timestamp.unwrap_or_else(Utc::now);
        let mut transaction = Transaction {
            id: Uuid::new_v4(),
            token_id: submit.token_id.clone(),
            team_id: submit.team_id.clone(),
            device_id: submit.device_id.clone(),
            mode: submit.mode,
            status: TransactionStatus::Accepted,
            points: 0,
            timestamp,
            session_id: session.id,
            rejection_reason: None,
        };

        let token = catalog.get(&submit.token_id).cloned();
        let mut outcome = ScanOutcome {
            transaction: transaction.clone(),
            score: None,
            group_completed: None,
        };

        let Some(token) = token else {
            transaction.status = TransactionStatus::Rejected;
            transaction.rejection_reason = Some("unknown token".to_string());
            session.transactions.push(transaction.clone());
            outcome.transaction = transaction.clone();
            let session_id = session.id;
            self.persist();
            self.emit(DomainEvent::TransactionAdded {
                session_id,
                transaction,
                score: None,
            });
            return Ok(outcome);
        };

        if !session.teams.contains(&submit.team_id) {
            transaction.status = TransactionStatus::Rejected;
            transaction.rejection_reason = Some("team not in session".to_string());
            session.transactions.push(transaction.clone());
            outcome.transaction = transaction.clone();
            let session_id = session.id;
            self.persist();
            self.emit(DomainEvent::TransactionAdded {
                session_id,
                transaction,
                score: None,
            });
            return Ok(outcome);
        }

        // Duplicate detection is per device, never global: another GM may
        // still score this token for its own team.
        if session.device_has_scanned(&submit.device_id, &submit.token_id) {
            transaction.status = TransactionStatus::Duplicate;
            session.transactions.push(transaction.clone());
            outcome.transaction = transaction.clone();
            let session_id = session.id;
            self.persist();
            self.emit(DomainEvent::TransactionAdded {
                session_id,
                transaction,
                score: None,
            });
            return Ok(outcome);
        }

        if submit.mode == ScanMode::Detective {
            // Logged, not scored; the group tracker does not advance.
            session.transactions.push(transaction.clone());
            session.record_device_scan(&submit.device_id, &submit.token_id);
            outcome.transaction = transaction.clone();
            let session_id = session.id;
            self.persist();
            self.emit(DomainEvent::TransactionAdded {
                session_id,
                transaction,
                score: None,
            });
            return Ok(outcome);
        }

        transaction.points = token.value;
        session.transactions.push(transaction.clone());
        session.record_device_scan(&submit.device_id, &submit.token_id);

        let score = self
            .scores
            .entry(submit.team_id.clone())
            .or_insert_with(|| TeamScore::new(submit.team_id.clone()));
        score.base_score += transaction.points;
        score.tokens_scanned += 1;

        let mut completed = None;
        if let Some(group_id) = &token.group_id
            && !score.completed_groups.contains(group_id)
        {
            let scored = scoring::team_scored_tokens(session, &submit.team_id);
            if scoring::group_is_complete(&catalog, &scored, group_id) {
                let bonus = scoring::group_bonus(&catalog, group_id);
                score.bonus_points += bonus;
                score.completed_groups.push(group_id.clone());
                completed = Some(GroupCompletion {
                    group: group_id.clone(),
                    bonus_points: bonus,
                });
            }
        }
        score.refresh();

        let score = score.clone();
        let session_id = session.id;
        outcome.transaction = transaction.clone();
        outcome.score = Some(score.clone());
        outcome.group_completed = completed.clone();

        self.persist();
        self.emit(DomainEvent::TransactionAdded {
            session_id,
            transaction,
            score: Some(score),
        });
        if let Some(completion) = completed {
            self.emit(DomainEvent::GroupCompleted {
                session_id,
                team_id: submit.team_id.clone(),
                group: completion.group,
                bonus_points: completion.bonus_points,
                completed_at: Utc::now(),
            });
        }
        Ok(outcome)
    }

    /// Drain a client's offline queue in FIFO order. Domain rejections keep
    /// the drain going; a structural failure stops it and everything after it
    /// counts as failed.
    fn process_batch(&mut self, transactions: &[TransactionSubmit]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for (index, submit) in transactions.iter().enumerate() {
            match self.process_scan(submit) {
                Ok(scan) => {
                    outcome.processed += 1;
                    outcome.results.push(scan);
                }
                Err(e) => {
                    warn!(error = ?e, "Offline drain halted by structural failure");
                    outcome.failed = transactions.len() - index;
                    break;
                }
            }
        }
        outcome
    }

    fn adjust_score(
        &mut self,
        team_id: &str,
        delta: i64,
        reason: String,
    ) -> Result<TeamScore, EngineError> {
        let Some(session) = self.session.as_ref().filter(|s| s.is_open()) else {
            return Err(EngineError::NoSession);
        };
        let session_id = session.id;
        let score = self
            .scores
            .entry(team_id.to_string())
            .or_insert_with(|| TeamScore::new(team_id.to_string()));
        score.apply_adjustment(delta, reason);
        let score = score.clone();
        self.persist();
        self.emit(DomainEvent::ScoreAdjusted {
            session_id,
            score: score.clone(),
        });
        Ok(score)
    }

    fn reset_scores(&mut self, teams: Option<Vec<String>>) -> Result<Vec<String>, EngineError> {
        let Some(session) = self.session.as_mut().filter(|s| s.is_open()) else {
            return Err(EngineError::NoSession);
        };
        let targets = teams.unwrap_or_else(|| session.teams.clone());
        let now = Utc::now();
        for team in &targets {
            session.metadata.score_reset_at.insert(team.clone(), now);
            if let Some(score) = self.scores.get_mut(team) {
                score.reset();
            }
        }
        let session_id = session.id;
        info!(teams = ?targets, "Scores reset");
        self.persist();
        self.emit(DomainEvent::ScoresReset {
            session_id,
            teams: targets.clone(),
        });
        Ok(targets)
    }

    fn delete_transaction(&mut self, tx_id: Uuid) -> Result<(), EngineError> {
        let Some(session) = self.session.as_mut().filter(|s| s.is_open()) else {
            return Err(EngineError::NoSession);
        };
        let Some(index) = session.transactions.iter().position(|tx| tx.id == tx_id) else {
            return Err(EngineError::TransactionNotFound);
        };
        session.transactions.remove(index);
        session.metadata.scanned_tokens_by_device = scoring::rebuild_device_scan_sets(session);
        self.scores = scoring::recompute_scores(session, &self.catalog, &self.scores);
        let session_id = session.id;
        let mut scores: Vec<_> = self.scores.values().cloned().collect();
        scores.sort_by(|a, b| a.team_id.cmp(&b.team_id));
        info!(%tx_id, "Transaction deleted; projections recomputed");
        self.persist();
        self.emit(DomainEvent::TransactionDeleted {
            session_id,
            tx_id,
            scores,
        });
        Ok(())
    }

    fn register_device(&mut self, device: DeviceConnection) -> Result<bool, EngineError> {
        if let Some(existing) = self.devices.get(&device.id)
            && existing.is_connected()
        {
            return Err(EngineError::DeviceCollision(device.id));
        }
        let reconnection = self.devices.contains_key(&device.id);
        self.devices.insert(device.id.clone(), device.clone());
        if let Some(session) = self.session.as_mut().filter(|s| s.is_open()) {
            session.devices.insert(device.id.clone(), device.clone());
            self.persist();
        }
        self.emit(DomainEvent::DeviceConnected(device));
        Ok(reconnection)
    }

    fn mark_device_disconnected(&mut self, device_id: &str) {
        let Some(device) = self.devices.get_mut(device_id) else {
            return;
        };
        if !device.is_connected() {
            return;
        }
        device.connection_status = ConnectionStatus::Disconnected;
        if let Some(session) = self.session.as_mut()
            && let Some(session_device) = session.devices.get_mut(device_id)
        {
            session_device.connection_status = ConnectionStatus::Disconnected;
        }
        self.emit(DomainEvent::DeviceDisconnected {
            device_id: device_id.to_string(),
        });
    }

    /// Clear a device's duplicate-detection set, letting it rescan anything.
    fn reset_device(&mut self, device_id: &str) -> Result<(), EngineError> {
        if let Some(session) = self.session.as_mut().filter(|s| s.is_open()) {
            session.clear_device_scans(device_id);
            self.persist();
        }
        info!(device_id, "Device scan set cleared");
        Ok(())
    }

    fn sweep_heartbeats(&mut self, cutoff: DateTime<Utc>) {
        let stale: Vec<String> = self
            .devices
            .values()
            .filter(|d| d.is_connected() && d.last_heartbeat < cutoff)
            .map(|d| d.id.clone())
            .collect();
        for device_id in stale {
            warn!(device_id, "Heartbeat lapsed, marking device disconnected");
            self.mark_device_disconnected(&device_id);
        }
    }

    fn snapshot(&self, device_id: Option<&str>) -> EngineSnapshot {
        let session = self
            .session
            .as_ref()
            .filter(|s| s.is_open())
            .map(|s| {
                let mut session = s.clone();
                session.devices = self.devices.clone();
                session
            });

        let mut scores: Vec<_> = self.scores.values().cloned().collect();
        scores.sort_by(|a, b| a.team_id.cmp(&b.team_id));

        let recent_transactions = session
            .as_ref()
            .map(|s| {
                let transactions = &s.transactions;
                let start = transactions.len().saturating_sub(RECENT_TRANSACTIONS);
                transactions[start..].to_vec()
            })
            .unwrap_or_default();

        let mut devices: Vec<_> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));

        let device_scanned_tokens = match (&session, device_id) {
            (Some(session), Some(device_id)) => session.scanned_tokens_for(device_id),
            _ => Vec::new(),
        };

        EngineSnapshot {
            session,
            scores,
            recent_transactions,
            devices,
            environment: self.environment.clone(),
            device_scanned_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKv;
    use aln_common::{DeviceType, MediaAssets, TokenDef};
    use pretty_assertions::assert_eq;

    fn catalog() -> Arc<TokenCatalog> {
        let group = |id: &str, value: i64| TokenDef {
            id: id.to_string(),
            value,
            memory_type: "Personal".to_string(),
            group_id: Some("Marcus Sucks".to_string()),
            group_multiplier: Some(2),
            media_assets: MediaAssets::default(),
        };
        Arc::new(TokenCatalog::new([
            TokenDef {
                id: "jaw001".to_string(),
                value: 500,
                memory_type: "Personal".to_string(),
                group_id: None,
                group_multiplier: None,
                media_assets: MediaAssets::default(),
            },
            TokenDef {
                id: "rat001".to_string(),
                value: 250,
                memory_type: "Technical".to_string(),
                group_id: None,
                group_multiplier: None,
                media_assets: MediaAssets::default(),
            },
            group("g1", 1000),
            group("g2", 2000),
            group("g3", 4000),
        ]))
    }

    fn engine() -> (SessionEngine, Receiver<DomainEvent>) {
        let (events, events_rx) = flume::unbounded();
        let engine = SessionEngine::new(catalog(), Arc::new(MemoryKv::new()), events).unwrap();
        (engine, events_rx)
    }

    fn submit(token: &str, team: &str, device: &str, mode: ScanMode) -> TransactionSubmit {
        TransactionSubmit {
            token_id: token.to_string(),
            team_id: team.to_string(),
            device_id: device.to_string(),
            mode,
            client_timestamp: None,
        }
    }

    fn active_engine() -> (SessionEngine, Receiver<DomainEvent>) {
        let (mut engine, events) = engine();
        engine
            .create_session("test".to_string(), vec!["001".to_string(), "002".to_string()])
            .unwrap();
        // Consume the creation event so tests observe only what they cause.
        let _ = events.try_recv();
        (engine, events)
    }

    #[test]
    fn basic_accepted_scan_scores_the_team() {
        let (mut engine, events) = active_engine();
        let outcome = engine
            .process_scan(&submit("jaw001", "001", "GM_A", ScanMode::Blackmarket))
            .unwrap();
        assert_eq!(outcome.transaction.status, TransactionStatus::Accepted);
        assert_eq!(outcome.transaction.points, 500);
        let score = outcome.score.unwrap();
        assert_eq!(score.current_score, 500);
        assert_eq!(score.base_score, 500);
        assert_eq!(score.bonus_points, 0);

        let Ok(DomainEvent::TransactionAdded { transaction, score, .. }) = events.try_recv() else {
            panic!("expected a transaction event");
        };
        assert_eq!(transaction.points, 500);
        assert!(score.is_some());
    }

    #[test]
    fn duplicate_is_per_device_not_global() {
        let (mut engine, _events) = active_engine();
        engine
            .process_scan(&submit("jaw001", "001", "GM_A", ScanMode::Blackmarket))
            .unwrap();

        // Same device again: duplicate, no score change.
        let dup = engine
            .process_scan(&submit("jaw001", "001", "GM_A", ScanMode::Blackmarket))
            .unwrap();
        assert_eq!(dup.transaction.status, TransactionStatus::Duplicate);
        assert_eq!(dup.transaction.points, 0);
        assert_eq!(dup.score, None);
        assert_eq!(engine.scores["001"].current_score, 500);

        // A different GM scoring the same token for the same team is allowed.
        let other = engine
            .process_scan(&submit("jaw001", "001", "GM_B", ScanMode::Blackmarket))
            .unwrap();
        assert_eq!(other.transaction.status, TransactionStatus::Accepted);
        assert_eq!(other.transaction.points, 500);
        assert_eq!(engine.scores["001"].current_score, 1000);
    }

    #[test]
    fn unknown_token_is_rejected_outcome_not_error() {
        let (mut engine, _events) = active_engine();
        let outcome = engine
            .process_scan(&submit("nope", "001", "GM_A", ScanMode::Blackmarket))
            .unwrap();
        assert_eq!(outcome.transaction.status, TransactionStatus::Rejected);
        assert_eq!(outcome.transaction.points, 0);
        assert_eq!(
            outcome.transaction.rejection_reason.as_deref(),
            Some("unknown token")
        );
    }

    #[test]
    fn detective_mode_logs_without_scoring_or_group_progress() {
        let (mut engine, _events) = active_engine();
        for token in ["g1", "g2", "g3"] {
            let outcome = engine
                .process_scan(&submit(token, "002", "GM_A", ScanMode::Detective))
                .unwrap();
            assert_eq!(outcome.transaction.status, TransactionStatus::Accepted);
            assert_eq!(outcome.transaction.points, 0);
            assert_eq!(outcome.score, None);
        }
        assert_eq!(engine.scores["002"].current_score, 0);
        assert!(engine.scores["002"].completed_groups.is_empty());
        // The detective scans still occupy the device's duplicate set.
        let dup = engine
            .process_scan(&submit("g1", "002", "GM_A", ScanMode::Blackmarket))
            .unwrap();
        assert_eq!(dup.transaction.status, TransactionStatus::Duplicate);
    }

    #[test]
    fn group_completion_awards_bonus_across_devices() {
        let (mut engine, events) = active_engine();
        engine
            .process_scan(&submit("g1", "002", "GM_A", ScanMode::Blackmarket))
            .unwrap();
        engine
            .process_scan(&submit("g2", "002", "GM_B", ScanMode::Blackmarket))
            .unwrap();
        let last = engine
            .process_scan(&submit("g3", "002", "GM_A", ScanMode::Blackmarket))
            .unwrap();

        let completion = last.group_completed.unwrap();
        assert_eq!(completion.group, "Marcus Sucks");
        assert_eq!(completion.bonus_points, 7000);

        let score = &engine.scores["002"];
        assert_eq!(score.base_score, 7000);
        assert_eq!(score.bonus_points, 7000);
        assert_eq!(score.current_score, 14000);
        assert_eq!(score.completed_groups, vec!["Marcus Sucks".to_string()]);

        // transaction + score events for three scans, then the group event.
        let collected: Vec<_> = events.drain().collect();
        assert!(matches!(
            collected.last(),
            Some(DomainEvent::GroupCompleted { bonus_points: 7000, .. })
        ));
    }

    #[test]
    fn scans_fail_structurally_without_session_or_while_paused() {
        let (mut engine, _events) = engine();
        let err = engine
            .process_scan(&submit("jaw001", "001", "GM_A", ScanMode::Blackmarket))
            .unwrap_err();
        assert_eq!(err, EngineError::NoSession);

        engine
            .create_session("s".to_string(), vec!["001".to_string()])
            .unwrap();
        engine.set_session_status(SessionStatus::Paused).unwrap();
        let err = engine
            .process_scan(&submit("jaw001", "001", "GM_A", ScanMode::Blackmarket))
            .unwrap_err();
        assert_eq!(err, EngineError::SessionPaused);

        engine.set_session_status(SessionStatus::Active).unwrap();
        assert!(engine
            .process_scan(&submit("jaw001", "001", "GM_A", ScanMode::Blackmarket))
            .is_ok());
    }

    #[test]
    fn second_session_is_refused_until_first_ends() {
        let (mut engine, _events) = active_engine();
        let err = engine
            .create_session("another".to_string(), vec!["003".to_string()])
            .unwrap_err();
        assert_eq!(err, EngineError::SessionExists);

        engine.end_session().unwrap();
        assert!(engine
            .create_session("another".to_string(), vec!["003".to_string()])
            .is_ok());
    }

    #[test]
    fn offline_drain_dedupes_against_the_server_set() {
        let (mut engine, _events) = active_engine();
        let batch = vec![
            submit("jaw001", "001", "GM_A", ScanMode::Blackmarket),
            submit("rat001", "001", "GM_A", ScanMode::Blackmarket),
            submit("jaw001", "001", "GM_A", ScanMode::Blackmarket),
        ];
        let outcome = engine.process_batch(&batch);
        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.failed, 0);
        let statuses: Vec<_> = outcome
            .results
            .iter()
            .map(|r| r.transaction.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                TransactionStatus::Accepted,
                TransactionStatus::Accepted,
                TransactionStatus::Duplicate
            ]
        );
        assert_eq!(engine.scores["001"].current_score, 750);
    }

    #[test]
    fn drain_halts_on_structural_failure() {
        let (mut engine, _events) = active_engine();
        engine.set_session_status(SessionStatus::Paused).unwrap();
        let batch = vec![
            submit("jaw001", "001", "GM_A", ScanMode::Blackmarket),
            submit("rat001", "001", "GM_A", ScanMode::Blackmarket),
        ];
        let outcome = engine.process_batch(&batch);
        assert_eq!(outcome.processed, 0);
        assert_eq!(outcome.failed, 2);
    }

    #[test]
    fn delete_transaction_recomputes_and_revokes_bonus() {
        let (mut engine, _events) = active_engine();
        for token in ["g1", "g2", "g3"] {
            engine
                .process_scan(&submit(token, "002", "GM_A", ScanMode::Blackmarket))
                .unwrap();
        }
        assert_eq!(engine.scores["002"].current_score, 14000);
        let victim = engine.session.as_ref().unwrap().transactions[1].id;

        engine.delete_transaction(victim).unwrap();
        let score = &engine.scores["002"];
        assert_eq!(score.base_score, 5000);
        assert_eq!(score.bonus_points, 0);
        assert!(score.completed_groups.is_empty());
        // The device may rescan the deleted token now.
        let rescan = engine
            .process_scan(&submit("g2", "002", "GM_A", ScanMode::Blackmarket))
            .unwrap();
        assert_eq!(rescan.transaction.status, TransactionStatus::Accepted);
        assert_eq!(engine.scores["002"].current_score, 14000);
    }

    #[test]
    fn reset_zeroes_scores_and_later_recomputes_stay_zeroed() {
        let (mut engine, _events) = active_engine();
        engine
            .process_scan(&submit("jaw001", "001", "GM_A", ScanMode::Blackmarket))
            .unwrap();
        engine
            .process_scan(&submit("rat001", "002", "GM_B", ScanMode::Blackmarket))
            .unwrap();
        engine.reset_scores(Some(vec!["001".to_string()])).unwrap();
        assert_eq!(engine.scores["001"].current_score, 0);
        assert_eq!(engine.scores["002"].current_score, 250);

        // A delete triggers a full recompute; the reset must hold.
        let victim = engine.session.as_ref().unwrap().transactions[1].id;
        engine.delete_transaction(victim).unwrap();
        assert_eq!(engine.scores["001"].current_score, 0);
        assert_eq!(engine.scores["002"].current_score, 0);
    }

    #[test]
    fn adjustment_flows_into_current_score() {
        let (mut engine, events) = active_engine();
        let score = engine
            .adjust_score("001", -500, "penalty".to_string())
            .unwrap();
        assert_eq!(score.current_score, -500);
        assert!(matches!(
            events.try_recv(),
            Ok(DomainEvent::ScoreAdjusted { .. })
        ));
    }

    #[test]
    fn device_collision_only_applies_to_connected_devices() {
        let (mut engine, _events) = active_engine();
        let device = DeviceConnection::new("GM_A", DeviceType::Gm, None);
        assert_eq!(engine.register_device(device.clone()).unwrap(), false);

        let err = engine
            .register_device(DeviceConnection::new("GM_A", DeviceType::Gm, None))
            .unwrap_err();
        assert_eq!(err, EngineError::DeviceCollision("GM_A".to_string()));

        engine.mark_device_disconnected("GM_A");
        let reconnection = engine
            .register_device(DeviceConnection::new("GM_A", DeviceType::Gm, None))
            .unwrap();
        assert!(reconnection);
    }

    #[test]
    fn heartbeat_sweep_disconnects_stale_devices() {
        let (mut engine, events) = active_engine();
        engine
            .register_device(DeviceConnection::new("GM_A", DeviceType::Gm, None))
            .unwrap();
        let _ = events.drain().count();

        engine.sweep_heartbeats(Utc::now() + chrono::Duration::seconds(1));
        assert!(!engine.devices["GM_A"].is_connected());
        assert!(matches!(
            events.try_recv(),
            Ok(DomainEvent::DeviceDisconnected { .. })
        ));
    }

    #[test]
    fn snapshot_scopes_scan_sets_to_the_requested_device() {
        let (mut engine, _events) = active_engine();
        engine
            .process_scan(&submit("jaw001", "001", "GM_A", ScanMode::Blackmarket))
            .unwrap();
        engine
            .process_scan(&submit("rat001", "002", "GM_B", ScanMode::Blackmarket))
            .unwrap();

        let snap = engine.snapshot(Some("GM_A"));
        assert_eq!(snap.device_scanned_tokens, vec!["jaw001".to_string()]);
        let snap = engine.snapshot(Some("GM_B"));
        assert_eq!(snap.device_scanned_tokens, vec!["rat001".to_string()]);
        let snap = engine.snapshot(None);
        assert!(snap.device_scanned_tokens.is_empty());
    }

    #[test]
    fn ended_session_disappears_from_snapshots() {
        let (mut engine, _events) = active_engine();
        engine.end_session().unwrap();
        let snap = engine.snapshot(None);
        assert!(snap.session.is_none());
        assert_eq!(
            engine.create_session("next".to_string(), vec!["001".to_string()]),
            Ok(engine.session.clone().unwrap())
        );
    }

    #[test]
    fn state_survives_an_engine_restart() {
        let kv = Arc::new(MemoryKv::new());
        let (events, _events_rx) = flume::unbounded();
        let mut engine =
            SessionEngine::new(catalog(), kv.clone(), events.clone()).unwrap();
        engine
            .create_session("persisted".to_string(), vec!["001".to_string()])
            .unwrap();
        engine
            .process_scan(&submit("jaw001", "001", "GM_A", ScanMode::Blackmarket))
            .unwrap();
        drop(engine);

        let engine = SessionEngine::new(catalog(), kv, events).unwrap();
        let session = engine.session.as_ref().unwrap();
        assert_eq!(session.name, "persisted");
        assert_eq!(session.transactions.len(), 1);
        // Projections come from replay, not from disk.
        assert_eq!(engine.scores["001"].current_score, 500);
        assert!(session.device_has_scanned("GM_A", "jaw001"));
    }

    #[test]
    fn adjustments_and_environment_survive_a_restart() {
        let kv = Arc::new(MemoryKv::new());
        let (events, _events_rx) = flume::unbounded();
        let mut engine =
            SessionEngine::new(catalog(), kv.clone(), events.clone()).unwrap();
        engine
            .create_session("persisted".to_string(), vec!["001".to_string()])
            .unwrap();
        engine
            .process_scan(&submit("jaw001", "001", "GM_A", ScanMode::Blackmarket))
            .unwrap();
        engine
            .adjust_score("001", -200, "penalty".to_string())
            .unwrap();
        engine.environment.bluetooth = true;
        engine.environment.lighting = false;
        engine.persist();
        drop(engine);

        // Adjustments are not derivable from the log; the restart must fold
        // the persisted game state back into the replay.
        let engine = SessionEngine::new(catalog(), kv, events).unwrap();
        let score = &engine.scores["001"];
        assert_eq!(score.base_score, 500);
        assert_eq!(score.admin_adjustments.len(), 1);
        assert_eq!(score.current_score, 300);
        assert!(engine.environment.bluetooth);
        assert!(!engine.environment.lighting);
        assert!(engine.environment.audio);
    }
}
