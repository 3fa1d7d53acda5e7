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
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use aln_common::TokenCatalog;
use aln_rpc_common::{ErrorCode, VideoStatusPayload, VideoWireStatus};

use crate::events::DomainEvent;

pub use player::{MockPlayer, PlayerClient, PlayerError, PlayerState, PlayerStatus, VlcHttpPlayer};

pub mod player;

/// Assumed playback length when the player cannot tell us, so conflict
/// wait-time hints and logical completion still work in degraded mode.
const FALLBACK_DURATION_SECS: i64 = 30;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoItemStatus {
    Pending,
    Loading,
    Playing,
    Paused,
    Completed,
    Failed,
}

/// One queued or playing video. At most one item across the queue is in
/// `Playing`/`Paused` at any instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoQueueItem {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    pub video_path: String,
    pub requested_by: String,
    pub status: VideoItemStatus,
    pub request_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VideoQueueItem {
    fn new(token_id: Option<String>, video_path: String, requested_by: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            token_id,
            video_path,
            requested_by,
            status: VideoItemStatus::Pending,
            request_time: Utc::now(),
            playback_start: None,
            playback_end: None,
            error: None,
        }
    }
}

/// What to do when an enqueue collides with a playing video. Player scans
/// fail fast; admin requests line up.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EnqueuePolicy {
    RejectIfBusy,
    Append,
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum VideoError {
    #[error("Video playing")]
    Busy { wait_time: i64 },
    #[error("Nothing is playing")]
    NothingPlaying,
    #[error("Token has no video asset: {0}")]
    NoVideo(String),
    #[error("Unknown video control command: {0}")]
    UnknownCommand(String),
    #[error("Video queue is not running")]
    Unavailable,
}

impl VideoError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            VideoError::Busy { .. } => ErrorCode::VideoBusy,
            VideoError::Unavailable => ErrorCode::InternalError,
            _ => ErrorCode::ValidationError,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VideoControl {
    Play { token_id: Option<String> },
    Pause,
    Resume,
    Stop,
    Skip,
}

impl VideoControl {
    /// Parse the `{command, tokenId?}` form of `POST /api/video/control`.
    pub fn parse(command: &str, token_id: Option<String>) -> Result<Self, VideoError> {
        match command {
            "play" => Ok(VideoControl::Play { token_id }),
            "pause" => Ok(VideoControl::Pause),
            "resume" => Ok(VideoControl::Resume),
            "stop" => Ok(VideoControl::Stop),
            "skip" => Ok(VideoControl::Skip),
            other => Err(VideoError::UnknownCommand(other.to_string())),
        }
    }
}

enum VideoRequest {
    Enqueue {
        token_id: Option<String>,
        video_path: String,
        requested_by: String,
        policy: EnqueuePolicy,
        reply: oneshot::Sender<Result<usize, VideoError>>,
    },
    Control {
        control: VideoControl,
        reply: oneshot::Sender<Result<VideoStatusPayload, VideoError>>,
    },
    Reorder {
        order: Vec<Uuid>,
        reply: oneshot::Sender<()>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<VideoStatusPayload>,
    },
}

/// Cloneable handle to the video worker.
#[derive(Clone)]
pub struct VideoHandle {
    send: Sender<VideoRequest>,
}

impl VideoHandle {
    pub async fn enqueue(
        &self,
        token_id: Option<String>,
        video_path: String,
        requested_by: String,
        policy: EnqueuePolicy,
    ) -> Result<usize, VideoError> {
        let (tx, rx) = oneshot::channel();
        if self
            .send
            .send(VideoRequest::Enqueue {
                token_id,
                video_path,
                requested_by,
                policy,
                reply: tx,
            })
            .is_err()
        {
            return Err(VideoError::Unavailable);
        }
        rx.await.unwrap_or(Err(VideoError::Unavailable))
    }

    pub async fn control(&self, control: VideoControl) -> Result<VideoStatusPayload, VideoError> {
        let (tx, rx) = oneshot::channel();
        if self
            .send
            .send(VideoRequest::Control { control, reply: tx })
            .is_err()
        {
            return Err(VideoError::Unavailable);
        }
        rx.await.unwrap_or(Err(VideoError::Unavailable))
    }

    pub async fn reorder(&self, order: Vec<Uuid>) {
        let (tx, rx) = oneshot::channel();
        if self
            .send
            .send(VideoRequest::Reorder { order, reply: tx })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub async fn clear(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send.send(VideoRequest::Clear { reply: tx }).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn status(&self) -> VideoStatusPayload {
        let (tx, rx) = oneshot::channel();
        if self.send.send(VideoRequest::Status { reply: tx }).is_err() {
            return VideoStatusPayload::idle();
        }
        rx.await.unwrap_or_else(|_| VideoStatusPayload::idle())
    }

    /// Blocking variant for non-async callers (the fabric bridge thread).
    pub fn status_blocking(&self) -> VideoStatusPayload {
        let (tx, rx) = oneshot::channel();
        if self.send.send(VideoRequest::Status { reply: tx }).is_err() {
            return VideoStatusPayload::idle();
        }
        rx.recv().unwrap_or_else(|_| VideoStatusPayload::idle())
    }
}

/// Single-resource scheduler for the external player. Owns the queue; admin
/// commands and scans enqueue requests to it, and it alone talks to the
/// player. Unreachable player flips it into degraded mode: the logical queue
/// keeps advancing on the fallback clock so UIs stay consistent.
pub struct VideoQueue {
    player: PlayerClient,
    catalog: Arc<TokenCatalog>,
    events: Sender<DomainEvent>,
    queue: VecDeque<VideoQueueItem>,
    current: Option<VideoQueueItem>,
    expected_end: Option<DateTime<Utc>>,
    degraded: bool,
    wire_status: VideoWireStatus,
}

impl VideoQueue {
    pub fn new(
        player: PlayerClient,
        catalog: Arc<TokenCatalog>,
        events: Sender<DomainEvent>,
    ) -> Self {
        Self {
            player,
            catalog,
            events,
            queue: VecDeque::new(),
            current: None,
            expected_end: None,
            degraded: false,
            wire_status: VideoWireStatus::Idle,
        }
    }

    pub fn spawn(
        player: PlayerClient,
        catalog: Arc<TokenCatalog>,
        events: Sender<DomainEvent>,
    ) -> (VideoHandle, tokio::task::JoinHandle<()>) {
        let queue = Self::new(player, catalog, events);
        let (sender, receiver) = flume::unbounded();
        let join_handle = tokio::spawn(queue.run(receiver));
        (VideoHandle { send: sender }, join_handle)
    }

    async fn run(mut self, receiver: Receiver<VideoRequest>) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Video queue running");
        loop {
            tokio::select! {
                request = receiver.recv_async() => {
                    let Ok(request) = request else { break };
                    self.handle(request).await;
                }
                _ = tick.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("Video queue exiting");
    }

    async fn handle(&mut self, request: VideoRequest) {
        match request {
            VideoRequest::Enqueue {
                token_id,
                video_path,
                requested_by,
                policy,
                reply,
            } => {
                let _ = reply.send(
                    self.enqueue(token_id, video_path, requested_by, policy)
                        .await,
                );
            }
            VideoRequest::Control { control, reply } => {
                let _ = reply.send(self.control(control).await);
            }
            VideoRequest::Reorder { order, reply } => {
                self.reorder(&order);
                let _ = reply.send(());
            }
            VideoRequest::Clear { reply } => {
                self.queue.clear();
                self.emit(self.wire_status);
                let _ = reply.send(());
            }
            VideoRequest::Status { reply } => {
                let _ = reply.send(self.status_payload());
            }
        }
    }

    fn busy(&self) -> bool {
        self.current.as_ref().is_some_and(|c| {
            matches!(
                c.status,
                VideoItemStatus::Loading | VideoItemStatus::Playing | VideoItemStatus::Paused
            )
        })
    }

    /// Seconds until the current item is expected to finish, clamped to zero.
    fn wait_time(&self) -> i64 {
        self.expected_end
            .map(|end| (end - Utc::now()).num_seconds().max(0))
            .unwrap_or(0)
    }

    fn status_payload(&self) -> VideoStatusPayload {
        VideoStatusPayload {
            status: self.wire_status,
            token_id: self.current.as_ref().and_then(|c| c.token_id.clone()),
            video_path: self.current.as_ref().map(|c| c.video_path.clone()),
            queue_length: self.queue.len(),
            degraded: self.degraded,
            expected_end_time: self.expected_end,
        }
    }

    fn emit(&mut self, status: VideoWireStatus) {
        self.wire_status = status;
        let payload = self.status_payload();
        if self.events.send(DomainEvent::VideoStatus(payload)).is_err() {
            warn!("No subscriber for video status events");
        }
    }

    async fn enqueue(
        &mut self,
        token_id: Option<String>,
        video_path: String,
        requested_by: String,
        policy: EnqueuePolicy,
    ) -> Result<usize, VideoError> {
        if self.busy() && policy == EnqueuePolicy::RejectIfBusy {
            return Err(VideoError::Busy {
                wait_time: self.wait_time(),
            });
        }
        self.queue
            .push_back(VideoQueueItem::new(token_id, video_path, requested_by));
        let position = self.queue.len() - 1;
        if !self.busy() {
            self.start_next().await;
        } else {
            self.emit(self.wire_status);
        }
        Ok(position)
    }

    async fn start_next(&mut self) {
        let Some(mut item) = self.queue.pop_front() else {
            self.current = None;
            self.expected_end = None;
            self.emit(VideoWireStatus::Idle);
            return;
        };
        item.status = VideoItemStatus::Loading;
        let path = item.video_path.clone();
        self.current = Some(item);
        self.emit(VideoWireStatus::Loading);

        let now = Utc::now();
        match self.player.play(&path).await {
            Ok(()) => {
                self.degraded = false;
                let length = match self.player.status().await {
                    Ok(status) => status.length_secs.unwrap_or(FALLBACK_DURATION_SECS),
                    Err(_) => FALLBACK_DURATION_SECS,
                };
                self.expected_end = Some(now + chrono::Duration::seconds(length));
            }
            Err(e) => {
                // Degraded: playback proceeds on the logical clock only.
                warn!(error = ?e, "Player unreachable, running queue degraded");
                self.degraded = true;
                self.expected_end = Some(now + chrono::Duration::seconds(FALLBACK_DURATION_SECS));
            }
        }
        if let Some(current) = self.current.as_mut() {
            current.status = VideoItemStatus::Playing;
            current.playback_start = Some(now);
        }
        self.emit(VideoWireStatus::Started);
    }

    fn finish_current(&mut self, status: VideoItemStatus, wire: VideoWireStatus) {
        if let Some(mut current) = self.current.take() {
            current.status = status;
            current.playback_end = Some(Utc::now());
            self.expected_end = None;
            self.current = Some(current);
            self.emit(wire);
            self.current = None;
        }
    }

    async fn control(&mut self, control: VideoControl) -> Result<VideoStatusPayload, VideoError> {
        match control {
            VideoControl::Play { token_id: Some(token_id) } => {
                let Some(path) = self
                    .catalog
                    .get(&token_id)
                    .and_then(|t| t.video_path())
                    .map(str::to_string)
                else {
                    return Err(VideoError::NoVideo(token_id));
                };
                self.enqueue(
                    Some(token_id),
                    path,
                    "admin".to_string(),
                    EnqueuePolicy::Append,
                )
                .await?;
            }
            VideoControl::Play { token_id: None } => {
                let paused = self
                    .current
                    .as_ref()
                    .is_some_and(|c| c.status == VideoItemStatus::Paused);
                if paused {
                    if let Some(current) = self.current.as_mut() {
                        current.status = VideoItemStatus::Playing;
                    }
                    if self.player.resume().await.is_err() {
                        self.degraded = true;
                    }
                    self.emit(VideoWireStatus::Resumed);
                } else if !self.busy() {
                    self.start_next().await;
                }
            }
            VideoControl::Pause => {
                let Some(current) = self
                    .current
                    .as_mut()
                    .filter(|c| c.status == VideoItemStatus::Playing)
                else {
                    return Err(VideoError::NothingPlaying);
                };
                current.status = VideoItemStatus::Paused;
                if self.player.pause().await.is_err() {
                    self.degraded = true;
                }
                self.emit(VideoWireStatus::Paused);
            }
            VideoControl::Resume => {
                let Some(current) = self
                    .current
                    .as_mut()
                    .filter(|c| c.status == VideoItemStatus::Paused)
                else {
                    return Err(VideoError::NothingPlaying);
                };
                current.status = VideoItemStatus::Playing;
                if self.player.resume().await.is_err() {
                    self.degraded = true;
                }
                self.emit(VideoWireStatus::Resumed);
            }
            VideoControl::Stop => {
                if self.current.is_none() {
                    return Err(VideoError::NothingPlaying);
                }
                if self.player.stop().await.is_err() {
                    self.degraded = true;
                }
                self.finish_current(VideoItemStatus::Completed, VideoWireStatus::Completed);
                self.emit(VideoWireStatus::Idle);
            }
            VideoControl::Skip => {
                if self.current.is_none() {
                    return Err(VideoError::NothingPlaying);
                }
                if self.player.stop().await.is_err() {
                    self.degraded = true;
                }
                self.finish_current(VideoItemStatus::Completed, VideoWireStatus::Completed);
                self.start_next().await;
            }
        }
        Ok(self.status_payload())
    }

    fn reorder(&mut self, order: &[Uuid]) {
        let mut reordered = VecDeque::with_capacity(self.queue.len());
        for id in order {
            if let Some(index) = self.queue.iter().position(|item| item.id == *id) {
                if let Some(item) = self.queue.remove(index) {
                    reordered.push_back(item);
                }
            }
        }
        // Anything the new order didn't mention keeps its relative position
        // at the tail.
        reordered.extend(self.queue.drain(..));
        self.queue = reordered;
        self.emit(self.wire_status);
    }

    /// Periodic reconciliation against the external player.
    async fn tick(&mut self) {
        let was_degraded = self.degraded;
        match self.player.status().await {
            Ok(status) => {
                self.degraded = false;
                let playing = self
                    .current
                    .as_ref()
                    .is_some_and(|c| c.status == VideoItemStatus::Playing);
                if playing {
                    if status.state == PlayerState::Stopped {
                        self.finish_current(VideoItemStatus::Completed, VideoWireStatus::Completed);
                        self.start_next().await;
                    } else if let (Some(length), Some(time)) =
                        (status.length_secs, status.time_secs)
                    {
                        let remaining = (length - time).max(0);
                        self.expected_end =
                            Some(Utc::now() + chrono::Duration::seconds(remaining));
                    }
                }
            }
            Err(_) => {
                self.degraded = true;
                // Advance the logical queue on the fallback clock.
                let overdue = self.busy() && self.expected_end.is_some_and(|end| end <= Utc::now());
                if overdue {
                    self.finish_current(VideoItemStatus::Completed, VideoWireStatus::Completed);
                    self.start_next().await;
                }
            }
        }
        if was_degraded != self.degraded {
            self.emit(self.wire_status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aln_common::{MediaAssets, TokenDef};
    use pretty_assertions::assert_eq;

    fn catalog() -> Arc<TokenCatalog> {
        Arc::new(TokenCatalog::new([TokenDef {
            id: "jaw001".to_string(),
            value: 500,
            memory_type: "Personal".to_string(),
            group_id: None,
            group_multiplier: None,
            media_assets: MediaAssets {
                image: None,
                audio: None,
                video: Some("vid1.mp4".to_string()),
            },
        }]))
    }

    fn queue() -> (VideoQueue, MockPlayer, Receiver<DomainEvent>) {
        let player = MockPlayer::new();
        let (events, events_rx) = flume::unbounded();
        let queue = VideoQueue::new(PlayerClient::Mock(player.clone()), catalog(), events);
        (queue, player, events_rx)
    }

    #[tokio::test]
    async fn player_scan_conflicts_fail_fast_with_wait_time() {
        let (mut queue, player, _events) = queue();
        player.set_length(12);
        queue
            .enqueue(
                Some("jaw001".to_string()),
                "vid1.mp4".to_string(),
                "PLAYER_1".to_string(),
                EnqueuePolicy::RejectIfBusy,
            )
            .await
            .unwrap();

        let err = queue
            .enqueue(
                None,
                "vid2.mp4".to_string(),
                "PLAYER_2".to_string(),
                EnqueuePolicy::RejectIfBusy,
            )
            .await
            .unwrap_err();
        let VideoError::Busy { wait_time } = err else {
            panic!("expected a busy rejection");
        };
        assert!((0..=12).contains(&wait_time));
        // The rejected scan was not enqueued.
        assert_eq!(queue.queue.len(), 0);
    }

    #[tokio::test]
    async fn at_most_one_item_plays() {
        let (mut queue, _player, _events) = queue();
        queue
            .enqueue(None, "a.mp4".into(), "admin".into(), EnqueuePolicy::Append)
            .await
            .unwrap();
        queue
            .enqueue(None, "b.mp4".into(), "admin".into(), EnqueuePolicy::Append)
            .await
            .unwrap();

        assert_eq!(
            queue.current.as_ref().unwrap().status,
            VideoItemStatus::Playing
        );
        assert_eq!(queue.queue.len(), 1);
        assert_eq!(queue.queue[0].status, VideoItemStatus::Pending);
    }

    #[tokio::test]
    async fn skip_completes_current_and_starts_next() {
        let (mut queue, _player, _events) = queue();
        queue
            .enqueue(None, "a.mp4".into(), "admin".into(), EnqueuePolicy::Append)
            .await
            .unwrap();
        queue
            .enqueue(None, "b.mp4".into(), "admin".into(), EnqueuePolicy::Append)
            .await
            .unwrap();

        let status = queue.control(VideoControl::Skip).await.unwrap();
        assert_eq!(status.status, VideoWireStatus::Started);
        assert_eq!(queue.current.as_ref().unwrap().video_path, "b.mp4");
        assert_eq!(queue.queue.len(), 0);
    }

    #[tokio::test]
    async fn unreachable_player_degrades_but_keeps_queueing() {
        let (mut queue, player, _events) = queue();
        player.set_reachable(false);
        queue
            .enqueue(None, "a.mp4".into(), "admin".into(), EnqueuePolicy::Append)
            .await
            .unwrap();

        let payload = queue.status_payload();
        assert!(payload.degraded);
        assert_eq!(payload.status, VideoWireStatus::Started);
        assert!(payload.expected_end_time.is_some());
    }

    #[tokio::test]
    async fn tick_completes_when_player_reports_stopped() {
        let (mut queue, player, events) = queue();
        queue
            .enqueue(None, "a.mp4".into(), "admin".into(), EnqueuePolicy::Append)
            .await
            .unwrap();
        player.finish_playback();
        queue.tick().await;

        assert!(queue.current.is_none());
        let statuses: Vec<VideoWireStatus> = events
            .drain()
            .filter_map(|e| match e {
                DomainEvent::VideoStatus(p) => Some(p.status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                VideoWireStatus::Loading,
                VideoWireStatus::Started,
                VideoWireStatus::Completed,
                VideoWireStatus::Idle
            ]
        );
    }

    #[tokio::test]
    async fn pause_and_resume_are_playing_substates() {
        let (mut queue, _player, _events) = queue();
        queue
            .enqueue(None, "a.mp4".into(), "admin".into(), EnqueuePolicy::Append)
            .await
            .unwrap();

        let status = queue.control(VideoControl::Pause).await.unwrap();
        assert_eq!(status.status, VideoWireStatus::Paused);
        let status = queue.control(VideoControl::Resume).await.unwrap();
        assert_eq!(status.status, VideoWireStatus::Resumed);

        let err = queue.control(VideoControl::Resume).await.unwrap_err();
        assert_eq!(err, VideoError::NothingPlaying);
    }

    #[tokio::test]
    async fn play_by_token_resolves_catalog_video() {
        let (mut queue, player, _events) = queue();
        queue
            .control(VideoControl::Play {
                token_id: Some("jaw001".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(player.playing_path().as_deref(), Some("vid1.mp4"));

        let err = queue
            .control(VideoControl::Play {
                token_id: Some("nope".to_string()),
            })
            .await
            .unwrap_err();
        assert_eq!(err, VideoError::NoVideo("nope".to_string()));
    }

    #[tokio::test]
    async fn reorder_honors_given_order_and_keeps_stragglers() {
        let (mut queue, _player, _events) = queue();
        for path in ["a.mp4", "b.mp4", "c.mp4", "d.mp4"] {
            queue
                .enqueue(None, path.into(), "admin".into(), EnqueuePolicy::Append)
                .await
                .unwrap();
        }
        // a is playing; b, c, d are queued.
        let (b, c, d) = (queue.queue[0].id, queue.queue[1].id, queue.queue[2].id);
        queue.reorder(&[d, b]);
        let order: Vec<Uuid> = queue.queue.iter().map(|i| i.id).collect();
        assert_eq!(order, vec![d, b, c]);
    }
}
