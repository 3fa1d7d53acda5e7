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

//! The admin/GM command plane: one dispatcher for the closed `gm:command`
//! verb set. Every action validates its payload, runs against the engine or
//! the video worker, and acks.

use std::sync::Arc;

use tracing::info;

use aln_common::DeviceType;
use aln_rpc_common::{ErrorCode, GmAction, ServerEvent};

use crate::offline::OfflineQueue;
use crate::sessions::{EngineError, EngineHandle};
use crate::video::{VideoControl, VideoHandle};

pub struct CommandContext {
    pub engine: EngineHandle,
    pub video: VideoHandle,
    pub offline: Arc<OfflineQueue>,
}

fn ack(action: &GmAction, success: bool, message: Option<String>) -> ServerEvent {
    ServerEvent::GmCommandAck {
        action: action.action_name().to_string(),
        success,
        message,
    }
}

fn ack_engine<T>(action: &GmAction, result: Result<T, EngineError>) -> ServerEvent {
    match result {
        Ok(_) => ack(action, true, None),
        Err(e) => ack(action, false, Some(e.to_string())),
    }
}

/// Dispatch one command. Only GM sockets may command; anything else gets the
/// `AUTH_REQUIRED` error event instead of an ack.
pub async fn dispatch(
    action: GmAction,
    device_type: DeviceType,
    ctx: &CommandContext,
) -> ServerEvent {
    if device_type != DeviceType::Gm {
        return ServerEvent::Error {
            service: "commands".to_string(),
            code: ErrorCode::AuthRequired,
            message: "gm:command requires a GM device".to_string(),
        };
    }

    match &action {
        GmAction::SessionCreate { name, teams } => {
            if name.trim().is_empty() || teams.is_empty() {
                return ack(
                    &action,
                    false,
                    Some("session needs a name and at least one team".to_string()),
                );
            }
            match ctx
                .engine
                .create_session(name.clone(), teams.clone())
                .await
            {
                Ok(_) => {
                    // Player scans parked while no session ran become plain
                    // log entries now.
                    for entry in ctx.offline.drain() {
                        info!(
                            token_id = entry.token_id,
                            device_id = entry.device_id,
                            "Replaying parked player scan"
                        );
                    }
                    ack(&action, true, None)
                }
                Err(e) => ack(&action, false, Some(e.to_string())),
            }
        }
        GmAction::SessionPause => ack_engine(&action, ctx.engine.pause_session().await),
        GmAction::SessionResume => ack_engine(&action, ctx.engine.resume_session().await),
        GmAction::SessionEnd => ack_engine(&action, ctx.engine.end_session().await),
        GmAction::TransactionDelete { tx_id } => {
            ack_engine(&action, ctx.engine.delete_transaction(*tx_id).await)
        }
        GmAction::ScoreAdjust {
            team_id,
            delta,
            reason,
        } => ack_engine(
            &action,
            ctx.engine
                .adjust_score(team_id.clone(), *delta, reason.clone())
                .await,
        ),
        GmAction::ScoresReset { teams } => {
            ack_engine(&action, ctx.engine.reset_scores(teams.clone()).await)
        }
        GmAction::VideoPlay { token_id } => {
            let result = ctx
                .video
                .control(VideoControl::Play {
                    token_id: token_id.clone(),
                })
                .await;
            match result {
                Ok(_) => ack(&action, true, None),
                Err(e) => ack(&action, false, Some(e.to_string())),
            }
        }
        GmAction::VideoPause => video_ack(&action, ctx, VideoControl::Pause).await,
        GmAction::VideoResume => video_ack(&action, ctx, VideoControl::Resume).await,
        GmAction::VideoStop => video_ack(&action, ctx, VideoControl::Stop).await,
        GmAction::VideoSkip => video_ack(&action, ctx, VideoControl::Skip).await,
        GmAction::VideoQueueAdd { video_path } => {
            if video_path.trim().is_empty() {
                return ack(&action, false, Some("video path is empty".to_string()));
            }
            let result = ctx
                .video
                .enqueue(
                    None,
                    video_path.clone(),
                    "admin".to_string(),
                    crate::video::EnqueuePolicy::Append,
                )
                .await;
            match result {
                Ok(position) => ack(&action, true, Some(format!("queued at {position}"))),
                Err(e) => ack(&action, false, Some(e.to_string())),
            }
        }
        GmAction::VideoQueueReorder { order } => {
            ctx.video.reorder(order.clone()).await;
            ack(&action, true, None)
        }
        GmAction::VideoQueueClear => {
            ctx.video.clear().await;
            ack(&action, true, None)
        }
        GmAction::DeviceReset { device_id } => {
            ack_engine(&action, ctx.engine.reset_device(device_id.clone()).await)
        }
        GmAction::EnvironmentSet {
            bluetooth,
            audio,
            lighting,
        } => {
            // Degrades cleanly: there may be no hardware behind these, but
            // the snapshot always reflects the requested state.
            match ctx
                .engine
                .set_environment(*bluetooth, *audio, *lighting)
                .await
            {
                Ok(env) => ack(
                    &action,
                    true,
                    Some(format!(
                        "bluetooth={} audio={} lighting={}",
                        env.bluetooth, env.audio, env.lighting
                    )),
                ),
                Err(e) => ack(&action, false, Some(e.to_string())),
            }
        }
    }
}

async fn video_ack(action: &GmAction, ctx: &CommandContext, control: VideoControl) -> ServerEvent {
    match ctx.video.control(control).await {
        Ok(_) => ack(action, true, None),
        Err(e) => ack(action, false, Some(e.to_string())),
    }
}
