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

//! Snapshot composition: the engine view plus the video view, folded into the
//! wire payloads. Pure functions; callers fetch the parts.

use aln_rpc_common::{StateSnapshot, SyncFullPayload, SystemStatus, VideoStatusPayload};

use crate::sessions::EngineSnapshot;

pub fn system_status(video: &VideoStatusPayload) -> SystemStatus {
    SystemStatus {
        orchestrator: "online".to_string(),
        vlc: !video.degraded,
    }
}

pub fn state_snapshot(engine: EngineSnapshot, video: VideoStatusPayload) -> StateSnapshot {
    StateSnapshot {
        system_status: system_status(&video),
        session: engine.session,
        scores: engine.scores,
        recent_transactions: engine.recent_transactions,
        video_status: video,
        devices: engine.devices,
    }
}

/// The `sync:full` reconciliation payload for one device. The engine snapshot
/// must have been taken for that device so the scan list is properly scoped.
pub fn sync_full(
    engine: EngineSnapshot,
    video: VideoStatusPayload,
    reconnection: bool,
) -> SyncFullPayload {
    SyncFullPayload {
        system_status: system_status(&video),
        session: engine.session,
        scores: engine.scores,
        recent_transactions: engine.recent_transactions,
        devices: engine.devices,
        device_scanned_tokens: engine.device_scanned_tokens,
        reconnection,
        environment: engine.environment,
        video_status: video,
    }
}
