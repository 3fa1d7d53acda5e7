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

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Player unreachable: {0}")]
    Unreachable(String),
    #[error("Player rejected command: {0}")]
    Rejected(String),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PlayerState {
    Playing,
    Paused,
    Stopped,
}

/// What the external player reports about its current item.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub state: PlayerState,
    /// Total item length in seconds, when the player knows it.
    pub length_secs: Option<i64>,
    /// Elapsed play time in seconds.
    pub time_secs: Option<i64>,
}

/// The external video player capability: play/pause/stop/status, nothing
/// more. `Vlc` talks to VLC's HTTP interface; `Mock` is the in-process test
/// double.
#[derive(Clone)]
pub enum PlayerClient {
    Vlc(VlcHttpPlayer),
    Mock(MockPlayer),
}

impl PlayerClient {
    pub async fn play(&self, path: &str) -> Result<(), PlayerError> {
        match self {
            PlayerClient::Vlc(vlc) => vlc.command(&[("command", "in_play"), ("input", path)]).await,
            PlayerClient::Mock(mock) => mock.play(path),
        }
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        match self {
            PlayerClient::Vlc(vlc) => vlc.command(&[("command", "pl_forcepause")]).await,
            PlayerClient::Mock(mock) => mock.set_state(PlayerState::Paused),
        }
    }

    pub async fn resume(&self) -> Result<(), PlayerError> {
        match self {
            PlayerClient::Vlc(vlc) => vlc.command(&[("command", "pl_forceresume")]).await,
            PlayerClient::Mock(mock) => mock.set_state(PlayerState::Playing),
        }
    }

    pub async fn stop(&self) -> Result<(), PlayerError> {
        match self {
            PlayerClient::Vlc(vlc) => vlc.command(&[("command", "pl_stop")]).await,
            PlayerClient::Mock(mock) => mock.set_state(PlayerState::Stopped),
        }
    }

    pub async fn status(&self) -> Result<PlayerStatus, PlayerError> {
        match self {
            PlayerClient::Vlc(vlc) => vlc.status().await,
            PlayerClient::Mock(mock) => mock.status(),
        }
    }
}

/// VLC's HTTP interface: `GET /requests/status.json`, basic auth with an
/// empty username. Every call is bounded; an unreachable player flips the
/// queue into degraded mode rather than propagating.
#[derive(Clone)]
pub struct VlcHttpPlayer {
    client: reqwest::Client,
    base_url: String,
    password: String,
}

#[derive(Deserialize)]
struct VlcStatus {
    state: String,
    #[serde(default)]
    length: Option<i64>,
    #[serde(default)]
    time: Option<i64>,
}

impl VlcHttpPlayer {
    pub fn new(base_url: String, password: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("Unable to build HTTP client");
        Self {
            client,
            base_url,
            password,
        }
    }

    async fn request(&self, query: &[(&str, &str)]) -> Result<VlcStatus, PlayerError> {
        let url = format!("{}/requests/status.json", self.base_url);
        let response = self
            .client
            .get(&url)
            .basic_auth("", Some(&self.password))
            .query(query)
            .send()
            .await
            .map_err(|e| PlayerError::Unreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PlayerError::Rejected(response.status().to_string()));
        }
        response
            .json::<VlcStatus>()
            .await
            .map_err(|e| PlayerError::Rejected(e.to_string()))
    }

    async fn command(&self, query: &[(&str, &str)]) -> Result<(), PlayerError> {
        debug!(?query, "VLC command");
        self.request(query).await.map(|_| ())
    }

    async fn status(&self) -> Result<PlayerStatus, PlayerError> {
        let status = self.request(&[]).await?;
        let state = match status.state.as_str() {
            "playing" => PlayerState::Playing,
            "paused" => PlayerState::Paused,
            _ => PlayerState::Stopped,
        };
        Ok(PlayerStatus {
            state,
            length_secs: status.length.filter(|l| *l > 0),
            time_secs: status.time,
        })
    }
}

/// Scriptable player double. Tests flip `reachable` to exercise degraded
/// mode and drive `state` to simulate playback progress.
#[derive(Clone, Default)]
pub struct MockPlayer {
    inner: Arc<Mutex<MockPlayerState>>,
}

struct MockPlayerState {
    reachable: bool,
    state: PlayerState,
    length_secs: Option<i64>,
    playing_path: Option<String>,
}

impl Default for MockPlayerState {
    fn default() -> Self {
        Self {
            reachable: true,
            state: PlayerState::Stopped,
            length_secs: Some(30),
            playing_path: None,
        }
    }
}

impl MockPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().unwrap().reachable = reachable;
    }

    pub fn set_length(&self, secs: i64) {
        self.inner.lock().unwrap().length_secs = Some(secs);
    }

    pub fn finish_playback(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = PlayerState::Stopped;
        inner.playing_path = None;
    }

    pub fn playing_path(&self) -> Option<String> {
        self.inner.lock().unwrap().playing_path.clone()
    }

    fn play(&self, path: &str) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.reachable {
            return Err(PlayerError::Unreachable("mock offline".to_string()));
        }
        inner.state = PlayerState::Playing;
        inner.playing_path = Some(path.to_string());
        Ok(())
    }

    fn set_state(&self, state: PlayerState) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.reachable {
            return Err(PlayerError::Unreachable("mock offline".to_string()));
        }
        inner.state = state;
        if state == PlayerState::Stopped {
            inner.playing_path = None;
        }
        Ok(())
    }

    fn status(&self) -> Result<PlayerStatus, PlayerError> {
        let inner = self.inner.lock().unwrap();
        if !inner.reachable {
            return Err(PlayerError::Unreachable("mock offline".to_string()));
        }
        Ok(PlayerStatus {
            state: inner.state,
            length_secs: inner.length_secs,
            time_secs: Some(0),
        })
    }
}
