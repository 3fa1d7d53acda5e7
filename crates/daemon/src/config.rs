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

use std::path::{Path, PathBuf};

use eyre::eyre;
use figment::providers::{Format, Json, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// When false, no external player is contacted; the queue still runs its
    /// logical clock.
    pub enabled: bool,
    pub url: String,
    pub password: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://127.0.0.1:8080".to_string(),
            password: "vlc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_address: String,
    /// Directory for the fjall state database. None runs fully in memory.
    pub data_dir: Option<PathBuf>,
    pub catalog_path: PathBuf,
    pub admin_password: String,
    pub token_ttl_hours: i64,
    pub heartbeat_timeout_seconds: u64,
    /// Fail closed when the state database cannot be opened; when false the
    /// daemon falls back to an in-memory store and keeps running.
    pub storage_required: bool,
    pub video: VideoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:3000".to_string(),
            data_dir: Some(PathBuf::from("aln-data")),
            catalog_path: PathBuf::from("tokens.json"),
            admin_password: "admin".to_string(),
            token_ttl_hours: 24,
            heartbeat_timeout_seconds: 30,
            storage_required: true,
            video: VideoConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, overlaid with the config file when one is given. YAML or
    /// JSON, decided by extension.
    pub fn load(config_file: Option<&Path>) -> Result<Self, eyre::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = config_file {
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => return Err(eyre!("Unknown config file type: {path:?}")),
            };
        }
        figment
            .extract()
            .map_err(|e| eyre!("Unable to load configuration: {e}"))
    }
}
