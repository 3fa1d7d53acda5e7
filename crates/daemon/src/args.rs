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

use clap::builder::ValueHint;
use clap_derive::Parser;
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser, Debug)]
pub struct Args {
    #[arg(
        short,
        long,
        value_name = "config",
        help = "Path to configuration (yaml or json) file to use, if any. If not specified, defaults are used. \
                Configuration file values can be overridden by command line arguments.",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[arg(
        long,
        value_name = "listen-address",
        help = "HTTP and WebSocket listen address"
    )]
    pub listen_address: Option<String>,

    #[arg(
        long,
        value_name = "data-dir",
        help = "Directory for the state database; omit (and set storage_required: false) to run in memory",
        value_hint = ValueHint::DirPath
    )]
    pub data_dir: Option<PathBuf>,

    #[arg(
        long,
        value_name = "tokens",
        help = "Path to the token catalog JSON file",
        value_hint = ValueHint::FilePath
    )]
    pub tokens: Option<PathBuf>,

    #[arg(
        long,
        value_name = "public_key",
        help = "file containing a pkcs8 ed25519 public key, used for validating admin bearer tokens",
        default_value = "public_key.pem"
    )]
    pub public_key: PathBuf,

    #[arg(
        long,
        value_name = "private_key",
        help = "file containing a pkcs8 ed25519 private key, used for signing admin bearer tokens",
        default_value = "private_key.pem"
    )]
    pub private_key: PathBuf,

    #[arg(
        long,
        value_name = "generate-keypair",
        help = "Generate a new keypair and save it to the keypair files, if they don't exist already",
        default_value = "false"
    )]
    pub generate_keypair: bool,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    pub debug: bool,
}

impl Args {
    /// Load the config file (or defaults) and overlay command-line values.
    pub fn load_config(&self) -> Result<Config, eyre::Error> {
        let mut config = Config::load(self.config_file.as_deref())?;
        if let Some(listen_address) = self.listen_address.as_ref() {
            config.listen_address = listen_address.clone();
        }
        if let Some(data_dir) = self.data_dir.as_ref() {
            config.data_dir = Some(data_dir.clone());
        }
        if let Some(tokens) = self.tokens.as_ref() {
            config.catalog_path = tokens.clone();
        }
        Ok(config)
    }
}
