// Kvzoo: replicated, hierarchically-namespaced transactional key-value store.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2020-2025 by
//     Dr Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// Copyright (C) 2020-2025 LNP/BP Standards Association. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command-line arguments and the resulting daemon configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueHint};

pub const KVZOOD_DATA_DIR_ENV: &str = "KVZOOD_DATA_DIR";

#[cfg(any(target_os = "linux", target_os = "freebsd", target_os = "openbsd", target_os = "netbsd"))]
pub const KVZOOD_DATA_DIR: &str = "~/.local/share/kvzoo";
#[cfg(target_os = "macos")]
pub const KVZOOD_DATA_DIR: &str = "~/Library/Application Support/Kvzoo";
#[cfg(target_os = "windows")]
pub const KVZOOD_DATA_DIR: &str = "~\\AppData\\Local\\Kvzoo";
#[cfg(target_os = "ios")]
pub const KVZOOD_DATA_DIR: &str = "~/Documents";
#[cfg(target_os = "android")]
pub const KVZOOD_DATA_DIR: &str = ".";

fn default_data_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg).join("kvzoo")
    } else {
        PathBuf::from(KVZOOD_DATA_DIR)
    }
}

/// Command-line arguments for `kvzood`.
#[derive(Parser, Clone, Eq, PartialEq, Debug)]
#[command(author, version, about = "kvzoo backend daemon")]
pub struct Opts {
    /// Set a verbosity level.
    ///
    /// Can be used multiple times to increase verbosity.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Location of the database file.
    #[clap(
        short,
        long,
        global = true,
        default_value_os_t = default_data_dir(),
        env = KVZOOD_DATA_DIR_ENV,
        value_hint = ValueHint::DirPath
    )]
    pub data_dir: PathBuf,

    /// Name of the database file within the data directory.
    #[arg(long, default_value = "kvzoo.redb")]
    pub db_name: String,

    /// Address to listen on for client RPC connections.
    #[arg(short, long, default_value = "tcp://127.0.0.1:4250")]
    pub listen: String,

    /// Number of worker threads handling RPC requests.
    #[arg(short, long, default_value_t = 4)]
    pub workers: usize,
}

impl Opts {
    pub fn process(&mut self) {
        self.data_dir = PathBuf::from(shellexpand::tilde(&self.data_dir.display().to_string()).to_string());
    }

    pub fn db_path(&self) -> PathBuf { self.data_dir.join(&self.db_name) }
}

/// Final configuration after CLI parsing and path expansion.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Config {
    pub db_path: PathBuf,
    pub listen: String,
    pub workers: usize,
}

impl From<Opts> for Config {
    fn from(mut opts: Opts) -> Self {
        opts.process();
        Config { db_path: opts.db_path(), listen: opts.listen, workers: opts.workers }
    }
}

/// Addresses the replication proxy connects to: one primary, any number of
/// secondaries, read from a YAML file or environment rather than the CLI
/// since a fleet can grow independently of any one client's command line.
#[derive(Clone, Eq, PartialEq, Debug, serde::Deserialize, serde::Serialize)]
pub struct ClusterConfig {
    pub primary: String,
    #[serde(default)]
    pub secondaries: Vec<String>,
}

impl ClusterConfig {
    pub fn single(addr: impl Into<String>) -> Self { Self { primary: addr.into(), secondaries: Vec::new() } }

    pub fn from_yaml_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Errors reading or parsing a [`ClusterConfig`] file.
#[derive(Debug, Display, Error)]
#[display(doc_comments)]
pub enum ConfigError {
    /// could not read config file: {0}
    Io(String),

    /// could not parse config file: {0}
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_config_parses_yaml() {
        let yaml = "primary: tcp://127.0.0.1:4250\nsecondaries:\n  - tcp://127.0.0.1:4251\n  - tcp://127.0.0.1:4252\n";
        let cfg: ClusterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.primary, "tcp://127.0.0.1:4250");
        assert_eq!(cfg.secondaries.len(), 2);
    }

    #[test]
    fn cluster_config_single_has_no_secondaries() {
        let cfg = ClusterConfig::single("tcp://127.0.0.1:4250");
        assert!(cfg.secondaries.is_empty());
    }
}
