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

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};

/// Command-line tool for working with a kvzoo cluster.
#[derive(Parser, Clone, Eq, PartialEq, Debug)]
#[command(name = "kvzoo-cli", bin_name = "kvzoo-cli", author, version)]
pub struct Opts {
    /// Path to a cluster config file listing a primary and its secondaries.
    ///
    /// When given, overrides --primary and --secondary.
    #[clap(short = 'f', long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Address of the primary backend.
    #[clap(short, long, global = true, default_value = "tcp://127.0.0.1:4250", env = "KVZOO_PRIMARY")]
    pub primary: String,

    /// Address of a secondary backend. May be repeated.
    #[clap(short, long, global = true)]
    pub secondary: Vec<String>,

    /// Set a verbosity level.
    ///
    /// Can be used multiple times to increase verbosity.
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Commands understood by the cluster client.
#[derive(Subcommand, Clone, Eq, PartialEq, Debug)]
pub enum Command {
    /// Create a table (and any missing ancestors) if it does not exist.
    CreateTable {
        /// Hierarchical table path, e.g. /app/users.
        path: String,
    },
    /// Delete a table and every descendant beneath it.
    DeleteTable {
        /// Hierarchical table path, e.g. /app/users.
        path: String,
    },
    /// Insert or overwrite a key in a table.
    Put { table: String, key: String, value: String },
    /// Read a key from a table.
    Get { table: String, key: String },
    /// Delete a key from a table.
    Delete { table: String, key: String },
    /// List every key/value pair in a table.
    List { table: String },
    /// Print the content fingerprint of the whole database.
    Checksum,
}
