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

//! Main executable for the kvzoo backend daemon: opens a local database and
//! serves it over `kvzoo-rpc`.

#[macro_use]
extern crate log;

use std::sync::Arc;

use clap::Parser;
use kvzoo::backend::{LocalBackendAdapter, LocalDb};
use kvzoo::config::{Config, Opts};
use kvzoo_rpc::{BackendServer, MAX_OPEN_TX_COUNT};

fn main() {
    dotenv::dotenv().ok();
    let opts = Opts::parse();
    loglevel::LogLevel::from_verbosity_flag_count(opts.verbose).apply();
    trace!("command-line arguments: {:?}", &opts);

    let config = Config::from(opts);
    trace!("daemon configuration: {:?}", config);

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create data directory");
    }

    info!("opening database at {}", config.db_path.display());
    let db = LocalDb::open(&config.db_path).expect("failed to open database");
    let backend: Arc<dyn kvzoo_rpc::Backend> = Arc::new(LocalBackendAdapter::new(db));

    info!("listening on {} with {} worker threads", config.listen, config.workers);
    let server = BackendServer::with_limits(backend, MAX_OPEN_TX_COUNT, config.workers);
    server.serve(&config.listen).expect("RPC server failed");
}
