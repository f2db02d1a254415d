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

//! Command-line tool for working with a kvzoo cluster.

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate log;

mod opts;

use clap::Parser;
use kvzoo::config::ClusterConfig;
use kvzoo::proxy::Proxy;
use kvzoo::{Db, Table, TableName, Transaction};

use crate::opts::{Command, Opts};

fn main() {
    let opts = Opts::parse();
    loglevel::LogLevel::from_verbosity_flag_count(opts.verbose).apply();
    trace!("command-line arguments: {:?}", &opts);

    let cluster = match &opts.config {
        Some(path) => ClusterConfig::from_yaml_file(path).unwrap_or_else(|err| {
            eprintln!("error reading cluster config {}: {err}", path.display());
            std::process::exit(1);
        }),
        None => ClusterConfig { primary: opts.primary.clone(), secondaries: opts.secondary.clone() },
    };
    debug!("connecting to primary {} with {} secondaries", cluster.primary, cluster.secondaries.len());

    let proxy = Proxy::connect(&cluster.primary, &cluster.secondaries).unwrap_or_else(|err| {
        eprintln!("error connecting to cluster: {err}");
        std::process::exit(1);
    });

    if let Err(err) = run(&proxy, opts.command) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(proxy: &Proxy, command: Command) -> Result<(), kvzoo::Error> {
    match command {
        Command::CreateTable { path } => {
            let name = TableName::parse(&path)?;
            proxy.create_or_get_table(&name)?;
            println!("created {path}");
        }
        Command::DeleteTable { path } => {
            let name = TableName::parse(&path)?;
            proxy.delete_table(&name)?;
            println!("deleted {path}");
        }
        Command::Put { table, key, value } => {
            let name = TableName::parse(&table)?;
            let handle = proxy.create_or_get_table(&name)?;
            let mut tx = handle.begin()?;
            match tx.add(&key, value.as_bytes()) {
                Ok(()) => {}
                Err(kvzoo::Error::DuplicateResource(_)) => tx.update(&key, value.as_bytes())?,
                Err(err) => return Err(err),
            }
            tx.commit()?;
            println!("put {table}/{key}");
        }
        Command::Get { table, key } => {
            let name = TableName::parse(&table)?;
            let handle = proxy.create_or_get_table(&name)?;
            let tx = handle.begin()?;
            let value = tx.get(&key)?;
            tx.rollback()?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Command::Delete { table, key } => {
            let name = TableName::parse(&table)?;
            let handle = proxy.create_or_get_table(&name)?;
            let mut tx = handle.begin()?;
            tx.delete(&key)?;
            tx.commit()?;
            println!("deleted {table}/{key}");
        }
        Command::List { table } => {
            let name = TableName::parse(&table)?;
            let handle = proxy.create_or_get_table(&name)?;
            let tx = handle.begin()?;
            let records = tx.list()?;
            tx.rollback()?;
            for (key, value) in records {
                println!("{key} = {}", String::from_utf8_lossy(&value));
            }
        }
        Command::Checksum => {
            println!("{}", proxy.checksum()?);
        }
    }
    Ok(())
}
