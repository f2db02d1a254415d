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

//! Wires [`LocalDb`] into `kvzoo-rpc`'s [`kvzoo_rpc::server::Backend`]
//! contract, so the daemon binary can hand a `LocalDb` straight to a
//! `BackendServer`.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use kvzoo_rpc::server::{Backend, BackendTx};
use kvzoo_rpc::{Failure, FailureCode};

use super::{LocalDb, LocalTable};
use crate::traits::{Db, Table, Transaction};
use crate::{Error, TableName};

fn to_failure(err: Error) -> Failure {
    let code = match &err {
        Error::InvalidTableName(_) => FailureCode::InvalidTableName,
        Error::TableNotFound(_) => FailureCode::TableNotFound,
        Error::DuplicateResource(_) => FailureCode::DuplicateResource,
        Error::NotFoundResource(_) => FailureCode::NotFoundResource,
        Error::TxLimitExceeded(_) => FailureCode::TxLimitExceeded,
        Error::InvalidTxId(_) => FailureCode::InvalidTxId,
        Error::BackendBusy(_) => FailureCode::BackendBusy,
        _ => FailureCode::Internal,
    };
    Failure::new(code, err.to_string())
}

/// Adapts a [`LocalDb`] for RPC serving. Owns a registry of tables already
/// created via `CreateOrGetTable`, since `BeginTransaction` must reject
/// names the server has not yet been asked to create.
pub struct LocalBackendAdapter {
    db: RwLock<Option<LocalDb>>,
    tables: RwLock<HashMap<String, LocalTable>>,
}

impl LocalBackendAdapter {
    pub fn new(db: LocalDb) -> Self {
        Self { db: RwLock::new(Some(db)), tables: RwLock::new(HashMap::new()) }
    }

    fn with_db<R>(&self, f: impl FnOnce(&LocalDb) -> Result<R, Error>) -> Result<R, Failure> {
        let guard = self.db.read().expect("db handle poisoned");
        let db = guard
            .as_ref()
            .ok_or_else(|| Failure::new(FailureCode::Internal, "backend has been destroyed"))?;
        f(db).map_err(to_failure)
    }
}

impl Backend for LocalBackendAdapter {
    fn create_or_get_table(&self, name: &str) -> Result<(), Failure> {
        let tn = TableName::parse(name).map_err(to_failure)?;
        let table = self.with_db(|db| db.create_or_get_table(&tn))?;
        self.tables.write().expect("table registry poisoned").insert(tn.as_str().to_owned(), table);
        Ok(())
    }

    fn delete_table(&self, name: &str) -> Result<(), Failure> {
        let tn = TableName::parse(name).map_err(to_failure)?;
        self.with_db(|db| db.delete_table(&tn))?;
        let mut tables = self.tables.write().expect("table registry poisoned");
        tables.retain(|key, _| {
            let Ok(existing) = TableName::parse(key.as_str()) else { return false };
            existing != tn && !tn.is_parent(&existing)
        });
        Ok(())
    }

    fn begin_transaction(&self, table: &str) -> Result<Box<dyn BackendTx>, Failure> {
        let tables = self.tables.read().expect("table registry poisoned");
        let table = tables
            .get(table)
            .ok_or_else(|| Failure::new(FailureCode::TableNotFound, format!("table doesn't exist: {table}")))?;
        let tx = table.begin().map_err(to_failure)?;
        Ok(Box::new(LocalBackendTx(tx)))
    }

    fn checksum(&self) -> Result<String, Failure> { self.with_db(|db| db.checksum()) }

    fn destroy(&self) -> Result<(), Failure> {
        self.tables.write().expect("table registry poisoned").clear();
        let mut guard = self.db.write().expect("db handle poisoned");
        if let Some(db) = guard.take() {
            db.destroy().map_err(to_failure)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct LocalBackendTx(super::LocalTransaction);

impl BackendTx for LocalBackendTx {
    fn add(&mut self, key: &str, value: &[u8]) -> Result<(), Failure> {
        self.0.add(key, value).map_err(to_failure)
    }

    fn update(&mut self, key: &str, value: &[u8]) -> Result<(), Failure> {
        self.0.update(key, value).map_err(to_failure)
    }

    fn delete(&mut self, key: &str) -> Result<(), Failure> { self.0.delete(key).map_err(to_failure) }

    fn get(&self, key: &str) -> Result<Vec<u8>, Failure> { self.0.get(key).map_err(to_failure) }

    fn list(&self) -> Result<BTreeMap<String, Vec<u8>>, Failure> { self.0.list().map_err(to_failure) }

    fn commit(self: Box<Self>) -> Result<(), Failure> { self.0.commit().map_err(to_failure) }

    fn rollback(self: Box<Self>) -> Result<(), Failure> { self.0.rollback().map_err(to_failure) }
}
