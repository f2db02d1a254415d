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

//! The replication proxy: presents one primary plus zero or more secondary
//! backend servers as a single [`Db`]/[`Table`]/[`Transaction`].
//!
//! Fan-out to secondaries is message passing, not shared-memory futures:
//! each spawned thread reports its result into a [`crossbeam_channel`]
//! collector, and the coordinator blocks until it has consumed exactly one
//! message per secondary. The same shape works whether there are zero
//! secondaries or a hundred.
//!
//! Writes follow primary-first discipline: the primary is always called
//! synchronously before secondaries are touched, and a transaction that
//! fails a write against any backend becomes poisoned (see
//! [`ProxyTransaction`]) rather than silently dropping the failed replica.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use kvzoo_rpc::{FailureCode, RpcError, Stub};

use crate::traits::{Db, Table, Transaction};
use crate::{Error, TableName, TransportError};

/// Builds a [`Error::ReplicationFailure`], logging the offending addresses
/// and cause at `error` since this condition requires operator attention.
fn replication_failure(addrs: Vec<String>, cause: impl Into<String>) -> Error {
    let cause = cause.into();
    log::error!(target: "proxy", "replication failure on {addrs:?}: {cause}");
    Error::replication_failure(addrs, cause)
}

/// Builds a [`Error::DivergentCommit`], logging the offending addresses and
/// cause at `error` since a divergent commit cannot be undone automatically.
fn divergent_commit(addrs: Vec<String>, cause: impl Into<String>) -> Error {
    let cause = cause.into();
    log::error!(target: "proxy", "divergent commit on {addrs:?}: {cause}");
    Error::divergent_commit(addrs, cause)
}

fn rpc_err(err: RpcError) -> Error {
    match err {
        RpcError::Transport(msg) => Error::Transport(TransportError::Unreachable(msg)),
        RpcError::Backend(f) => {
            let message = f.message.to_string();
            match f.code {
                FailureCode::InvalidTableName => Error::InvalidTableName(message),
                FailureCode::TableNotFound => Error::TableNotFound(message),
                FailureCode::DuplicateResource => Error::DuplicateResource(message),
                FailureCode::NotFoundResource => Error::NotFoundResource(message),
                FailureCode::TxLimitExceeded => Error::TxLimitExceeded(message),
                FailureCode::InvalidTxId => Error::InvalidTxId(message),
                FailureCode::BackendBusy | FailureCode::Internal => Error::BackendBusy(message),
            }
        }
    }
}

/// Runs `op` against every stub concurrently and waits for all of them,
/// pairing each backend's address with its result.
fn fan_out<T, F>(stubs: &[Arc<Stub>], op: F) -> Vec<(String, Result<T, RpcError>)>
where
    T: Send + 'static,
    F: Fn(&Stub) -> Result<T, RpcError> + Send + Sync + 'static,
{
    if stubs.is_empty() {
        return Vec::new();
    }
    let op = Arc::new(op);
    let (tx, rx) = unbounded();
    for stub in stubs {
        let stub = Arc::clone(stub);
        let op = Arc::clone(&op);
        let tx = tx.clone();
        thread::spawn(move || {
            let res = op(&stub);
            tx.send((stub.addr().to_owned(), res)).ok();
        });
    }
    drop(tx);
    (0..stubs.len()).filter_map(|_| rx.recv().ok()).collect()
}

/// Splits fan-out results into the addresses that failed and the message of
/// the last failure seen, for use in aggregate error variants.
fn split_results<T>(results: Vec<(String, Result<T, RpcError>)>) -> (Vec<String>, String) {
    let mut failed = Vec::new();
    let mut last_err = String::new();
    for (addr, res) in results {
        if let Err(e) = res {
            last_err = rpc_err(e).to_string();
            failed.push(addr);
        }
    }
    (failed, last_err)
}

/// A replicated database: one primary, N secondaries, all addressed as
/// plain `kvzoo-rpc` backends.
pub struct Proxy {
    primary: Arc<Stub>,
    secondaries: Vec<Arc<Stub>>,
}

impl Proxy {
    /// Connects to a primary and its secondaries. Connection is attempted
    /// eagerly so that a misconfigured address is reported at startup
    /// rather than on the first write.
    pub fn connect(primary_addr: &str, secondary_addrs: &[impl AsRef<str>]) -> Result<Self, Error> {
        let primary = Arc::new(Stub::connect(primary_addr).map_err(rpc_err)?);
        let mut secondaries = Vec::with_capacity(secondary_addrs.len());
        for addr in secondary_addrs {
            secondaries.push(Arc::new(Stub::connect(addr.as_ref()).map_err(rpc_err)?));
        }
        Ok(Self { primary, secondaries })
    }
}

impl Db for Proxy {
    type Table = ProxyTable;

    fn create_or_get_table(&self, name: &TableName) -> Result<Self::Table, Error> {
        self.primary.create_or_get_table(name.as_str()).map_err(rpc_err)?;
        let path = name.as_str().to_owned();
        let results = fan_out(&self.secondaries, move |stub| stub.create_or_get_table(&path));
        let (failed, last_err) = split_results(results);
        if !failed.is_empty() {
            return Err(replication_failure(failed, last_err));
        }
        Ok(ProxyTable {
            name: name.clone(),
            primary: Arc::clone(&self.primary),
            secondaries: self.secondaries.clone(),
        })
    }

    fn delete_table(&self, name: &TableName) -> Result<(), Error> {
        self.primary.delete_table(name.as_str()).map_err(rpc_err)?;
        let path = name.as_str().to_owned();
        let results = fan_out(&self.secondaries, move |stub| stub.delete_table(&path));
        let (failed, last_err) = split_results(results);
        if failed.is_empty() { Ok(()) } else { Err(replication_failure(failed, last_err)) }
    }

    fn checksum(&self) -> Result<String, Error> {
        let primary_sum = self.primary.checksum().map_err(rpc_err)?;
        if self.secondaries.is_empty() {
            return Ok(primary_sum);
        }
        let expected = primary_sum.clone();
        let results = fan_out(&self.secondaries, move |stub| {
            let sum = stub.checksum()?;
            if sum == expected {
                Ok(())
            } else {
                Err(RpcError::Backend(kvzoo_rpc::Failure::new(FailureCode::Internal, "checksum mismatch")))
            }
        });
        let (diverged, last_err) = split_results(results);
        if diverged.is_empty() { Ok(primary_sum) } else { Err(replication_failure(diverged, last_err)) }
    }

    fn close(self) -> Result<(), Error> { Ok(()) }

    fn destroy(self) -> Result<(), Error> {
        self.primary.destroy().map_err(rpc_err)?;
        let results = fan_out(&self.secondaries, |stub| stub.destroy());
        let (failed, last_err) = split_results(results);
        if failed.is_empty() { Ok(()) } else { Err(replication_failure(failed, last_err)) }
    }
}

/// A table handle bound to all of a proxy's backends.
pub struct ProxyTable {
    name: TableName,
    primary: Arc<Stub>,
    secondaries: Vec<Arc<Stub>>,
}

impl Table for ProxyTable {
    type Transaction = ProxyTransaction;

    fn begin(&self) -> Result<Self::Transaction, Error> {
        let primary_id = self.primary.begin_transaction(self.name.as_str()).map_err(rpc_err)?;

        let path = self.name.as_str().to_owned();
        let results = fan_out(&self.secondaries, move |stub| stub.begin_transaction(&path));

        let mut secondaries = Vec::with_capacity(self.secondaries.len());
        let mut failed = Vec::new();
        let mut last_err = String::new();
        for (stub, (addr, res)) in self.secondaries.iter().zip(results) {
            match res {
                Ok(id) => secondaries.push((Arc::clone(stub), id)),
                Err(e) => {
                    last_err = rpc_err(e).to_string();
                    failed.push(addr);
                }
            }
        }

        if !failed.is_empty() {
            // Unwind whatever opened cleanly before reporting the failure.
            self.primary.rollback_transaction(primary_id).ok();
            for (stub, id) in &secondaries {
                stub.rollback_transaction(*id).ok();
            }
            return Err(replication_failure(failed, last_err));
        }

        Ok(ProxyTransaction {
            primary: (Arc::clone(&self.primary), primary_id),
            secondaries,
            poisoned: None,
        })
    }
}

/// A live transaction spanning a primary and its secondaries.
///
/// Once any backend rejects a write, the transaction is poisoned: further
/// writes are refused immediately (without a network round trip) and
/// `commit` is forced to fail, since the replicas have already diverged and
/// committing would make that divergence permanent. `rollback` remains
/// available and is always attempted against every backend regardless of
/// the poisoned state.
pub struct ProxyTransaction {
    primary: (Arc<Stub>, u64),
    secondaries: Vec<(Arc<Stub>, u64)>,
    poisoned: Option<(Vec<String>, String)>,
}

impl ProxyTransaction {
    fn check_poisoned(&self) -> Result<(), Error> {
        if let Some((addrs, cause)) = &self.poisoned {
            return Err(replication_failure(addrs.clone(), cause.clone()));
        }
        Ok(())
    }

    /// Runs a write against the primary, then against every secondary in
    /// parallel, poisoning the transaction if any backend (primary or
    /// secondary) rejects the call.
    fn primary_then_secondaries<F>(&mut self, op: F) -> Result<(), Error>
    where F: Fn(&Stub, u64) -> Result<(), RpcError> + Clone + Send + Sync + 'static {
        self.check_poisoned()?;

        let (primary, primary_id) = &self.primary;
        if let Err(e) = op(primary, *primary_id) {
            let cause = rpc_err(e).to_string();
            self.poisoned = Some((vec![primary.addr().to_owned()], cause.clone()));
            return Err(replication_failure(vec![primary.addr().to_owned()], cause));
        }

        if self.secondaries.is_empty() {
            return Ok(());
        }
        let stubs: Vec<Arc<Stub>> = self.secondaries.iter().map(|(s, _)| Arc::clone(s)).collect();
        let ids: Vec<u64> = self.secondaries.iter().map(|(_, id)| *id).collect();
        let (tx, rx) = unbounded();
        for (stub, id) in stubs.into_iter().zip(ids) {
            let op = op.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                let res = op(&stub, id);
                tx.send((stub.addr().to_owned(), res)).ok();
            });
        }
        drop(tx);
        let results: Vec<_> = (0..self.secondaries.len()).filter_map(|_| rx.recv().ok()).collect();
        let (failed, last_err) = split_results(results);
        if !failed.is_empty() {
            self.poisoned = Some((failed.clone(), last_err.clone()));
            return Err(replication_failure(failed, last_err));
        }
        Ok(())
    }
}

impl Transaction for ProxyTransaction {
    fn add(&mut self, key: &str, value: &[u8]) -> Result<(), Error> {
        let key = key.to_owned();
        let value = value.to_owned();
        self.primary_then_secondaries(move |stub, id| stub.add(id, &key, &value))
    }

    fn update(&mut self, key: &str, value: &[u8]) -> Result<(), Error> {
        let key = key.to_owned();
        let value = value.to_owned();
        self.primary_then_secondaries(move |stub, id| stub.update(id, &key, &value))
    }

    fn delete(&mut self, key: &str) -> Result<(), Error> {
        let key = key.to_owned();
        self.primary_then_secondaries(move |stub, id| stub.delete(id, &key))
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        self.check_poisoned()?;
        let (primary, id) = &self.primary;
        primary.get(*id, key).map_err(rpc_err)
    }

    fn list(&self) -> Result<BTreeMap<String, Vec<u8>>, Error> {
        self.check_poisoned()?;
        let (primary, id) = &self.primary;
        primary.list(*id).map_err(rpc_err)
    }

    /// Commits the primary first; if that succeeds, commits every secondary
    /// in parallel. A secondary failure at this point is a divergent
    /// commit, not a poisoning: the primary's data is already durable, so
    /// there is nothing left to roll back.
    fn commit(self) -> Result<(), Error> {
        if let Some((addrs, cause)) = self.poisoned {
            self.primary.0.rollback_transaction(self.primary.1).ok();
            for (stub, id) in &self.secondaries {
                stub.rollback_transaction(*id).ok();
            }
            return Err(replication_failure(addrs, cause));
        }

        let (primary, primary_id) = &self.primary;
        if let Err(e) = primary.commit_transaction(*primary_id) {
            let cause = rpc_err(e).to_string();
            for (stub, id) in &self.secondaries {
                stub.rollback_transaction(*id).ok();
            }
            return Err(replication_failure(vec![primary.addr().to_owned()], cause));
        }

        if self.secondaries.is_empty() {
            return Ok(());
        }
        let stubs: Vec<Arc<Stub>> = self.secondaries.iter().map(|(s, _)| Arc::clone(s)).collect();
        let ids: Vec<u64> = self.secondaries.iter().map(|(_, id)| *id).collect();
        let results = fan_out_owned(stubs, ids, |stub, id| stub.commit_transaction(id));
        let (failed, last_err) = split_results(results);
        if failed.is_empty() { Ok(()) } else { Err(divergent_commit(failed, last_err)) }
    }

    /// Always attempts a rollback against the primary and every secondary,
    /// regardless of whether the transaction was poisoned and regardless of
    /// whether any individual rollback fails; the first error seen (if any)
    /// is returned.
    fn rollback(self) -> Result<(), Error> {
        let (primary, primary_id) = &self.primary;
        let primary_res = primary.rollback_transaction(*primary_id);

        let stubs: Vec<Arc<Stub>> = self.secondaries.iter().map(|(s, _)| Arc::clone(s)).collect();
        let ids: Vec<u64> = self.secondaries.iter().map(|(_, id)| *id).collect();
        let results = fan_out_owned(stubs, ids, |stub, id| stub.rollback_transaction(id));

        if let Err(e) = primary_res {
            return Err(rpc_err(e));
        }
        for (_, res) in results {
            if let Err(e) = res {
                return Err(rpc_err(e));
            }
        }
        Ok(())
    }
}

/// Like [`fan_out`] but for operations keyed on a per-stub transaction id
/// that has already been split out of the `(Arc<Stub>, u64)` pairs.
fn fan_out_owned<F>(stubs: Vec<Arc<Stub>>, ids: Vec<u64>, op: F) -> Vec<(String, Result<(), RpcError>)>
where F: Fn(&Stub, u64) -> Result<(), RpcError> + Send + Sync + 'static {
    if stubs.is_empty() {
        return Vec::new();
    }
    let op = Arc::new(op);
    let (tx, rx) = unbounded();
    let count = stubs.len();
    for (stub, id) in stubs.into_iter().zip(ids) {
        let op = Arc::clone(&op);
        let tx = tx.clone();
        thread::spawn(move || {
            let res = op(&stub, id);
            tx.send((stub.addr().to_owned(), res)).ok();
        });
    }
    drop(tx);
    (0..count).filter_map(|_| rx.recv().ok()).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use kvzoo_rpc::BackendServer;

    use super::*;
    use crate::backend::{LocalBackendAdapter, LocalDb};

    #[test]
    fn rpc_err_maps_backend_failure_codes() {
        let f = kvzoo_rpc::Failure::new(FailureCode::TableNotFound, "table `/x` does not exist");
        match rpc_err(RpcError::Backend(f)) {
            Error::TableNotFound(msg) => assert!(msg.contains("/x")),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn rpc_err_maps_transport_failure() {
        match rpc_err(RpcError::Transport("connection refused".into())) {
            Error::Transport(TransportError::Unreachable(msg)) => assert_eq!(msg, "connection refused"),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    /// Spawns a backend on an OS-assigned port, over a throwaway `redb`
    /// file, and returns the address it ended up bound to.
    fn spawn_backend(dir: &std::path::Path, name: &str) -> String {
        let db = LocalDb::open(dir.join(name)).expect("open backend db");
        let adapter: Arc<dyn kvzoo_rpc::Backend> = Arc::new(LocalBackendAdapter::new(db));
        let server = BackendServer::with_limits(adapter, kvzoo_rpc::MAX_OPEN_TX_COUNT, 2);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            server
                .serve_with("tcp://127.0.0.1:0", |addr| tx.send(addr).ok().unwrap_or(()))
                .ok();
        });
        rx.recv_timeout(Duration::from_secs(5)).expect("backend never reported its address")
    }

    #[test]
    fn replicated_write_is_equal_across_backends() {
        let dir = tempfile::tempdir().unwrap();
        let primary_addr = spawn_backend(dir.path(), "primary.redb");
        let secondary_addrs = vec![spawn_backend(dir.path(), "secondary1.redb"), spawn_backend(dir.path(), "secondary2.redb")];

        let proxy = Proxy::connect(&primary_addr, &secondary_addrs).expect("connect");
        let name = TableName::parse("/abcxx").unwrap();
        let table = proxy.create_or_get_table(&name).expect("create table");

        let mut tx = table.begin().expect("begin");
        for i in 0..50 {
            tx.add(&format!("key{i}"), format!("v{i}").as_bytes()).expect("add");
        }
        tx.commit().expect("commit");

        let direct_primary = Stub::connect(&primary_addr).unwrap();
        let direct_secondaries: Vec<_> =
            secondary_addrs.iter().map(|a| Stub::connect(a).unwrap()).collect();

        let p_tx = direct_primary.begin_transaction("/abcxx").unwrap();
        let primary_records = direct_primary.list(p_tx).unwrap();
        direct_primary.rollback_transaction(p_tx).unwrap();
        assert_eq!(primary_records.len(), 50);

        for stub in &direct_secondaries {
            let tx_id = stub.begin_transaction("/abcxx").unwrap();
            let records = stub.list(tx_id).unwrap();
            stub.rollback_transaction(tx_id).unwrap();
            assert_eq!(records, primary_records);
        }

        assert!(proxy.checksum().is_ok());
    }

    #[test]
    fn update_on_missing_key_fails_and_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let primary_addr = spawn_backend(dir.path(), "primary.redb");
        let secondary_addr = spawn_backend(dir.path(), "secondary.redb");

        let proxy = Proxy::connect(&primary_addr, &[secondary_addr]).expect("connect");
        let name = TableName::parse("/s6").unwrap();
        let table = proxy.create_or_get_table(&name).expect("create table");

        let mut tx = table.begin().unwrap();
        for i in 0..10 {
            tx.add(&format!("k{i}"), format!("value{i}").as_bytes()).unwrap();
        }
        tx.commit().unwrap();

        let mut tx = table.begin().unwrap();
        let err = tx.update("nk1", b"x").unwrap_err();
        assert!(matches!(err, Error::NotFoundResource(_)));
        tx.rollback().unwrap();

        let tx = table.begin().unwrap();
        assert_eq!(tx.get("k0").unwrap(), b"value0");
        tx.rollback().unwrap();
    }
}
