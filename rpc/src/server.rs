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

//! Adapts a [`Backend`] onto the wire protocol. The server itself knows
//! nothing about `redb`: it only drives whatever backend implementation it
//! is handed, which keeps this crate free of a dependency on the storage
//! engine and lets the caller (the `kvzoo` crate) supply the adapter.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use crate::wire::{Failure, FailureCode, Request, Response};

/// Default ceiling on concurrently open server-side transactions.
pub const MAX_OPEN_TX_COUNT: usize = 1000;

/// A handle to one open write transaction on a [`Backend`] table.
pub trait BackendTx: Send + Sync + std::fmt::Debug {
    fn add(&mut self, key: &str, value: &[u8]) -> Result<(), Failure>;
    fn update(&mut self, key: &str, value: &[u8]) -> Result<(), Failure>;
    fn delete(&mut self, key: &str) -> Result<(), Failure>;
    fn get(&self, key: &str) -> Result<Vec<u8>, Failure>;
    fn list(&self) -> Result<BTreeMap<String, Vec<u8>>, Failure>;
    fn commit(self: Box<Self>) -> Result<(), Failure>;
    fn rollback(self: Box<Self>) -> Result<(), Failure>;
}

/// The storage contract the server drives. Implemented in the `kvzoo` crate
/// by an adapter wrapping a [`kvzoo::backend::LocalDb`](../../kvzoo/backend/struct.LocalDb.html).
pub trait Backend: Send + Sync {
    fn create_or_get_table(&self, name: &str) -> Result<(), Failure>;
    fn delete_table(&self, name: &str) -> Result<(), Failure>;
    fn begin_transaction(&self, table: &str) -> Result<Box<dyn BackendTx>, Failure>;
    fn checksum(&self) -> Result<String, Failure>;
    fn destroy(&self) -> Result<(), Failure>;
}

struct TxRegistry {
    next_id: AtomicU64,
    open: RwLock<HashMap<u64, Box<dyn BackendTx>>>,
    max_open: usize,
}

impl TxRegistry {
    fn new(max_open: usize) -> Self {
        Self { next_id: AtomicU64::new(1), open: RwLock::new(HashMap::new()), max_open }
    }

    fn insert(&self, tx: Box<dyn BackendTx>) -> Result<u64, Failure> {
        let mut open = self.open.write().expect("tx registry lock poisoned");
        if open.len() >= self.max_open {
            return Err(Failure::new(
                FailureCode::TxLimitExceeded,
                format!("server already has the maximum of {} open transactions", self.max_open),
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        open.insert(id, tx);
        Ok(id)
    }

    fn take(&self, id: u64) -> Result<Box<dyn BackendTx>, Failure> {
        let mut open = self.open.write().expect("tx registry lock poisoned");
        open.remove(&id)
            .ok_or_else(|| Failure::new(FailureCode::InvalidTxId, format!("no such transaction: {id}")))
    }

    fn with_mut<R>(&self, id: u64, f: impl FnOnce(&mut Box<dyn BackendTx>) -> Result<R, Failure>) -> Result<R, Failure> {
        let mut open = self.open.write().expect("tx registry lock poisoned");
        let tx = open
            .get_mut(&id)
            .ok_or_else(|| Failure::new(FailureCode::InvalidTxId, format!("no such transaction: {id}")))?;
        f(tx)
    }

    fn with_ref<R>(&self, id: u64, f: impl FnOnce(&dyn BackendTx) -> Result<R, Failure>) -> Result<R, Failure> {
        let open = self.open.read().expect("tx registry lock poisoned");
        let tx = open
            .get(&id)
            .ok_or_else(|| Failure::new(FailureCode::InvalidTxId, format!("no such transaction: {id}")))?;
        f(tx.as_ref())
    }
}

fn dispatch(backend: &dyn Backend, txs: &TxRegistry, req: Request) -> Response {
    let result = (|| -> Result<Response, Failure> {
        match req {
            Request::CreateOrGetTable(name) => {
                backend.create_or_get_table(&name)?;
                Ok(Response::Ack)
            }
            Request::DeleteTable(name) => {
                backend.delete_table(&name)?;
                Ok(Response::Ack)
            }
            Request::BeginTransaction(name) => {
                let tx = backend.begin_transaction(&name)?;
                let id = txs.insert(tx)?;
                Ok(Response::TxId(id))
            }
            Request::CommitTransaction(id) => {
                txs.take(id)?.commit()?;
                Ok(Response::Ack)
            }
            Request::RollbackTransaction(id) => {
                txs.take(id)?.rollback()?;
                Ok(Response::Ack)
            }
            Request::Get { tx_id, key } => {
                let value = txs.with_ref(tx_id, |tx| tx.get(&key))?;
                Ok(Response::Value(amplify::confinement::MediumBlob::try_from(value).map_err(|_| {
                    Failure::new(FailureCode::Internal, "value exceeds frame size")
                })?))
            }
            Request::List(tx_id) => {
                let records = txs.with_ref(tx_id, |tx| tx.list())?;
                let mut map = amplify::confinement::TinyOrdMap::new();
                for (k, v) in records {
                    let key = amplify::confinement::TinyString::try_from(k)
                        .map_err(|_| Failure::new(FailureCode::Internal, "key exceeds frame size"))?;
                    let value = amplify::confinement::MediumBlob::try_from(v).map_err(|_| {
                        Failure::new(FailureCode::Internal, "value exceeds frame size")
                    })?;
                    map.insert(key, value)
                        .map_err(|_| Failure::new(FailureCode::Internal, "table exceeds frame size"))?;
                }
                Ok(Response::Records(map))
            }
            Request::Add { tx_id, key, value } => {
                txs.with_mut(tx_id, |tx| tx.add(&key, &value))?;
                Ok(Response::Ack)
            }
            Request::Update { tx_id, key, value } => {
                txs.with_mut(tx_id, |tx| tx.update(&key, &value))?;
                Ok(Response::Ack)
            }
            Request::Delete { tx_id, key } => {
                txs.with_mut(tx_id, |tx| tx.delete(&key))?;
                Ok(Response::Ack)
            }
            Request::Checksum => {
                let digest = backend.checksum()?;
                Ok(Response::Digest(
                    amplify::confinement::TinyString::try_from(digest)
                        .map_err(|_| Failure::new(FailureCode::Internal, "digest exceeds frame size"))?,
                ))
            }
            Request::Destroy => {
                backend.destroy()?;
                Ok(Response::Ack)
            }
        }
    })();

    match result {
        Ok(resp) => resp,
        Err(failure) => {
            log::warn!(target: "rpc::server", "request failed: {failure}");
            Response::Failure(failure)
        }
    }
}

/// A backend RPC server: a ROUTER/DEALER frontend fanning unary requests out
/// to a small pool of worker threads, each running a REP socket against the
/// DEALER's inproc endpoint. This is the classic ZeroMQ "extended
/// request-reply" pattern, chosen so concurrently connected stubs never
/// serialize purely behind RPC dispatch.
pub struct BackendServer {
    backend: Arc<dyn Backend>,
    txs: Arc<TxRegistry>,
    workers: usize,
}

impl BackendServer {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_limits(backend, MAX_OPEN_TX_COUNT, 4)
    }

    pub fn with_limits(backend: Arc<dyn Backend>, max_open_tx: usize, workers: usize) -> Self {
        Self { backend, txs: Arc::new(TxRegistry::new(max_open_tx)), workers: workers.max(1) }
    }

    /// Binds `addr` and serves requests until the process is terminated or
    /// the underlying sockets fail. Blocks the calling thread.
    pub fn serve(&self, addr: &str) -> Result<(), zmq::Error> { self.serve_with(addr, |_| {}) }

    /// Like [`Self::serve`], but calls `on_bound` with the socket's actual
    /// endpoint right after binding. Lets callers that bind to an
    /// OS-assigned port (`tcp://127.0.0.1:0`) discover which port they got.
    pub fn serve_with<F>(&self, addr: &str, on_bound: F) -> Result<(), zmq::Error>
    where F: FnOnce(String) {
        let ctx = zmq::Context::new();
        let frontend = ctx.socket(zmq::ROUTER)?;
        frontend.bind(addr)?;
        if let Ok(Ok(endpoint)) = frontend.get_last_endpoint() {
            on_bound(endpoint);
        } else {
            on_bound(addr.to_owned());
        }
        let backend_sock = ctx.socket(zmq::DEALER)?;
        backend_sock.bind("inproc://kvzoo-workers")?;

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let ctx = ctx.clone();
            let backend = Arc::clone(&self.backend);
            let txs = Arc::clone(&self.txs);
            handles.push(thread::spawn(move || {
                let worker = ctx.socket(zmq::REP).expect("failed to create worker socket");
                worker.connect("inproc://kvzoo-workers").expect("failed to connect worker socket");
                log::debug!(target: "rpc::server", "worker {worker_id} ready");
                loop {
                    let bytes = match worker.recv_bytes(0) {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            log::error!(target: "rpc::server", "worker {worker_id} recv failed: {err}");
                            break;
                        }
                    };
                    let response = match Request::try_from(bytes) {
                        Ok(req) => dispatch(backend.as_ref(), &txs, req),
                        Err(err) => Response::Failure(Failure::new(
                            FailureCode::Internal,
                            format!("malformed request: {err}"),
                        )),
                    };
                    if let Err(err) = worker.send(Vec::from(response), 0) {
                        log::error!(target: "rpc::server", "worker {worker_id} send failed: {err}");
                        break;
                    }
                }
            }));
        }

        log::info!(target: "rpc::server", "listening on {addr}");
        zmq::proxy(&frontend, &backend_sock)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap as StdBTreeMap;

    use super::*;

    #[derive(Debug)]
    struct DummyTx(StdBTreeMap<String, Vec<u8>>);

    impl BackendTx for DummyTx {
        fn add(&mut self, key: &str, value: &[u8]) -> Result<(), Failure> {
            if self.0.contains_key(key) {
                return Err(Failure::new(FailureCode::DuplicateResource, key));
            }
            self.0.insert(key.to_owned(), value.to_vec());
            Ok(())
        }

        fn update(&mut self, key: &str, value: &[u8]) -> Result<(), Failure> {
            if !self.0.contains_key(key) {
                return Err(Failure::new(FailureCode::NotFoundResource, key));
            }
            self.0.insert(key.to_owned(), value.to_vec());
            Ok(())
        }

        fn delete(&mut self, key: &str) -> Result<(), Failure> {
            self.0.remove(key);
            Ok(())
        }

        fn get(&self, key: &str) -> Result<Vec<u8>, Failure> {
            self.0.get(key).cloned().ok_or_else(|| Failure::new(FailureCode::NotFoundResource, key))
        }

        fn list(&self) -> Result<BTreeMap<String, Vec<u8>>, Failure> { Ok(self.0.clone()) }

        fn commit(self: Box<Self>) -> Result<(), Failure> { Ok(()) }

        fn rollback(self: Box<Self>) -> Result<(), Failure> { Ok(()) }
    }

    #[test]
    fn tx_registry_enforces_max_open_count() {
        let registry = TxRegistry::new(2);
        let first = registry.insert(Box::new(DummyTx(StdBTreeMap::new()))).unwrap();
        let _second = registry.insert(Box::new(DummyTx(StdBTreeMap::new()))).unwrap();
        let err = registry.insert(Box::new(DummyTx(StdBTreeMap::new()))).unwrap_err();
        assert_eq!(err.code, FailureCode::TxLimitExceeded);

        registry.take(first).unwrap();
        let third = registry.insert(Box::new(DummyTx(StdBTreeMap::new())));
        assert!(third.is_ok());
    }

    #[test]
    fn tx_registry_rejects_unknown_id() {
        let registry = TxRegistry::new(10);
        let err = registry.take(42).unwrap_err();
        assert_eq!(err.code, FailureCode::InvalidTxId);
    }
}
