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

//! A thin stub speaking [`crate::wire`] over a single ZeroMQ `REQ` socket.
//!
//! `REQ` sockets require strict send/receive alternation, so the socket is
//! guarded by a mutex: concurrent callers serialize on the connection, one
//! connection per backend address, matching how the replication proxy opens
//! one stub per backend.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use amplify::confinement::{MediumBlob, TinyString};

use crate::wire::{Failure, FailureCode, Request, Response};

/// Failure modes visible to a stub caller: either the transport itself
/// failed, or the backend answered with a structured [`Failure`].
#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(inner)]
pub enum RpcError {
    Transport(String),
    Backend(Failure),
}

impl RpcError {
    pub fn code(&self) -> Option<FailureCode> {
        match self {
            RpcError::Backend(f) => Some(f.code),
            RpcError::Transport(_) => None,
        }
    }
}

/// Default socket-level timeout for both send and receive, matching the
/// 5-second exclusive-open timeout used by the local backend.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection to one backend's RPC server.
pub struct Stub {
    addr: String,
    socket: Mutex<zmq::Socket>,
}

impl Stub {
    pub fn connect(addr: &str) -> Result<Self, RpcError> {
        Self::connect_timeout(addr, DEFAULT_TIMEOUT)
    }

    pub fn connect_timeout(addr: &str, timeout: Duration) -> Result<Self, RpcError> {
        let ctx = zmq::Context::new();
        let socket = ctx
            .socket(zmq::REQ)
            .map_err(|e| RpcError::Transport(format!("failed to create socket: {e}")))?;
        let millis = timeout.as_millis() as i32;
        socket
            .set_rcvtimeo(millis)
            .map_err(|e| RpcError::Transport(format!("failed to set timeout: {e}")))?;
        socket
            .set_sndtimeo(millis)
            .map_err(|e| RpcError::Transport(format!("failed to set timeout: {e}")))?;
        socket
            .connect(addr)
            .map_err(|e| RpcError::Transport(format!("failed to connect to {addr}: {e}")))?;
        Ok(Self { addr: addr.to_owned(), socket: Mutex::new(socket) })
    }

    fn roundtrip(&self, req: Request) -> Result<Response, RpcError> {
        let socket = self.socket.lock().expect("stub socket lock poisoned");
        socket
            .send(Vec::from(req), 0)
            .map_err(|e| RpcError::Transport(format!("send to {} failed: {e}", self.addr)))?;
        let bytes = socket
            .recv_bytes(0)
            .map_err(|e| RpcError::Transport(format!("recv from {} failed: {e}", self.addr)))?;
        Response::try_from(bytes)
            .map_err(|e| RpcError::Transport(format!("malformed response from {}: {e}", self.addr)))
    }

    fn call(&self, req: Request) -> Result<Response, RpcError> {
        match self.roundtrip(req)? {
            Response::Failure(f) => Err(RpcError::Backend(f)),
            resp => Ok(resp),
        }
    }

    pub fn create_or_get_table(&self, name: &str) -> Result<(), RpcError> {
        self.call(Request::CreateOrGetTable(TinyString::from_checked(name.to_owned())))?;
        Ok(())
    }

    pub fn delete_table(&self, name: &str) -> Result<(), RpcError> {
        self.call(Request::DeleteTable(TinyString::from_checked(name.to_owned())))?;
        Ok(())
    }

    pub fn begin_transaction(&self, table: &str) -> Result<u64, RpcError> {
        match self.call(Request::BeginTransaction(TinyString::from_checked(table.to_owned())))? {
            Response::TxId(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    pub fn commit_transaction(&self, tx_id: u64) -> Result<(), RpcError> {
        self.call(Request::CommitTransaction(tx_id))?;
        Ok(())
    }

    pub fn rollback_transaction(&self, tx_id: u64) -> Result<(), RpcError> {
        self.call(Request::RollbackTransaction(tx_id))?;
        Ok(())
    }

    pub fn get(&self, tx_id: u64, key: &str) -> Result<Vec<u8>, RpcError> {
        match self.call(Request::Get { tx_id, key: TinyString::from_checked(key.to_owned()) })? {
            Response::Value(v) => Ok(v.into_vec()),
            other => Err(unexpected(other)),
        }
    }

    pub fn list(&self, tx_id: u64) -> Result<BTreeMap<String, Vec<u8>>, RpcError> {
        match self.call(Request::List(tx_id))? {
            Response::Records(map) => {
                Ok(map.into_iter().map(|(k, v)| (k.to_string(), v.into_vec())).collect())
            }
            other => Err(unexpected(other)),
        }
    }

    pub fn add(&self, tx_id: u64, key: &str, value: &[u8]) -> Result<(), RpcError> {
        let value = MediumBlob::try_from(value.to_vec()).map_err(|_| {
            RpcError::Transport("value exceeds frame size".to_owned())
        })?;
        self.call(Request::Add { tx_id, key: TinyString::from_checked(key.to_owned()), value })?;
        Ok(())
    }

    pub fn update(&self, tx_id: u64, key: &str, value: &[u8]) -> Result<(), RpcError> {
        let value = MediumBlob::try_from(value.to_vec()).map_err(|_| {
            RpcError::Transport("value exceeds frame size".to_owned())
        })?;
        self.call(Request::Update { tx_id, key: TinyString::from_checked(key.to_owned()), value })?;
        Ok(())
    }

    pub fn delete(&self, tx_id: u64, key: &str) -> Result<(), RpcError> {
        self.call(Request::Delete { tx_id, key: TinyString::from_checked(key.to_owned()) })?;
        Ok(())
    }

    pub fn checksum(&self) -> Result<String, RpcError> {
        match self.call(Request::Checksum)? {
            Response::Digest(d) => Ok(d.to_string()),
            other => Err(unexpected(other)),
        }
    }

    pub fn destroy(&self) -> Result<(), RpcError> {
        self.call(Request::Destroy)?;
        Ok(())
    }

    pub fn addr(&self) -> &str { &self.addr }
}

fn unexpected(resp: Response) -> RpcError {
    RpcError::Transport(format!("unexpected response: {resp:?}"))
}
