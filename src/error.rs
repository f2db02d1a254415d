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

use std::io;

/// Everything that can go wrong while talking to a local or replicated
/// backend, from a malformed table path to a diverged commit.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// table name `{0}` is not a valid path
    InvalidTableName(String),

    /// table `{0}` does not exist
    TableNotFound(String),

    /// key `{0}` already exists in the table
    DuplicateResource(String),

    /// key `{0}` was not found in the table
    NotFoundResource(String),

    /// server already has the maximum of {0} open transactions
    TxLimitExceeded(String),

    /// transaction id is unknown or no longer open: {0}
    InvalidTxId(String),

    /// backend refused the operation: {0}
    BackendBusy(String),

    /// replication to {0:?} failed: {1}
    ReplicationFailure(Vec<String>, String),

    /// backends diverged after primary commit at {0:?}: {1}
    DivergentCommit(Vec<String>, String),

    /// transport error: {0}
    #[from]
    Transport(TransportError),

    /// storage engine error: {0}
    #[from]
    Storage(StorageError),
}

impl Error {
    pub fn invalid_table_name(name: impl Into<String>) -> Self { Self::InvalidTableName(name.into()) }

    pub fn table_not_found(name: impl Into<String>) -> Self { Self::TableNotFound(name.into()) }

    pub fn duplicate(key: impl Into<String>) -> Self { Self::DuplicateResource(key.into()) }

    pub fn not_found(key: impl Into<String>) -> Self { Self::NotFoundResource(key.into()) }

    pub fn invalid_tx(id: u64) -> Self { Self::InvalidTxId(id.to_string()) }

    pub fn tx_limit_exceeded(max: usize) -> Self {
        Self::TxLimitExceeded(format!("{max} open transactions"))
    }

    pub fn replication_failure(addrs: Vec<String>, cause: impl ToString) -> Self {
        Self::ReplicationFailure(addrs, cause.to_string())
    }

    pub fn divergent_commit(addrs: Vec<String>, cause: impl ToString) -> Self {
        Self::DivergentCommit(addrs, cause.to_string())
    }

    /// Whether a client may safely retry the operation that produced this
    /// error without risking a duplicate side effect.
    pub fn is_retry_safe(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::BackendBusy(_))
    }
}

/// Errors surfaced by the embedded storage engine, wrapped so callers never
/// need to depend on `redb` directly.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum StorageError {
    /// failed to open the database file: {0}
    #[from]
    Database(redb::DatabaseError),

    /// failed to start a transaction: {0}
    #[from]
    Transaction(redb::TransactionError),

    /// failed to open a table: {0}
    #[from]
    Table(redb::TableError),

    /// storage operation failed: {0}
    #[from]
    Storage(redb::StorageError),

    /// failed to commit a transaction: {0}
    #[from]
    Commit(redb::CommitError),

    /// filesystem error: {0}
    #[from]
    Io(IoErrorDisplay),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self { Self::Io(IoErrorDisplay(err.to_string())) }
}

/// `io::Error` does not implement `Clone`/`Eq`, so we keep its message only.
#[derive(Clone, Eq, PartialEq, Debug, Display)]
#[display(inner)]
pub struct IoErrorDisplay(pub String);

/// Errors originating in the RPC transport layer (connection, serialization).
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum TransportError {
    /// could not reach backend at {0}
    Unreachable(String),

    /// request to {0} timed out
    Timeout(String),

    /// malformed response from {0}: {1}
    Malformed(String, String),
}
