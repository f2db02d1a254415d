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

use std::collections::BTreeMap;

use crate::{Error, TableName};

/// A database: local or replicated, the contract is identical so that a
/// [`crate::proxy::Proxy`] can stand in anywhere a [`crate::backend::LocalDb`]
/// is used.
pub trait Db {
    type Table: Table;

    /// Creates the table (and every missing ancestor) if absent, returning a
    /// handle to it. Idempotent.
    fn create_or_get_table(&self, name: &TableName) -> Result<Self::Table, Error>;

    /// Removes the table and every descendant table beneath it.
    fn delete_table(&self, name: &TableName) -> Result<(), Error>;

    /// A content fingerprint over the entire database, stable across
    /// insertion order.
    fn checksum(&self) -> Result<String, Error>;

    /// Releases the handle without deleting on-disk data.
    fn close(self) -> Result<(), Error>;

    /// Removes all data. Idempotent with respect to `close`.
    fn destroy(self) -> Result<(), Error>;
}

/// A namespace within a [`Db`]; purely an entry point for transactions.
pub trait Table {
    type Transaction: Transaction;

    fn begin(&self) -> Result<Self::Transaction, Error>;
}

/// A live read-write handle scoped to one [`Table`].
///
/// Implementations own their backend transaction exclusively: rather than
/// caching an open bucket/table handle across calls (which would borrow from
/// the transaction and make the struct self-referential), each operation
/// re-resolves its target table fresh.
pub trait Transaction {
    fn add(&mut self, key: &str, value: &[u8]) -> Result<(), Error>;

    fn update(&mut self, key: &str, value: &[u8]) -> Result<(), Error>;

    fn delete(&mut self, key: &str) -> Result<(), Error>;

    fn get(&self, key: &str) -> Result<Vec<u8>, Error>;

    fn list(&self) -> Result<BTreeMap<String, Vec<u8>>, Error>;

    fn commit(self) -> Result<(), Error>;

    fn rollback(self) -> Result<(), Error>;
}
