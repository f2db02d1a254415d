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

//! An embedded, single-process backend: one `redb` file simulating a nested
//! bucket tree on top of `redb`'s flat table namespace.
//!
//! `redb` has no native notion of nested buckets, only independently-named
//! B-trees. The bucket tree is realized as a metadata index table
//! (`__tables__`) recording every live [`TableName`], plus one data table
//! per registered name. Joining segments with `\0` (a byte below every legal
//! path character) makes the index table's natural key order coincide with
//! segment-lexicographic order, which both cascade delete and checksum rely
//! on.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::traits::{Db, Table, Transaction};
use crate::{Error, TableName};

#[cfg(feature = "server")]
mod rpc_adapter;
#[cfg(feature = "server")]
pub use rpc_adapter::LocalBackendAdapter;

const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("__tables__");

fn data_table_name(storage_key: &str) -> String { format!("t:{storage_key}") }

fn storage_err(e: impl Into<StorageError>) -> Error { Error::Storage(e.into()) }

/// A local, non-replicated backend file.
pub struct LocalDb {
    path: PathBuf,
    db: Arc<Database>,
}

impl LocalDb {
    /// Opens (creating if absent) the database file at `path`, with parent
    /// directories created as needed and file permissions set to `0664`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Storage(e.into()))?;
        }
        let existed = path.exists();
        let db = Database::create(&path).map_err(storage_err)?;
        if !existed {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode(0o664);
                fs::set_permissions(&path, perms).map_err(|e| Error::Storage(e.into()))?;
            }
        }
        // Ensure the metadata table exists so reads against a fresh file
        // never race a writer for table creation.
        let tx = db.begin_write().map_err(storage_err)?;
        tx.open_table(META_TABLE).map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;
        Ok(Self { path, db: Arc::new(db) })
    }
}

impl Db for LocalDb {
    type Table = LocalTable;

    fn create_or_get_table(&self, name: &TableName) -> Result<Self::Table, Error> {
        let tx = self.db.begin_write().map_err(storage_err)?;
        {
            let mut meta = tx.open_table(META_TABLE).map_err(storage_err)?;
            let segments = name.segments();
            for depth in 1..=segments.len() {
                let partial = TableName::parse(format!("/{}", segments[..depth].join("/")))?;
                let key = partial.storage_key();
                if meta.get(key.as_str()).map_err(storage_err)?.is_none() {
                    meta.insert(key.as_str(), partial.as_str()).map_err(storage_err)?;
                }
                let data_name = data_table_name(&key);
                tx.open_table(TableDefinition::<&str, &[u8]>::new(&data_name))
                    .map_err(storage_err)?;
            }
        }
        tx.commit().map_err(storage_err)?;
        Ok(LocalTable { db: self.db.clone(), name: name.clone() })
    }

    fn delete_table(&self, name: &TableName) -> Result<(), Error> {
        let tx = self.db.begin_write().map_err(storage_err)?;
        let target_key = name.storage_key();
        let mut victims = Vec::new();
        {
            let meta = tx.open_table(META_TABLE).map_err(storage_err)?;
            if meta.get(target_key.as_str()).map_err(storage_err)?.is_none() {
                return Err(Error::table_not_found(name.as_str()));
            }
            let prefix = format!("{target_key}\0");
            for entry in meta.iter().map_err(storage_err)? {
                let (k, _) = entry.map_err(storage_err)?;
                let k = k.value();
                if k == target_key || k.starts_with(&prefix) {
                    victims.push(k.to_string());
                }
            }
        }
        {
            let mut meta = tx.open_table(META_TABLE).map_err(storage_err)?;
            for key in &victims {
                meta.remove(key.as_str()).map_err(storage_err)?;
            }
        }
        for key in &victims {
            let data_name = data_table_name(key);
            tx.delete_table(TableDefinition::<&str, &[u8]>::new(&data_name))
                .map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;
        Ok(())
    }

    fn checksum(&self) -> Result<String, Error> {
        let tx = self.db.begin_read().map_err(storage_err)?;
        let meta = tx.open_table(META_TABLE).map_err(storage_err)?;
        let mut hasher = Sha256::new();
        for entry in meta.iter().map_err(storage_err)? {
            let (k, _) = entry.map_err(storage_err)?;
            let key = k.value().to_owned();
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(key.as_bytes());
            let data_name = data_table_name(&key);
            match tx.open_table(TableDefinition::<&str, &[u8]>::new(&data_name)) {
                Ok(data_table) => {
                    for record in data_table.iter().map_err(storage_err)? {
                        let (rk, rv) = record.map_err(storage_err)?;
                        let (rk, rv) = (rk.value(), rv.value());
                        hasher.update((rk.len() as u64).to_be_bytes());
                        hasher.update(rk.as_bytes());
                        hasher.update((rv.len() as u64).to_be_bytes());
                        hasher.update(rv);
                    }
                }
                Err(redb::TableError::TableDoesNotExist(_)) => {}
                Err(e) => return Err(storage_err(e)),
            }
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn close(self) -> Result<(), Error> { Ok(()) }

    fn destroy(self) -> Result<(), Error> {
        let path = self.path.clone();
        drop(self);
        if path.exists() {
            fs::remove_file(path).map_err(|e| Error::Storage(e.into()))?;
        }
        Ok(())
    }
}

/// A handle scoped to one [`TableName`] within a [`LocalDb`].
pub struct LocalTable {
    db: Arc<Database>,
    name: TableName,
}

impl Table for LocalTable {
    type Transaction = LocalTransaction;

    fn begin(&self) -> Result<Self::Transaction, Error> {
        let tx = self.db.begin_write().map_err(storage_err)?;
        // Re-create any meta entries a concurrent cascade delete removed
        // since this table was last created or gotten, mirroring
        // `create_or_get_table` so a resurrected table stays reachable by
        // `checksum` and future cascade deletes instead of becoming an
        // orphaned data table.
        {
            let mut meta = tx.open_table(META_TABLE).map_err(storage_err)?;
            let segments = self.name.segments();
            for depth in 1..=segments.len() {
                let partial = TableName::parse(format!("/{}", segments[..depth].join("/")))?;
                let key = partial.storage_key();
                if meta.get(key.as_str()).map_err(storage_err)?.is_none() {
                    meta.insert(key.as_str(), partial.as_str()).map_err(storage_err)?;
                }
            }
        }
        Ok(LocalTransaction { tx, data_name: data_table_name(&self.name.storage_key()) })
    }
}

/// An open read-write transaction against one table.
///
/// Owns the backend's `WriteTransaction` exclusively and re-opens the
/// underlying `redb::Table` handle fresh on every operation rather than
/// holding a handle that borrows from the transaction across calls.
pub struct LocalTransaction {
    tx: redb::WriteTransaction,
    data_name: String,
}

impl std::fmt::Debug for LocalTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransaction").field("data_name", &self.data_name).finish()
    }
}

impl Transaction for LocalTransaction {
    fn add(&mut self, key: &str, value: &[u8]) -> Result<(), Error> {
        let mut table = self
            .tx
            .open_table(TableDefinition::<&str, &[u8]>::new(&self.data_name))
            .map_err(storage_err)?;
        if table.get(key).map_err(storage_err)?.is_some() {
            return Err(Error::duplicate(key));
        }
        table.insert(key, value).map_err(storage_err)?;
        Ok(())
    }

    fn update(&mut self, key: &str, value: &[u8]) -> Result<(), Error> {
        let mut table = self
            .tx
            .open_table(TableDefinition::<&str, &[u8]>::new(&self.data_name))
            .map_err(storage_err)?;
        if table.get(key).map_err(storage_err)?.is_none() {
            return Err(Error::not_found(key));
        }
        table.insert(key, value).map_err(storage_err)?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), Error> {
        let mut table = self
            .tx
            .open_table(TableDefinition::<&str, &[u8]>::new(&self.data_name))
            .map_err(storage_err)?;
        table.remove(key).map_err(storage_err)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        let table = self
            .tx
            .open_table(TableDefinition::<&str, &[u8]>::new(&self.data_name))
            .map_err(storage_err)?;
        table
            .get(key)
            .map_err(storage_err)?
            .map(|guard| guard.value().to_vec())
            .ok_or_else(|| Error::not_found(key))
    }

    fn list(&self) -> Result<BTreeMap<String, Vec<u8>>, Error> {
        let table = self
            .tx
            .open_table(TableDefinition::<&str, &[u8]>::new(&self.data_name))
            .map_err(storage_err)?;
        let mut out = BTreeMap::new();
        for record in table.iter().map_err(storage_err)? {
            let (k, v) = record.map_err(storage_err)?;
            out.insert(k.value().to_owned(), v.value().to_vec());
        }
        Ok(out)
    }

    fn commit(self) -> Result<(), Error> { self.tx.commit().map_err(storage_err) }

    fn rollback(self) -> Result<(), Error> { self.tx.abort().map_err(storage_err) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (LocalDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = LocalDb::open(dir.path().join("kvzoo.redb")).expect("open");
        (db, dir)
    }

    #[test]
    fn add_get_round_trip() {
        let (db, _dir) = temp_db();
        let name = TableName::parse("/app/users").unwrap();
        let table = db.create_or_get_table(&name).unwrap();

        let mut tx = table.begin().unwrap();
        tx.add("alice", b"1").unwrap();
        tx.commit().unwrap();

        let tx = table.begin().unwrap();
        assert_eq!(tx.get("alice").unwrap(), b"1");
        tx.rollback().unwrap();
    }

    #[test]
    fn add_duplicate_fails() {
        let (db, _dir) = temp_db();
        let name = TableName::parse("/app/users").unwrap();
        let table = db.create_or_get_table(&name).unwrap();

        let mut tx = table.begin().unwrap();
        tx.add("alice", b"1").unwrap();
        let err = tx.add("alice", b"2").unwrap_err();
        assert!(matches!(err, Error::DuplicateResource(_)));
    }

    #[test]
    fn update_requires_presence() {
        let (db, _dir) = temp_db();
        let name = TableName::parse("/app/users").unwrap();
        let table = db.create_or_get_table(&name).unwrap();

        let mut tx = table.begin().unwrap();
        let err = tx.update("ghost", b"1").unwrap_err();
        assert!(matches!(err, Error::NotFoundResource(_)));
    }

    #[test]
    fn delete_is_idempotent() {
        let (db, _dir) = temp_db();
        let name = TableName::parse("/app/users").unwrap();
        let table = db.create_or_get_table(&name).unwrap();

        let mut tx = table.begin().unwrap();
        tx.delete("ghost").unwrap();
        tx.delete("ghost").unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn rollback_restores_state() {
        let (db, _dir) = temp_db();
        let name = TableName::parse("/app/users").unwrap();
        let table = db.create_or_get_table(&name).unwrap();

        let mut tx = table.begin().unwrap();
        tx.add("alice", b"1").unwrap();
        tx.commit().unwrap();

        let mut tx = table.begin().unwrap();
        tx.delete("alice").unwrap();
        tx.add("bob", b"2").unwrap();
        tx.rollback().unwrap();

        let tx = table.begin().unwrap();
        assert_eq!(tx.get("alice").unwrap(), b"1");
        assert!(tx.get("bob").is_err());
    }

    #[test]
    fn cascade_delete_removes_descendants() {
        let (db, _dir) = temp_db();
        let parent = TableName::parse("/app/cd").unwrap();
        let child = TableName::parse("/app/cd/ns1").unwrap();
        let child_table = db.create_or_get_table(&child).unwrap();

        let mut tx = child_table.begin().unwrap();
        for i in 0..10 {
            tx.add(&format!("key{i}"), format!("v{i}").as_bytes()).unwrap();
        }
        tx.commit().unwrap();

        db.delete_table(&parent).unwrap();

        let err = db.delete_table(&child).unwrap_err();
        assert!(matches!(err, Error::TableNotFound(_)));
    }

    #[test]
    fn checksum_is_order_insensitive() {
        let (db, _dir) = temp_db();
        let name = TableName::parse("/app/checksum").unwrap();
        let table = db.create_or_get_table(&name).unwrap();

        let mut tx = table.begin().unwrap();
        tx.add("a", b"1").unwrap();
        tx.add("b", b"2").unwrap();
        tx.commit().unwrap();
        let first = db.checksum().unwrap();

        let mut tx = table.begin().unwrap();
        tx.delete("a").unwrap();
        tx.delete("b").unwrap();
        tx.add("b", b"2").unwrap();
        tx.add("a", b"1").unwrap();
        tx.commit().unwrap();
        let second = db.checksum().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn checksum_is_content_sensitive() {
        let (db, _dir) = temp_db();
        let name = TableName::parse("/app/checksum2").unwrap();
        let table = db.create_or_get_table(&name).unwrap();

        let before = db.checksum().unwrap();
        let mut tx = table.begin().unwrap();
        tx.add("a", b"1").unwrap();
        tx.commit().unwrap();
        let after = db.checksum().unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn concurrent_begin_add_commit_on_distinct_keys_all_land() {
        let (db, _dir) = temp_db();
        let name = TableName::parse("/app/concurrent").unwrap();
        let table = db.create_or_get_table(&name).unwrap();

        const WRITERS: usize = 1000;
        std::thread::scope(|scope| {
            for i in 0..WRITERS {
                let table = &table;
                scope.spawn(move || {
                    let mut tx = table.begin().unwrap();
                    tx.add(&format!("key{i}"), format!("v{i}").as_bytes()).unwrap();
                    tx.commit().unwrap();
                });
            }
        });

        let tx = table.begin().unwrap();
        assert_eq!(tx.list().unwrap().len(), WRITERS);
        tx.rollback().unwrap();
    }

    #[test]
    fn destroy_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvzoo.redb");
        let db = LocalDb::open(&path).unwrap();
        assert!(path.exists());
        db.destroy().unwrap();
        assert!(!path.exists());
    }
}
