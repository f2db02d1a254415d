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

#[macro_use]
extern crate amplify;

pub mod backend;
#[cfg(feature = "server")]
pub mod config;
mod error;
pub mod proxy;
mod tablename;
pub mod traits;

pub use error::{Error, StorageError, TransportError};
pub use tablename::{TableName, MAX_SEGMENTS};
pub use traits::{Db, Table, Transaction};
