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

//! Binary wire format for backend RPC, shared between [`crate::server`] and
//! [`crate::client`]. Independent of any particular backend implementation:
//! table names and keys travel as plain strings, values as byte blobs.

use amplify::confinement::{MediumBlob, TinyOrdMap, TinyString, U32 as U32MAX};
use strict_encoding::{DecodeError, DeserializeError, StrictDeserialize, StrictSerialize};

pub const LIB_NAME_KVZOO_RPC: &str = "KvzooRPC";

#[derive(Clone, Eq, PartialEq, Debug)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_KVZOO_RPC, tags = custom, dumb = Self::Checksum)]
pub enum Request {
    #[strict_type(tag = 0x01)]
    CreateOrGetTable(TinyString),

    #[strict_type(tag = 0x02)]
    DeleteTable(TinyString),

    #[strict_type(tag = 0x03)]
    BeginTransaction(TinyString),

    #[strict_type(tag = 0x04)]
    CommitTransaction(u64),

    #[strict_type(tag = 0x05)]
    RollbackTransaction(u64),

    #[strict_type(tag = 0x06)]
    Get { tx_id: u64, key: TinyString },

    #[strict_type(tag = 0x07)]
    List(u64),

    #[strict_type(tag = 0x08)]
    Add { tx_id: u64, key: TinyString, value: MediumBlob },

    #[strict_type(tag = 0x09)]
    Update { tx_id: u64, key: TinyString, value: MediumBlob },

    #[strict_type(tag = 0x0a)]
    Delete { tx_id: u64, key: TinyString },

    #[strict_type(tag = 0x0b, dumb)]
    Checksum,

    #[strict_type(tag = 0x0c)]
    Destroy,
}
impl StrictSerialize for Request {}
impl StrictDeserialize for Request {}

impl TryFrom<Vec<u8>> for Request {
    type Error = DeserializeError;

    fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
        let data = MediumBlob::try_from(data).map_err(DecodeError::from)?;
        Request::from_strict_serialized(data)
    }
}

impl From<Request> for Vec<u8> {
    fn from(req: Request) -> Self {
        req.to_strict_serialized::<U32MAX>().expect("request does not fit frame size").into_vec()
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_KVZOO_RPC, tags = custom, dumb = Self::Failure(strict_dumb!()))]
pub enum Response {
    #[strict_type(tag = 0x00)]
    Failure(Failure),

    #[strict_type(tag = 0x01)]
    Ack,

    #[strict_type(tag = 0x02)]
    TxId(u64),

    #[strict_type(tag = 0x03)]
    Value(MediumBlob),

    #[strict_type(tag = 0x04)]
    Records(TinyOrdMap<TinyString, MediumBlob>),

    #[strict_type(tag = 0x05)]
    Digest(TinyString),
}
impl StrictSerialize for Response {}
impl StrictDeserialize for Response {}

impl TryFrom<Vec<u8>> for Response {
    type Error = DeserializeError;

    fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
        let data = MediumBlob::try_from(data).map_err(DecodeError::from)?;
        Response::from_strict_serialized(data)
    }
}

impl From<Response> for Vec<u8> {
    fn from(resp: Response) -> Self {
        resp.to_strict_serialized::<U32MAX>().expect("response does not fit frame size").into_vec()
    }
}

/// Error codes mirroring the server-side error taxonomy, carried over the
/// wire since the client crate does not depend on the backend crate.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
#[display(doc_comments)]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_KVZOO_RPC, tags = repr, into_u8, try_from_u8)]
#[repr(u8)]
pub enum FailureCode {
    /// invalid table name
    InvalidTableName = 1,

    /// table not found
    TableNotFound = 2,

    /// duplicate resource
    DuplicateResource = 3,

    /// resource not found
    NotFoundResource = 4,

    /// too many open transactions
    TxLimitExceeded = 5,

    /// invalid transaction id
    InvalidTxId = 6,

    /// backend busy
    BackendBusy = 7,

    /// internal error
    #[strict_type(dumb)]
    Internal = 255,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug, Display)]
#[display("{code}: {message}")]
#[derive(StrictType, StrictDumb, StrictEncode, StrictDecode)]
#[strict_type(lib = LIB_NAME_KVZOO_RPC)]
pub struct Failure {
    pub code: FailureCode,
    pub message: TinyString,
}

impl Failure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self { code, message: TinyString::from_checked(message) }
    }
}
