// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod cbor;
mod errors;
mod hash;

pub use self::cbor::*;
pub use self::errors::*;
pub use self::hash::*;

pub use serde::{de, ser};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// `multicodec` code for DAG-CBOR encoded blocks.
pub const DAG_CBOR: u64 = 0x71;
/// `multicodec` code for raw blocks.
pub const RAW: u64 = 0x55;

/// Serializes the given value into DAG-CBOR bytes.
pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, Error>
where
    T: Serialize,
{
    serde_ipld_dagcbor::to_vec(value).map_err(|e| Error::Encode(e.to_string()))
}

/// Deserializes DAG-CBOR bytes into the given type.
pub fn from_slice<T>(bz: &[u8]) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    serde_ipld_dagcbor::from_slice(bz).map_err(|e| Error::Decode(e.to_string()))
}
