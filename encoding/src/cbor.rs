// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::errors::Error;
use crate::DAG_CBOR;
use cid::multihash::{Code, MultihashDigest};
use cid::Cid;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for types that round-trip through DAG-CBOR and are addressed by the
/// CID of their encoded form.
pub trait Cbor: Serialize + DeserializeOwned {
    fn unmarshal_cbor(bz: &[u8]) -> Result<Self, Error> {
        crate::from_slice(bz)
    }

    fn marshal_cbor(&self) -> Result<Vec<u8>, Error> {
        crate::to_vec(self)
    }

    /// Returns the content identifier of the serialized value.
    fn cid(&self) -> Result<Cid, Error> {
        Ok(cid_from_cbor(&self.marshal_cbor()?))
    }
}

/// Computes the CID of an already DAG-CBOR encoded block.
pub fn cid_from_cbor(bz: &[u8]) -> Cid {
    Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(bz))
}
