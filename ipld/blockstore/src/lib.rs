// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod errors;

pub use errors::Error;

use cid::multihash::{Code, MultihashDigest};
use cid::Cid;
use mirror_db::Store;
use mirror_encoding::{de::DeserializeOwned, ser::Serialize};

/// Key under which a block is persisted in the backing datastore. Blocks share
/// the datastore with the mirror bookkeeping namespaces, so they are kept
/// under a dedicated prefix keyed by the canonical (base32) CID string.
pub fn block_key(cid: &Cid) -> String {
    format!("blocks/{cid}")
}

/// Extension methods for inserting and retrieving IPLD data with CIDs
pub trait BlockStore: Store {
    /// Get bytes from block store by CID.
    fn get_bytes(&self, cid: &Cid) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.read(block_key(cid))?)
    }

    /// Get typed object from block store by CID.
    fn get_obj<T>(&self, cid: &Cid) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        match self.get_bytes(cid)? {
            Some(bz) => Ok(Some(mirror_encoding::from_slice(&bz)?)),
            None => Ok(None),
        }
    }

    /// Returns `Ok(true)` if the block exists in the store.
    fn contains(&self, cid: &Cid) -> Result<bool, Error> {
        Ok(self.exists(block_key(cid))?)
    }

    /// Put an object in the block store and return the CID identifier.
    fn put_obj<S>(&self, obj: &S, code: Code) -> Result<Cid, Error>
    where
        S: Serialize,
    {
        let bytes = mirror_encoding::to_vec(obj)?;
        self.put_raw(bytes, code)
    }

    /// Put raw DAG-CBOR bytes in the block store and return the CID identifier.
    fn put_raw(&self, bytes: Vec<u8>, code: Code) -> Result<Cid, Error> {
        let cid = Cid::new_v1(mirror_encoding::DAG_CBOR, code.digest(&bytes));
        self.put_keyed(&cid, &bytes)?;
        Ok(cid)
    }

    /// Put a block keyed by an already-computed CID.
    fn put_keyed(&self, cid: &Cid, bytes: &[u8]) -> Result<(), Error> {
        Ok(self.write(block_key(cid), bytes)?)
    }

    /// Remove a block from the store.
    fn delete_block(&self, cid: &Cid) -> Result<(), Error> {
        Ok(self.delete(block_key(cid))?)
    }
}

impl<T: Store> BlockStore for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_db::MemoryDB;

    #[test]
    fn put_get_obj() {
        let db = MemoryDB::default();
        let value = vec!["fish".to_string(), "lobster".to_string()];
        let cid = db.put_obj(&value, Code::Blake2b256).unwrap();
        assert!(db.contains(&cid).unwrap());
        let got: Vec<String> = db.get_obj(&cid).unwrap().unwrap();
        assert_eq!(value, got);
    }

    #[test]
    fn blocks_live_under_prefixed_keys() {
        let db = MemoryDB::default();
        let cid = db.put_obj(&42u64, Code::Blake2b256).unwrap();
        assert!(db.exists(format!("blocks/{cid}")).unwrap());
    }

    #[test]
    fn delete_block_removes_it() {
        let db = MemoryDB::default();
        let cid = db.put_obj(&1u64, Code::Blake2b256).unwrap();
        db.delete_block(&cid).unwrap();
        assert!(!db.contains(&cid).unwrap());
        assert!(db.get_bytes(&cid).unwrap().is_none());
    }
}
