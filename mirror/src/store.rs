// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use mirror_blockstore::{block_key, BlockStore, Error};
use mirror_db::Store;
use serde_bytes::ByteBuf;

/// Key holding the CID of the last fully-mirrored source head.
const HEAD_KEY: &str = "head";
/// Key holding the persisted snapshot of the chunker cache, oldest first.
const CHUNK_CACHE_KEY: &str = "chunkcache";

fn mapping_key(cid: &Cid) -> String {
    format!("mapping/{cid}")
}

/// Durable state of the mirror: the source-to-mirror ad mapping, the last
/// mirrored source head and the block storage backing both chains, all
/// namespaced inside a single datastore.
#[derive(Debug, Clone)]
pub struct MirrorStore<DB> {
    db: DB,
}

impl<DB: Store> Store for MirrorStore<DB> {
    fn read<K>(&self, key: K) -> Result<Option<Vec<u8>>, mirror_db::Error>
    where
        K: AsRef<[u8]>,
    {
        self.db.read(key)
    }

    fn write<K, V>(&self, key: K, value: V) -> Result<(), mirror_db::Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.db.write(key, value)
    }

    fn delete<K>(&self, key: K) -> Result<(), mirror_db::Error>
    where
        K: AsRef<[u8]>,
    {
        self.db.delete(key)
    }

    fn exists<K>(&self, key: K) -> Result<bool, mirror_db::Error>
    where
        K: AsRef<[u8]>,
    {
        self.db.exists(key)
    }

    fn bulk_write<K, V>(
        &self,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<(), mirror_db::Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.db.bulk_write(values)
    }
}

fn parse_cid(key: &str, bz: &[u8]) -> Result<Cid, Error> {
    Cid::try_from(bz)
        .map_err(|e| Error::Db(mirror_db::Error::Other(format!("corrupt cid under {key}: {e}"))))
}

impl<DB: Store + Clone> MirrorStore<DB> {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    /// The last source head this mirror fully promoted, if any.
    pub fn head(&self) -> Result<Option<Cid>, Error> {
        match self.db.read(HEAD_KEY)? {
            Some(bz) => Ok(Some(parse_cid(HEAD_KEY, &bz)?)),
            None => Ok(None),
        }
    }

    pub fn set_head(&self, cid: &Cid) -> Result<(), Error> {
        Ok(self.db.write(HEAD_KEY, cid.to_bytes())?)
    }

    /// Mirrored counterpart of a source ad, if it has been promoted.
    pub fn mapping(&self, source: &Cid) -> Result<Option<Cid>, Error> {
        let key = mapping_key(source);
        match self.db.read(&key)? {
            Some(bz) => Ok(Some(parse_cid(&key, &bz)?)),
            None => Ok(None),
        }
    }

    /// Promotes one mirrored ad: its block and the source mapping are applied
    /// as a single batch, so a crash can never leave a mapping without its
    /// block.
    pub fn promote(&self, source: &Cid, mirrored: &Cid, block: &[u8]) -> Result<(), Error> {
        let writes = [
            (block_key(mirrored).into_bytes(), block.to_vec()),
            (mapping_key(source).into_bytes(), mirrored.to_bytes()),
        ];
        Ok(self.db.bulk_write(writes)?)
    }

    /// Reads the persisted chunker cache snapshot, oldest entry first.
    pub fn read_chunk_cache(&self) -> Result<Vec<(Cid, Cid)>, Error> {
        let Some(bz) = self.db.read(CHUNK_CACHE_KEY)? else {
            return Ok(Vec::new());
        };
        let raw: Vec<(ByteBuf, ByteBuf)> = mirror_encoding::from_slice(&bz)?;
        raw.into_iter()
            .map(|(source, produced)| {
                Ok((
                    parse_cid(CHUNK_CACHE_KEY, &source)?,
                    parse_cid(CHUNK_CACHE_KEY, &produced)?,
                ))
            })
            .collect()
    }

    /// Persists the chunker cache snapshot, oldest entry first.
    pub fn write_chunk_cache(&self, entries: &[(Cid, Cid)]) -> Result<(), Error> {
        let raw: Vec<(ByteBuf, ByteBuf)> = entries
            .iter()
            .map(|(source, produced)| {
                (
                    ByteBuf::from(source.to_bytes()),
                    ByteBuf::from(produced.to_bytes()),
                )
            })
            .collect();
        Ok(self.db.write(CHUNK_CACHE_KEY, mirror_encoding::to_vec(&raw)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cid::multihash::{Code, MultihashDigest};
    use mirror_db::MemoryDB;
    use mirror_encoding::DAG_CBOR;

    fn cid_of(data: &[u8]) -> Cid {
        Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(data))
    }

    #[test]
    fn head_round_trip() {
        let store = MirrorStore::new(MemoryDB::default());
        assert_eq!(store.head().unwrap(), None);
        let head = cid_of(b"head");
        store.set_head(&head).unwrap();
        assert_eq!(store.head().unwrap(), Some(head));
    }

    #[test]
    fn promote_writes_block_and_mapping() {
        let store = MirrorStore::new(MemoryDB::default());
        let block = b"mirrored ad".to_vec();
        let source = cid_of(b"source");
        let mirrored = cid_of(&block);

        store.promote(&source, &mirrored, &block).unwrap();

        assert_eq!(store.mapping(&source).unwrap(), Some(mirrored));
        assert_eq!(store.get_bytes(&mirrored).unwrap().unwrap(), block);
        // Head only moves when the whole tick completes.
        assert_eq!(store.head().unwrap(), None);
    }

    #[test]
    fn chunk_cache_round_trip() {
        let store = MirrorStore::new(MemoryDB::default());
        assert!(store.read_chunk_cache().unwrap().is_empty());

        let entries = vec![
            (cid_of(b"source-1"), cid_of(b"produced-1")),
            (cid_of(b"source-2"), cid_of(b"produced-2")),
        ];
        store.write_chunk_cache(&entries).unwrap();
        assert_eq!(store.read_chunk_cache().unwrap(), entries);

        store.write_chunk_cache(&[]).unwrap();
        assert!(store.read_chunk_cache().unwrap().is_empty());
    }
}
