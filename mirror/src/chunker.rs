// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::errors::ChunkerError;
use cid::multihash::{Code, Multihash};
use cid::Cid;
use mirror_blockstore::BlockStore;
use mirror_schema::{EntriesKind, EntryChunk};
use serde_bytes::ByteBuf;

/// Streaming writer turning an iterator of multihashes into a rooted DAG of
/// the configured shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunker {
    /// Chain of [`EntryChunk`] nodes holding up to `chunk_size` multihashes
    /// each. The chain grows tail-first: the root is the last chunk written
    /// and its `Next` link points at the chunk written before it.
    EntryChunk { chunk_size: usize },
    /// HAMT keyed by the binary multihash with empty presence values.
    Hamt(mirror_hamt::Config),
}

impl Chunker {
    /// The entries structure this chunker emits.
    pub fn kind(&self) -> EntriesKind {
        match self {
            Chunker::EntryChunk { .. } => EntriesKind::EntryChunk,
            Chunker::Hamt(_) => EntriesKind::Hamt,
        }
    }

    /// Drains the iterator into the store and returns the root link.
    pub fn produce<BS, I>(&self, store: &BS, mhs: I) -> Result<Cid, ChunkerError>
    where
        BS: BlockStore,
        I: Iterator<Item = Multihash>,
    {
        match self {
            Chunker::EntryChunk { chunk_size } => {
                let mut next: Option<Cid> = None;
                let mut entries: Vec<ByteBuf> = Vec::with_capacity(*chunk_size);
                for mh in mhs {
                    entries.push(ByteBuf::from(mh.to_bytes()));
                    if entries.len() == *chunk_size {
                        let chunk = EntryChunk::new(std::mem::take(&mut entries), next);
                        next = Some(store.put_obj(&chunk, Code::Blake2b256)?);
                    }
                }
                if !entries.is_empty() || next.is_none() {
                    let chunk = EntryChunk::new(entries, next);
                    next = Some(store.put_obj(&chunk, Code::Blake2b256)?);
                }
                Ok(next.expect("at least one chunk is always written"))
            }
            Chunker::Hamt(config) => {
                let mut hamt = mirror_hamt::Hamt::new(store, *config)?;
                for mh in mhs {
                    hamt.set(mh.to_bytes())?;
                }
                Ok(hamt.flush()?)
            }
        }
    }
}

/// Detects the structure behind an entries root block. Both known shapes are
/// DAG-CBOR maps with distinct mandatory fields, so decoding against the
/// schema types is the discriminator.
pub fn detect_entries_kind(block: &[u8]) -> EntriesKind {
    if mirror_encoding::from_slice::<EntryChunk>(block).is_ok() {
        return EntriesKind::EntryChunk;
    }
    if mirror_encoding::from_slice::<mirror_hamt::Root>(block).is_ok() {
        return EntriesKind::Hamt;
    }
    EntriesKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use cid::multihash::MultihashDigest;
    use mirror_db::MemoryDB;
    use mirror_hamt::HashAlg;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn random_multihashes(rng: &mut StdRng, count: usize) -> Vec<Multihash> {
        (0..count)
            .map(|_| {
                let mut buf = [0u8; 32];
                rng.fill_bytes(&mut buf);
                Code::Sha2_256.digest(&buf)
            })
            .collect()
    }

    fn collect_chunk_chain(store: &MemoryDB, root: Cid) -> (usize, Vec<Multihash>) {
        let mut chunks = 0;
        let mut mhs = Vec::new();
        let mut next = Some(root);
        while let Some(cid) = next {
            let chunk: EntryChunk = store.get_obj(&cid).unwrap().unwrap();
            chunks += 1;
            for raw in &chunk.entries {
                mhs.push(Multihash::from_bytes(raw).unwrap());
            }
            next = chunk.next;
        }
        (chunks, mhs)
    }

    #[test]
    fn entry_chunk_one_chunk_per_multihash() {
        let store = MemoryDB::default();
        let mut rng = StdRng::seed_from_u64(1413);
        let mhs = random_multihashes(&mut rng, 7);

        let chunker = Chunker::EntryChunk { chunk_size: 1 };
        let root = chunker.produce(&store, mhs.iter().copied()).unwrap();

        let (chunks, mut got) = collect_chunk_chain(&store, root);
        assert_eq!(chunks, mhs.len());
        let mut want = mhs;
        want.sort_by_key(|m| m.to_bytes());
        got.sort_by_key(|m| m.to_bytes());
        assert_eq!(want, got);
    }

    #[test]
    fn entry_chunk_root_is_last_chunk() {
        let store = MemoryDB::default();
        let mut rng = StdRng::seed_from_u64(1413);
        let mhs = random_multihashes(&mut rng, 5);

        let chunker = Chunker::EntryChunk { chunk_size: 2 };
        let root = chunker.produce(&store, mhs.iter().copied()).unwrap();

        // 5 multihashes with chunks of 2: the root carries the trailing
        // single multihash, the deepest chunk the first two.
        let root_chunk: EntryChunk = store.get_obj(&root).unwrap().unwrap();
        assert_eq!(root_chunk.entries.len(), 1);
        assert_eq!(root_chunk.entries[0].as_slice(), &mhs[4].to_bytes());

        let (chunks, _) = collect_chunk_chain(&store, root);
        assert_eq!(chunks, 3);
    }

    #[test]
    fn entry_chunk_empty_iterator_yields_empty_chunk() {
        let store = MemoryDB::default();
        let chunker = Chunker::EntryChunk { chunk_size: 4 };
        let root = chunker.produce(&store, std::iter::empty()).unwrap();
        let chunk: EntryChunk = store.get_obj(&root).unwrap().unwrap();
        assert!(chunk.entries.is_empty());
        assert!(chunk.next.is_none());
    }

    #[test]
    fn hamt_preserves_multihash_set() {
        let store = MemoryDB::default();
        let mut rng = StdRng::seed_from_u64(1413);
        let mhs = random_multihashes(&mut rng, 100);

        let chunker = Chunker::Hamt(mirror_hamt::Config::new(HashAlg::Identity, 3, 1));
        let root = chunker.produce(&store, mhs.iter().copied()).unwrap();

        let hamt = mirror_hamt::Hamt::from_link(&root, &store).unwrap();
        let mut got = Vec::new();
        hamt.for_each(|k| {
            got.push(k.to_vec());
            Ok(())
        })
        .unwrap();

        let mut want: Vec<_> = mhs.iter().map(|m| m.to_bytes()).collect();
        want.sort();
        got.sort();
        assert_eq!(want, got);
    }

    #[test]
    fn detects_both_kinds() {
        let store = MemoryDB::default();
        let mut rng = StdRng::seed_from_u64(1413);
        let mhs = random_multihashes(&mut rng, 10);

        let chain_root = Chunker::EntryChunk { chunk_size: 4 }
            .produce(&store, mhs.iter().copied())
            .unwrap();
        let hamt_root = Chunker::Hamt(mirror_hamt::Config::new(HashAlg::Murmur3X64_64, 3, 3))
            .produce(&store, mhs.iter().copied())
            .unwrap();

        let chain_block = store.get_bytes(&chain_root).unwrap().unwrap();
        let hamt_block = store.get_bytes(&hamt_root).unwrap().unwrap();
        assert_eq!(detect_entries_kind(&chain_block), EntriesKind::EntryChunk);
        assert_eq!(detect_entries_kind(&hamt_block), EntriesKind::Hamt);

        let junk = mirror_encoding::to_vec(&vec![1u64, 2, 3]).unwrap();
        assert_eq!(detect_entries_kind(&junk), EntriesKind::Unknown);
    }
}
