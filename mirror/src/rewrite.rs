// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::cache::CachedEntriesChunker;
use crate::chunker::detect_entries_kind;
use crate::errors::{ChunkerError, RewriteError};
use crate::store::MirrorStore;
use cid::multihash::Multihash;
use cid::Cid;
use libp2p::identity::Keypair;
use mirror_blockstore::BlockStore;
use mirror_db::Store;
use mirror_schema::{Advertisement, EntriesKind, EntryChunk};
use serde_bytes::ByteBuf;

/// Computes the mirrored form of a source advertisement: the previous link is
/// rewritten to its mirrored counterpart, entries are optionally remapped
/// through the cached chunker, and the result is re-signed by the mirror
/// identity whenever its content no longer matches the source signature.
pub struct AdRewriter<'a, DB> {
    store: &'a MirrorStore<DB>,
    cache: Option<&'a CachedEntriesChunker<DB>>,
    identity: &'a Keypair,
    skip_remap_on_type_match: bool,
    always_re_sign: bool,
}

impl<'a, DB> AdRewriter<'a, DB>
where
    DB: Store + Clone,
{
    pub fn new(
        store: &'a MirrorStore<DB>,
        cache: Option<&'a CachedEntriesChunker<DB>>,
        identity: &'a Keypair,
        skip_remap_on_type_match: bool,
        always_re_sign: bool,
    ) -> Self {
        Self {
            store,
            cache,
            identity,
            skip_remap_on_type_match,
            always_re_sign,
        }
    }

    pub async fn rewrite(&self, ad: &Advertisement) -> Result<Advertisement, RewriteError> {
        let mut mirrored = ad.clone();

        // Previous link: point at the mirrored ancestor when one exists.
        // Otherwise the source link is carried through verbatim, so a
        // truncated first sync still yields a resolvable tail via the source.
        if let Some(previous) = &ad.previous_id {
            if let Some(mapped) = self.store.mapping(previous)? {
                mirrored.previous_id = Some(mapped);
            }
        }

        if ad.has_entries() {
            if let Some(cache) = self.cache {
                let root_block = self
                    .store
                    .get_bytes(&ad.entries)?
                    .ok_or(RewriteError::MissingEntries { cid: ad.entries })?;
                let kind = detect_entries_kind(&root_block);
                if kind == EntriesKind::Unknown {
                    return Err(RewriteError::BadEntriesKind { cid: ad.entries });
                }
                if !(self.skip_remap_on_type_match && kind == cache.kind()) {
                    let mhs = EntryIterator::new(self.store, &ad.entries, kind)?
                        .collect::<Result<Vec<_>, _>>()?;
                    mirrored.entries = cache.produce_from(ad.entries, mhs).await?;
                }
            }
        }

        let changed =
            mirrored.previous_id != ad.previous_id || mirrored.entries != ad.entries;
        if changed || self.always_re_sign {
            mirrored
                .sign(self.identity)
                .map_err(|e| RewriteError::Sign(e.to_string()))?;
        }

        Ok(mirrored)
    }
}

/// Iterator over the multihashes behind an entries root of either known
/// kind, reading from the local block store.
pub enum EntryIterator<'a, BS> {
    Chunks {
        store: &'a BS,
        current: std::vec::IntoIter<ByteBuf>,
        next: Option<Cid>,
    },
    Keys(std::vec::IntoIter<Vec<u8>>),
}

impl<'a, BS> EntryIterator<'a, BS>
where
    BS: BlockStore,
{
    pub fn new(store: &'a BS, root: &Cid, kind: EntriesKind) -> Result<Self, RewriteError> {
        match kind {
            EntriesKind::EntryChunk => {
                let chunk: EntryChunk = store
                    .get_obj(root)?
                    .ok_or(RewriteError::MissingEntries { cid: *root })?;
                Ok(EntryIterator::Chunks {
                    store,
                    current: chunk.entries.into_iter(),
                    next: chunk.next,
                })
            }
            EntriesKind::Hamt => {
                let hamt = mirror_hamt::Hamt::from_link(root, store)?;
                let mut keys = Vec::new();
                hamt.for_each(|key| {
                    keys.push(key.to_vec());
                    Ok(())
                })?;
                Ok(EntryIterator::Keys(keys.into_iter()))
            }
            EntriesKind::Unknown => Err(RewriteError::BadEntriesKind { cid: *root }),
        }
    }
}

fn parse_multihash(raw: &[u8]) -> Result<Multihash, RewriteError> {
    Multihash::from_bytes(raw)
        .map_err(|e| RewriteError::Chunker(ChunkerError::InvalidMultihash(e.to_string())))
}

impl<'a, BS> Iterator for EntryIterator<'a, BS>
where
    BS: BlockStore,
{
    type Item = Result<Multihash, RewriteError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EntryIterator::Keys(keys) => keys.next().map(|k| parse_multihash(&k)),
            EntryIterator::Chunks {
                store,
                current,
                next,
            } => loop {
                if let Some(raw) = current.next() {
                    return Some(parse_multihash(&raw));
                }
                let link = (*next)?;
                match store.get_obj::<EntryChunk>(&link) {
                    Err(e) => return Some(Err(e.into())),
                    Ok(None) => {
                        return Some(Err(RewriteError::MissingEntries { cid: link }));
                    }
                    Ok(Some(chunk)) => {
                        *current = chunk.entries.into_iter();
                        *next = chunk.next;
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use cid::multihash::{Code, MultihashDigest};
    use mirror_db::MemoryDB;
    use mirror_encoding::{cid_from_cbor, Cbor};
    use mirror_schema::NO_ENTRIES;

    fn multihashes(count: usize) -> Vec<Multihash> {
        (0..count)
            .map(|i| Code::Sha2_256.digest(&[i as u8, 0x5a]))
            .collect()
    }

    fn signed_ad(key: &Keypair, previous_id: Option<Cid>, entries: Cid) -> Advertisement {
        let mut ad = Advertisement {
            previous_id,
            provider: key.public().to_peer_id().to_string(),
            addresses: vec!["/ip4/127.0.0.1/tcp/9999".to_string()],
            entries,
            context_id: ByteBuf::from(b"lobster".to_vec()),
            metadata: ByteBuf::from(vec![0x90, 0x0c]),
            is_rm: false,
            signature: None,
        };
        ad.sign(key).unwrap();
        ad
    }

    fn cid_of(tag: &[u8]) -> Cid {
        Cid::new_v1(mirror_encoding::DAG_CBOR, Code::Blake2b256.digest(tag))
    }

    fn cache(store: &MirrorStore<MemoryDB>, chunker: Chunker) -> CachedEntriesChunker<MemoryDB> {
        CachedEntriesChunker::new(store.clone(), chunker, 16, false).unwrap()
    }

    #[tokio::test]
    async fn previous_link_rewritten_to_mapping_and_re_signed() {
        let store = MirrorStore::new(MemoryDB::default());
        let source_key = Keypair::generate_ed25519();
        let mirror_key = Keypair::generate_ed25519();

        let source_prev = cid_of(b"source-previous");
        let mirror_prev = cid_of(b"mirror-previous");
        store.promote(&source_prev, &mirror_prev, b"block").unwrap();

        let ad = signed_ad(&source_key, Some(source_prev), *NO_ENTRIES);
        let rewriter = AdRewriter::new(&store, None, &mirror_key, false, false);
        let mirrored = rewriter.rewrite(&ad).await.unwrap();

        assert_eq!(mirrored.previous_id, Some(mirror_prev));
        // The link changed, so the source signature no longer applies.
        assert_eq!(
            mirrored.verify_signature().unwrap(),
            mirror_key.public().to_peer_id()
        );
    }

    #[tokio::test]
    async fn unmapped_previous_link_carried_through_verbatim() {
        let store = MirrorStore::new(MemoryDB::default());
        let source_key = Keypair::generate_ed25519();
        let mirror_key = Keypair::generate_ed25519();

        let source_prev = cid_of(b"beyond-horizon");
        let ad = signed_ad(&source_key, Some(source_prev), *NO_ENTRIES);
        let rewriter = AdRewriter::new(&store, None, &mirror_key, false, false);
        let mirrored = rewriter.rewrite(&ad).await.unwrap();

        // Nothing changed, so the ad is byte-identical, source signature
        // included.
        assert_eq!(mirrored, ad);
        assert_eq!(
            cid_from_cbor(&mirrored.marshal_cbor().unwrap()),
            cid_from_cbor(&ad.marshal_cbor().unwrap())
        );
        assert_eq!(
            mirrored.verify_signature().unwrap(),
            source_key.public().to_peer_id()
        );
    }

    #[tokio::test]
    async fn always_re_sign_overrides_unchanged_content() {
        let store = MirrorStore::new(MemoryDB::default());
        let source_key = Keypair::generate_ed25519();
        let mirror_key = Keypair::generate_ed25519();

        let ad = signed_ad(&source_key, None, *NO_ENTRIES);
        let rewriter = AdRewriter::new(&store, None, &mirror_key, false, true);
        let mirrored = rewriter.rewrite(&ad).await.unwrap();

        assert_eq!(mirrored.previous_id, ad.previous_id);
        assert_eq!(mirrored.entries, ad.entries);
        assert_eq!(
            mirrored.verify_signature().unwrap(),
            mirror_key.public().to_peer_id()
        );
    }

    #[tokio::test]
    async fn entries_remapped_through_chunker() {
        let store = MirrorStore::new(MemoryDB::default());
        let source_key = Keypair::generate_ed25519();
        let mirror_key = Keypair::generate_ed25519();

        let mhs = multihashes(5);
        let entries = Chunker::EntryChunk { chunk_size: 4 }
            .produce(&store, mhs.iter().copied())
            .unwrap();
        let ad = signed_ad(&source_key, None, entries);

        let chunker = cache(&store, Chunker::EntryChunk { chunk_size: 1 });
        let rewriter = AdRewriter::new(&store, Some(&chunker), &mirror_key, false, false);
        let mirrored = rewriter.rewrite(&ad).await.unwrap();

        assert_ne!(mirrored.entries, ad.entries);
        assert_eq!(
            mirrored.verify_signature().unwrap(),
            mirror_key.public().to_peer_id()
        );

        // The remapped structure carries the same multihash set.
        let got: Vec<Multihash> =
            EntryIterator::new(&store, &mirrored.entries, EntriesKind::EntryChunk)
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
        let mut want: Vec<_> = mhs.iter().map(|m| m.to_bytes()).collect();
        let mut got: Vec<_> = got.iter().map(|m| m.to_bytes()).collect();
        want.sort();
        got.sort();
        assert_eq!(want, got);
    }

    #[tokio::test]
    async fn skip_remap_on_matching_kind() {
        let store = MirrorStore::new(MemoryDB::default());
        let source_key = Keypair::generate_ed25519();
        let mirror_key = Keypair::generate_ed25519();

        let mhs = multihashes(5);
        let entries = Chunker::EntryChunk { chunk_size: 4 }
            .produce(&store, mhs.iter().copied())
            .unwrap();
        let ad = signed_ad(&source_key, None, entries);

        // Same target kind: the source structure is kept as-is and the ad
        // stays signed by the source.
        let chunker = cache(&store, Chunker::EntryChunk { chunk_size: 1 });
        let rewriter = AdRewriter::new(&store, Some(&chunker), &mirror_key, true, false);
        let mirrored = rewriter.rewrite(&ad).await.unwrap();
        assert_eq!(mirrored.entries, ad.entries);
        assert_eq!(
            mirrored.verify_signature().unwrap(),
            source_key.public().to_peer_id()
        );
    }

    #[tokio::test]
    async fn no_entries_never_remapped() {
        let store = MirrorStore::new(MemoryDB::default());
        let source_key = Keypair::generate_ed25519();
        let mirror_key = Keypair::generate_ed25519();

        let ad = signed_ad(&source_key, None, *NO_ENTRIES);
        let chunker = cache(&store, Chunker::EntryChunk { chunk_size: 1 });
        let rewriter = AdRewriter::new(&store, Some(&chunker), &mirror_key, false, false);
        let mirrored = rewriter.rewrite(&ad).await.unwrap();
        assert_eq!(mirrored.entries, *NO_ENTRIES);
    }

    #[tokio::test]
    async fn unrecognized_entries_structure_is_an_error() {
        let store = MirrorStore::new(MemoryDB::default());
        let source_key = Keypair::generate_ed25519();
        let mirror_key = Keypair::generate_ed25519();

        let junk = mirror_encoding::to_vec(&vec![1u64, 2, 3]).unwrap();
        let entries = store.put_raw(junk, Code::Blake2b256).unwrap();
        let ad = signed_ad(&source_key, None, entries);

        let chunker = cache(&store, Chunker::EntryChunk { chunk_size: 1 });
        let rewriter = AdRewriter::new(&store, Some(&chunker), &mirror_key, false, false);
        assert!(matches!(
            rewriter.rewrite(&ad).await,
            Err(RewriteError::BadEntriesKind { .. })
        ));
    }
}
