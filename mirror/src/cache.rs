// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::chunker::{detect_entries_kind, Chunker};
use crate::errors::{ChunkerError, Error};
use crate::store::MirrorStore;
use cid::multihash::Multihash;
use cid::Cid;
use log::debug;
use lru::LruCache;
use mirror_blockstore::BlockStore;
use mirror_db::Store;
use mirror_encoding::Cbor;
use mirror_schema::{EntriesKind, EntryChunk};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};

/// Wraps a [`Chunker`] with a bounded LRU from source entries root to the
/// root it produced, de-duplicating both repeated and concurrent work for the
/// same source.
///
/// The LRU is an optimisation only: entries DAGs stay in the durable block
/// store when their cache slot is evicted, and the persisted snapshot exists
/// solely to rebuild a warm cache on start.
pub struct CachedEntriesChunker<DB> {
    store: MirrorStore<DB>,
    chunker: Chunker,
    cache: Mutex<LruCache<Cid, Cid>>,
    flights: AsyncMutex<HashMap<Cid, Arc<OnceCell<Cid>>>>,
}

impl<DB> CachedEntriesChunker<DB>
where
    DB: Store + Clone,
{
    pub fn new(
        store: MirrorStore<DB>,
        chunker: Chunker,
        capacity: usize,
        purge_on_start: bool,
    ) -> Result<Self, Error> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| Error::InvalidConfig("chunker cache capacity must be non-zero".into()))?;
        let mut cache = LruCache::new(capacity);

        let persisted = store.read_chunk_cache()?;
        if purge_on_start {
            debug!("purging {} cached entries structures", persisted.len());
            for (_, produced) in &persisted {
                delete_dag(&store, produced)?;
            }
            store.write_chunk_cache(&[])?;
        } else {
            for (source, produced) in persisted {
                cache.put(source, produced);
            }
        }

        Ok(Self {
            store,
            chunker,
            cache: Mutex::new(cache),
            flights: AsyncMutex::new(HashMap::new()),
        })
    }

    /// The entries structure this chunker emits.
    pub fn kind(&self) -> EntriesKind {
        self.chunker.kind()
    }

    /// Whether a produced root for this source root is cached.
    pub fn has(&self, source: &Cid) -> bool {
        self.cache.lock().contains(source)
    }

    /// Drains the multihashes through the configured chunker, returning the
    /// produced root. Work for a given source root happens at most once at a
    /// time; concurrent callers await the same in-flight computation.
    pub async fn produce_from<I>(&self, source: Cid, mhs: I) -> Result<Cid, ChunkerError>
    where
        I: IntoIterator<Item = Multihash>,
    {
        if let Some(produced) = self.cache.lock().get(&source) {
            return Ok(*produced);
        }

        let cell = {
            let mut flights = self.flights.lock().await;
            flights
                .entry(source)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let produced = *cell
            .get_or_try_init(|| async { self.chunker.produce(&self.store, mhs.into_iter()) })
            .await?;

        {
            let mut cache = self.cache.lock();
            cache.put(source, produced);
            // Evictions are structural: the snapshot shrinks with the cache
            // but the evicted DAG's blocks stay in the store. Snapshot is
            // persisted oldest first to rebuild the same recency order.
            let mut snapshot: Vec<(Cid, Cid)> = cache.iter().map(|(s, p)| (*s, *p)).collect();
            snapshot.reverse();
            self.store.write_chunk_cache(&snapshot)?;
        }
        self.flights.lock().await.remove(&source);

        Ok(produced)
    }
}

/// Best-effort removal of every block of a produced entries DAG.
fn delete_dag<DB>(store: &MirrorStore<DB>, root: &Cid) -> Result<(), Error>
where
    DB: Store + Clone,
{
    let mut stack = vec![*root];
    while let Some(cid) = stack.pop() {
        let Some(bz) = store.get_bytes(&cid)? else {
            continue;
        };
        match detect_entries_kind(&bz) {
            EntriesKind::EntryChunk => {
                if let Ok(chunk) = EntryChunk::unmarshal_cbor(&bz) {
                    if let Some(next) = chunk.next {
                        stack.push(next);
                    }
                }
            }
            EntriesKind::Hamt => {
                if let Ok(node) = mirror_encoding::from_slice::<mirror_hamt::Root>(&bz) {
                    stack.extend(node.links().copied());
                }
            }
            EntriesKind::Unknown => {
                if let Ok(node) = mirror_encoding::from_slice::<mirror_hamt::Node>(&bz) {
                    stack.extend(node.links().copied());
                }
            }
        }
        store.delete_block(&cid)?;
    }
    Ok(())
}
