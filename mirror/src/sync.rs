// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::chunker::detect_entries_kind;
use crate::errors::SyncError;
use crate::net::SourceNetworkContext;
use crate::store::MirrorStore;
use cid::multihash::{Code, MultihashDigest};
use cid::Cid;
use log::debug;
use mirror_blockstore::BlockStore;
use mirror_db::Store;
use mirror_encoding::Cbor;
use mirror_schema::{Advertisement, EntriesKind, EntryChunk};

/// Bound on recursive traversal depth, as understood by selector-driven
/// block-sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecursionLimit {
    /// Unbounded traversal.
    None,
    /// Visit at most this many levels.
    Depth(u64),
}

impl RecursionLimit {
    pub fn allows(&self, depth: u64) -> bool {
        match self {
            RecursionLimit::None => true,
            RecursionLimit::Depth(limit) => depth < *limit,
        }
    }
}

/// The sub-DAG shapes the mirror pulls from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// The advertisement chain from a head back through `PreviousID` links,
    /// stopping at an already-mirrored ancestor or the recursion limit.
    AdChain,
    /// An entries structure: an EntryChunk chain or a HAMT.
    Entries,
    /// A single block.
    MatchPoint,
}

/// Fetches named sub-DAGs from the source into the mirror's block store,
/// verifying every block against its link on the way in.
#[derive(Clone)]
pub struct Syncer<DB> {
    net: SourceNetworkContext,
    store: MirrorStore<DB>,
}

impl<DB> Syncer<DB>
where
    DB: Store + Clone,
{
    pub fn new(net: SourceNetworkContext, store: MirrorStore<DB>) -> Self {
        Self { net, store }
    }

    /// Blocking sync of the sub-DAG rooted at `root` under the given
    /// selector. On success the block store contains every visited block.
    pub async fn sync(
        &self,
        root: Cid,
        selector: Selector,
        limit: RecursionLimit,
    ) -> Result<(), SyncError> {
        match selector {
            Selector::MatchPoint => {
                self.ensure_block(&root).await?;
                Ok(())
            }
            Selector::AdChain => self.sync_ad_chain(root, limit).await,
            Selector::Entries => self.sync_entries(root, limit).await,
        }
    }

    /// Returns the block bytes, fetching and persisting them when not yet
    /// stored locally.
    async fn ensure_block(&self, cid: &Cid) -> Result<Vec<u8>, SyncError> {
        if let Some(bz) = self.store.get_bytes(cid)? {
            return Ok(bz);
        }
        let bz = self
            .net
            .fetch_block(*cid)
            .await?
            .ok_or(SyncError::NotFound { cid: *cid })?;
        verify_block(cid, &bz)?;
        self.store.put_keyed(cid, &bz)?;
        Ok(bz)
    }

    async fn sync_ad_chain(&self, head: Cid, limit: RecursionLimit) -> Result<(), SyncError> {
        let mut next = Some(head);
        let mut depth = 0u64;
        while let Some(cid) = next {
            if !limit.allows(depth) {
                debug!("ad chain sync stopping at recursion limit {limit:?}");
                break;
            }
            if self.store.mapping(&cid)?.is_some() {
                // Known ancestor, everything below is already mirrored.
                break;
            }
            let bz = self.ensure_block(&cid).await?;
            let ad = Advertisement::unmarshal_cbor(&bz).map_err(|e| SyncError::Decode {
                cid,
                reason: e.to_string(),
            })?;
            next = ad.previous_id;
            depth += 1;
        }
        Ok(())
    }

    async fn sync_entries(&self, root: Cid, limit: RecursionLimit) -> Result<(), SyncError> {
        let mut stack = vec![(root, 0u64)];
        while let Some((cid, depth)) = stack.pop() {
            if !limit.allows(depth) {
                continue;
            }
            let bz = self.ensure_block(&cid).await?;
            match detect_entries_kind(&bz) {
                EntriesKind::EntryChunk => {
                    let chunk =
                        EntryChunk::unmarshal_cbor(&bz).map_err(|e| SyncError::Decode {
                            cid,
                            reason: e.to_string(),
                        })?;
                    if let Some(next) = chunk.next {
                        stack.push((next, depth + 1));
                    }
                }
                EntriesKind::Hamt => {
                    let root_node: mirror_hamt::Root =
                        mirror_encoding::from_slice(&bz).map_err(|e| SyncError::Decode {
                            cid,
                            reason: e.to_string(),
                        })?;
                    for link in root_node.links() {
                        stack.push((*link, depth + 1));
                    }
                }
                EntriesKind::Unknown => {
                    // Interior HAMT nodes are plain tuples; anything else is
                    // a foreign structure whose root block is still stored so
                    // the rewriter can report it.
                    if let Ok(node) = mirror_encoding::from_slice::<mirror_hamt::Node>(&bz) {
                        for link in node.links() {
                            stack.push((*link, depth + 1));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Verifies that block content matches its announced link.
pub fn verify_block(cid: &Cid, data: &[u8]) -> Result<(), SyncError> {
    let code = Code::try_from(cid.hash().code())
        .map_err(|_| SyncError::Verification { cid: *cid })?;
    if code.digest(data).digest() != cid.hash().digest() {
        return Err(SyncError::Verification { cid: *cid });
    }
    Ok(())
}
