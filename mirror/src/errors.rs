// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use thiserror::Error;

/// Top-level mirror error, fatal at construction or lifecycle boundaries.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid mirror configuration: {0}")]
    InvalidConfig(String),
    #[error("mirror already started")]
    AlreadyStarted,
    #[error("mirror not started")]
    NotStarted,
    #[error("{0}")]
    Blockstore(#[from] mirror_blockstore::Error),
    #[error("{0}")]
    Db(#[from] mirror_db::Error),
}

/// Errors surfaced by the sync client while fetching the source chain.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failure, transient; the tick logs and retries.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// A fetched block does not match its announced link.
    #[error("block {cid} failed digest verification")]
    Verification { cid: Cid },
    #[error("sync deadline exceeded")]
    Deadline,
    #[error("block {cid} not found")]
    NotFound { cid: Cid },
    #[error("block {cid} could not be decoded: {reason}")]
    Decode { cid: Cid, reason: String },
    #[error("{0}")]
    Store(#[from] mirror_blockstore::Error),
}

/// Errors from producing a remapped entries structure.
#[derive(Debug, Error)]
pub enum ChunkerError {
    #[error("{0}")]
    Hamt(#[from] mirror_hamt::Error),
    #[error("{0}")]
    Store(#[from] mirror_blockstore::Error),
    #[error("invalid multihash in entries: {0}")]
    InvalidMultihash(String),
}

/// Errors from rewriting a source advertisement into its mirrored form.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// The entries root is neither the sentinel nor a recognized structure.
    /// The ad is skipped and the head is not advanced past it.
    #[error("unrecognized entries structure under {cid}")]
    BadEntriesKind { cid: Cid },
    #[error("entries root {cid} is not in the local store")]
    MissingEntries { cid: Cid },
    #[error("{0}")]
    Chunker(#[from] ChunkerError),
    /// Identity error, fatal: the replication loop halts.
    #[error("failed to sign mirrored advertisement: {0}")]
    Sign(String),
    #[error("{0}")]
    Hamt(#[from] mirror_hamt::Error),
    #[error("{0}")]
    Store(#[from] mirror_blockstore::Error),
    #[error("{0}")]
    Schema(#[from] mirror_schema::Error),
}

/// Everything that can interrupt one replication tick. All variants except
/// failed signing are recoverable; the loop logs and retries on the next
/// tick.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("{0}")]
    Sync(#[from] SyncError),
    #[error("{0}")]
    Rewrite(#[from] RewriteError),
    #[error("{0}")]
    Store(#[from] mirror_blockstore::Error),
    #[error("{0}")]
    Encoding(#[from] mirror_encoding::Error),
}

impl TickError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TickError::Rewrite(RewriteError::Sign(_)))
    }
}
