// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// HAMT Error
#[derive(Debug, PartialEq, Error)]
pub enum Error {
    /// Maximum trie depth reached, hashed key bits exhausted
    #[error("Maximum depth reached")]
    MaxDepth,
    /// Rejected construction parameters
    #[error("invalid hamt configuration: {0}")]
    InvalidConfig(String),
    /// A linked node is missing from the backing store
    #[error("node not found in store: {0}")]
    CidNotFound(String),
    /// Error interacting with the underlying block store
    #[error("{0}")]
    Blockstore(#[from] mirror_blockstore::Error),
    /// Custom HAMT error
    #[error("{0}")]
    Custom(&'static str),
}
