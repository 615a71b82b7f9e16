// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Mirror for content-advertisement chains published by an index provider.
//!
//! The mirror follows the head of a source provider's advertisement chain,
//! fetches new advertisements and their entries over a block-sync transport,
//! optionally remaps the entries into a different structure, re-signs
//! advertisements it has altered, and republishes the resulting chain under
//! its own identity while serving blocks of both chains to downstream
//! consumers.

mod cache;
mod chunker;
mod errors;
mod mirror;
mod net;
mod options;
mod publisher;
mod rewrite;
mod store;
mod sync;

pub use self::cache::CachedEntriesChunker;
pub use self::chunker::{detect_entries_kind, Chunker};
pub use self::errors::{ChunkerError, Error, RewriteError, SyncError, TickError};
pub use self::mirror::Mirror;
pub use self::net::{
    network_channels, AddrInfo, NetworkChannels, NetworkEvent, NetworkMessage, RequestError,
    ServiceChannels, SourceNetworkContext,
};
pub use self::options::{MirrorOptions, DEFAULT_TOPIC};
pub use self::publisher::Publisher;
pub use self::rewrite::{AdRewriter, EntryIterator};
pub use self::store::MirrorStore;
pub use self::sync::{RecursionLimit, Selector, Syncer};
