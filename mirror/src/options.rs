// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::chunker::Chunker;
use crate::errors::Error;
use crate::sync::RecursionLimit;
use libp2p::identity::Keypair;
use mirror_db::{MemoryDB, Store};
use std::time::Duration;

/// Topic on which advertisements are announced when none is configured.
pub const DEFAULT_TOPIC: &str = "/indexer/ingest/mainnet";

const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10 * 60);
const DEFAULT_CHUNK_CACHE_CAPACITY: usize = 1024;

/// Validated configuration of a [`crate::Mirror`].
pub struct MirrorOptions<DB = MemoryDB> {
    pub(crate) datastore: DB,
    pub(crate) identity: Keypair,
    pub(crate) sync_interval: Duration,
    pub(crate) init_ad_recur_limit: RecursionLimit,
    pub(crate) entries_recur_limit: RecursionLimit,
    pub(crate) chunker: Option<Chunker>,
    pub(crate) chunk_cache_cap: usize,
    pub(crate) chunk_cache_purge: bool,
    pub(crate) topic: String,
    pub(crate) skip_remap_on_entries_type_match: bool,
    pub(crate) always_re_sign_ads: bool,
}

impl Default for MirrorOptions<MemoryDB> {
    /// Ephemeral in-memory datastore, a fresh random identity, and the
    /// defaults of the flag surface: 10 minute sync interval, unbounded
    /// recursion, no entries remapping.
    fn default() -> Self {
        Self {
            datastore: MemoryDB::default(),
            identity: Keypair::generate_ed25519(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            init_ad_recur_limit: RecursionLimit::None,
            entries_recur_limit: RecursionLimit::None,
            chunker: None,
            chunk_cache_cap: DEFAULT_CHUNK_CACHE_CAPACITY,
            chunk_cache_purge: false,
            topic: DEFAULT_TOPIC.to_string(),
            skip_remap_on_entries_type_match: false,
            always_re_sign_ads: false,
        }
    }
}

impl<DB> MirrorOptions<DB> {
    /// Specifies the datastore used to persist mirrored advertisements,
    /// their entries and other internal data.
    pub fn with_datastore<NDB: Store + Clone>(self, datastore: NDB) -> MirrorOptions<NDB> {
        MirrorOptions {
            datastore,
            identity: self.identity,
            sync_interval: self.sync_interval,
            init_ad_recur_limit: self.init_ad_recur_limit,
            entries_recur_limit: self.entries_recur_limit,
            chunker: self.chunker,
            chunk_cache_cap: self.chunk_cache_cap,
            chunk_cache_purge: self.chunk_cache_purge,
            topic: self.topic,
            skip_remap_on_entries_type_match: self.skip_remap_on_entries_type_match,
            always_re_sign_ads: self.always_re_sign_ads,
        }
    }

    /// Specifies the identity the mirror publishes and re-signs under.
    pub fn with_identity(mut self, identity: Keypair) -> Self {
        self.identity = identity;
        self
    }

    /// Specifies the time interval at which the original provider is checked
    /// for new advertisements.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Specifies the recursion limit for the initial sync if no previous
    /// advertisements are mirrored.
    pub fn with_initial_ad_recursion_limit(mut self, limit: RecursionLimit) -> Self {
        self.init_ad_recur_limit = limit;
        self
    }

    /// Specifies the recursion limit for syncing advertisement entries.
    pub fn with_entries_recursion_limit(mut self, limit: RecursionLimit) -> Self {
        self.entries_recur_limit = limit;
        self
    }

    /// Remaps the entries from the original provider into an EntryChunk
    /// chain with the given chunk size. If no remapper is set, the original
    /// structure is mirrored without change.
    pub fn with_entry_chunk_remapper(mut self, chunk_size: usize) -> Self {
        self.chunker = Some(Chunker::EntryChunk { chunk_size });
        self
    }

    /// Remaps the entries from the original provider into a HAMT with the
    /// given hash algorithm, bit-width and bucket size. If no remapper is
    /// set, the original structure is mirrored without change.
    pub fn with_hamt_remapper(
        mut self,
        hash_alg: mirror_hamt::HashAlg,
        bit_width: u32,
        bucket_size: usize,
    ) -> Self {
        self.chunker = Some(Chunker::Hamt(mirror_hamt::Config::new(
            hash_alg,
            bit_width,
            bucket_size,
        )));
        self
    }

    /// Specifies whether to skip remapping entries if the original structure
    /// matches the configured remap kind. Has no effect without a remapper.
    pub fn with_skip_remap_on_entries_type_match(mut self, skip: bool) -> Self {
        self.skip_remap_on_entries_type_match = skip;
        self
    }

    /// Sets the LRU capacity, in number of complete entries DAGs, of the
    /// remapped entries cache. Has no effect without a remapper.
    pub fn with_remapped_entries_cache_capacity(mut self, capacity: usize) -> Self {
        self.chunk_cache_cap = capacity;
        self
    }

    /// Specifies whether to delete any cached remapped entries on start-up.
    /// Has no effect without a remapper.
    pub fn with_purge_cached_entries(mut self, purge: bool) -> Self {
        self.chunk_cache_purge = purge;
        self
    }

    /// Specifies the topic name on which mirrored advertisements are
    /// announced.
    pub fn with_topic_name(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Specifies whether every mirrored ad is re-signed by the mirror
    /// identity regardless of whether mirroring changed its content. By
    /// default ads are only re-signed when the previous link or the entries
    /// link changed.
    pub fn with_always_re_sign_ads(mut self, re_sign: bool) -> Self {
        self.always_re_sign_ads = re_sign;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.topic.is_empty() {
            return Err(Error::InvalidConfig("topic must not be empty".into()));
        }
        if self.sync_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "sync interval must be non-zero".into(),
            ));
        }
        match &self.chunker {
            Some(Chunker::EntryChunk { chunk_size }) if *chunk_size == 0 => {
                return Err(Error::InvalidConfig(
                    "entry chunk size must be at least 1".into(),
                ));
            }
            Some(Chunker::Hamt(config)) => {
                config
                    .validate()
                    .map_err(|e| Error::InvalidConfig(e.to_string()))?;
            }
            _ => {}
        }
        if self.chunker.is_some() && self.chunk_cache_cap == 0 {
            return Err(Error::InvalidConfig(
                "remapped entries cache capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn remap_entries_enabled(&self) -> bool {
        self.chunker.is_some()
    }
}
