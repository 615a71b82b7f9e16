// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::cache::CachedEntriesChunker;
use crate::errors::{Error, TickError};
use crate::net::{AddrInfo, NetworkChannels, NetworkEvent, SourceNetworkContext};
use crate::options::MirrorOptions;
use crate::publisher::{self, Publisher};
use crate::rewrite::AdRewriter;
use crate::store::MirrorStore;
use crate::sync::{RecursionLimit, Selector, Syncer};
use cid::Cid;
use libp2p::identity::Keypair;
use libp2p::PeerId;
use log::{debug, error, info, warn};
use mirror_blockstore::BlockStore;
use mirror_db::Store;
use mirror_encoding::Cbor;
use mirror_schema::{Advertisement, EntriesKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a running mirror of a single source provider.
///
/// Constructed with [`Mirror::new`], started with [`Mirror::start`] and torn
/// down with [`Mirror::shutdown`]. While running, a background worker
/// periodically promotes newly published source advertisements into the
/// mirrored chain and a server task answers consumer block requests.
pub struct Mirror<DB>
where
    DB: Store + Clone + Send + Sync + 'static,
{
    source: AddrInfo,
    store: MirrorStore<DB>,
    net: SourceNetworkContext,
    identity: Keypair,
    topic: String,
    sync_interval: Duration,
    init_ad_recur_limit: RecursionLimit,
    entries_recur_limit: RecursionLimit,
    skip_remap_on_entries_type_match: bool,
    always_re_sign_ads: bool,
    cache: Option<Arc<CachedEntriesChunker<DB>>>,
    remap_kind: Option<EntriesKind>,
    event_receiver: Option<flume::Receiver<NetworkEvent>>,
    shutdown: Option<oneshot::Sender<()>>,
    loop_handle: Option<JoinHandle<()>>,
    server_handle: Option<JoinHandle<()>>,
}

impl<DB> Mirror<DB>
where
    DB: Store + Clone + Send + Sync + 'static,
{
    pub fn new(
        source: AddrInfo,
        network: NetworkChannels,
        opts: MirrorOptions<DB>,
    ) -> Result<Self, Error> {
        opts.validate()?;

        let store = MirrorStore::new(opts.datastore.clone());
        let net = SourceNetworkContext::new(network.message_sender);
        let remap_kind = opts.chunker.as_ref().map(|c| c.kind());
        let cache = match &opts.chunker {
            Some(chunker) => Some(Arc::new(CachedEntriesChunker::new(
                store.clone(),
                chunker.clone(),
                opts.chunk_cache_cap,
                opts.chunk_cache_purge,
            )?)),
            None => None,
        };

        Ok(Self {
            source,
            store,
            net,
            identity: opts.identity,
            topic: opts.topic,
            sync_interval: opts.sync_interval,
            init_ad_recur_limit: opts.init_ad_recur_limit,
            entries_recur_limit: opts.entries_recur_limit,
            skip_remap_on_entries_type_match: opts.skip_remap_on_entries_type_match,
            always_re_sign_ads: opts.always_re_sign_ads,
            cache,
            remap_kind,
            event_receiver: Some(network.event_receiver),
            shutdown: None,
            loop_handle: None,
            server_handle: None,
        })
    }

    /// Spawns the replication loop and the consumer-facing block server.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.loop_handle.is_some() {
            return Err(Error::AlreadyStarted);
        }
        let events = self.event_receiver.take().ok_or(Error::AlreadyStarted)?;
        self.server_handle = Some(tokio::spawn(publisher::serve_blocks(
            self.store.clone(),
            events,
        )));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = ReplicationWorker {
            store: self.store.clone(),
            syncer: Syncer::new(self.net.clone(), self.store.clone()),
            publisher: Publisher::new(self.net.clone(), self.topic.clone()),
            net: self.net.clone(),
            identity: self.identity.clone(),
            sync_interval: self.sync_interval,
            init_ad_recur_limit: self.init_ad_recur_limit,
            entries_recur_limit: self.entries_recur_limit,
            skip_remap_on_entries_type_match: self.skip_remap_on_entries_type_match,
            always_re_sign_ads: self.always_re_sign_ads,
            cache: self.cache.clone(),
        };
        self.loop_handle = Some(tokio::spawn(worker.run(shutdown_rx)));
        self.shutdown = Some(shutdown_tx);

        info!(
            "mirror started: following {} on topic {}",
            self.source.peer_id, self.topic
        );
        Ok(())
    }

    /// Stops the replication loop and blocks until it has exited. Idempotent.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.loop_handle.take() {
            if let Err(e) = handle.await {
                warn!("replication loop terminated abnormally: {e}");
            }
        }
        if let Some(server) = self.server_handle.take() {
            server.abort();
            let _ = server.await;
        }
        Ok(())
    }

    /// The topic mirrored advertisements are announced on.
    pub fn get_topic_name(&self) -> &str {
        &self.topic
    }

    /// Whether entries structures are remapped rather than copied.
    pub fn remap_entries_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// The structure remapped entries take, when remapping is enabled.
    pub fn entries_remap_prototype(&self) -> Option<EntriesKind> {
        self.remap_kind
    }

    pub fn always_re_sign_ads(&self) -> bool {
        self.always_re_sign_ads
    }

    /// The identity mirrored advertisements are signed with.
    pub fn local_peer_id(&self) -> PeerId {
        self.identity.public().to_peer_id()
    }
}

/// Owns one background replication loop.
struct ReplicationWorker<DB>
where
    DB: Store + Clone + Send + Sync + 'static,
{
    store: MirrorStore<DB>,
    syncer: Syncer<DB>,
    publisher: Publisher,
    net: SourceNetworkContext,
    identity: Keypair,
    sync_interval: Duration,
    init_ad_recur_limit: RecursionLimit,
    entries_recur_limit: RecursionLimit,
    skip_remap_on_entries_type_match: bool,
    always_re_sign_ads: bool,
    cache: Option<Arc<CachedEntriesChunker<DB>>>,
}

impl<DB> ReplicationWorker<DB>
where
    DB: Store + Clone + Send + Sync + 'static,
{
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(self.sync_interval);
        // A tick that outlives its period must not queue another behind it.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        'outer: loop {
            tokio::select! {
                _ = &mut shutdown => break 'outer,
                _ = interval.tick() => {}
            }
            tokio::select! {
                _ = &mut shutdown => break 'outer,
                res = self.tick() => match res {
                    Ok(Some(mirrored_head)) => {
                        self.publisher.announce_head(mirrored_head).await;
                    }
                    Ok(None) => {}
                    Err(e) if e.is_fatal() => {
                        error!("halting replication loop: {e}");
                        break 'outer;
                    }
                    Err(e) => warn!("replication tick failed, retrying next tick: {e}"),
                },
            }
        }
        debug!("replication loop exited");
    }

    /// One pass of the replication loop: resolve the source head, pull the
    /// chain back to a known ancestor, then promote the fetched ads oldest
    /// first. The recorded head only moves once every fetched ad has been
    /// promoted, so a failed tick is retried in full from the same point.
    async fn tick(&self) -> Result<Option<Cid>, TickError> {
        let src_head = match self.net.fetch_head().await? {
            Some(head) => head,
            None => {
                debug!("source has no head yet");
                return Ok(None);
            }
        };

        let last_head = self.store.head()?;
        if last_head == Some(src_head) {
            return Ok(None);
        }

        let limit = if last_head.is_none() {
            self.init_ad_recur_limit
        } else {
            RecursionLimit::None
        };
        self.syncer.sync(src_head, Selector::AdChain, limit).await?;

        // Walk the fetched chain back until a mirrored ancestor or the fetch
        // horizon, then promote in reverse: oldest to newest.
        let mut chain = Vec::new();
        let mut cursor = Some(src_head);
        while let Some(cid) = cursor {
            if self.store.mapping(&cid)?.is_some() {
                break;
            }
            let Some(bz) = self.store.get_bytes(&cid)? else {
                debug!("ad chain truncated at fetch horizon before {cid}");
                break;
            };
            let ad = Advertisement::unmarshal_cbor(&bz)?;
            cursor = ad.previous_id;
            chain.push((cid, ad));
        }
        chain.reverse();

        if chain.is_empty() {
            // Already mirrored in a previous run; just record the head.
            self.store.set_head(&src_head)?;
            return Ok(None);
        }
        info!("mirroring {} new advertisement(s)", chain.len());

        let rewriter = AdRewriter::new(
            &self.store,
            self.cache.as_deref(),
            &self.identity,
            self.skip_remap_on_entries_type_match,
            self.always_re_sign_ads,
        );

        let mut mirrored_head = None;
        for (source_cid, ad) in &chain {
            if ad.has_entries() {
                self.syncer
                    .sync(ad.entries, Selector::Entries, self.entries_recur_limit)
                    .await?;
            }
            let mirrored = rewriter.rewrite(ad).await?;
            let block = mirrored.marshal_cbor()?;
            let mirrored_cid = mirror_encoding::cid_from_cbor(&block);
            self.store.promote(source_cid, &mirrored_cid, &block)?;
            debug!("mirrored {source_cid} as {mirrored_cid}");
            mirrored_head = Some(mirrored_cid);
        }

        self.store.set_head(&src_head)?;
        Ok(mirrored_head)
    }
}
