// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Test environment: an in-process source provider served over the network
//! channel seam, a mirror under test, and a consumer that pulls from the
//! mirror through the production sync path.

use cid::multihash::{Code, Multihash, MultihashDigest};
use cid::Cid;
use futures::channel::oneshot::channel as oneshot_channel;
use libp2p::identity::Keypair;
use libp2p::PeerId;
use mirror::{
    detect_entries_kind, network_channels, AddrInfo, Chunker, EntryIterator, Mirror,
    MirrorOptions, MirrorStore, NetworkEvent, NetworkMessage, RecursionLimit, RequestError,
    Selector, ServiceChannels, SourceNetworkContext, SyncError, Syncer,
};
use mirror_blockstore::BlockStore;
use mirror_db::MemoryDB;
use mirror_encoding::{cid_from_cbor, Cbor};
use mirror_schema::{Advertisement, EntriesKind, NO_ENTRIES};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::RngCore;
use serde_bytes::ByteBuf;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_RANDOM_SEED: u64 = 1413;
pub const TEST_EVENTUAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const TEST_CHECK_INTERVAL: Duration = Duration::from_millis(200);
pub const TEST_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Chunk size the test source publishes entries with.
const SOURCE_CHUNK_SIZE: usize = 16;

pub fn random_multihashes(rng: &mut StdRng, count: usize) -> Vec<Multihash> {
    (0..count)
        .map(|_| {
            let mut buf = [0u8; 32];
            rng.fill_bytes(&mut buf);
            Code::Sha2_256.digest(&buf)
        })
        .collect()
}

/// Opaque retrieval metadata stand-in.
pub fn bitswap_metadata() -> ByteBuf {
    ByteBuf::from(vec![0x90, 0x0c, 0x01])
}

/// In-process original index provider: publishes a signed ad chain into its
/// own store and records the multihashes behind every context.
pub struct TestSource {
    pub keypair: Keypair,
    pub peer_id: PeerId,
    pub store: MirrorStore<MemoryDB>,
    pub head: Mutex<Option<Cid>>,
    pub mhs: Mutex<HashMap<Vec<u8>, Vec<Multihash>>>,
}

impl TestSource {
    pub fn new() -> Arc<Self> {
        let keypair = Keypair::generate_ed25519();
        let peer_id = keypair.public().to_peer_id();
        Arc::new(Self {
            keypair,
            peer_id,
            store: MirrorStore::new(MemoryDB::default()),
            head: Mutex::new(None),
            mhs: Mutex::new(HashMap::new()),
        })
    }

    pub fn addr_info(&self) -> AddrInfo {
        AddrInfo {
            peer_id: self.peer_id,
            addrs: vec!["/ip4/127.0.0.1/tcp/9999".parse().unwrap()],
        }
    }

    /// Publishes an advertisement announcing the given multihashes.
    pub fn put_ad(&self, context_id: &[u8], mhs: Vec<Multihash>, metadata: ByteBuf) -> Cid {
        let entries = Chunker::EntryChunk {
            chunk_size: SOURCE_CHUNK_SIZE,
        }
        .produce(&self.store, mhs.iter().copied())
        .unwrap();
        self.mhs.lock().insert(context_id.to_vec(), mhs);
        self.publish(context_id, entries, metadata, false)
    }

    /// Publishes a removal advertisement for the given context.
    pub fn remove_ad(&self, context_id: &[u8]) -> Cid {
        self.publish(context_id, *NO_ENTRIES, ByteBuf::new(), true)
    }

    fn publish(&self, context_id: &[u8], entries: Cid, metadata: ByteBuf, is_rm: bool) -> Cid {
        let mut ad = Advertisement {
            previous_id: *self.head.lock(),
            provider: self.peer_id.to_string(),
            addresses: vec!["/ip4/127.0.0.1/tcp/9999".to_string()],
            entries,
            context_id: ByteBuf::from(context_id.to_vec()),
            metadata,
            is_rm,
            signature: None,
        };
        ad.sign(&self.keypair).unwrap();
        let block = ad.marshal_cbor().unwrap();
        let cid = cid_from_cbor(&block);
        self.store.put_keyed(&cid, &block).unwrap();
        *self.head.lock() = Some(cid);
        cid
    }

    pub fn get_ad(&self, cid: &Cid) -> Advertisement {
        let block = self.store.get_bytes(cid).unwrap().expect("ad on source");
        Advertisement::unmarshal_cbor(&block).unwrap()
    }
}

/// Pulls blocks from the mirror the way a downstream ingester would, over the
/// production syncer.
pub struct Consumer {
    pub store: MirrorStore<MemoryDB>,
    pub syncer: Syncer<MemoryDB>,
    pub net: SourceNetworkContext,
}

impl Consumer {
    /// Resolves the mirror's current head.
    pub async fn fetch_head(&self) -> Result<Option<Cid>, SyncError> {
        self.net.fetch_head().await
    }

    /// Fetches a single ad block from the mirror and decodes it.
    pub async fn sync_ad(&self, cid: Cid) -> Result<Advertisement, SyncError> {
        self.syncer
            .sync(cid, Selector::MatchPoint, RecursionLimit::None)
            .await?;
        let block = self.store.get_bytes(&cid).unwrap().expect("synced above");
        Advertisement::unmarshal_cbor(&block).map_err(|e| SyncError::Decode {
            cid,
            reason: e.to_string(),
        })
    }
}

pub struct TestEnv {
    pub source: Arc<TestSource>,
    pub mirror: Mirror<MemoryDB>,
    pub consumer: Consumer,
    pub announces: flume::Receiver<(String, Cid)>,
}

impl TestEnv {
    /// Starts a mirror over the given source with the provided options, plus
    /// the channel plumbing standing in for the transport.
    pub async fn start(source: Arc<TestSource>, opts: MirrorOptions<MemoryDB>) -> TestEnv {
        let (network, service) = network_channels();
        let ServiceChannels {
            message_receiver,
            event_sender,
        } = service;
        let (announce_tx, announce_rx) = flume::unbounded();

        // Source side of the transport: serves head and block requests from
        // the source store and captures announcements.
        let transport_source = Arc::clone(&source);
        tokio::spawn(async move {
            while let Ok(message) = message_receiver.recv_async().await {
                match message {
                    NetworkMessage::HeadRequest { response_channel } => {
                        let head = *transport_source.head.lock();
                        let _ = response_channel.send(Ok(head));
                    }
                    NetworkMessage::BlockRequest {
                        cid,
                        response_channel,
                    } => {
                        let block = transport_source.store.get_bytes(&cid).unwrap();
                        let _ = response_channel.send(Ok(block));
                    }
                    NetworkMessage::AnnounceHead { topic, head } => {
                        let _ = announce_tx.send((topic, head));
                    }
                }
            }
        });

        // Consumer side: its requests are relayed to the mirror's serving
        // loop as inbound events.
        let (consumer_network, consumer_service) = network_channels();
        let consumer_messages = consumer_service.message_receiver;
        let mirror_events = event_sender;
        tokio::spawn(async move {
            while let Ok(message) = consumer_messages.recv_async().await {
                match message {
                    NetworkMessage::HeadRequest { response_channel } => {
                        let (tx, rx) = oneshot_channel();
                        if mirror_events
                            .send(NetworkEvent::HeadRequest {
                                response_channel: tx,
                            })
                            .is_err()
                        {
                            let _ = response_channel
                                .send(Err(RequestError::Failure("mirror gone".to_string())));
                            continue;
                        }
                        tokio::spawn(async move {
                            let head = rx.await.unwrap_or(None);
                            let _ = response_channel.send(Ok(head));
                        });
                    }
                    NetworkMessage::BlockRequest {
                        cid,
                        response_channel,
                    } => {
                        let (tx, rx) = oneshot_channel();
                        if mirror_events
                            .send(NetworkEvent::BlockRequest {
                                cid,
                                response_channel: tx,
                            })
                            .is_err()
                        {
                            let _ = response_channel
                                .send(Err(RequestError::Failure("mirror gone".to_string())));
                            continue;
                        }
                        tokio::spawn(async move {
                            let block = rx.await.unwrap_or(None);
                            let _ = response_channel.send(Ok(block));
                        });
                    }
                    NetworkMessage::AnnounceHead { .. } => {}
                }
            }
        });

        let consumer_store = MirrorStore::new(MemoryDB::default());
        let consumer_net = SourceNetworkContext::new(consumer_network.message_sender.clone());
        let consumer = Consumer {
            syncer: Syncer::new(consumer_net.clone(), consumer_store.clone()),
            store: consumer_store,
            net: consumer_net,
        };

        let mut mirror = Mirror::new(source.addr_info(), network, opts).unwrap();
        mirror.start().unwrap();

        TestEnv {
            source,
            mirror,
            consumer,
            announces: announce_rx,
        }
    }

    /// Waits until the mirror serves a head satisfying the predicate on the
    /// decoded head ad.
    pub async fn await_mirrored_head_where<F>(&self, check: F) -> Cid
    where
        F: Fn(&Advertisement) -> bool,
    {
        let consumer = &self.consumer;
        let check = &check;
        let ok = eventually(TEST_EVENTUAL_TIMEOUT, TEST_CHECK_INTERVAL, move || {
            async move {
                let Ok(Some(head)) = consumer.fetch_head().await else {
                    return false;
                };
                let Ok(ad) = consumer.sync_ad(head).await else {
                    return false;
                };
                check(&ad)
            }
        })
        .await;
        assert!(ok, "timed out waiting for mirrored head");
        self.consumer
            .fetch_head()
            .await
            .unwrap()
            .expect("head resolved above")
    }

    pub async fn await_mirrored_head(&self) -> Cid {
        self.await_mirrored_head_where(|_| true).await
    }
}

/// Polls an async predicate until it holds or the timeout elapses.
pub async fn eventually<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Asserts that every ad from the given heads down to the genesis is mirrored
/// as expected.
pub async fn require_ad_chain_mirrored(env: &TestEnv, original_cid: Cid, mirrored_cid: Cid) {
    let mut pair = Some((original_cid, mirrored_cid));
    while let Some((original_cid, mirrored_cid)) = pair {
        let original = env.source.get_ad(&original_cid);
        let mirrored = env.consumer.sync_ad(mirrored_cid).await.unwrap();
        require_ad_mirrored(env, &original, &mirrored).await;

        pair = match (original.previous_id, mirrored.previous_id) {
            (None, None) => None,
            (Some(original_prev), Some(mirrored_prev)) => Some((original_prev, mirrored_prev)),
            (original_prev, mirrored_prev) => panic!(
                "previous link mismatch: source {original_prev:?}, mirror {mirrored_prev:?}"
            ),
        };
    }
}

/// Asserts structural equality of the immutable fields, the expected signer,
/// and entries preservation for one mirrored ad.
pub async fn require_ad_mirrored(env: &TestEnv, original: &Advertisement, mirrored: &Advertisement) {
    assert_eq!(original.is_rm, mirrored.is_rm);
    assert_eq!(original.provider, mirrored.provider);
    assert_eq!(original.metadata, mirrored.metadata);
    assert_eq!(original.addresses, mirrored.addresses);
    assert_eq!(original.context_id, mirrored.context_id);

    // The signer is the mirror identity exactly when mirroring changed the
    // ad or re-signing is forced, and the source otherwise.
    let got_signer = mirrored.verify_signature().unwrap();
    let want_signer = if env.mirror.always_re_sign_ads()
        || original.entries != mirrored.entries
        || original.previous_id != mirrored.previous_id
    {
        env.mirror.local_peer_id()
    } else {
        env.source.peer_id
    };
    assert_eq!(want_signer, got_signer);

    require_entries_mirrored(env, &original.context_id, original.entries, mirrored.entries).await;
}

pub async fn require_entries_mirrored(
    env: &TestEnv,
    context_id: &[u8],
    original: Cid,
    mirrored: Cid,
) {
    if original == *NO_ENTRIES {
        assert_eq!(mirrored, *NO_ENTRIES);
        return;
    }

    // Syncing from the mirror implicitly verifies the content against the
    // link digests on the way in.
    env.consumer
        .syncer
        .sync(mirrored, Selector::Entries, RecursionLimit::None)
        .await
        .unwrap();

    if !env.mirror.remap_entries_enabled() {
        assert_eq!(original, mirrored);
        return;
    }

    let want = env
        .source
        .mhs
        .lock()
        .get(context_id)
        .cloned()
        .expect("multihashes recorded for context");

    let block = env.consumer.store.get_bytes(&mirrored).unwrap().unwrap();
    let kind = detect_entries_kind(&block);
    assert_ne!(kind, EntriesKind::Unknown);
    if original != mirrored {
        assert_eq!(Some(kind), env.mirror.entries_remap_prototype());
    }

    let got: Vec<Multihash> = EntryIterator::new(&env.consumer.store, &mirrored, kind)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    let mut want: Vec<_> = want.iter().map(|m| m.to_bytes()).collect();
    let mut got: Vec<_> = got.iter().map(|m| m.to_bytes()).collect();
    want.sort();
    got.sort();
    assert_eq!(want, got, "mirrored entries do not match source multihashes");
}
