// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::errors::{Error, SyncError};
use cid::Cid;
use futures::channel::oneshot::{channel as oneshot_channel, Sender as OneShotSender};
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use log::{trace, warn};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error as ThisError;

/// Timeout for a response to a single network request.
const RPC_TIMEOUT: Duration = Duration::from_secs(20);

/// Identity and dialable addresses of the source provider.
#[derive(Debug, Clone)]
pub struct AddrInfo {
    pub peer_id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl FromStr for AddrInfo {
    type Err = Error;

    /// Parses a multiaddr carrying a trailing `/p2p/<peer-id>` component.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut addr: Multiaddr = s
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("invalid source multiaddr: {e}")))?;
        match addr.pop() {
            Some(Protocol::P2p(mh)) => {
                let peer_id = PeerId::from_multihash(mh).map_err(|_| {
                    Error::InvalidConfig("source multiaddr carries an invalid peer id".to_string())
                })?;
                Ok(AddrInfo {
                    peer_id,
                    addrs: vec![addr],
                })
            }
            _ => Err(Error::InvalidConfig(
                "source multiaddr must end in /p2p/<peer-id>".to_string(),
            )),
        }
    }
}

/// Failure relayed by the transport service for a single request.
#[derive(Debug, Clone, ThisError)]
pub enum RequestError {
    #[error("request failed: {0}")]
    Failure(String),
}

/// Messages into the transport service.
#[derive(Debug)]
pub enum NetworkMessage {
    /// Resolve the source's current chain head.
    HeadRequest {
        response_channel: OneShotSender<Result<Option<Cid>, RequestError>>,
    },
    /// Fetch a single block from the source by CID.
    BlockRequest {
        cid: Cid,
        response_channel: OneShotSender<Result<Option<Vec<u8>>, RequestError>>,
    },
    /// Announce a newly mirrored head on the pub/sub topic.
    AnnounceHead { topic: String, head: Cid },
}

/// Requests from downstream consumers, handed to the mirror to serve from its
/// block store.
#[derive(Debug)]
pub enum NetworkEvent {
    HeadRequest {
        response_channel: OneShotSender<Option<Cid>>,
    },
    BlockRequest {
        cid: Cid,
        response_channel: OneShotSender<Option<Vec<u8>>>,
    },
}

/// Mirror-side ends of the transport channel pair.
pub struct NetworkChannels {
    pub message_sender: flume::Sender<NetworkMessage>,
    pub event_receiver: flume::Receiver<NetworkEvent>,
}

/// Transport-side ends of the channel pair.
pub struct ServiceChannels {
    pub message_receiver: flume::Receiver<NetworkMessage>,
    pub event_sender: flume::Sender<NetworkEvent>,
}

/// Creates the channel pair connecting a mirror to its transport service.
pub fn network_channels() -> (NetworkChannels, ServiceChannels) {
    let (message_sender, message_receiver) = flume::unbounded();
    let (event_sender, event_receiver) = flume::unbounded();
    (
        NetworkChannels {
            message_sender,
            event_receiver,
        },
        ServiceChannels {
            message_receiver,
            event_sender,
        },
    )
}

/// Context used by the sync client and publisher to reach the source over the
/// transport service.
#[derive(Clone)]
pub struct SourceNetworkContext {
    network_send: flume::Sender<NetworkMessage>,
}

impl SourceNetworkContext {
    pub fn new(network_send: flume::Sender<NetworkMessage>) -> Self {
        Self { network_send }
    }

    /// Resolves the source's current head. `None` when the source has not
    /// published yet.
    pub async fn fetch_head(&self) -> Result<Option<Cid>, SyncError> {
        let (tx, rx) = oneshot_channel();
        self.network_send
            .send_async(NetworkMessage::HeadRequest {
                response_channel: tx,
            })
            .await
            .map_err(|_| SyncError::Unavailable("network service unavailable".to_string()))?;

        match tokio::time::timeout(RPC_TIMEOUT, rx).await {
            Err(_) => Err(SyncError::Deadline),
            Ok(Err(_)) => Err(SyncError::Unavailable(
                "response channel closed".to_string(),
            )),
            Ok(Ok(res)) => res.map_err(|e| SyncError::Unavailable(e.to_string())),
        }
    }

    /// Fetches a single raw block from the source.
    pub async fn fetch_block(&self, cid: Cid) -> Result<Option<Vec<u8>>, SyncError> {
        trace!("fetching block {cid} from source");
        let (tx, rx) = oneshot_channel();
        self.network_send
            .send_async(NetworkMessage::BlockRequest {
                cid,
                response_channel: tx,
            })
            .await
            .map_err(|_| SyncError::Unavailable("network service unavailable".to_string()))?;

        match tokio::time::timeout(RPC_TIMEOUT, rx).await {
            Err(_) => Err(SyncError::Deadline),
            Ok(Err(_)) => Err(SyncError::Unavailable(
                "response channel closed".to_string(),
            )),
            Ok(Ok(res)) => res.map_err(|e| SyncError::Unavailable(e.to_string())),
        }
    }

    /// Hands a new head to the transport for announcement. Best effort; a
    /// dropped announcement only delays consumers until the next one.
    pub async fn announce_head(&self, topic: String, head: Cid) {
        if self
            .network_send
            .send_async(NetworkMessage::AnnounceHead { topic, head })
            .await
            .is_err()
        {
            warn!("failed to announce head {head}: network service unavailable");
        }
    }
}
