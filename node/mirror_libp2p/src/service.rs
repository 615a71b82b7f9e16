// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::behaviour::{MirrorBehaviour, MirrorBehaviourEvent};
use crate::messages::{Announce, BlockRequest, BlockResponse, HeadRequest, HeadResponse};
use anyhow::Context;
use cid::Cid;
use futures::channel::oneshot::{channel as oneshot_channel, Sender as OneShotSender};
use futures::select;
use futures_util::stream::StreamExt;
use libp2p::gossipsub::{GossipsubEvent, IdentTopic};
use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::request_response::{
    RequestId, RequestResponseEvent, RequestResponseMessage, ResponseChannel,
};
use libp2p::swarm::SwarmEvent;
use libp2p::{core, core::muxing::StreamMuxerBox, core::transport::Boxed, noise, yamux};
use libp2p::{Multiaddr, PeerId, Swarm, Transport};
use log::{debug, info, trace, warn};
use mirror::{AddrInfo, NetworkEvent, NetworkMessage, RequestError, ServiceChannels};
use serde_bytes::ByteBuf;
use std::collections::HashMap;
use std::time::Duration;

/// The libp2p transport service backing a mirror: forwards the mirror's
/// outbound requests and announcements to the network, and serves inbound
/// head and block requests from the mirror's store.
pub struct Libp2pService {
    swarm: Swarm<MirrorBehaviour>,
    source: AddrInfo,
    topic: IdentTopic,
    listen_addrs: Vec<Multiaddr>,
    message_receiver: flume::Receiver<NetworkMessage>,
    event_sender: flume::Sender<NetworkEvent>,
}

impl Libp2pService {
    pub fn new(
        keypair: Keypair,
        source: AddrInfo,
        topic_name: &str,
        listen_addrs: Vec<Multiaddr>,
        channels: ServiceChannels,
    ) -> anyhow::Result<Self> {
        let peer_id = PeerId::from(keypair.public());
        let topic = IdentTopic::new(topic_name);
        let transport = build_transport(&keypair);
        let behaviour = MirrorBehaviour::new(&keypair, &topic)?;

        let mut swarm =
            libp2p::swarm::SwarmBuilder::with_tokio_executor(transport, behaviour, peer_id).build();

        for addr in &source.addrs {
            swarm
                .behaviour_mut()
                .head
                .add_address(&source.peer_id, addr.clone());
            swarm
                .behaviour_mut()
                .block
                .add_address(&source.peer_id, addr.clone());
        }

        Ok(Libp2pService {
            swarm,
            source,
            topic,
            listen_addrs,
            message_receiver: channels.message_receiver,
            event_sender: channels.event_sender,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    /// Runs the networking stack. The returned future resolves when the
    /// mirror side drops its message sender.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("running libp2p mirror transport");
        for addr in &self.listen_addrs {
            Swarm::listen_on(&mut self.swarm, addr.clone())
                .with_context(|| format!("listening on {addr}"))?;
        }

        let mut head_request_table: HashMap<
            RequestId,
            OneShotSender<Result<Option<Cid>, RequestError>>,
        > = HashMap::new();
        let mut block_request_table: HashMap<
            RequestId,
            OneShotSender<Result<Option<Vec<u8>>, RequestError>>,
        > = HashMap::new();

        // Inbound requests are served by the mirror on its own task; answers
        // come back through these channels to be written to the substream.
        let (head_response_tx, head_response_rx) =
            flume::unbounded::<(ResponseChannel<HeadResponse>, HeadResponse)>();
        let (block_response_tx, block_response_rx) =
            flume::unbounded::<(ResponseChannel<BlockResponse>, BlockResponse)>();

        let mut swarm_stream = self.swarm.fuse();
        let mut message_stream = self.message_receiver.stream().fuse();
        let mut head_response_stream = head_response_rx.stream().fuse();
        let mut block_response_stream = block_response_rx.stream().fuse();

        loop {
            select! {
                swarm_event = swarm_stream.next() => match swarm_event {
                    Some(SwarmEvent::Behaviour(event)) => handle_behaviour_event(
                        event,
                        &self.topic,
                        &self.event_sender,
                        &mut head_request_table,
                        &mut block_request_table,
                        &head_response_tx,
                        &block_response_tx,
                    ),
                    Some(SwarmEvent::NewListenAddr { address, .. }) => {
                        info!("listening on {address}");
                    }
                    None => break,
                    _ => {}
                },
                message = message_stream.next() => match message {
                    Some(message) => handle_network_message(
                        swarm_stream.get_mut(),
                        message,
                        &self.source.peer_id,
                        &mut head_request_table,
                        &mut block_request_table,
                    ),
                    // The mirror is gone; shut the transport down.
                    None => break,
                },
                pair = head_response_stream.next() => if let Some((channel, response)) = pair {
                    let behaviour = swarm_stream.get_mut().behaviour_mut();
                    if behaviour.head.send_response(channel, response).is_err() {
                        warn!("failed to send head response: substream closed");
                    }
                },
                pair = block_response_stream.next() => if let Some((channel, response)) = pair {
                    let behaviour = swarm_stream.get_mut().behaviour_mut();
                    if behaviour.block.send_response(channel, response).is_err() {
                        warn!("failed to send block response: substream closed");
                    }
                },
            }
        }
        Ok(())
    }
}

fn handle_network_message(
    swarm: &mut Swarm<MirrorBehaviour>,
    message: NetworkMessage,
    source: &PeerId,
    head_request_table: &mut HashMap<RequestId, OneShotSender<Result<Option<Cid>, RequestError>>>,
    block_request_table: &mut HashMap<
        RequestId,
        OneShotSender<Result<Option<Vec<u8>>, RequestError>>,
    >,
) {
    match message {
        NetworkMessage::HeadRequest { response_channel } => {
            let request_id = swarm
                .behaviour_mut()
                .head
                .send_request(source, HeadRequest {});
            head_request_table.insert(request_id, response_channel);
        }
        NetworkMessage::BlockRequest {
            cid,
            response_channel,
        } => {
            let request_id = swarm
                .behaviour_mut()
                .block
                .send_request(source, BlockRequest { cid });
            block_request_table.insert(request_id, response_channel);
        }
        NetworkMessage::AnnounceHead { topic, head } => {
            let addrs = announce_addrs(swarm);
            let announce = Announce { head, addrs };
            match mirror_encoding::to_vec(&announce) {
                Ok(data) => {
                    if let Err(e) = swarm
                        .behaviour_mut()
                        .gossipsub
                        .publish(IdentTopic::new(topic), data)
                    {
                        warn!("failed to publish head announcement: {e:?}");
                    }
                }
                Err(e) => warn!("failed to encode head announcement: {e}"),
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_behaviour_event(
    event: MirrorBehaviourEvent,
    topic: &IdentTopic,
    event_sender: &flume::Sender<NetworkEvent>,
    head_request_table: &mut HashMap<RequestId, OneShotSender<Result<Option<Cid>, RequestError>>>,
    block_request_table: &mut HashMap<
        RequestId,
        OneShotSender<Result<Option<Vec<u8>>, RequestError>>,
    >,
    head_response_tx: &flume::Sender<(ResponseChannel<HeadResponse>, HeadResponse)>,
    block_response_tx: &flume::Sender<(ResponseChannel<BlockResponse>, BlockResponse)>,
) {
    match event {
        MirrorBehaviourEvent::Gossipsub(event) => {
            if let GossipsubEvent::Message {
                propagation_source,
                message,
                ..
            } = event
            {
                if message.topic == topic.hash() {
                    match mirror_encoding::from_slice::<Announce>(&message.data) {
                        Ok(announce) => trace!(
                            "peer {propagation_source} announced head {}",
                            announce.head
                        ),
                        Err(e) => warn!(
                            "announcement from {propagation_source} could not be decoded: {e}"
                        ),
                    }
                }
            }
        }
        MirrorBehaviourEvent::Head(event) => match event {
            RequestResponseEvent::Message { message, .. } => match message {
                RequestResponseMessage::Request { channel, .. } => {
                    let (tx, rx) = oneshot_channel();
                    if event_sender
                        .send(NetworkEvent::HeadRequest {
                            response_channel: tx,
                        })
                        .is_err()
                    {
                        warn!("mirror dropped its event channel, ignoring head request");
                        return;
                    }
                    let head_response_tx = head_response_tx.clone();
                    tokio::spawn(async move {
                        let head = rx.await.unwrap_or(None);
                        let _ = head_response_tx.send((channel, HeadResponse { head }));
                    });
                }
                RequestResponseMessage::Response {
                    request_id,
                    response,
                } => {
                    if let Some(tx) = head_request_table.remove(&request_id) {
                        if tx.send(Ok(response.head)).is_err() {
                            debug!("head response receiver dropped");
                        }
                    } else {
                        warn!("received head response for unknown request {request_id:?}");
                    }
                }
            },
            RequestResponseEvent::OutboundFailure {
                request_id, error, ..
            } => {
                if let Some(tx) = head_request_table.remove(&request_id) {
                    let _ = tx.send(Err(RequestError::Failure(error.to_string())));
                }
            }
            RequestResponseEvent::InboundFailure { peer, error, .. } => {
                debug!("head inbound failure from {peer}: {error}");
            }
            RequestResponseEvent::ResponseSent { .. } => {}
        },
        MirrorBehaviourEvent::Block(event) => match event {
            RequestResponseEvent::Message { message, .. } => match message {
                RequestResponseMessage::Request { request, channel, .. } => {
                    let (tx, rx) = oneshot_channel();
                    if event_sender
                        .send(NetworkEvent::BlockRequest {
                            cid: request.cid,
                            response_channel: tx,
                        })
                        .is_err()
                    {
                        warn!("mirror dropped its event channel, ignoring block request");
                        return;
                    }
                    let block_response_tx = block_response_tx.clone();
                    tokio::spawn(async move {
                        let data = rx.await.unwrap_or(None).map(ByteBuf::from);
                        let _ = block_response_tx.send((channel, BlockResponse { data }));
                    });
                }
                RequestResponseMessage::Response {
                    request_id,
                    response,
                } => {
                    if let Some(tx) = block_request_table.remove(&request_id) {
                        let data = response.data.map(ByteBuf::into_vec);
                        if tx.send(Ok(data)).is_err() {
                            debug!("block response receiver dropped");
                        }
                    } else {
                        warn!("received block response for unknown request {request_id:?}");
                    }
                }
            },
            RequestResponseEvent::OutboundFailure {
                request_id, error, ..
            } => {
                if let Some(tx) = block_request_table.remove(&request_id) {
                    let _ = tx.send(Err(RequestError::Failure(error.to_string())));
                }
            }
            RequestResponseEvent::InboundFailure { peer, error, .. } => {
                debug!("block inbound failure from {peer}: {error}");
            }
            RequestResponseEvent::ResponseSent { .. } => {}
        },
    }
}

/// Dialable addresses advertised in announcements, with the local peer id
/// appended.
fn announce_addrs(swarm: &Swarm<MirrorBehaviour>) -> Vec<String> {
    let local = *swarm.local_peer_id();
    Swarm::listeners(swarm)
        .map(|addr| {
            let mut addr = addr.clone();
            addr.push(Protocol::P2p(local.into()));
            addr.to_string()
        })
        .collect()
}

/// Bound on dialing plus connection upgrade.
const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the transport the service communicates over: TCP with system DNS
/// resolution, noise authentication and yamux multiplexing. The mirror moves
/// single-block frames, so default multiplexer buffers are plenty.
pub fn build_transport(local_key: &Keypair) -> Boxed<(PeerId, StreamMuxerBox)> {
    let tcp = libp2p::tcp::tokio::Transport::new(libp2p::tcp::Config::default().nodelay(true));
    let transport =
        libp2p::dns::TokioDnsConfig::system(tcp).expect("system DNS resolver is available");
    let noise_keys = noise::Keypair::<noise::X25519Spec>::new()
        .into_authentic(local_key)
        .expect("an ed25519 identity can always sign the noise static key");

    transport
        .upgrade(core::upgrade::Version::V1)
        .authenticate(noise::NoiseConfig::xx(noise_keys).into_authenticated())
        .multiplex(yamux::YamuxConfig::default())
        .timeout(TRANSPORT_TIMEOUT)
        .boxed()
}
