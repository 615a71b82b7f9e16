// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::codec::{
    BlockCodec, BlockProtocolName, HeadCodec, HeadProtocolName,
};
use crate::messages::{BlockRequest, BlockResponse, HeadRequest, HeadResponse};
use anyhow::anyhow;
use libp2p::gossipsub::{
    Gossipsub, GossipsubConfigBuilder, GossipsubEvent, IdentTopic, MessageAuthenticity,
};
use libp2p::identity::Keypair;
use libp2p::request_response::{
    ProtocolSupport, RequestResponse, RequestResponseConfig, RequestResponseEvent,
};
use libp2p::NetworkBehaviour;

/// Composed behaviour of the mirror transport: announcements over gossipsub
/// plus head and block exchange over request-response.
#[derive(NetworkBehaviour)]
#[behaviour(out_event = "MirrorBehaviourEvent")]
pub struct MirrorBehaviour {
    pub gossipsub: Gossipsub,
    pub head: RequestResponse<HeadCodec>,
    pub block: RequestResponse<BlockCodec>,
}

#[derive(Debug)]
pub enum MirrorBehaviourEvent {
    Gossipsub(GossipsubEvent),
    Head(RequestResponseEvent<HeadRequest, HeadResponse>),
    Block(RequestResponseEvent<BlockRequest, BlockResponse>),
}

impl From<GossipsubEvent> for MirrorBehaviourEvent {
    fn from(event: GossipsubEvent) -> Self {
        MirrorBehaviourEvent::Gossipsub(event)
    }
}

impl From<RequestResponseEvent<HeadRequest, HeadResponse>> for MirrorBehaviourEvent {
    fn from(event: RequestResponseEvent<HeadRequest, HeadResponse>) -> Self {
        MirrorBehaviourEvent::Head(event)
    }
}

impl From<RequestResponseEvent<BlockRequest, BlockResponse>> for MirrorBehaviourEvent {
    fn from(event: RequestResponseEvent<BlockRequest, BlockResponse>) -> Self {
        MirrorBehaviourEvent::Block(event)
    }
}

impl MirrorBehaviour {
    pub fn new(keypair: &Keypair, topic: &IdentTopic) -> anyhow::Result<Self> {
        let gossipsub_config = GossipsubConfigBuilder::default()
            .build()
            .map_err(|e| anyhow!("building gossipsub config: {e}"))?;
        let mut gossipsub =
            Gossipsub::new(MessageAuthenticity::Signed(keypair.clone()), gossipsub_config)
                .map_err(|e| anyhow!("building gossipsub behaviour: {e}"))?;
        gossipsub
            .subscribe(topic)
            .map_err(|e| anyhow!("subscribing to {topic}: {e:?}"))?;

        let head = RequestResponse::new(
            HeadCodec::default(),
            std::iter::once((HeadProtocolName, ProtocolSupport::Full)),
            RequestResponseConfig::default(),
        );
        let block = RequestResponse::new(
            BlockCodec::default(),
            std::iter::once((BlockProtocolName, ProtocolSupport::Full)),
            RequestResponseConfig::default(),
        );

        Ok(MirrorBehaviour {
            gossipsub,
            head,
            block,
        })
    }
}
