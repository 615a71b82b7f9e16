// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::net::{NetworkEvent, SourceNetworkContext};
use crate::store::MirrorStore;
use cid::Cid;
use log::{debug, info, warn};
use mirror_blockstore::BlockStore;
use mirror_db::Store;

/// Announces newly mirrored heads on the configured topic.
pub struct Publisher {
    net: SourceNetworkContext,
    topic: String,
}

impl Publisher {
    pub fn new(net: SourceNetworkContext, topic: String) -> Self {
        Self { net, topic }
    }

    pub async fn announce_head(&self, head: Cid) {
        info!("announcing mirrored head {head} on {}", self.topic);
        self.net.announce_head(self.topic.clone(), head).await;
    }
}

/// Serves block and head requests from downstream consumers out of the
/// mirror's store, making the mirror a CDN for the original chain alongside
/// the rewritten one. Runs until the transport drops its event sender.
pub(crate) async fn serve_blocks<DB>(store: MirrorStore<DB>, events: flume::Receiver<NetworkEvent>)
where
    DB: Store + Clone,
{
    while let Ok(event) = events.recv_async().await {
        match event {
            NetworkEvent::HeadRequest { response_channel } => {
                let head = mirrored_head(&store);
                if response_channel.send(head).is_err() {
                    debug!("head request abandoned by requester");
                }
            }
            NetworkEvent::BlockRequest {
                cid,
                response_channel,
            } => {
                let block = store.get_bytes(&cid).unwrap_or_else(|e| {
                    warn!("failed to read block {cid}: {e}");
                    None
                });
                if response_channel.send(block).is_err() {
                    debug!("block request for {cid} abandoned by requester");
                }
            }
        }
    }
    debug!("block server exiting: transport closed");
}

fn mirrored_head<DB>(store: &MirrorStore<DB>) -> Option<Cid>
where
    DB: Store + Clone,
{
    let source_head = match store.head() {
        Ok(head) => head?,
        Err(e) => {
            warn!("failed to read head: {e}");
            return None;
        }
    };
    match store.mapping(&source_head) {
        Ok(mapped) => mapped,
        Err(e) => {
            warn!("failed to read mapping for {source_head}: {e}");
            None
        }
    }
}
