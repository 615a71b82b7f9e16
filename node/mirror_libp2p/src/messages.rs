// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Gossip message announcing a new chain head and where to fetch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announce {
    #[serde(rename = "Cid")]
    pub head: Cid,
    #[serde(rename = "Addrs")]
    pub addrs: Vec<String>,
}

/// Request for the peer's current chain head.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeadRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadResponse {
    #[serde(rename = "Head", skip_serializing_if = "Option::is_none", default)]
    pub head: Option<Cid>,
}

/// Request for a single block by CID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRequest {
    #[serde(rename = "Cid")]
    pub cid: Cid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockResponse {
    #[serde(rename = "Data", skip_serializing_if = "Option::is_none", default)]
    pub data: Option<ByteBuf>,
}
