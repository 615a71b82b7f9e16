// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::multihash::{Code, MultihashDigest};
use cid::Cid;
use mirror_encoding::{Cbor, RAW};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Sentinel entries link for advertisements that carry no multihashes,
/// typically removals. An inline identity CID, so it never resolves to a
/// block.
pub static NO_ENTRIES: Lazy<Cid> =
    Lazy::new(|| Cid::new_v1(RAW, Code::Identity.digest(b"no-entries")));

/// One node of an entries chain: an ordered slice of multihashes plus an
/// optional link to the chunk published before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryChunk {
    #[serde(rename = "Entries")]
    pub entries: Vec<ByteBuf>,
    #[serde(rename = "Next", skip_serializing_if = "Option::is_none", default)]
    pub next: Option<Cid>,
}

impl EntryChunk {
    pub fn new(entries: Vec<ByteBuf>, next: Option<Cid>) -> Self {
        Self { entries, next }
    }
}

impl Cbor for EntryChunk {}

/// Shape of the structure behind an entries root block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntriesKind {
    EntryChunk,
    Hamt,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_entries_is_stable() {
        // The sentinel must never change between releases; peers compare it
        // byte for byte.
        assert_eq!(
            *NO_ENTRIES,
            Cid::new_v1(RAW, Code::Identity.digest(b"no-entries"))
        );
        assert_eq!(NO_ENTRIES.codec(), RAW);
        assert_eq!(NO_ENTRIES.hash().code(), 0x0);
    }

    #[test]
    fn entry_chunk_round_trip() {
        let chunk = EntryChunk::new(
            vec![ByteBuf::from(vec![1, 2, 3]), ByteBuf::from(vec![4, 5])],
            None,
        );
        let bz = chunk.marshal_cbor().unwrap();
        assert_eq!(EntryChunk::unmarshal_cbor(&bz).unwrap(), chunk);
    }
}
