// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;

/// Occupancy map of a trie node, one bit per index slot. Sized for the widest
/// supported bit width (2^8 slots). Serialized as the minimal big-endian byte
/// string so narrow tries stay compact on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Bitfield([u64; 4]);

impl Bitfield {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn test_bit(&self, idx: u32) -> bool {
        debug_assert!(idx < 256);
        self.0[(idx / 64) as usize] & (1u64 << (idx % 64)) != 0
    }

    pub fn set_bit(&mut self, idx: u32) {
        debug_assert!(idx < 256);
        self.0[(idx / 64) as usize] |= 1u64 << (idx % 64);
    }

    pub fn clear_bit(&mut self, idx: u32) {
        debug_assert!(idx < 256);
        self.0[(idx / 64) as usize] &= !(1u64 << (idx % 64));
    }

    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Number of set bits strictly below `idx`; the index of the pointer a
    /// given slot maps to.
    pub fn count_ones_below(&self, idx: u32) -> usize {
        debug_assert!(idx < 256);
        let word = (idx / 64) as usize;
        let mut count = self.0[..word].iter().map(|w| w.count_ones() as usize).sum();
        let rem = idx % 64;
        if rem > 0 {
            count += (self.0[word] & ((1u64 << rem) - 1)).count_ones() as usize;
        }
        count
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        for word in self.0.iter().rev() {
            out.extend_from_slice(&word.to_be_bytes());
        }
        let zeros = out.iter().take_while(|b| **b == 0).count();
        out.split_off(zeros)
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > 32 {
            return None;
        }
        let mut buf = [0u8; 32];
        buf[32 - bytes.len()..].copy_from_slice(bytes);
        let mut words = [0u64; 4];
        for (i, chunk) in buf.chunks_exact(8).enumerate() {
            words[3 - i] = u64::from_be_bytes(chunk.try_into().expect("chunk is 8 bytes"));
        }
        Some(Self(words))
    }
}

impl Serialize for Bitfield {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ByteBuf::from(self.to_bytes()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Bitfield {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = ByteBuf::deserialize(deserializer)?;
        Bitfield::from_bytes(&bytes)
            .ok_or_else(|| serde::de::Error::custom("bitfield longer than 32 bytes"))
    }
}
