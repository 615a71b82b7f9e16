// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::Error;
use cid::multihash::{Code, MultihashDigest};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::io::Cursor;

/// Hash function used to map keys to trie paths. Serialized as its multihash
/// code in the root block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Identity,
    Sha2_256,
    Murmur3X64_64,
}

impl HashAlg {
    /// Multihash code of the algorithm.
    pub fn code(&self) -> u64 {
        match self {
            HashAlg::Identity => 0x00,
            HashAlg::Sha2_256 => 0x12,
            HashAlg::Murmur3X64_64 => 0x22,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x00 => Some(HashAlg::Identity),
            0x12 => Some(HashAlg::Sha2_256),
            0x22 => Some(HashAlg::Murmur3X64_64),
            _ => None,
        }
    }

    /// Parses the canonical multihash name of a supported algorithm.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "identity" => Some(HashAlg::Identity),
            "sha2-256" => Some(HashAlg::Sha2_256),
            "murmur3-x64-64" => Some(HashAlg::Murmur3X64_64),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlg::Identity => "identity",
            HashAlg::Sha2_256 => "sha2-256",
            HashAlg::Murmur3X64_64 => "murmur3-x64-64",
        }
    }

    /// Hashes a key into the bit string consumed level by level.
    pub fn digest(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            HashAlg::Identity => Ok(key.to_vec()),
            HashAlg::Sha2_256 => Ok(Code::Sha2_256.digest(key).digest().to_vec()),
            HashAlg::Murmur3X64_64 => {
                let h = murmur3::murmur3_x64_128(&mut Cursor::new(key), 0)
                    .map_err(|_| Error::Custom("murmur3 hashing failed"))?;
                Ok(((h >> 64) as u64).to_be_bytes().to_vec())
            }
        }
    }
}

impl Serialize for HashAlg {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.code().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HashAlg {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = u64::deserialize(deserializer)?;
        HashAlg::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unsupported hash algorithm code {code:#x}")))
    }
}
