// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod bitfield;
mod error;
mod hamt;
mod hash;
mod hash_bits;
mod node;

pub use self::bitfield::Bitfield;
pub use self::error::Error;
pub use self::hamt::{Hamt, Root};
pub use self::hash::HashAlg;
pub use self::hash_bits::HashBits;
pub use self::node::Node;

use serde::{Deserialize, Serialize};

/// Widest supported index per trie level. One level consumes at most a byte of
/// the hashed key, matching the limit of [`HashBits::next`].
pub const MAX_BIT_WIDTH: u32 = 8;

/// Parameters shaping a HAMT. The root block carries them so a reader can
/// traverse the trie without out-of-band configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "hashAlg")]
    pub hash_alg: HashAlg,
    #[serde(rename = "bitWidth")]
    pub bit_width: u32,
    #[serde(rename = "bucketSize")]
    pub bucket_size: usize,
}

impl Config {
    pub fn new(hash_alg: HashAlg, bit_width: u32, bucket_size: usize) -> Self {
        Self {
            hash_alg,
            bit_width,
            bucket_size,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.bit_width == 0 || self.bit_width > MAX_BIT_WIDTH {
            return Err(Error::InvalidConfig(format!(
                "bit width must be between 1 and {MAX_BIT_WIDTH}, got {}",
                self.bit_width
            )));
        }
        if self.bucket_size == 0 {
            return Err(Error::InvalidConfig(
                "bucket size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
