// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::bitfield::Bitfield;
use crate::hash_bits::HashBits;
use crate::{Config, Error};
use cid::multihash::Code;
use cid::Cid;
use mirror_blockstore::BlockStore;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// A single trie level. Serialized as the `(bitfield, pointers)` tuple.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Node {
    pub(crate) bitfield: Bitfield,
    pub(crate) pointers: Vec<Pointer>,
}

impl Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (&self.bitfield, &self.pointers).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (bitfield, pointers) = Deserialize::deserialize(deserializer)?;
        Ok(Node { bitfield, pointers })
    }
}

/// Child slot of a node: either a bucket of keys or a link to a deeper node.
/// A freshly split child lives in `cache` until [`Node::flush`] writes it out
/// and records the link.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Pointer {
    #[serde(rename = "b", skip_serializing_if = "Vec::is_empty", default)]
    bucket: Vec<ByteBuf>,
    #[serde(rename = "l", skip_serializing_if = "Option::is_none", default)]
    link: Option<Cid>,
    #[serde(skip)]
    cache: Option<Box<Node>>,
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        self.bucket == other.bucket && self.link == other.link
    }
}

impl Pointer {
    fn from_key(key: ByteBuf) -> Self {
        Pointer {
            bucket: vec![key],
            ..Default::default()
        }
    }

    fn is_shard(&self) -> bool {
        self.link.is_some() || self.cache.is_some()
    }

    fn load_child_mut<BS: BlockStore>(&mut self, store: &BS) -> Result<&mut Node, Error> {
        if self.cache.is_none() {
            let link = self
                .link
                .as_ref()
                .ok_or(Error::Custom("cannot load child from a bucket pointer"))?;
            let node: Node = store
                .get_obj(link)?
                .ok_or_else(|| Error::CidNotFound(link.to_string()))?;
            self.cache = Some(Box::new(node));
        }
        Ok(self.cache.as_mut().expect("cache filled above"))
    }
}

impl Node {
    /// Inserts a key. Returns `false` when the key was already present.
    pub fn set<BS: BlockStore>(
        &mut self,
        hashed: &[u8],
        consumed: u32,
        key: ByteBuf,
        store: &BS,
        conf: &Config,
    ) -> Result<bool, Error> {
        let mut hb = HashBits::new_at_index(hashed, consumed);
        let idx = hb.next(conf.bit_width)?;
        let consumed = hb.consumed;

        // No existing entries at this slot.
        if !self.bitfield.test_bit(idx) {
            self.insert_child(idx, key);
            return Ok(true);
        }

        let cindex = self.bitfield.count_ones_below(idx);
        let child = &mut self.pointers[cindex];

        if child.is_shard() {
            let node = child.load_child_mut(store)?;
            // The child is about to change, so any previously written block
            // no longer describes it. Flush recomputes the link.
            let added = node.set(hashed, consumed, key, store, conf)?;
            if added {
                child.link = None;
            }
            return Ok(added);
        }

        if child.bucket.contains(&key) {
            return Ok(false);
        }

        if child.bucket.len() < conf.bucket_size {
            // Keep buckets ordered so serialization is canonical regardless
            // of insertion order.
            let pos = child
                .bucket
                .iter()
                .position(|k| k.as_slice() > key.as_slice())
                .unwrap_or(child.bucket.len());
            child.bucket.insert(pos, key);
            return Ok(true);
        }

        // Bucket is full: split into a sub-node one level deeper.
        let mut sub = Node::default();
        for existing in std::mem::take(&mut child.bucket) {
            let digest = conf.hash_alg.digest(&existing)?;
            sub.set(&digest, consumed, existing, store, conf)?;
        }
        sub.set(hashed, consumed, key, store, conf)?;
        child.cache = Some(Box::new(sub));
        child.link = None;
        Ok(true)
    }

    /// Writes all cached children to the store bottom-up, recording links.
    pub fn flush<BS: BlockStore>(&mut self, store: &BS) -> Result<(), Error> {
        for pointer in &mut self.pointers {
            if let Some(mut node) = pointer.cache.take() {
                node.flush(store)?;
                let cid = store.put_obj(&node, Code::Blake2b256)?;
                pointer.link = Some(cid);
            }
        }
        Ok(())
    }

    /// Canonical traversal: slots in bitfield order, bucket keys in byte
    /// order, depth first through links.
    pub fn for_each<BS, F>(&self, store: &BS, f: &mut F) -> Result<(), Error>
    where
        BS: BlockStore,
        F: FnMut(&[u8]) -> Result<(), Error>,
    {
        for pointer in &self.pointers {
            if let Some(node) = &pointer.cache {
                node.for_each(store, f)?;
            } else if let Some(link) = &pointer.link {
                let node: Node = store
                    .get_obj(link)?
                    .ok_or_else(|| Error::CidNotFound(link.to_string()))?;
                node.for_each(store, f)?;
            } else {
                for key in &pointer.bucket {
                    f(key)?;
                }
            }
        }
        Ok(())
    }

    /// Child links of this node, for bounded sub-DAG walks.
    pub fn links(&self) -> impl Iterator<Item = &Cid> {
        self.pointers.iter().filter_map(|p| p.link.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    fn insert_child(&mut self, idx: u32, key: ByteBuf) {
        let i = self.bitfield.count_ones_below(idx);
        self.bitfield.set_bit(idx);
        self.pointers.insert(i, Pointer::from_key(key));
    }

    /// Rejects decoded nodes whose pointers carry both shapes at once or
    /// disagree with their occupancy map.
    pub(crate) fn validate_shape(&self) -> Result<(), Error> {
        if self.bitfield.count_ones() != self.pointers.len() {
            return Err(Error::Custom("bitfield does not match pointer count"));
        }
        for pointer in &self.pointers {
            if pointer.link.is_some() && !pointer.bucket.is_empty() {
                return Err(Error::Custom("pointer carries both bucket and link"));
            }
        }
        Ok(())
    }
}
