// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::node::Node;
use crate::{Config, Error};
use cid::multihash::Code;
use cid::Cid;
use mirror_blockstore::BlockStore;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Root block of a HAMT. Carries the shaping parameters next to the top node
/// so the trie is self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Root {
    #[serde(rename = "hamt")]
    pub config: Config,
    #[serde(rename = "map")]
    pub(crate) node: Node,
}

/// Implementation of the HAMT data structure for IPLD, specialized to binary
/// keys with presence-only values.
#[derive(Debug)]
pub struct Hamt<'a, BS> {
    root: Root,
    store: &'a BS,
}

impl<'a, BS> PartialEq for Hamt<'a, BS> {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl<'a, BS> Hamt<'a, BS>
where
    BS: BlockStore,
{
    pub fn new(store: &'a BS, config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Hamt {
            root: Root {
                config,
                node: Node::default(),
            },
            store,
        })
    }

    /// Lazily instantiate a hamt from this root link.
    pub fn from_link(cid: &Cid, store: &'a BS) -> Result<Self, Error> {
        let root: Root = store
            .get_obj(cid)?
            .ok_or_else(|| Error::CidNotFound(cid.to_string()))?;
        root.config.validate()?;
        root.node.validate_shape()?;
        Ok(Hamt { root, store })
    }

    pub fn config(&self) -> &Config {
        &self.root.config
    }

    /// Inserts a key into the trie. Returns `false` if the key was already
    /// present.
    pub fn set(&mut self, key: Vec<u8>) -> Result<bool, Error> {
        let digest = self.root.config.hash_alg.digest(&key)?;
        let config = self.root.config;
        self.root
            .node
            .set(&digest, 0, ByteBuf::from(key), self.store, &config)
    }

    /// Writes the trie to the store bottom-up and returns the root link.
    pub fn flush(&mut self) -> Result<Cid, Error> {
        self.root.node.flush(self.store)?;
        Ok(self.store.put_obj(&self.root, Code::Blake2b256)?)
    }

    /// Calls `f` for every key in canonical traversal order.
    pub fn for_each<F>(&self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&[u8]) -> Result<(), Error>,
    {
        self.root.node.for_each(self.store, &mut f)
    }

    pub fn is_empty(&self) -> bool {
        self.root.node.is_empty()
    }
}

impl Root {
    /// Links to the children of the top node, for bounded sub-DAG walks.
    pub fn links(&self) -> impl Iterator<Item = &Cid> {
        self.node.links()
    }
}
