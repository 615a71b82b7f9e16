// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::entries::NO_ENTRIES;
use crate::errors::Error;
use cid::Cid;
use libp2p::identity::{Keypair, PublicKey};
use libp2p::PeerId;
use mirror_encoding::{blake2b_256, Cbor};
use serde::{Deserialize, Serialize};
use serde_bytes::{ByteBuf, Bytes};

/// A signed record announcing or withdrawing content on behalf of a provider.
/// Identity is the CID of the serialized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Link to the previously published advertisement, absent on the genesis
    /// ad of a chain.
    #[serde(rename = "PreviousID", skip_serializing_if = "Option::is_none", default)]
    pub previous_id: Option<Cid>,
    /// Peer identity of the original content provider.
    #[serde(rename = "Provider")]
    pub provider: String,
    /// Network addresses the provider content is retrievable from.
    #[serde(rename = "Addresses")]
    pub addresses: Vec<String>,
    /// Root of the multihash payload, or [`NO_ENTRIES`].
    #[serde(rename = "Entries")]
    pub entries: Cid,
    /// Provider-scoped opaque grouping key.
    #[serde(rename = "ContextID")]
    pub context_id: ByteBuf,
    /// Opaque retrieval metadata.
    #[serde(rename = "Metadata")]
    pub metadata: ByteBuf,
    /// Whether this advertisement withdraws previously announced content.
    #[serde(rename = "IsRm")]
    pub is_rm: bool,
    #[serde(rename = "Signature", skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<AdSignature>,
}

/// Signature envelope: the signer's protobuf-encoded public key next to the
/// raw signature bytes, so verification recovers the signing peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdSignature {
    #[serde(rename = "PubKey")]
    pub pub_key: ByteBuf,
    #[serde(rename = "Sig")]
    pub sig: ByteBuf,
}

/// Canonical subset of advertisement fields covered by the signature.
#[derive(Serialize)]
struct SigPayload<'a> {
    previous_id: &'a Option<Cid>,
    provider: &'a str,
    addresses: &'a [String],
    entries: &'a Cid,
    context_id: &'a Bytes,
    metadata: &'a Bytes,
    is_rm: bool,
}

impl Cbor for Advertisement {}

impl Advertisement {
    /// Whether the ad links to an entries structure rather than the sentinel.
    pub fn has_entries(&self) -> bool {
        self.entries != *NO_ENTRIES
    }

    fn sig_digest(&self) -> Result<[u8; 32], Error> {
        let payload = SigPayload {
            previous_id: &self.previous_id,
            provider: &self.provider,
            addresses: &self.addresses,
            entries: &self.entries,
            context_id: Bytes::new(&self.context_id),
            metadata: Bytes::new(&self.metadata),
            is_rm: self.is_rm,
        };
        Ok(blake2b_256(&mirror_encoding::to_vec(&payload)?))
    }

    /// Signs the advertisement with the given identity, replacing any
    /// previous signature.
    pub fn sign(&mut self, key: &Keypair) -> Result<(), Error> {
        let digest = self.sig_digest()?;
        let sig = key.sign(&digest).map_err(|e| Error::Signing(e.to_string()))?;
        self.signature = Some(AdSignature {
            pub_key: ByteBuf::from(key.public().to_protobuf_encoding()),
            sig: ByteBuf::from(sig),
        });
        Ok(())
    }

    /// Verifies the signature over the canonical field subset and returns the
    /// signing peer.
    pub fn verify_signature(&self) -> Result<PeerId, Error> {
        let signature = self.signature.as_ref().ok_or(Error::NotSigned)?;
        let pub_key = PublicKey::from_protobuf_encoding(&signature.pub_key)
            .map_err(|e| Error::Key(e.to_string()))?;
        let digest = self.sig_digest()?;
        if !pub_key.verify(&digest, &signature.sig) {
            return Err(Error::InvalidSignature);
        }
        Ok(pub_key.to_peer_id())
    }
}
