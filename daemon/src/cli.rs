// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::bail;
use futures::channel::oneshot::Receiver;
use libp2p::Multiaddr;
use log::{info, warn};
use mirror_hamt::HashAlg;
use std::cell::RefCell;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use structopt::StructOpt;

/// CLI options of the mirror daemon.
#[derive(StructOpt, Debug)]
#[structopt(
    name = "index-mirror",
    about = "Mirrors the advertisement chain from an existing index provider."
)]
pub struct Cli {
    /// The addrinfo of the provider to mirror, as a multiaddr ending in
    /// /p2p/<peer-id>.
    #[structopt(long)]
    pub source: String,
    /// The time interval, in seconds, at which to check the source for new
    /// advertisements.
    #[structopt(long, default_value = "600")]
    pub sync_interval: u64,
    /// The path to the file containing the marshalled libp2p private key that
    /// the mirror should use as its identity. Randomly generated if unset.
    #[structopt(long)]
    pub identity_path: Option<PathBuf>,
    /// The mirror listen addresses in form of multiaddr.
    #[structopt(long)]
    pub listen_addrs: Vec<Multiaddr>,
    /// The path at which to persist the mirror state. Ephemeral in-memory
    /// storage if unset.
    #[structopt(long)]
    pub store_path: Option<PathBuf>,
    /// The maximum recursion depth limit of ads to mirror if no previous ads
    /// are mirrored.
    #[structopt(long)]
    pub init_ad_recur_limit: Option<u64>,
    /// The maximum recursion depth limit of ad entries to mirror.
    #[structopt(long)]
    pub entries_recur_limit: Option<u64>,
    /// Remaps the advertisement entries to an EntryChunk chain with the
    /// specified chunk size.
    #[structopt(long)]
    pub remap_with_entry_chunk_size: Option<usize>,
    /// Remaps the advertisement entries to HAMT using the given hash
    /// function. Only `identity`, `sha2-256` and `murmur3-x64-64` are
    /// accepted.
    #[structopt(long)]
    pub remap_with_hamt_hash_func: Option<String>,
    /// Remaps the advertisement entries to HAMT using the given bit-width.
    #[structopt(long)]
    pub remap_with_hamt_bit_width: Option<u32>,
    /// Remaps the advertisement entries to HAMT using the given bucket size.
    #[structopt(long)]
    pub remap_with_hamt_bucket_size: Option<usize>,
    /// The topic on which the source and mirrored advertisements are
    /// announced.
    #[structopt(long)]
    pub topic: Option<String>,
    /// Whether to skip remapping the entries if the source entries kind
    /// matches the configured remap kind.
    #[structopt(long)]
    pub skip_remap_on_entries_type_match: bool,
    /// Whether to always re-sign advertisements with the mirror's identity.
    #[structopt(long)]
    pub always_re_sign_ads: bool,
    /// The LRU cache capacity for remapped advertisement entries, in number
    /// of complete entries DAGs.
    #[structopt(long)]
    pub remapped_entries_cache_capacity: Option<usize>,
    /// Whether to delete any cached remapped entries on start-up.
    #[structopt(long)]
    pub purge_cached_entries: bool,
}

/// Entries remap choice resolved from the mutually exclusive flag groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapChoice {
    None,
    EntryChunk(usize),
    Hamt(HashAlg, u32, usize),
}

impl Cli {
    /// Resolves the remap flags, rejecting the combinations the options
    /// surface cannot express.
    pub fn remap_choice(&self) -> anyhow::Result<RemapChoice> {
        let entry_chunk = self.remap_with_entry_chunk_size;
        let hamt_flags = [
            self.remap_with_hamt_hash_func.is_some(),
            self.remap_with_hamt_bit_width.is_some(),
            self.remap_with_hamt_bucket_size.is_some(),
        ];
        let hamt_set = hamt_flags.iter().filter(|set| **set).count();

        if entry_chunk.is_some() && hamt_set > 0 {
            bail!("only one entry remap kind can be specified; both EntryChunk and HAMT flags are set");
        }
        if let Some(chunk_size) = entry_chunk {
            return Ok(RemapChoice::EntryChunk(chunk_size));
        }
        match hamt_set {
            0 => Ok(RemapChoice::None),
            3 => {
                let name = self
                    .remap_with_hamt_hash_func
                    .as_deref()
                    .expect("checked above");
                let Some(hash_alg) = HashAlg::from_name(name) else {
                    bail!("no multihash code found with name: {name}");
                };
                Ok(RemapChoice::Hamt(
                    hash_alg,
                    self.remap_with_hamt_bit_width.expect("checked above"),
                    self.remap_with_hamt_bucket_size.expect("checked above"),
                ))
            }
            _ => bail!(
                "to remap entries as HAMT all three of hash function, bit-width and bucket size flags must be set"
            ),
        }
    }
}

/// Installs a ctrl-c handler; the returned receiver resolves on the first
/// interrupt, a second interrupt exits immediately.
pub fn set_sigint_handler() -> Receiver<()> {
    let (ctrlc_send, ctrlc_oneshot) = futures::channel::oneshot::channel();
    let ctrlc_send_c = RefCell::new(Some(ctrlc_send));

    let running = Arc::new(AtomicUsize::new(0));
    ctrlc::set_handler(move || {
        let prev = running.fetch_add(1, Ordering::SeqCst);
        if prev == 0 {
            warn!("Got interrupt, shutting down...");
            if let Some(ctrlc_send) = ctrlc_send_c.try_borrow_mut().unwrap().take() {
                ctrlc_send.send(()).expect("Error sending ctrl-c message");
            }
        } else {
            info!("Exiting process");
            process::exit(0);
        }
    })
    .expect("Error setting Ctrl-C handler");

    ctrlc_oneshot
}
