// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod cli;

use anyhow::Context;
use cli::{set_sigint_handler, Cli, RemapChoice};
use libp2p::identity::Keypair;
use log::info;
use mirror::{network_channels, AddrInfo, Mirror, MirrorOptions, RecursionLimit};
use mirror_db::sled::SledDb;
use mirror_db::{MemoryDB, Store};
use mirror_libp2p::Libp2pService;
use std::path::Path;
use std::time::Duration;
use structopt::StructOpt;

fn setup_logger() {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.filter(None, log::LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn load_identity(path: Option<&Path>) -> anyhow::Result<Keypair> {
    match path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading identity key from {}", path.display()))?;
            Keypair::from_protobuf_encoding(&bytes).context("decoding identity key")
        }
        None => Ok(Keypair::generate_ed25519()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logger();
    let cli = Cli::from_args();

    let source: AddrInfo = cli.source.parse()?;
    let remap = cli.remap_choice()?;
    let identity = load_identity(cli.identity_path.as_deref())?;

    match &cli.store_path {
        Some(path) => {
            let db = SledDb::open(path)
                .with_context(|| format!("opening datastore at {}", path.display()))?;
            run(cli, source, remap, identity, db).await
        }
        None => run(cli, source, remap, identity, MemoryDB::default()).await,
    }
}

async fn run<DB>(
    cli: Cli,
    source: AddrInfo,
    remap: RemapChoice,
    identity: Keypair,
    db: DB,
) -> anyhow::Result<()>
where
    DB: Store + Clone + Send + Sync + 'static,
{
    let mut opts = MirrorOptions::default()
        .with_datastore(db)
        .with_identity(identity.clone())
        .with_sync_interval(Duration::from_secs(cli.sync_interval))
        .with_skip_remap_on_entries_type_match(cli.skip_remap_on_entries_type_match)
        .with_always_re_sign_ads(cli.always_re_sign_ads)
        .with_purge_cached_entries(cli.purge_cached_entries);
    if let Some(limit) = cli.init_ad_recur_limit {
        opts = opts.with_initial_ad_recursion_limit(RecursionLimit::Depth(limit));
    }
    if let Some(limit) = cli.entries_recur_limit {
        opts = opts.with_entries_recursion_limit(RecursionLimit::Depth(limit));
    }
    match remap {
        RemapChoice::None => {}
        RemapChoice::EntryChunk(chunk_size) => {
            opts = opts.with_entry_chunk_remapper(chunk_size);
        }
        RemapChoice::Hamt(hash_alg, bit_width, bucket_size) => {
            opts = opts.with_hamt_remapper(hash_alg, bit_width, bucket_size);
        }
    }
    if let Some(topic) = &cli.topic {
        opts = opts.with_topic_name(topic.clone());
    }
    if let Some(capacity) = cli.remapped_entries_cache_capacity {
        opts = opts.with_remapped_entries_cache_capacity(capacity);
    }

    let (network, service_channels) = network_channels();
    let mut mirror = Mirror::new(source.clone(), network, opts)?;

    let listen_addrs = if cli.listen_addrs.is_empty() {
        vec!["/ip4/0.0.0.0/tcp/0".parse().expect("valid multiaddr")]
    } else {
        cli.listen_addrs.clone()
    };
    let service = Libp2pService::new(
        identity,
        source,
        mirror.get_topic_name(),
        listen_addrs,
        service_channels,
    )?;
    info!("mirror identity: {}", service.local_peer_id());
    let service_handle = tokio::spawn(service.run());

    mirror.start()?;

    let ctrlc = set_sigint_handler();
    let _ = ctrlc.await;

    mirror.shutdown().await?;
    service_handle.abort();
    Ok(())
}
