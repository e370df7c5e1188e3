//! Recorder server — accepts streaming capture sessions over TCP and appends
//! their chunks to files under a store root.
//!
//! One session per connection: a client opens a stream (fresh target or
//! resume into an existing one), writes chunks, and closes; every request is
//! acknowledged in order. Disconnecting with an open stream force-closes it.

mod cli;

use std::net::TcpListener;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use recorder_server::registry::SessionRegistry;
use recorder_server::run_listener;
use recorder_store::FileStore;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,recorder_server=info")
        }))
        .init();

    let store = Arc::new(
        FileStore::open(&args.store_root)
            .with_context(|| format!("open store at {:?}", args.store_root))?,
    );

    if args.list_folders {
        for dir in store.all_directories().context("list store folders")? {
            println!("{dir}");
        }
        return Ok(());
    }

    let registry = Arc::new(SessionRegistry::new());

    let registry_for_signal = registry.clone();
    let _ = ctrlc::set_handler(move || {
        let closed = registry_for_signal.close_all();
        if closed > 0 {
            tracing::info!(count = closed, "closed open streams on shutdown");
        }
        std::process::exit(130);
    });

    let listener = TcpListener::bind(args.bind).with_context(|| format!("bind {}", args.bind))?;
    tracing::info!(bind = %args.bind, store_root = ?args.store_root, "listening");

    run_listener(listener, store, registry, args.folder)
}
