//! Server side of the streaming recorder: accepts client connections and
//! persists their chunk streams into store-managed files.

pub mod conn;
pub mod registry;
pub mod session;

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use anyhow::{Context, Result};
use recorder_store::FileStore;

use crate::registry::{SessionKey, SessionRegistry};

/// Accept clients forever, one handler thread per connection.
///
/// Each accepted connection gets a fresh session key; the handler owns that
/// key for the connection's lifetime, so per-key session state is never
/// touched from two threads.
pub fn run_listener(
    listener: TcpListener,
    store: Arc<FileStore>,
    registry: Arc<SessionRegistry>,
    folder: Option<String>,
) -> Result<()> {
    let next_key = AtomicU64::new(1);
    loop {
        let (stream, addr) = match listener.accept() {
            Ok(x) => x,
            Err(e) => {
                tracing::warn!("accept error: {e}");
                continue;
            }
        };
        let key = SessionKey::new(next_key.fetch_add(1, Ordering::Relaxed));
        tracing::info!(key = %key, peer = %addr, "client connected");

        let store = store.clone();
        let registry = registry.clone();
        let folder = folder.clone();
        thread::Builder::new()
            .name(key.to_string())
            .spawn(move || {
                if let Err(e) = conn::serve_connection(key, stream, &registry, &store, folder.as_deref()) {
                    tracing::warn!(key = %key, "client session error: {e:#}");
                }
                tracing::info!(key = %key, "client disconnected");
            })
            .context("spawn connection handler")?;
    }
}
