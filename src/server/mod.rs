//! Server-side components: ServerPeer (C4) and ServerCore (C5).

pub mod access;
pub mod auth;
pub mod config;
pub mod core;
pub mod peer;
pub mod replay;

pub use config::ServerConfig;
pub use core::ServerCore;

use std::time::Duration;

use crate::error::Result;
use crate::net::FramedSocket;
use crate::workpool::{app_done, WorkPool};

const ACCEPT_POLL_MS: u64 = 200;
const SERVICE_POLL_MS: u64 = 50;

/// Run a server until the process is asked to shut down. Spawns one WorkPool task per
/// accepted peer; the accept loop itself also runs as a WorkPool task so the whole
/// server uses exactly the machinery described for C8.
pub fn run(config: ServerConfig) -> Result<()> {
    let core = std::sync::Arc::new(ServerCore::new(config));
    let listener = core.bind()?;
    log::info!(
        "{} ({:?}) listening on {}",
        core.config.name,
        core.config.server_type,
        listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
    );

    let tls_config = if core.config.uses_tls() {
        let cert = core.config.cert.as_deref().expect("uses_tls implies cert");
        let key = core.config.key.as_deref().expect("uses_tls implies key");
        Some(crate::net::tls::server_config(cert, key)?)
    } else {
        None
    };

    let pool = std::sync::Arc::new(WorkPool::new());
    let accept_core = std::sync::Arc::clone(&core);
    let accept_pool = std::sync::Arc::clone(&pool);
    pool.submit(move || {
        if app_done() {
            return false;
        }
        let accepted = match &tls_config {
            Some(tls) => FramedSocket::accept_tls(&listener, ACCEPT_POLL_MS, std::sync::Arc::clone(tls)),
            None => FramedSocket::accept_plain(&listener, ACCEPT_POLL_MS),
        };
        match accepted {
            Ok(Some(socket)) => {
                if let Some(id) = accept_core.accept(socket) {
                    let service_core = std::sync::Arc::clone(&accept_core);
                    accept_pool.submit(move || service_core.service_peer(id, SERVICE_POLL_MS));
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("accept failed: {e}"),
        }
        true
    });

    let heartbeat = crossbeam_channel::tick(Duration::from_millis(200));
    while !app_done() {
        heartbeat.recv().ok();
    }
    pool.shutdown();
    if let Err(e) = core.persist_access() {
        log::error!("failed to persist access list on shutdown: {e}");
    }
    Ok(())
}
