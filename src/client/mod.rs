//! Client-side components: ClientConnection (C6), StreamDemultiplexer (C7), sinks.

pub mod config;
pub mod connection;
pub mod demux;
pub mod sinks;

pub use config::ClientConfig;
pub use connection::ClientConnection;
pub use demux::StreamDemultiplexer;

use std::sync::Arc;

use crate::address::{Address, Source};
use crate::error::Result;
use crate::message::{Packet, Payload};
use crate::net::{Connection, FramedSocket};
use crate::workpool::{app_done, WorkPool};

const READ_POLL_MS: u64 = 50;

/// Connect, perform the Credentials handshake, then drive the read loop on a WorkPool
/// task until the connection closes or the process is asked to shut down.
pub fn run(config: ClientConfig) -> Result<()> {
    let socket = match &config.cert {
        Some(trusted_root) => {
            let tls_config = crate::net::tls::client_config(trusted_root)?;
            FramedSocket::connect_tls(&config.host, config.port, tls_config)?
        }
        None => FramedSocket::connect_plain(&config.host, config.port)?,
    };
    let connection = Connection::new(socket);
    let source = Source::new(Address::new(&config.host, config.port), "");

    let demux = Arc::new(StreamDemultiplexer::new(Arc::clone(&sinks::DEFAULT_SINK)));
    let mut client = ClientConnection::new(source.clone(), connection, Arc::clone(&demux))
        .with_audio_fast_path(Arc::clone(&sinks::DEFAULT_SINK) as Arc<dyn sinks::AudioSink>);

    let handshake = Packet { source, payload: Payload::Credentials(config.credentials()) };
    client.send_packet(&handshake)?;
    client.flush();

    let pool = WorkPool::new();
    let client = Arc::new(parking_lot::Mutex::new(client));

    let read_client = Arc::clone(&client);
    pool.submit(move || {
        if app_done() {
            return false;
        }
        let mut c = read_client.lock();
        if !c.read_and_dispatch(READ_POLL_MS) {
            return false;
        }
        c.flush();
        true
    });

    let dispatch_demux = Arc::clone(&demux);
    pool.submit(move || {
        if app_done() {
            return false;
        }
        while dispatch_demux.dispatch_one() {}
        true
    });

    let heartbeat = crossbeam_channel::tick(std::time::Duration::from_millis(100));
    while !app_done() && client.lock().is_open() {
        heartbeat.recv().ok();
    }
    pool.shutdown();
    Ok(())
}
