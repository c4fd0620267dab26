//! ClientConnection (C6): one connection to a single server (spec §4.5).
//!
//! Stores the `VerifyLogin` learned during handshake, a `ServerInformation` snapshot
//! kept up to date by moderation broadcasts, `last_sent_timestamp`, and an idempotent
//! `opened` flag. Incoming `Audio` takes a fast path straight to the local sink, in
//! addition to (not instead of) being handed to the demultiplexer queue, to minimize
//! perceived latency; every other variant only ever reaches the demultiplexer once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::address::Source;
use crate::client::demux::StreamDemultiplexer;
use crate::client::sinks::AudioSink;
use crate::error::Result;
use crate::message::{Packet, Payload, ServerInformation, VerifyLogin};
use crate::net::Connection;

pub struct ClientConnection {
    pub source: Source,
    connection: Connection,
    verify_login: parking_lot::Mutex<Option<VerifyLogin>>,
    server_information: parking_lot::Mutex<ServerInformation>,
    last_sent: parking_lot::Mutex<Instant>,
    opened: AtomicBool,
    demux: Arc<StreamDemultiplexer>,
    audio_fast_path: Option<Arc<dyn AudioSink>>,
}

impl ClientConnection {
    pub fn new(source: Source, connection: Connection, demux: Arc<StreamDemultiplexer>) -> Self {
        Self {
            source,
            connection,
            verify_login: parking_lot::Mutex::new(None),
            server_information: parking_lot::Mutex::new(ServerInformation::default()),
            last_sent: parking_lot::Mutex::new(Instant::now()),
            opened: AtomicBool::new(true),
            demux,
            audio_fast_path: None,
        }
    }

    pub fn with_audio_fast_path(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.audio_fast_path = Some(sink);
        self
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Relaxed)
    }

    pub fn verify_login(&self) -> Option<VerifyLogin> {
        self.verify_login.lock().clone()
    }

    pub fn server_information(&self) -> ServerInformation {
        self.server_information.lock().clone()
    }

    /// Stamps `last_sent_timestamp = now` and queues the packet for the next `flush`.
    pub fn send_packet(&self, packet: &Packet) -> Result<()> {
        *self.last_sent.lock() = Instant::now();
        self.connection.send_packet(packet)
    }

    pub fn flush(&mut self) -> bool {
        self.connection.flush()
    }

    /// How long the UI should block further sends before the server's rate limit
    /// allows another one; `0` once the window has already elapsed.
    pub fn next_send_interval(&self, send_rate_secs: u32) -> Duration {
        if send_rate_secs == 0 {
            return Duration::ZERO;
        }
        let elapsed = self.last_sent.lock().elapsed();
        let window = Duration::from_secs(send_rate_secs as u64);
        window.saturating_sub(elapsed)
    }

    /// Hand a decoded inbound packet off to this connection: apply the VerifyLogin/
    /// ServerInformation bookkeeping locally, run the Audio fast path if applicable,
    /// then enqueue to the demultiplexer exactly once.
    pub fn add_packet(&self, packet: Packet) {
        match &packet.payload {
            Payload::VerifyLogin(login) => {
                *self.verify_login.lock() = Some(login.clone());
                return;
            }
            Payload::ServerInformation(info) => {
                *self.server_information.lock() = info.clone();
            }
            Payload::Audio(audio) => {
                if let Some(sink) = &self.audio_fast_path {
                    sink.on_audio(&packet.source, &audio.bytes);
                }
            }
            _ => {}
        }
        self.demux.enqueue(packet.source, packet.payload);
    }

    /// Poll the socket once and hand every complete packet to `add_packet`. Returns
    /// `false` when the connection has closed.
    pub fn read_and_dispatch(&mut self, timeout_ms: u64) -> bool {
        let mut packets = Vec::new();
        if !self.connection.read_and_handle(timeout_ms, &mut packets) {
            self.opened.store(false, Ordering::Relaxed);
            return false;
        }
        for packet in packets {
            self.add_packet(packet);
        }
        true
    }

    pub fn close(&mut self) {
        if self.opened.swap(false, Ordering::Relaxed) {
            log::info!("closing connection to {}", self.source);
            self.connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::client::sinks::LoggingSink;
    use crate::net::FramedSocket;
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::AtomicUsize;

    fn dummy_connection() -> Connection {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let _ = listener.accept().unwrap();
        Connection::new(FramedSocket::Plain(client))
    }

    struct CountingSink(Arc<AtomicUsize>);
    impl AudioSink for CountingSink {
        fn on_audio(&self, _source: &Source, _bytes: &[u8]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn audio_reaches_fast_path_and_demux_exactly_once_each() {
        let count = Arc::new(AtomicUsize::new(0));
        let demux = Arc::new(StreamDemultiplexer::new(Arc::new(LoggingSink)));
        let source = Source::new(Address::new("h", 1), "s");
        let conn = ClientConnection::new(source.clone(), dummy_connection(), Arc::clone(&demux))
            .with_audio_fast_path(Arc::new(CountingSink(Arc::clone(&count))));

        conn.add_packet(Packet {
            source: source.clone(),
            payload: Payload::Audio(crate::message::Audio { bytes: vec![1, 2, 3] }),
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(demux.dispatch_one());
        assert!(!demux.dispatch_one());
    }

    #[test]
    fn verify_login_is_captured_without_reaching_demux() {
        let demux = Arc::new(StreamDemultiplexer::new(Arc::new(LoggingSink)));
        let source = Source::new(Address::new("h", 1), "s");
        let conn = ClientConnection::new(source.clone(), dummy_connection(), Arc::clone(&demux));
        conn.add_packet(Packet {
            source,
            payload: Payload::VerifyLogin(VerifyLogin {
                server_name: "srv".into(),
                peer_information: crate::message::PeerInformation {
                    name: "me".into(),
                    flags: crate::message::PeerFlags::empty(),
                },
                server_type: crate::message::ServerType::Chat,
                send_rate_secs: 0,
            }),
        });
        assert!(conn.verify_login().is_some());
        assert!(!demux.dispatch_one());
    }
}
