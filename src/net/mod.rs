//! Transport layer: FramedSocket (C1) and Connection (C2).

pub mod connection;
pub mod framed_socket;
pub mod tls;

pub use connection::Connection;
pub use framed_socket::FramedSocket;

/// Picks an available port by asking the OS for one and immediately closing it; used by
/// tests and by link/peer addressing when no explicit `--port` is given.
pub fn pick_free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    listener.local_addr().map(|a| a.port())
}
