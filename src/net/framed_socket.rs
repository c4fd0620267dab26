//! FramedSocket (C1): a pure byte pipe over plain TCP or TLS (spec §4.1).
//!
//! The outgoing queue lives one layer up, in `Connection`; this type only moves bytes.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection, StreamOwned};

use crate::error::{Result, TemStreamError};

/// Cap on a single `read(..., readAll=true)` drain, matching spec.md's "~64 KiB or until
/// would-block" rule.
const READ_ALL_CAP: usize = 64 * 1024;

pub enum FramedSocket {
    Plain(TcpStream),
    TlsClient(StreamOwned<ClientConnection, TcpStream>),
    TlsServer(StreamOwned<ServerConnection, TcpStream>),
}

impl FramedSocket {
    pub fn connect_plain(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).map_err(|e| match e.kind() {
            std::io::ErrorKind::ConnectionRefused => TemStreamError::Transport(format!("refused: {e}")),
            _ => TemStreamError::Transport(format!("unreachable: {e}")),
        })?;
        stream.set_nodelay(true).ok();
        Ok(FramedSocket::Plain(stream))
    }

    pub fn connect_tls(host: &str, port: u16, config: Arc<ClientConfig>) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .map_err(|e| TemStreamError::Transport(format!("unreachable: {e}")))?;
        stream.set_nodelay(true).ok();
        let server_name = rustls::ServerName::try_from(host)
            .map_err(|e| TemStreamError::Transport(format!("bad TLS server name: {e}")))?;
        let conn = ClientConnection::new(config, server_name)
            .map_err(|e| TemStreamError::Transport(format!("TLS handshake failure: {e}")))?;
        Ok(FramedSocket::TlsClient(StreamOwned::new(conn, stream)))
    }

    /// Accept one plain connection with a timeout, the way spec.md's
    /// `accept(timeoutMs) -> Option<Self>` reads.
    pub fn accept_plain(listener: &TcpListener, timeout_ms: u64) -> Result<Option<Self>> {
        listener
            .set_nonblocking(true)
            .map_err(|e| TemStreamError::Transport(format!("fatal: {e}")))?;
        let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nodelay(true).ok();
                    return Ok(Some(FramedSocket::Plain(stream)));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if std::time::Instant::now() >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(TemStreamError::Transport(format!("fatal accept: {e}"))),
            }
        }
    }

    pub fn accept_tls(
        listener: &TcpListener,
        timeout_ms: u64,
        config: Arc<ServerConfig>,
    ) -> Result<Option<Self>> {
        match Self::accept_plain(listener, timeout_ms)? {
            Some(FramedSocket::Plain(stream)) => {
                let conn = ServerConnection::new(config)
                    .map_err(|e| TemStreamError::Transport(format!("TLS handshake failure: {e}")))?;
                Ok(Some(FramedSocket::TlsServer(StreamOwned::new(conn, stream))))
            }
            _ => Ok(None),
        }
    }

    fn underlying(&self) -> &TcpStream {
        match self {
            FramedSocket::Plain(s) => s,
            FramedSocket::TlsClient(s) => &s.sock,
            FramedSocket::TlsServer(s) => &s.sock,
        }
    }

    /// Poll-read into `buf`. If `read_all`, drains repeatedly until would-block or the
    /// per-call cap; otherwise returns after the first chunk. Returns `false` on hangup
    /// or a non-timeout I/O error.
    pub fn read(&mut self, timeout_ms: u64, buf: &mut Vec<u8>, read_all: bool) -> bool {
        let to = Some(Duration::from_millis(timeout_ms.max(1)));
        if self.underlying().set_read_timeout(to).is_err() {
            return false;
        }
        let mut total = 0usize;
        loop {
            let mut chunk = [0u8; 8192];
            let read_result = match self {
                FramedSocket::Plain(s) => s.read(&mut chunk),
                FramedSocket::TlsClient(s) => s.read(&mut chunk),
                FramedSocket::TlsServer(s) => s.read(&mut chunk),
            };
            match read_result {
                Ok(0) => return total > 0,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    total += n;
                    if !read_all || total >= READ_ALL_CAP {
                        return true;
                    }
                    // keep draining without waiting again
                    continue;
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return true;
                }
                Err(_) => return false,
            }
        }
    }

    /// Write all bytes, retrying on partial writes.
    pub fn write(&mut self, bytes: &[u8]) -> bool {
        let write_result = match self {
            FramedSocket::Plain(s) => s.write_all(bytes),
            FramedSocket::TlsClient(s) => s.write_all(bytes),
            FramedSocket::TlsServer(s) => s.write_all(bytes),
        };
        write_result.is_ok()
    }

    pub fn peer_ip_and_port(&self) -> Option<(String, u16)> {
        self.underlying()
            .peer_addr()
            .ok()
            .map(|addr: SocketAddr| (addr.ip().to_string(), addr.port()))
    }

    /// Best-effort shutdown: TLS close-notify where applicable, then close the socket.
    pub fn shutdown(&mut self) {
        match self {
            FramedSocket::Plain(s) => {
                let _ = s.shutdown(std::net::Shutdown::Both);
            }
            FramedSocket::TlsClient(s) => {
                let _ = s.conn.send_close_notify();
                let _ = s.flush();
                let _ = s.sock.shutdown(std::net::Shutdown::Both);
            }
            FramedSocket::TlsServer(s) => {
                let _ = s.conn.send_close_notify();
                let _ = s.flush();
                let _ = s.sock.shutdown(std::net::Shutdown::Both);
            }
        }
    }
}
