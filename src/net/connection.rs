//! Connection (C2): inbound framing state machine + outbound FIFO over one FramedSocket.
//!
//! Mirrors the teacher's read-loop shape (poll with a short timeout, accumulate into a
//! buffer, act on what's complete) but generalized from raw audio chunks to framed
//! `Packet`s with a Header preamble (spec §4.2).

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::{Result, TemStreamError};
use crate::message::codec::{self, Header, HEADER_LEN};
use crate::message::Packet;
use crate::net::framed_socket::FramedSocket;

/// Default cap matching spec.md §6.4's `--max-message-size` default of 1 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 1024 * 1024;

enum ReadState {
    AwaitingHeader,
    AwaitingBody(u64),
}

pub struct Connection {
    socket: FramedSocket,
    inbound: Vec<u8>,
    state: ReadState,
    outbound: Mutex<VecDeque<Vec<u8>>>,
    pub max_message_size: u64,
    opened: std::sync::atomic::AtomicBool,
}

impl Connection {
    pub fn new(socket: FramedSocket) -> Self {
        Self {
            socket,
            inbound: Vec::new(),
            state: ReadState::AwaitingHeader,
            outbound: Mutex::new(VecDeque::new()),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            opened: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn with_max_message_size(mut self, max: u64) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn peer_ip_and_port(&self) -> Option<(String, u16)> {
        self.socket.peer_ip_and_port()
    }

    /// Queue a packet for sending; does not block on the socket. `flush` performs the
    /// actual write, so a burst of `send_packet` calls coalesces into fewer syscalls.
    pub fn send_packet(&self, packet: &Packet) -> Result<()> {
        let body = codec::encode_packet(packet)?;
        if body.len() as u64 > self.max_message_size {
            return Err(TemStreamError::Resource(format!(
                "encoded packet {} bytes exceeds max {}",
                body.len(),
                self.max_message_size
            )));
        }
        let header = Header::new(body.len() as u64);
        let mut framed = Vec::with_capacity(HEADER_LEN + body.len());
        framed.extend_from_slice(&header.encode());
        framed.extend_from_slice(&body);
        self.outbound.lock().push_back(framed);
        Ok(())
    }

    /// Drain and write everything queued by `send_packet`. Returns `false` on a fatal
    /// write error, at which point the connection should be torn down.
    pub fn flush(&mut self) -> bool {
        let pending: Vec<Vec<u8>> = {
            let mut q = self.outbound.lock();
            q.drain(..).collect()
        };
        for frame in pending {
            if !self.socket.write(&frame) {
                self.opened.store(false, std::sync::atomic::Ordering::Relaxed);
                return false;
            }
        }
        true
    }

    /// Poll the socket for up to `timeout_ms`, accumulate bytes, and hand back every
    /// fully-received `Packet`. Returns `false` when the connection has hung up or hit a
    /// fatal transport/protocol error and must be closed; callers must stop polling it.
    pub fn read_and_handle(&mut self, timeout_ms: u64, out: &mut Vec<Packet>) -> bool {
        if !self.socket.read(timeout_ms, &mut self.inbound, true) {
            self.opened.store(false, std::sync::atomic::Ordering::Relaxed);
            return false;
        }
        loop {
            match self.state {
                ReadState::AwaitingHeader => {
                    if self.inbound.len() < HEADER_LEN {
                        return true;
                    }
                    let header = match Header::decode(&self.inbound[..HEADER_LEN]) {
                        Ok(h) => h,
                        Err(_) => {
                            self.opened.store(false, std::sync::atomic::Ordering::Relaxed);
                            return false;
                        }
                    };
                    if header.size > self.max_message_size {
                        self.opened.store(false, std::sync::atomic::Ordering::Relaxed);
                        return false;
                    }
                    self.inbound.drain(..HEADER_LEN);
                    self.state = ReadState::AwaitingBody(header.size);
                }
                ReadState::AwaitingBody(size) => {
                    let size = size as usize;
                    if self.inbound.len() < size {
                        return true;
                    }
                    let body: Vec<u8> = self.inbound.drain(..size).collect();
                    match codec::decode_packet(&body) {
                        Ok(packet) => out.push(packet),
                        Err(_) => {
                            self.opened.store(false, std::sync::atomic::Ordering::Relaxed);
                            return false;
                        }
                    }
                    self.state = ReadState::AwaitingHeader;
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.opened.store(false, std::sync::atomic::Ordering::Relaxed);
        self.socket.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, Source};
    use crate::message::{Chat, Payload};
    use std::net::{TcpListener, TcpStream};

    fn pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (
            Connection::new(FramedSocket::Plain(client)),
            Connection::new(FramedSocket::Plain(server)),
        )
    }

    #[test]
    fn send_and_receive_round_trips() {
        let (mut a, mut b) = pair();
        let packet = Packet {
            source: Source::new(Address::new("h", 1), "s"),
            payload: Payload::Chat(Chat {
                author: "x".into(),
                message: "hello".into(),
                timestamp_ms: 1,
            }),
        };
        a.send_packet(&packet).unwrap();
        assert!(a.flush());

        let mut received = Vec::new();
        for _ in 0..50 {
            if !b.read_and_handle(20, &mut received) {
                break;
            }
            if !received.is_empty() {
                break;
            }
        }
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], packet);
    }

    #[test]
    fn oversized_packet_is_rejected_before_send() {
        let (a, _b) = pair();
        let a = a.with_max_message_size(4);
        let packet = Packet {
            source: Source::new(Address::new("h", 1), "s"),
            payload: Payload::Text("this is far too long".into()),
        };
        assert!(a.send_packet(&packet).is_err());
    }
}
