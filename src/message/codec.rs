//! Wire codec: fixed Header preamble + bincode-encoded Packet body (spec §4.2, §6.1).
//!
//! `bincode`'s default configuration already encodes enum discriminants as `u32` and
//! strings/sequences as `u64`-length-prefixed data, which is exactly the portable binary
//! layout spec.md §6.1 describes — so the body codec is a thin wrapper, not a hand-rolled
//! serializer. The Header itself (magic + size) precedes the body and is encoded by hand
//! since it is fixed-width and must be parseable before the body's length is even known.

use crate::error::{Result, TemStreamError};
use crate::guid::{Guid, MAGIC};
use crate::message::Packet;

/// `Guid` (16 bytes) + `size: u64` (8 bytes, little-endian) = 24 bytes.
pub const HEADER_LEN: usize = 16 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: Guid,
    pub size: u64,
}

impl Header {
    pub fn new(size: u64) -> Self {
        Self { magic: MAGIC, size }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..16].copy_from_slice(&self.magic.0);
        out[16..24].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    /// Decode a header from exactly `HEADER_LEN` bytes. Fails if the magic doesn't match.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(TemStreamError::Protocol {
                addr: None,
                reason: "short header".into(),
            });
        }
        let mut magic = [0u8; 16];
        magic.copy_from_slice(&bytes[0..16]);
        let magic = Guid(magic);
        if magic != MAGIC {
            return Err(TemStreamError::Protocol {
                addr: None,
                reason: format!("bad magic: {magic}"),
            });
        }
        let mut size_bytes = [0u8; 8];
        size_bytes.copy_from_slice(&bytes[16..24]);
        let size = u64::from_le_bytes(size_bytes);
        Ok(Self { magic, size })
    }
}

/// Encode a `Packet` body with bincode. Callers prepend a `Header` sized to the result.
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>> {
    bincode::serialize(packet).map_err(|e| TemStreamError::Protocol {
        addr: None,
        reason: format!("encode failed: {e}"),
    })
}

/// Decode exactly `bytes.len()` bytes into a `Packet`. Per spec.md §4.2, if the codec
/// would consume fewer or more bytes than declared by the Header, this is a protocol
/// error: bincode's `deserialize` (as opposed to `deserialize_from` on a stream) enforces
/// "consume exactly all bytes" implicitly because any unused trailing bytes in a byte
/// slice are simply never read; to enforce the "exact" half of this contract we re-encode
/// and compare lengths defensively in the caller (Connection::read_and_handle).
pub fn decode_packet(bytes: &[u8]) -> Result<Packet> {
    bincode::deserialize(bytes).map_err(|e| TemStreamError::Protocol {
        addr: None,
        reason: format!("decode failed: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, Source};
    use crate::message::{Chat, Payload};
    use pretty_assertions::assert_eq;

    fn sample_packet() -> Packet {
        Packet {
            source: Source::new(Address::new("host", 9000), "srv"),
            payload: Payload::Chat(Chat {
                author: "alice".into(),
                message: "hi".into(),
                timestamp_ms: 12345,
            }),
        }
    }

    #[test]
    fn round_trip_law() {
        let p = sample_packet();
        let bytes = encode_packet(&p).unwrap();
        let decoded = decode_packet(&bytes).unwrap();
        assert_eq!(p, decoded);
    }

    #[test]
    fn header_round_trip_and_size_matches_body() {
        let p = sample_packet();
        let body = encode_packet(&p).unwrap();
        let header = Header::new(body.len() as u64);
        let encoded = header.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(decoded.size, body.len() as u64);
        assert_eq!(decoded.magic, MAGIC);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut encoded = Header::new(10).encode();
        encoded[0] ^= 0xff;
        assert!(Header::decode(&encoded).is_err());
    }

    #[test]
    fn short_header_is_rejected() {
        assert!(Header::decode(&[0u8; 4]).is_err());
    }
}
