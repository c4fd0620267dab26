//! 16-byte GUID used as the fixed frame magic (spec §3, §9).
//!
//! The magic must be identical across platforms and builds, so it is a compile-time
//! constant byte array, never derived from `std::hash` (which is process-seeded).

use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guid(pub [u8; 16]);

/// Fixed magic identifying a valid TemStream frame header.
pub const MAGIC: Guid = Guid([
    0x54, 0x65, 0x6d, 0x53, 0x74, 0x72, 0x65, 0x61, 0x6d, 0x21, 0xc0, 0xff, 0xee, 0xba, 0xbe, 0x01,
]);

impl Guid {
    /// A random GUID, used only for session/diagnostic identifiers, never the wire magic.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Guid(bytes)
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_is_stable() {
        assert_eq!(MAGIC.0.len(), 16);
        assert_eq!(MAGIC, MAGIC);
    }

    #[test]
    fn random_guids_differ() {
        assert_ne!(Guid::random(), Guid::random());
    }
}
