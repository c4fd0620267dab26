//! Address and Source value types (spec §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identifies a stream: a server address plus the name that server announced itself with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub address: Address,
    pub server_name: String,
}

impl Source {
    pub fn new(address: Address, server_name: impl Into<String>) -> Self {
        Self { address, server_name: server_name.into() }
    }

    /// An empty Source has an empty server name; used as a sentinel before a server
    /// stamps a packet with its identity.
    pub fn empty() -> Self {
        Self { address: Address::new("", 0), server_name: String::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.server_name.is_empty()
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.server_name, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_has_empty_name() {
        assert!(Source::empty().is_empty());
        let s = Source::new(Address::new("h", 1), "x");
        assert!(!s.is_empty());
    }

    #[test]
    fn address_equality_is_structural() {
        assert_eq!(Address::new("a", 1), Address::new("a", 1));
        assert_ne!(Address::new("a", 1), Address::new("a", 2));
    }
}
