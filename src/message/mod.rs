//! The Payload sum type and everything it is built from (spec §3, §6).

mod video;
pub mod codec;

pub use video::{Frame, LargeFile, Video};

use std::collections::HashSet;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::address::Source;

/// Which payload variant a server of this type propagates (spec §6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum ServerType {
    Link,
    Text,
    Chat,
    Image,
    Audio,
    Video,
}

impl ServerType {
    /// True iff `payload`'s variant is the stream payload this server type carries.
    pub fn accepts(self, payload: &Payload) -> bool {
        matches!(
            (self, payload),
            (ServerType::Text, Payload::Text(_))
                | (ServerType::Chat, Payload::Chat(_))
                | (ServerType::Image, Payload::Image(_))
                | (ServerType::Audio, Payload::Audio(_))
                | (ServerType::Video, Payload::Video(_))
                | (ServerType::Link, Payload::ServerLinks(_))
        )
    }
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

bitflags! {
    /// Owner implies every other flag (spec §3); callers should use the `has_*` helpers
    /// below rather than testing bits directly so that implication is never forgotten.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PeerFlags: u32 {
        const WRITE_ACCESS = 1 << 0;
        const REPLAY_ACCESS = 1 << 1;
        const MODERATOR = 1 << 2;
        const OWNER = 1 << 3;
    }
}

impl PeerFlags {
    pub fn has_write_access(self) -> bool {
        self.contains(Self::OWNER) || self.contains(Self::WRITE_ACCESS)
    }

    pub fn has_replay_access(self) -> bool {
        self.contains(Self::OWNER) || self.contains(Self::REPLAY_ACCESS)
    }

    pub fn is_moderator(self) -> bool {
        self.contains(Self::OWNER) || self.contains(Self::MODERATOR)
    }

    pub fn is_owner(self) -> bool {
        self.contains(Self::OWNER)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInformation {
    pub name: String,
    pub flags: PeerFlags,
}

/// Credentials presented by a client during the handshake (spec §3, §6.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credentials {
    Token(String),
    UserPass(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyLogin {
    pub server_name: String,
    pub peer_information: PeerInformation,
    pub server_type: ServerType,
    pub send_rate_secs: u32,
}

/// A named set plus a polarity flag: if `ban_list`, members are denied; else members are
/// the only ones allowed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Access {
    pub members: HashSet<String>,
    pub ban_list: bool,
}

impl Access {
    pub fn new(ban_list: bool) -> Self {
        Self { members: HashSet::new(), ban_list }
    }

    /// True if `username` is denied access under this list's polarity.
    pub fn is_banned(&self, username: &str) -> bool {
        if self.ban_list {
            self.members.contains(username)
        } else {
            !self.members.contains(username)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub author: String,
    pub message: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLink {
    pub address: crate::address::Address,
    pub name: String,
    pub server_type: ServerType,
}

pub type ServerLinks = Vec<ServerLink>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub large_file: LargeFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audio {
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestServerInformation;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerInformation {
    pub peers: Vec<PeerInformation>,
    pub ban_list: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanUser {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetReplay {
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replay {
    /// The encoded `Packet` as it was originally recorded.
    pub encoded_packet: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoReplay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub first_ms: i64,
    pub last_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTimeRange;

/// The tagged union carried by every `Packet` (spec §3, §6.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Empty,
    Credentials(Credentials),
    VerifyLogin(VerifyLogin),
    Text(String),
    Chat(Chat),
    ServerLinks(ServerLinks),
    Image(Image),
    Video(Video),
    Audio(Audio),
    RequestServerInformation(RequestServerInformation),
    ServerInformation(ServerInformation),
    BanUser(BanUser),
    GetReplay(GetReplay),
    Replay(Replay),
    NoReplay(NoReplay),
    TimeRange(TimeRange),
    GetTimeRange(GetTimeRange),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub payload: Payload,
    pub source: Source,
}

/// A packet appended to a server's replay log, if recording is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedPacket {
    pub packet: Packet,
    pub timestamp_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_implies_all_flags() {
        let f = PeerFlags::OWNER;
        assert!(f.has_write_access());
        assert!(f.has_replay_access());
        assert!(f.is_moderator());
    }

    #[test]
    fn plain_flags_do_not_imply_others() {
        let f = PeerFlags::WRITE_ACCESS;
        assert!(f.has_write_access());
        assert!(!f.has_replay_access());
        assert!(!f.is_moderator());
    }

    #[test]
    fn banlist_denies_members() {
        let mut a = Access::new(true);
        a.members.insert("x".into());
        assert!(a.is_banned("x"));
        assert!(!a.is_banned("y"));
    }

    #[test]
    fn allowlist_denies_nonmembers() {
        let mut a = Access::new(false);
        a.members.insert("x".into());
        assert!(!a.is_banned("x"));
        assert!(a.is_banned("y"));
    }

    #[test]
    fn server_type_accepts_only_its_own_variant() {
        assert!(ServerType::Chat.accepts(&Payload::Chat(Chat {
            author: "a".into(),
            message: "m".into(),
            timestamp_ms: 0
        })));
        assert!(!ServerType::Chat.accepts(&Payload::Audio(Audio { bytes: vec![] })));
        // Control messages are never gated by ServerType::accepts; callers check for
        // them separately before calling accepts.
        assert!(!ServerType::Chat.accepts(&Payload::GetTimeRange(GetTimeRange)));
    }
}
