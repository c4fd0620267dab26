//! LargeFile chunking envelope and Video payload (spec §3, §6.1).

use serde::{Deserialize, Serialize};

/// Sender-driven chunking envelope for payloads bigger than one wire frame.
///
/// Wire tags (spec §6.1): 0 = End, 1 = Start(totalSize), 2 = Chunk(bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LargeFile {
    End,
    Start(u64),
    Chunk(Vec<u8>),
}

/// One encoded video frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub width: u16,
    pub height: u16,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Video {
    Frame(Frame),
    LargeFile(LargeFile),
}
