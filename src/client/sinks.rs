//! Sink seam for the demultiplexer (C7). Codec/audio-device/GUI internals are out of
//! scope, so these are thin object-safe traits; `LoggingSink` is the default
//! implementation so the crate runs end-to-end without cpal/OpenH264/SDL.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::address::Source;
use crate::message::{Frame, Payload};

pub trait AudioSink: Send + Sync {
    fn on_audio(&self, source: &Source, bytes: &[u8]);
}

pub trait VideoDecoder: Send + Sync {
    fn on_frame(&self, source: &Source, frame: &Frame) -> crate::error::Result<()>;
}

pub trait StreamDisplay: Send + Sync {
    fn on_payload(&self, source: &Source, payload: &Payload);
}

pub struct LoggingSink;

impl AudioSink for LoggingSink {
    fn on_audio(&self, source: &Source, bytes: &[u8]) {
        log::debug!("audio: {} bytes from {source}", bytes.len());
    }
}

impl VideoDecoder for LoggingSink {
    fn on_frame(&self, source: &Source, frame: &Frame) -> crate::error::Result<()> {
        log::debug!("frame {}x{} from {source}", frame.width, frame.height);
        Ok(())
    }
}

impl StreamDisplay for LoggingSink {
    fn on_payload(&self, source: &Source, payload: &Payload) {
        log::debug!("payload {payload:?} from {source}");
    }
}

/// The `LoggingSink` has no state, so one instance can back every source; callers that
/// don't have a real display/decoder wired up reuse this rather than allocating one.
pub static DEFAULT_SINK: Lazy<Arc<LoggingSink>> = Lazy::new(|| Arc::new(LoggingSink));
