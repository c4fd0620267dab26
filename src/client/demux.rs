//! StreamDemultiplexer (C7): fans incoming packets out to per-source sinks.
//!
//! Four process-wide maps keyed by `Source` (spec §4.6): `audio_sinks`, `video_decoders`,
//! `stream_displays`, plus scratch `pending_video_files`/`pending_image_files`
//! accumulators for `LargeFile` reassembly (both Video and Image payloads carry the same
//! chunking envelope, spec §3/§8 scenario 4). Housekeeping drops entries whose Connection
//! has gone away; the inbound queue is bounded and drops the oldest entry on overflow
//! rather than blocking.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::address::Source;
use crate::client::sinks::{AudioSink, StreamDisplay, VideoDecoder};
use crate::message::{Image, LargeFile, Payload, Video};

/// Default bound on the inbound packet queue (spec §4.6).
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// How long a video decoder may sit unreferenced by any display before housekeeping
/// reclaims it.
const DECODER_IDLE_LIMIT: Duration = Duration::from_secs(1);

struct LargeFileAccumulator {
    expected_len: Option<u64>,
    buffer: Vec<u8>,
}

pub struct StreamDemultiplexer {
    audio_sinks: DashMap<Source, Arc<dyn AudioSink>>,
    video_decoders: DashMap<Source, Arc<dyn VideoDecoder>>,
    video_decoder_last_used: DashMap<Source, Instant>,
    stream_displays: DashMap<Source, Arc<dyn StreamDisplay>>,
    pending_video_files: DashMap<Source, LargeFileAccumulator>,
    pending_image_files: DashMap<Source, LargeFileAccumulator>,
    default_display: Arc<dyn StreamDisplay>,
    queue: Mutex<VecDeque<(Source, Payload)>>,
    capacity: usize,
    dropped: std::sync::atomic::AtomicU64,
}

impl StreamDemultiplexer {
    pub fn new(default_display: Arc<dyn StreamDisplay>) -> Self {
        Self::with_capacity(default_display, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(default_display: Arc<dyn StreamDisplay>, capacity: usize) -> Self {
        Self {
            audio_sinks: DashMap::new(),
            video_decoders: DashMap::new(),
            video_decoder_last_used: DashMap::new(),
            stream_displays: DashMap::new(),
            pending_video_files: DashMap::new(),
            pending_image_files: DashMap::new(),
            default_display,
            queue: Mutex::new(VecDeque::new()),
            capacity,
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn register_audio_sink(&self, source: Source, sink: Arc<dyn AudioSink>) {
        self.audio_sinks.insert(source, sink);
    }

    pub fn register_video_decoder(&self, source: Source, decoder: Arc<dyn VideoDecoder>) {
        self.video_decoders.insert(source.clone(), decoder);
        self.video_decoder_last_used.insert(source, Instant::now());
    }

    pub fn register_stream_display(&self, source: Source, display: Arc<dyn StreamDisplay>) {
        self.stream_displays.insert(source, display);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Enqueue a packet for later dispatch. Never blocks; if the queue is already at
    /// `capacity`, the oldest entry is discarded and the drop count incremented.
    pub fn enqueue(&self, source: Source, payload: Payload) {
        let mut q = self.queue.lock();
        if q.len() >= self.capacity {
            q.pop_front();
            let total = self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
            log::warn!("demultiplexer queue full, dropped packet (total dropped: {total})");
        }
        q.push_back((source, payload));
    }

    /// Dispatch one queued packet, if any. Returns `true` if something was dispatched
    /// (callers loop this from a WorkPool task until it returns `false`).
    pub fn dispatch_one(&self) -> bool {
        let next = self.queue.lock().pop_front();
        match next {
            Some((source, payload)) => {
                self.dispatch(&source, payload);
                true
            }
            None => false,
        }
    }

    fn dispatch(&self, source: &Source, payload: Payload) {
        match payload {
            Payload::Audio(audio) => {
                if let Some(sink) = self.audio_sinks.get(source) {
                    sink.on_audio(source, &audio.bytes);
                }
            }
            Payload::Video(video) => self.dispatch_video(source, video),
            Payload::Image(image) => self.dispatch_image(source, image),
            Payload::ServerInformation(_) => {
                // Attachment to the owning ClientConnection happens one layer up, where
                // the connection for `source` is actually reachable.
            }
            other => {
                let display = self
                    .stream_displays
                    .get(source)
                    .map(|d| Arc::clone(&d))
                    .unwrap_or_else(|| Arc::clone(&self.default_display));
                display.on_payload(source, &other);
            }
        }
    }

    fn dispatch_video(&self, source: &Source, video: Video) {
        match video {
            Video::Frame(frame) => {
                self.video_decoder_last_used.insert(source.clone(), Instant::now());
                if let Some(decoder) = self.video_decoders.get(source) {
                    if let Err(e) = decoder.on_frame(source, &frame) {
                        log::warn!("decode failed for {source}: {e}");
                    }
                }
            }
            Video::LargeFile(LargeFile::Start(size)) => {
                self.pending_video_files.insert(
                    source.clone(),
                    LargeFileAccumulator { expected_len: Some(size), buffer: Vec::new() },
                );
            }
            Video::LargeFile(LargeFile::Chunk(bytes)) => {
                if let Some(mut acc) = self.pending_video_files.get_mut(source) {
                    let remaining = acc
                        .expected_len
                        .map(|n| n.saturating_sub(acc.buffer.len() as u64))
                        .unwrap_or(u64::MAX);
                    let take = (bytes.len() as u64).min(remaining) as usize;
                    acc.buffer.extend_from_slice(&bytes[..take]);
                }
            }
            Video::LargeFile(LargeFile::End) => {
                if let Some((_, acc)) = self.pending_video_files.remove(source) {
                    log::info!(
                        "finished receiving video file from {source} ({} bytes)",
                        acc.buffer.len()
                    );
                }
            }
        }
    }

    /// Reassemble an `Image`'s `LargeFile` envelope the same way `dispatch_video` does
    /// for Video (spec §8 scenario 4): accumulate `Start`/`Chunk` silently, and on `End`
    /// hand the fully reassembled bytes to the per-source `StreamDisplay` as a single
    /// completed chunk so a real sink can decode/render it.
    fn dispatch_image(&self, source: &Source, image: Image) {
        match image.large_file {
            LargeFile::Start(size) => {
                self.pending_image_files.insert(
                    source.clone(),
                    LargeFileAccumulator { expected_len: Some(size), buffer: Vec::new() },
                );
            }
            LargeFile::Chunk(bytes) => {
                if let Some(mut acc) = self.pending_image_files.get_mut(source) {
                    let remaining = acc
                        .expected_len
                        .map(|n| n.saturating_sub(acc.buffer.len() as u64))
                        .unwrap_or(u64::MAX);
                    let take = (bytes.len() as u64).min(remaining) as usize;
                    acc.buffer.extend_from_slice(&bytes[..take]);
                }
            }
            LargeFile::End => {
                if let Some((_, acc)) = self.pending_image_files.remove(source) {
                    log::info!(
                        "finished receiving image from {source} ({} bytes)",
                        acc.buffer.len()
                    );
                    let display = self
                        .stream_displays
                        .get(source)
                        .map(|d| Arc::clone(&d))
                        .unwrap_or_else(|| Arc::clone(&self.default_display));
                    let reassembled = Payload::Image(Image { large_file: LargeFile::Chunk(acc.buffer) });
                    display.on_payload(source, &reassembled);
                }
            }
        }
    }

    /// Drop every map entry for sources whose connection is no longer live, per
    /// `is_live`. Also reclaims video decoders unreferenced for over a second.
    pub fn cleanup_if_dirty(&self, is_live: impl Fn(&Source) -> bool) {
        self.audio_sinks.retain(|source, _| is_live(source));
        self.stream_displays.retain(|source, _| is_live(source));
        self.pending_video_files.retain(|source, _| is_live(source));
        self.pending_image_files.retain(|source, _| is_live(source));

        let now = Instant::now();
        let stale: Vec<Source> = self
            .video_decoder_last_used
            .iter()
            .filter(|entry| !is_live(entry.key()) || now.duration_since(*entry.value()) > DECODER_IDLE_LIMIT)
            .map(|entry| entry.key().clone())
            .collect();
        for source in stale {
            self.video_decoders.remove(&source);
            self.video_decoder_last_used.remove(&source);
        }
    }
}
