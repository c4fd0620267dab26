//! Replay log (spec §4.4): an append-only text file of `timestampMs:base64(packet)\n`
//! lines, one per recorded packet, in the same shape the original server writes with
//! `storeClientMessage`/`handleReplayMessage`.
//!
//! GetReplay{ts} semantics (resolved against `replay.c`'s `handleReplayMessage`): return
//! every record whose timestamp equals `ts`, not just the first. The file is assumed
//! sorted by timestamp since records are only ever appended as time advances; the scan
//! skips `t < ts`, collects `t == ts`, and stops at the first `t > ts`.

use std::io::{BufRead, Write};
use std::path::Path;

use base64::Engine;

use crate::error::{Result, TemStreamError};
use crate::message::TimeRange;

const ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

pub fn append(path: &Path, timestamp_ms: i64, encoded_packet: &[u8]) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| TemStreamError::Resource(format!("opening replay log {path:?}: {e}")))?;
    let encoded = ENGINE.encode(encoded_packet);
    writeln!(file, "{timestamp_ms}:{encoded}")
        .map_err(|e| TemStreamError::Resource(format!("writing replay log {path:?}: {e}")))
}

fn parse_line(line: &str) -> Option<(i64, &str)> {
    let (ts, rest) = line.split_once(':')?;
    let ts: i64 = ts.parse().ok()?;
    Some((ts, rest))
}

/// First and last recorded timestamps, or `None` if the log doesn't exist or is empty.
pub fn time_range(path: &Path) -> Result<Option<TimeRange>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TemStreamError::Resource(format!("reading replay log {path:?}: {e}"))),
    };
    let reader = std::io::BufReader::new(file);
    let mut first = None;
    let mut last = None;
    for line in reader.lines() {
        let line = line.map_err(|e| TemStreamError::Resource(format!("reading replay log: {e}")))?;
        if let Some((ts, _)) = parse_line(&line) {
            first.get_or_insert(ts);
            last = Some(ts);
        }
    }
    match (first, last) {
        (Some(first_ms), Some(last_ms)) => Ok(Some(TimeRange { first_ms, last_ms })),
        _ => Ok(None),
    }
}

/// All recorded packets with timestamp exactly `ts`, decoded from base64 back to their
/// originally encoded `Packet` bytes.
pub fn replay_at(path: &Path, ts: i64) -> Result<Vec<Vec<u8>>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(TemStreamError::Resource(format!("reading replay log {path:?}: {e}"))),
    };
    let reader = std::io::BufReader::new(file);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| TemStreamError::Resource(format!("reading replay log: {e}")))?;
        let Some((line_ts, encoded)) = parse_line(&line) else {
            continue;
        };
        if line_ts < ts {
            continue;
        }
        if line_ts > ts {
            break;
        }
        if let Ok(bytes) = ENGINE.decode(encoded) {
            out.push(bytes);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("temstream-replay-test-{name}-{}", std::process::id()))
    }

    #[test]
    fn replay_returns_every_record_at_the_same_timestamp() {
        let path = tmp("multi");
        std::fs::remove_file(&path).ok();
        append(&path, 10, b"a").unwrap();
        append(&path, 20, b"b").unwrap();
        append(&path, 20, b"c").unwrap();
        append(&path, 30, b"d").unwrap();

        let at20 = replay_at(&path, 20).unwrap();
        assert_eq!(at20, vec![b"b".to_vec(), b"c".to_vec()]);

        let range = time_range(&path).unwrap().unwrap();
        assert_eq!(range.first_ms, 10);
        assert_eq!(range.last_ms, 30);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_log_yields_empty_results() {
        let path = tmp("missing");
        std::fs::remove_file(&path).ok();
        assert_eq!(replay_at(&path, 1).unwrap(), Vec::<Vec<u8>>::new());
        assert_eq!(time_range(&path).unwrap(), None);
    }
}
