use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use chanlayer::LayerStats;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::common::elapsed_s;

/// Copy of the event stream, set when `--output-dir` is given.
static EVENT_FILE: OnceLock<Mutex<LineWriter<File>>> = OnceLock::new();

/// Start copying events into `<dir>/<name>-<mode>-<UTC stamp>.jsonl`.
///
/// Refuses to overwrite an existing file.
pub fn record_to(dir: &Path, name: &str, mode: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let path = dir.join(format!("{name}-{mode}-{stamp}.jsonl"));

    let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
    EVENT_FILE
        .set(Mutex::new(LineWriter::new(file)))
        .map_err(|_| io::Error::new(io::ErrorKind::AlreadyExists, "event file already open"))?;
    Ok(path)
}

/// Print one event as a JSON line on stdout, and to the event file if any.
pub fn emit<T: Serialize>(event: &T) {
    let Ok(line) = serde_json::to_string(event) else {
        return;
    };

    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
    let _ = stdout.flush();

    if let Some(Ok(mut file)) = EVENT_FILE.get().map(Mutex::lock) {
        let _ = writeln!(file, "{line}");
    }
}

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub name: String,
    pub endpoint: String,
    pub mode: String,
    pub timestamp: String,
}

impl EventStarted {
    pub fn new(name: &str, endpoint: &str, mode: &str) -> Self {
        Self {
            event: "started",
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            mode: mode.to_string(),
            timestamp: timestamp(),
        }
    }
}

// ── Fan-out result ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventFanoutResult {
    pub event: &'static str,
    pub channels: usize,
    pub messages_sent: u32,
    /// Copies received across all channels.
    pub copies_received: u64,
    /// Copies that would have arrived with nothing dropped.
    pub copies_expected: u64,
    pub per_channel_min: u64,
    pub per_channel_max: u64,
    pub payload_size: usize,
    pub elapsed_ms: f64,
    pub copies_per_sec: f64,
    pub elapsed_s: f64,
}

// ── Burst result ────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventBurstResult {
    pub event: &'static str,
    pub round: u32,
    /// "direct" or "group".
    pub path: &'static str,
    pub attempted: u32,
    /// Calls that returned an error.
    pub rejected: u32,
    /// Messages the consumer drained afterwards.
    pub received: u32,
    pub payload_size: usize,
    pub send_ms: f64,
    pub sends_per_sec: f64,
    pub elapsed_s: f64,
}

// ── Layer counters ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStats {
    pub event: &'static str,
    #[serde(flatten)]
    pub stats: LayerStats,
    pub elapsed_s: f64,
}

impl EventStats {
    pub fn new(stats: LayerStats, start: Instant) -> Self {
        Self {
            event: "stats",
            stats,
            elapsed_s: elapsed_s(start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_rfc3339_utc() {
        let stamp = timestamp();
        assert!(stamp.ends_with('Z'), "{stamp}");
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok(), "{stamp}");
    }

    #[test]
    fn stats_event_flattens_counters() {
        let event = EventStats::new(LayerStats::default(), Instant::now());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "stats");
        assert_eq!(json["channels"], 0);
        assert_eq!(json["direct"]["dropped"], 0);
    }
}
