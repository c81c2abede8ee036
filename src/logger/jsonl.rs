//! Run log as JSON lines: one event object per line, appended to a file.
//!
//! When the file cannot be opened or a write to it fails, events go to stderr
//! prefixed with `[HSV-JSONL]`; if stderr fails too they are dropped.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HsvError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Log event types emitted during a harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStart,
    IterationQueued,
    ReloadTrigger,
    DatasetReload,
    HashMismatch,
    RunComplete,
    Fatal,
    Error,
}

/// A single JSONL log entry. All fields are optional except `ts`, `event`, `severity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<u32>,
    /// Reload attempt ordinal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// HSV error code if the action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            iteration: None,
            records: None,
            processed: None,
            expected: None,
            hash: None,
            attempt: None,
            path: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

/// Where lines currently go. Only ever moves down the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    File,
    Stderr,
    Discard,
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Minimum seconds between `sync_data` calls while writing.
    pub fsync_interval_secs: u64,
}

impl JsonlConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fsync_interval_secs: 10,
        }
    }
}

/// Run log writer. Logging trouble never surfaces as a run error.
pub struct JsonlWriter {
    config: JsonlConfig,
    file: Option<BufWriter<File>>,
    sink: Sink,
    synced_at: Instant,
}

impl JsonlWriter {
    /// Open (creating parents) the log file; falls back to stderr when that fails.
    pub fn open(config: JsonlConfig) -> Self {
        let (file, sink) = match open_append(&config.path) {
            Ok(file) => (Some(BufWriter::new(file)), Sink::File),
            Err(err) => {
                eprintln!("[HSV-JSONL] {err}; writing events to stderr");
                (None, Sink::Stderr)
            }
        };
        Self {
            config,
            file,
            sink,
            synced_at: Instant::now(),
        }
    }

    /// Append one entry as a single line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(err) => eprintln!("[HSV-JSONL] cannot encode {:?} event: {err}", entry.event),
        }
    }

    pub fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
            let _ = file.get_ref().sync_data();
        }
        self.synced_at = Instant::now();
    }

    /// `file`, `stderr` or `discard`.
    pub fn state(&self) -> &'static str {
        match self.sink {
            Sink::File => "file",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    fn write_line(&mut self, line: &str) {
        if self.sink == Sink::File {
            let written = self
                .file
                .as_mut()
                .is_some_and(|file| file.write_all(line.as_bytes()).is_ok());
            if written {
                if self.synced_at.elapsed() >= Duration::from_secs(self.config.fsync_interval_secs) {
                    self.fsync();
                }
                return;
            }
            eprintln!(
                "[HSV-JSONL] write to {} failed; writing events to stderr",
                self.config.path.display()
            );
            self.file = None;
            self.sink = Sink::Stderr;
        }
        if self.sink == Sink::Stderr && write!(io::stderr(), "[HSV-JSONL] {line}").is_err() {
            self.sink = Sink::Discard;
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| HsvError::io(parent, source))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| HsvError::io(path, source))
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
