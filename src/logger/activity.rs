//! Activity logger: a dedicated thread owns the `JsonlWriter`, every other
//! thread sends `ActivityEvent`s over a bounded crossbeam channel.
//!
//! `send()` uses `try_send()`, so worker threads and the reload driver are never
//! blocked by logging back-pressure; overflow is counted and reported.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{HsvError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

/// Events recorded during a harness run.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    RunStarted {
        records: u64,
        iterations: usize,
        expected_total: u64,
        config_hash: String,
    },
    IterationQueued {
        iteration: usize,
        records: u64,
    },
    ReloadTriggered {
        attempt: u64,
        target: String,
        error_code: Option<String>,
        error_message: Option<String>,
    },
    DatasetReloaded {
        path: String,
        digest: Option<String>,
        error_message: Option<String>,
    },
    HashMismatch {
        iteration: usize,
        baseline: u32,
        hash: u32,
    },
    RunCompleted {
        processed: u64,
        reloads: u64,
        reload_failures: u64,
        common_hash: u32,
        duration_ms: u64,
    },
    Fatal {
        code: String,
        message: String,
        processed: u64,
        expected: u64,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

/// Thread-safe, cheaply-cloneable handle for sending log events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread. Non-blocking.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    /// Total events dropped due to channel back-pressure. Never reset.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Request graceful shutdown. Blocks only until the sentinel is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Handle type accepted by components that log optionally.
pub type MaybeLogger = Option<ActivityLoggerHandle>;

/// Send to an optional logger.
pub fn emit(logger: &MaybeLogger, event: ActivityEvent) {
    if let Some(handle) = logger {
        handle.send(event);
    }
}

/// Spawn the logger thread and return a handle plus its join handle.
pub fn spawn_logger(
    config: JsonlConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(CHANNEL_CAPACITY);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("hsv-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped_clone))
        .map_err(|e| HsvError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);
    let mut reported = 0_u64;

    while let Ok(event) = rx.recv() {
        let total = dropped.load(Ordering::Relaxed);
        if total > reported {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!(
                "{} log events dropped due to back-pressure",
                total - reported
            ));
            jsonl.write_entry(&warn);
            reported = total;
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::RunStarted {
            records,
            iterations,
            expected_total,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::RunStart, Severity::Info);
            e.records = Some(*records);
            e.expected = Some(*expected_total);
            e.details = Some(format!("iterations={iterations} config_hash={config_hash}"));
            e
        }
        ActivityEvent::IterationQueued { iteration, records } => {
            let mut e = LogEntry::new(EventType::IterationQueued, Severity::Info);
            e.iteration = Some(*iteration);
            e.records = Some(*records);
            e
        }
        ActivityEvent::ReloadTriggered {
            attempt,
            target,
            error_code,
            error_message,
        } => {
            let ok = error_code.is_none();
            let severity = if ok { Severity::Info } else { Severity::Warning };
            let mut e = LogEntry::new(EventType::ReloadTrigger, severity);
            e.attempt = Some(*attempt);
            e.path = Some(target.clone());
            e.ok = Some(ok);
            e.error_code.clone_from(error_code);
            e.error_message.clone_from(error_message);
            e
        }
        ActivityEvent::DatasetReloaded {
            path,
            digest,
            error_message,
        } => {
            let ok = error_message.is_none();
            let severity = if ok { Severity::Info } else { Severity::Warning };
            let mut e = LogEntry::new(EventType::DatasetReload, severity);
            e.path = Some(path.clone());
            e.ok = Some(ok);
            e.details = digest.as_ref().map(|d| format!("sha256={d}"));
            e.error_message.clone_from(error_message);
            e
        }
        ActivityEvent::HashMismatch {
            iteration,
            baseline,
            hash,
        } => {
            let mut e = LogEntry::new(EventType::HashMismatch, Severity::Critical);
            e.iteration = Some(*iteration);
            e.hash = Some(*hash);
            e.details = Some(format!("baseline={baseline}"));
            e.ok = Some(false);
            e
        }
        ActivityEvent::RunCompleted {
            processed,
            reloads,
            reload_failures,
            common_hash,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::RunComplete, Severity::Info);
            e.processed = Some(*processed);
            e.hash = Some(*common_hash);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!("reloads={reloads} reload_failures={reload_failures}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::Fatal {
            code,
            message,
            processed,
            expected,
        } => {
            let mut e = LogEntry::new(EventType::Fatal, Severity::Critical);
            e.processed = Some(*processed);
            e.expected = Some(*expected);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::Error, Severity::Info),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn read_events(path: &std::path::Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn events_reach_the_file_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let (handle, join) = spawn_logger(JsonlConfig::new(&path)).unwrap();

        handle.send(ActivityEvent::RunStarted {
            records: 3,
            iterations: 4,
            expected_total: 12,
            config_hash: "abc".to_string(),
        });
        handle.send(ActivityEvent::ReloadTriggered {
            attempt: 1,
            target: "/tmp/data.json".to_string(),
            error_code: Some("HSV-3101".to_string()),
            error_message: Some("busy".to_string()),
        });
        handle.send(ActivityEvent::RunCompleted {
            processed: 12,
            reloads: 0,
            reload_failures: 1,
            common_hash: 42,
            duration_ms: 5,
        });
        handle.shutdown();
        join.join().unwrap();

        let events = read_events(&path);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["event"], "run_start");
        assert_eq!(events[0]["expected"], 12);
        assert_eq!(events[1]["event"], "reload_trigger");
        assert_eq!(events[1]["severity"], "warning");
        assert_eq!(events[1]["ok"], false);
        assert_eq!(events[2]["event"], "run_complete");
        assert_eq!(events[2]["hash"], 42);
    }

    #[test]
    fn dropping_all_handles_stops_the_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let (handle, join) = spawn_logger(JsonlConfig::new(&path)).unwrap();
        handle.send(ActivityEvent::IterationQueued {
            iteration: 0,
            records: 3,
        });
        drop(handle);
        join.join().unwrap();
        let events = read_events(&path);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["iteration"], 0);
    }

    #[test]
    fn dropped_count_is_reported_once_and_never_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let (tx, rx) = bounded::<ActivityEvent>(2);
        let dropped = Arc::new(AtomicU64::new(0));
        let handle = ActivityLoggerHandle {
            tx,
            dropped_events: Arc::clone(&dropped),
        };
        for iteration in 0..4 {
            handle.send(ActivityEvent::IterationQueued {
                iteration,
                records: 1,
            });
        }
        assert_eq!(handle.dropped_events(), 2);

        let config = JsonlConfig::new(&path);
        let join = thread::spawn(move || logger_thread_main(&rx, config, &dropped));
        handle.shutdown();
        join.join().unwrap();

        assert_eq!(handle.dropped_events(), 2);
        let events = read_events(&path);
        let warnings: Vec<&serde_json::Value> =
            events.iter().filter(|e| e["event"] == "error").collect();
        assert_eq!(warnings.len(), 1);
        assert!(
            warnings[0]["details"]
                .as_str()
                .unwrap()
                .starts_with("2 log events dropped")
        );
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn mismatch_is_critical() {
        let entry = event_to_log_entry(&ActivityEvent::HashMismatch {
            iteration: 2,
            baseline: 1,
            hash: 7,
        });
        assert_eq!(entry.severity, Severity::Critical);
        assert_eq!(entry.iteration, Some(2));
        assert_eq!(entry.hash, Some(7));
    }

    #[test]
    fn emit_without_logger_is_a_noop() {
        emit(
            &None,
            ActivityEvent::IterationQueued {
                iteration: 0,
                records: 0,
            },
        );
    }
}
