//! Throughput measurement without reloads.
//!
//! Records are decoded up front so the clock only covers engine work. Every
//! record is then processed once per iteration, either on a fixed pool or one
//! thread per record, and a single property is read from each result.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Instant;

use crossbeam_channel::unbounded;
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{HsvError, Result};
use crate::engine::Engine;
use crate::records::record::Record;
use crate::records::source::RecordSource;

/// Per-record threads are joined in batches of this size.
const PER_RECORD_BATCH: usize = 256;

#[derive(Debug, Clone)]
pub struct PerfOptions {
    pub iterations: usize,
    /// Worker count. 0 spawns one thread per record.
    pub parallelism: usize,
    pub property: String,
    pub match_value: String,
    pub value_separator: String,
}

impl From<&Config> for PerfOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            iterations: cfg.harness.iterations,
            parallelism: cfg.harness.parallelism,
            property: cfg.perf.property.clone(),
            match_value: cfg.perf.match_value.clone(),
            value_separator: cfg.harness.value_separator.clone(),
        }
    }
}

/// Outcome of one measurement.
#[derive(Debug, Clone, Serialize)]
pub struct PerfReport {
    /// Records per pass.
    pub records: u64,
    pub iterations: usize,
    /// `records x iterations`.
    pub total: u64,
    pub processed: u64,
    pub property: String,
    /// Results whose property equalled the match value.
    pub matched: u64,
    pub elapsed_ms: f64,
    pub ms_per_record: f64,
    pub detections_per_second: f64,
    pub cpus: usize,
}

impl PerfReport {
    /// Plain-text report, one metric per line.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Average {:.5} ms per Evidence Record", self.ms_per_record);
        let _ = writeln!(
            out,
            "Average {:.2} detections per second",
            self.detections_per_second
        );
        let _ = writeln!(out, "Total Evidence Records: {}", self.total);
        let _ = writeln!(out, "{} Evidence Records: {}", self.property, self.matched);
        let _ = writeln!(out, "Processed Evidence Records: {}", self.processed);
        let _ = writeln!(out, "Number of CPUs: {}", self.cpus);
        out
    }

    /// Write [`Self::render_text`] to `path`, replacing any previous report.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| HsvError::io(parent, source))?;
        }
        fs::write(path, self.render_text()).map_err(|source| HsvError::io(path, source))
    }
}

/// Counters shared by every worker of one measurement.
struct Tally<'a> {
    engine: &'a dyn Engine,
    options: &'a PerfOptions,
    processed: AtomicU64,
    matched: AtomicU64,
    aborted: AtomicBool,
    first_error: Mutex<Option<HsvError>>,
}

impl Tally<'_> {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn fail(&self, err: HsvError) {
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
        self.aborted.store(true, Ordering::Release);
    }

    fn run(&self, iteration: usize, ordinal: usize, record: &Record) {
        if self.is_aborted() {
            return;
        }
        match self.classify(record) {
            Ok(hit) => {
                self.processed.fetch_add(1, Ordering::AcqRel);
                if hit {
                    self.matched.fetch_add(1, Ordering::AcqRel);
                }
            }
            Err(err) => self.fail(HsvError::Engine {
                iteration,
                record: ordinal as u64,
                details: err.to_string(),
            }),
        }
    }

    fn classify(&self, record: &Record) -> Result<bool> {
        let results = self.engine.process(record)?;
        let value = results.values_string(&self.options.property, &self.options.value_separator);
        results.release();
        Ok(value? == self.options.match_value)
    }
}

/// Process every record `options.iterations` times and time it.
///
/// Fails on the first engine error, and when the processed count does not
/// reach `records x iterations`.
pub fn measure(
    engine: &dyn Engine,
    source: &RecordSource,
    options: &PerfOptions,
) -> Result<PerfReport> {
    if options.iterations == 0 {
        return Err(HsvError::InvalidConfig {
            details: "iterations must be >= 1".to_string(),
        });
    }
    let records: Vec<Record> = source.open()?.collect::<Result<_>>()?;
    let per_pass = records.len() as u64;
    let total = per_pass * options.iterations as u64;

    let tally = Tally {
        engine,
        options,
        processed: AtomicU64::new(0),
        matched: AtomicU64::new(0),
        aborted: AtomicBool::new(false),
        first_error: Mutex::new(None),
    };

    let started = Instant::now();
    thread::scope(|scope| {
        if options.parallelism == 0 {
            per_record(scope, &tally, &records);
        } else {
            pooled(scope, &tally, &records);
        }
    });
    let elapsed = started.elapsed();

    if let Some(err) = tally.first_error.into_inner() {
        return Err(err);
    }
    let processed = tally.processed.into_inner();
    if processed != total {
        return Err(HsvError::Incomplete {
            processed,
            expected: total,
        });
    }

    let elapsed_ms = elapsed.as_secs_f64() * 1_000.0;
    let (ms_per_record, detections_per_second) = if total == 0 || elapsed_ms <= 0.0 {
        (0.0, 0.0)
    } else {
        (elapsed_ms / total as f64, total as f64 / elapsed.as_secs_f64())
    };

    Ok(PerfReport {
        records: per_pass,
        iterations: options.iterations,
        total,
        processed,
        property: options.property.clone(),
        matched: tally.matched.into_inner(),
        elapsed_ms,
        ms_per_record,
        detections_per_second,
        cpus: thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
    })
}

fn per_record<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    tally: &'env Tally<'env>,
    records: &'env [Record],
) {
    let mut batch: Vec<ScopedJoinHandle<'scope, ()>> = Vec::with_capacity(PER_RECORD_BATCH);
    'feed: for iteration in 0..tally.options.iterations {
        for (ordinal, record) in records.iter().enumerate() {
            if tally.is_aborted() {
                break 'feed;
            }
            let spawned = thread::Builder::new()
                .name(format!("hsv-perf-{iteration}-{ordinal}"))
                .spawn_scoped(scope, move || tally.run(iteration, ordinal, record));
            match spawned {
                Ok(handle) => batch.push(handle),
                Err(err) => {
                    tally.fail(spawn_error(&err));
                    break 'feed;
                }
            }
            if batch.len() == PER_RECORD_BATCH {
                join_all(&mut batch, tally);
            }
        }
    }
    join_all(&mut batch, tally);
}

fn pooled<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    tally: &'env Tally<'env>,
    records: &'env [Record],
) {
    let (tx, rx) = unbounded::<(usize, usize)>();
    let mut workers = Vec::with_capacity(tally.options.parallelism);
    for idx in 0..tally.options.parallelism {
        let rx = rx.clone();
        let spawned = thread::Builder::new()
            .name(format!("hsv-perf-{idx}"))
            .spawn_scoped(scope, move || {
                while let Ok((iteration, ordinal)) = rx.recv() {
                    if let Some(record) = records.get(ordinal) {
                        tally.run(iteration, ordinal, record);
                    }
                }
            });
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(err) => {
                tally.fail(spawn_error(&err));
                break;
            }
        }
    }

    'feed: for iteration in 0..tally.options.iterations {
        for ordinal in 0..records.len() {
            if tally.is_aborted() || tx.send((iteration, ordinal)).is_err() {
                break 'feed;
            }
        }
    }
    drop(tx);
    join_all(&mut workers, tally);
}

fn join_all(handles: &mut Vec<ScopedJoinHandle<'_, ()>>, tally: &Tally<'_>) {
    for handle in handles.drain(..) {
        if handle.join().is_err() {
            tally.fail(HsvError::Runtime {
                details: "perf worker thread panicked".to_string(),
            });
        }
    }
}

fn spawn_error(err: &std::io::Error) -> HsvError {
    HsvError::Runtime {
        details: format!("failed to spawn perf thread: {err}"),
    }
}
