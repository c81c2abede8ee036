//! Concurrent dispatcher: re-reads the record source for every iteration and
//! hands each record to a worker, which runs the engine and folds the result.
//!
//! A background feeder thread owns the iteration loop, so iteration `i + 1` is
//! queued before iteration `i`'s records have finished; iterations overlap and
//! no ordering is promised between or within them. Jobs go either to a fixed
//! pool of workers sharing one crossbeam queue, or (parallelism 0) each to a
//! thread of its own.
//!
//! Any engine, decode or I/O failure is fatal: it is recorded in the shared
//! [`RunState`], which raises the abort flag; remaining jobs are drained
//! without being processed.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::core::errors::{HsvError, Result};
use crate::engine::{Engine, ProcessResults};
use crate::harness::state::RunState;
use crate::logger::activity::{ActivityEvent, MaybeLogger, emit};
use crate::records::record::Record;
use crate::records::source::RecordSource;

/// Dispatcher tuning derived from `HarnessConfig`.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub iterations: usize,
    /// Worker count. 0 spawns one thread per record.
    pub parallelism: usize,
    pub value_separator: String,
}

/// One record of one iteration.
struct Job {
    iteration: usize,
    ordinal: u64,
    record: Record,
}

/// Everything a worker needs, shared by reference count.
struct WorkerContext {
    engine: Arc<dyn Engine>,
    state: Arc<RunState>,
    separator: String,
}

pub struct Dispatcher {
    ctx: Arc<WorkerContext>,
    source: RecordSource,
    iterations: usize,
    parallelism: usize,
    logger: MaybeLogger,
}

/// Running dispatch. [`DispatchHandle::join`] is the completion barrier.
pub struct DispatchHandle {
    feeder: thread::JoinHandle<()>,
    done: Receiver<()>,
}

impl DispatchHandle {
    /// Fires (or disconnects) once every worker has exited.
    #[must_use]
    pub fn completion(&self) -> &Receiver<()> {
        &self.done
    }

    /// Wait for the feeder and all workers to finish.
    pub fn join(self) -> Result<()> {
        self.feeder.join().map_err(|_| HsvError::Runtime {
            details: "dispatcher feeder thread panicked".to_string(),
        })
    }
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn Engine>,
        source: RecordSource,
        state: Arc<RunState>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            ctx: Arc::new(WorkerContext {
                engine,
                state,
                separator: options.value_separator,
            }),
            source,
            iterations: options.iterations,
            parallelism: options.parallelism,
            logger: None,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: MaybeLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Start the feeder thread and return immediately.
    pub fn spawn(self) -> Result<DispatchHandle> {
        let (done_tx, done_rx) = bounded::<()>(1);
        let feeder = thread::Builder::new()
            .name("hsv-dispatch".to_string())
            .spawn(move || {
                self.run();
                let _ = done_tx.send(());
            })
            .map_err(|source| HsvError::Runtime {
                details: format!("failed to spawn dispatcher thread: {source}"),
            })?;
        Ok(DispatchHandle {
            feeder,
            done: done_rx,
        })
    }

    fn run(self) {
        let state = Arc::clone(&self.ctx.state);
        let mut sink = match JobSink::start(&self.ctx, self.parallelism) {
            Ok(sink) => sink,
            Err(err) => {
                state.fail(err);
                return;
            }
        };

        for iteration in 0..self.iterations {
            if state.is_aborted() {
                break;
            }
            match self.feed_iteration(iteration, &mut sink) {
                Ok(records) => emit(
                    &self.logger,
                    ActivityEvent::IterationQueued { iteration, records },
                ),
                Err(err) => {
                    state.fail(err);
                    break;
                }
            }
        }

        sink.finish(&state);
    }

    fn feed_iteration(&self, iteration: usize, sink: &mut JobSink) -> Result<u64> {
        let mut queued = 0_u64;
        for record in self.source.open()? {
            let record = record?;
            if self.ctx.state.is_aborted() {
                break;
            }
            sink.submit(
                &self.ctx,
                Job {
                    iteration,
                    ordinal: queued,
                    record,
                },
            )?;
            queued += 1;
        }
        Ok(queued)
    }
}

/// Where jobs go: a shared queue drained by a fixed pool, or one thread each.
enum JobSink {
    Pool {
        tx: Sender<Job>,
        workers: Vec<thread::JoinHandle<()>>,
    },
    PerRecord {
        threads: Vec<thread::JoinHandle<()>>,
    },
}

impl JobSink {
    fn start(ctx: &Arc<WorkerContext>, parallelism: usize) -> Result<Self> {
        if parallelism == 0 {
            return Ok(Self::PerRecord {
                threads: Vec::new(),
            });
        }
        let (tx, rx) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(parallelism);
        for idx in 0..parallelism {
            let ctx = Arc::clone(ctx);
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("hsv-worker-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        run_job(&ctx, job);
                    }
                })
                .map_err(|source| HsvError::Runtime {
                    details: format!("failed to spawn worker thread {idx}: {source}"),
                })?;
            workers.push(handle);
        }
        Ok(Self::Pool { tx, workers })
    }

    fn submit(&mut self, ctx: &Arc<WorkerContext>, job: Job) -> Result<()> {
        match self {
            Self::Pool { tx, .. } => tx.send(job).map_err(|_| HsvError::ChannelClosed {
                component: "dispatcher",
            }),
            Self::PerRecord { threads } => {
                let job_ctx = Arc::clone(ctx);
                let name = format!("hsv-record-{}-{}", job.iteration, job.ordinal);
                let handle = thread::Builder::new()
                    .name(name)
                    .spawn(move || run_job(&job_ctx, job))
                    .map_err(|source| HsvError::Runtime {
                        details: format!("failed to spawn record thread: {source}"),
                    })?;
                threads.push(handle);
                if threads.len() % REAP_EVERY == 0 {
                    reap_finished(threads, &ctx.state);
                }
                Ok(())
            }
        }
    }

    /// Close the queue and wait for every worker.
    fn finish(self, state: &RunState) {
        let handles = match self {
            Self::Pool { tx, workers } => {
                drop(tx);
                workers
            }
            Self::PerRecord { threads } => threads,
        };
        for handle in handles {
            join_worker(handle, state);
        }
    }
}

/// Per-record threads are joined in batches so exited ones do not pile up.
const REAP_EVERY: usize = 256;

fn reap_finished(threads: &mut Vec<thread::JoinHandle<()>>, state: &RunState) {
    let (finished, running): (Vec<_>, Vec<_>) =
        threads.drain(..).partition(thread::JoinHandle::is_finished);
    *threads = running;
    for handle in finished {
        join_worker(handle, state);
    }
}

fn join_worker(handle: thread::JoinHandle<()>, state: &RunState) {
    if handle.join().is_err() {
        state.fail(HsvError::Runtime {
            details: "record worker thread panicked".to_string(),
        });
    }
}

fn run_job(ctx: &WorkerContext, job: Job) {
    if ctx.state.is_aborted() {
        return;
    }
    if let Err(err) = process_job(ctx, &job) {
        ctx.state.fail(err);
    }
}

fn process_job(ctx: &WorkerContext, job: &Job) -> Result<()> {
    let engine_error = |err: HsvError| HsvError::Engine {
        iteration: job.iteration,
        record: job.ordinal,
        details: err.to_string(),
    };

    let results = ctx.engine.process(&job.record).map_err(engine_error)?;
    let folded = signature(results.as_ref(), &ctx.separator)
        .map_err(engine_error)
        .and_then(|signature| ctx.state.fold(job.iteration, &signature));
    // Released on every path once the engine has handed the results over.
    results.release();
    folded?;
    ctx.state.record_processed()?;
    Ok(())
}

/// Deterministic per-record signature: each available property's values,
/// in the order the engine reports them, one property per line.
///
/// A result with no properties yields the empty string, which still folds.
pub fn signature(results: &dyn ProcessResults, separator: &str) -> Result<String> {
    let mut out = String::new();
    for (idx, property) in results.available_properties().iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(&results.values_string(property, separator)?);
    }
    Ok(out)
}
