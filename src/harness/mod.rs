//! Verification harness: proves an engine yields identical results for the same
//! records on every pass while its backing data is reloaded underneath it.
//!
//! Flow of one run:
//! 1. Count the records (`expected_total = records x iterations`).
//! 2. Start the [`dispatcher`] in the background.
//! 3. Run the [`driver`] on the calling thread until the work is done.
//! 4. Join the dispatcher; the join, not the counter, is the completion barrier.
//! 5. Check every iteration's hash with the [`verifier`] and build the [`report`].
//!
//! The first fatal error stops the whole run and is returned as-is.

pub mod accumulator;
pub mod dispatcher;
pub mod driver;
pub mod report;
pub mod state;
pub mod verifier;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::config::HarnessConfig;
use crate::core::errors::{HsvError, Result};
use crate::engine::{Engine, ReloadTrigger};
use crate::logger::activity::{ActivityEvent, MaybeLogger, emit};
use crate::records::source::RecordSource;

use dispatcher::{DispatchOptions, Dispatcher};
use driver::ReloadDriver;
use report::RunReport;
use state::RunState;

/// Run parameters, usually derived from [`HarnessConfig`].
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Number of full passes over the records.
    pub iterations: usize,
    /// Worker threads; 0 spawns one thread per record.
    pub parallelism: usize,
    /// Delay between reload triggers.
    pub reload_interval: Duration,
    /// Abort a run that has not finished within this long.
    ///
    /// The watchdog stops dispatch of further records, but an engine call that
    /// never returns still blocks the final join.
    pub watchdog: Option<Duration>,
    /// Separator used when joining multi-valued properties.
    pub value_separator: String,
}

impl From<&HarnessConfig> for HarnessOptions {
    fn from(cfg: &HarnessConfig) -> Self {
        Self {
            iterations: cfg.iterations,
            parallelism: cfg.parallelism,
            reload_interval: cfg.reload_interval(),
            watchdog: cfg.watchdog(),
            value_separator: cfg.value_separator.clone(),
        }
    }
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self::from(&HarnessConfig::default())
    }
}

/// One configured verification run.
pub struct Harness {
    engine: Arc<dyn Engine>,
    trigger: Arc<dyn ReloadTrigger>,
    source: RecordSource,
    options: HarnessOptions,
    logger: MaybeLogger,
    config_hash: String,
}

impl Harness {
    pub fn new(
        engine: Arc<dyn Engine>,
        trigger: Arc<dyn ReloadTrigger>,
        source: RecordSource,
        options: HarnessOptions,
    ) -> Self {
        Self {
            engine,
            trigger,
            source,
            options,
            logger: None,
            config_hash: String::new(),
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: MaybeLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Fingerprint of the effective configuration, recorded in the run-start event.
    #[must_use]
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Execute the run. `Ok` only when every record of every iteration was
    /// processed exactly once and all iterations agree on their hash.
    pub fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        let iterations = self.options.iterations;
        if iterations == 0 {
            return Err(HsvError::InvalidConfig {
                details: "iterations must be >= 1".to_string(),
            });
        }

        let records = self
            .source
            .count()
            .map_err(|err| self.abort_run(err, 0, 0))?;
        let expected_total = records
            .checked_mul(iterations as u64)
            .ok_or_else(|| HsvError::InvalidConfig {
                details: format!("{records} records x {iterations} iterations overflows"),
            })?;

        emit(
            &self.logger,
            ActivityEvent::RunStarted {
                records,
                iterations,
                expected_total,
                config_hash: self.config_hash.clone(),
            },
        );

        let state = Arc::new(RunState::new(iterations, expected_total));
        let dispatch = Dispatcher::new(
            Arc::clone(&self.engine),
            self.source.clone(),
            Arc::clone(&state),
            DispatchOptions {
                iterations,
                parallelism: self.options.parallelism,
                value_separator: self.options.value_separator.clone(),
            },
        )
        .with_logger(self.logger.clone())
        .spawn()?;

        let reloads = ReloadDriver::new(Arc::clone(&self.trigger), self.options.reload_interval)
            .with_watchdog(self.options.watchdog)
            .with_logger(self.logger.clone())
            .drive(&state, dispatch.completion());

        let joined = dispatch.join();
        let processed = state.processed();
        if let Some(err) = state.take_fatal() {
            return Err(self.abort_run(err, processed, expected_total));
        }
        joined.map_err(|err| self.abort_run(err, processed, expected_total))?;
        if processed != expected_total {
            let err = HsvError::Incomplete {
                processed,
                expected: expected_total,
            };
            return Err(self.abort_run(err, processed, expected_total));
        }

        let hashes = state.hashes();
        let common_hash = verifier::verify(&hashes).map_err(|err| {
            if let HsvError::HashMismatch {
                baseline,
                mismatches,
            } = &err
            {
                for slot in mismatches {
                    emit(
                        &self.logger,
                        ActivityEvent::HashMismatch {
                            iteration: slot.iteration,
                            baseline: *baseline,
                            hash: slot.hash,
                        },
                    );
                }
            }
            self.abort_run(err, processed, expected_total)
        })?;

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        emit(
            &self.logger,
            ActivityEvent::RunCompleted {
                processed,
                reloads: reloads.succeeded,
                reload_failures: reloads.failed,
                common_hash,
                duration_ms,
            },
        );

        Ok(RunReport {
            evidence_file: self.source.path().to_path_buf(),
            records,
            iterations,
            expected_total,
            processed,
            reloads,
            common_hash,
            hashes,
            duration_ms,
        })
    }

    fn abort_run(&self, err: HsvError, processed: u64, expected: u64) -> HsvError {
        emit(
            &self.logger,
            ActivityEvent::Fatal {
                code: err.code().to_string(),
                message: err.to_string(),
                processed,
                expected,
            },
        );
        err
    }
}
