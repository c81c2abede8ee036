//! Reload driver: keeps perturbing the engine until the run's work is done.
//!
//! The reload cadence and the completion barrier are separate concerns: the
//! driver waits on the dispatcher's completion signal with a timeout equal to
//! the reload interval, so it fires a trigger every interval but stops as soon
//! as the counter reaches the expected total or the dispatcher exits.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;

use crate::core::errors::HsvError;
use crate::engine::ReloadTrigger;
use crate::harness::state::RunState;
use crate::logger::activity::{ActivityEvent, MaybeLogger, emit};

/// Reload attempt counters, owned by the driver thread alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadStats {
    pub attempts: u64,
    pub succeeded: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub struct ReloadDriver {
    trigger: Arc<dyn ReloadTrigger>,
    interval: Duration,
    watchdog: Option<Duration>,
    logger: MaybeLogger,
}

impl ReloadDriver {
    pub fn new(trigger: Arc<dyn ReloadTrigger>, interval: Duration) -> Self {
        Self {
            trigger,
            interval,
            watchdog: None,
            logger: None,
        }
    }

    /// Abort the run with [`HsvError::Stalled`] if it is not done within `limit`.
    #[must_use]
    pub fn with_watchdog(mut self, limit: Option<Duration>) -> Self {
        self.watchdog = limit;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: MaybeLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Trigger reloads until `state` reports completion, the run aborts, or the
    /// dispatcher signals that all workers have exited.
    ///
    /// A run with nothing to process never triggers.
    pub fn drive(&self, state: &RunState, done: &Receiver<()>) -> ReloadStats {
        let started = Instant::now();
        let mut stats = ReloadStats::default();

        loop {
            if state.is_complete() || state.is_aborted() {
                break;
            }

            stats.attempts += 1;
            match self.trigger.trigger() {
                Ok(()) => {
                    stats.succeeded += 1;
                    emit(
                        &self.logger,
                        ActivityEvent::ReloadTriggered {
                            attempt: stats.attempts,
                            target: self.trigger.target(),
                            error_code: None,
                            error_message: None,
                        },
                    );
                }
                Err(err) => {
                    stats.failed += 1;
                    emit(
                        &self.logger,
                        ActivityEvent::ReloadTriggered {
                            attempt: stats.attempts,
                            target: self.trigger.target(),
                            error_code: Some(err.code().to_string()),
                            error_message: Some(err.to_string()),
                        },
                    );
                    stats.last_error = Some(err.to_string());
                }
            }

            match done.recv_timeout(self.interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if let Some(limit) = self.watchdog
                && started.elapsed() >= limit
                && !state.is_complete()
            {
                state.fail(HsvError::Stalled {
                    processed: state.processed(),
                    expected: state.expected_total(),
                    elapsed_secs: started.elapsed().as_secs(),
                });
                break;
            }
        }

        stats
    }
}
