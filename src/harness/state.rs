//! Shared state for one harness run.
//!
//! The dispatcher's worker threads and the reload driver only ever touch the
//! run through these operations: an atomic progress counter, a per-slot fold,
//! and a first-error-wins fatal slot that doubles as the abort signal.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::errors::{HsvError, IterationHash, Result};
use crate::harness::accumulator::HashAccumulator;

#[derive(Debug)]
pub struct RunState {
    expected_total: u64,
    processed: AtomicU64,
    accumulator: HashAccumulator,
    aborted: AtomicBool,
    fatal: Mutex<Option<HsvError>>,
}

impl RunState {
    #[must_use]
    pub fn new(iterations: usize, expected_total: u64) -> Self {
        Self {
            expected_total,
            processed: AtomicU64::new(0),
            accumulator: HashAccumulator::new(iterations),
            aborted: AtomicBool::new(false),
            fatal: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn expected_total(&self) -> u64 {
        self.expected_total
    }

    #[must_use]
    pub fn iterations(&self) -> usize {
        self.accumulator.iterations()
    }

    /// Lock-free read of the progress counter.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Whether every expected record has been counted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.processed() >= self.expected_total
    }

    /// Count one completed record. Fails if the count would pass the expected total.
    pub fn record_processed(&self) -> Result<u64> {
        let processed = self.processed.fetch_add(1, Ordering::AcqRel) + 1;
        if processed > self.expected_total {
            return Err(HsvError::ProgressOverrun {
                processed,
                expected: self.expected_total,
            });
        }
        Ok(processed)
    }

    pub fn fold(&self, iteration: usize, signature: &str) -> Result<u32> {
        self.accumulator.fold(iteration, signature)
    }

    #[must_use]
    pub fn hashes(&self) -> Vec<IterationHash> {
        self.accumulator.snapshot()
    }

    /// Record a fatal error and raise the abort flag. The first error is kept.
    pub fn fail(&self, err: HsvError) {
        {
            let mut slot = self.fatal.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.aborted.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Take the first fatal error, if any.
    pub fn take_fatal(&self) -> Option<HsvError> {
        self.fatal.lock().take()
    }
}
