//! Final run report: counts, per-iteration hashes and the verdict.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::errors::IterationHash;
use crate::harness::driver::ReloadStats;

/// Summary of a run that passed the consistency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub evidence_file: PathBuf,
    pub records: u64,
    pub iterations: usize,
    pub expected_total: u64,
    pub processed: u64,
    pub reloads: ReloadStats,
    pub common_hash: u32,
    pub hashes: Vec<IterationHash>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Human-readable report, one fact per line.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Processed '{}' of '{}' records ({} records x {} iterations) from {}.",
            self.processed,
            self.expected_total,
            self.records,
            self.iterations,
            self.evidence_file.display()
        );
        let _ = writeln!(out, "Reloaded '{}' times.", self.reloads.succeeded);
        let _ = writeln!(out, "Failed to reload '{}' times.", self.reloads.failed);
        for slot in &self.hashes {
            let _ = writeln!(
                out,
                "Hashcode '{}' for iteration '{}'.",
                slot.hash, slot.iteration
            );
        }
        let _ = writeln!(
            out,
            "All {} iterations agree on hashcode '{}' ({} ms).",
            self.iterations, self.common_hash, self.duration_ms
        );
        out
    }
}
