//! Single-shot runs over the evidence file with no reloads: a throughput
//! measurement and a per-record results dump.

pub mod perf;
pub mod process;
