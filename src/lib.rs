#![forbid(unsafe_code)]

//! Hotswap Verify (hsv) checks that a classification engine returns identical
//! results for the same records while its backing data is reloaded underneath it.
//!
//! Moving parts:
//! 1. **Records**: a file of evidence records, re-read once per iteration
//! 2. **Harness**: concurrent dispatch, reload driving, per-iteration hashing
//! 3. **Engine**: the collaborator under test, plus a file-backed reference engine
//! 4. **Offline**: throughput measurement and per-record results output
//!
//! # Library usage
//!
//! ```rust,no_run
//! use hotswap_verify::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use hotswap_verify::core::config::Config;
//! use hotswap_verify::harness::{Harness, HarnessOptions};
//! ```

pub mod prelude;

pub mod core;
pub mod engine;
pub mod harness;
pub mod logger;
pub mod offline;
pub mod records;
