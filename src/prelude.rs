//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use hotswap_verify::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{HsvError, IterationHash, Result};

// Records
pub use crate::records::record::Record;
pub use crate::records::source::RecordSource;

// Engine
pub use crate::engine::reloading::ReloadingEngine;
pub use crate::engine::trigger::TouchTrigger;
pub use crate::engine::{Engine, ProcessResults, ReloadTrigger};

// Harness
pub use crate::harness::report::RunReport;
pub use crate::harness::{Harness, HarnessOptions};

// Offline
pub use crate::offline::perf::{PerfOptions, PerfReport};
pub use crate::offline::process::ProcessSummary;
