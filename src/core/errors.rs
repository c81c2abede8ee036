//! HSV-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, HsvError>;

/// Hash value observed for one iteration slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IterationHash {
    pub iteration: usize,
    pub hash: u32,
}

/// Top-level error type for the hot-swap verification harness.
#[derive(Debug, Error)]
pub enum HsvError {
    #[error("[HSV-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[HSV-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[HSV-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[HSV-2001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[HSV-2002] failed to decode record {entry} in {path}: {details}")]
    Decode {
        path: PathBuf,
        entry: u64,
        details: String,
    },

    #[error("[HSV-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[HSV-3001] engine failed on record {record} of iteration {iteration}: {details}")]
    Engine {
        iteration: usize,
        record: u64,
        details: String,
    },

    #[error("[HSV-3002] dataset load failure for {path}: {details}")]
    DatasetLoad { path: PathBuf, details: String },

    #[error("[HSV-3101] reload trigger failed for {path}: {source}")]
    ReloadTrigger {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "[HSV-4001] hash codes do not match: iteration 0 has {baseline}, {}; not all records were processed identically in every iteration",
        describe_mismatches(.mismatches)
    )]
    HashMismatch {
        baseline: u32,
        mismatches: Vec<IterationHash>,
    },

    #[error("[HSV-4002] processed count {processed} exceeds expected total {expected}")]
    ProgressOverrun { processed: u64, expected: u64 },

    #[error("[HSV-4003] run incomplete: processed {processed} of {expected} records")]
    Incomplete { processed: u64, expected: u64 },

    #[error(
        "[HSV-4004] watchdog expired after {elapsed_secs}s: processed {processed} of {expected} records"
    )]
    Stalled {
        processed: u64,
        expected: u64,
        elapsed_secs: u64,
    },

    #[error("[HSV-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[HSV-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl HsvError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "HSV-1001",
            Self::MissingConfig { .. } => "HSV-1002",
            Self::ConfigParse { .. } => "HSV-1003",
            Self::Io { .. } => "HSV-2001",
            Self::Decode { .. } => "HSV-2002",
            Self::Serialization { .. } => "HSV-2101",
            Self::Engine { .. } => "HSV-3001",
            Self::DatasetLoad { .. } => "HSV-3002",
            Self::ReloadTrigger { .. } => "HSV-3101",
            Self::HashMismatch { .. } => "HSV-4001",
            Self::ProgressOverrun { .. } => "HSV-4002",
            Self::Incomplete { .. } => "HSV-4003",
            Self::Stalled { .. } => "HSV-4004",
            Self::ChannelClosed { .. } => "HSV-3003",
            Self::Runtime { .. } => "HSV-3900",
        }
    }

    /// Whether the failure invalidates the run.
    ///
    /// Only reload-trigger failures are tolerated; they are counted by the
    /// driver and never surfaced individually.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::ReloadTrigger { .. })
    }

    /// Whether this is a post-hoc consistency failure rather than a runtime one.
    #[must_use]
    pub const fn is_consistency_failure(&self) -> bool {
        matches!(self, Self::HashMismatch { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

fn describe_mismatches(mismatches: &[IterationHash]) -> String {
    let mut out = String::new();
    for (idx, m) in mismatches.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "iteration {} has {}", m.iteration, m.hash);
    }
    out
}

impl From<serde_json::Error> for HsvError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for HsvError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
