//! Engine boundary: the collaborator under test, its results handle, and the
//! reload trigger used to perturb it.
//!
//! The harness only depends on the traits here. [`reloading::ReloadingEngine`]
//! is a small file-backed implementation so the `hsv` binary can be run end to
//! end; any engine that can swap its backing data while serving calls can be
//! verified the same way.

pub mod dataset;
pub mod reloading;
pub mod trigger;

use crate::core::errors::Result;
use crate::records::record::Record;

/// A classification engine that may reload its data while serving calls.
///
/// `process` is called concurrently from many worker threads while a reload
/// may be in progress on another thread.
pub trait Engine: Send + Sync {
    /// Classify one record.
    fn process(&self, record: &Record) -> Result<Box<dyn ProcessResults>>;
}

/// Results of one `process` call.
///
/// The handle may pin engine-owned data. The harness calls
/// [`ProcessResults::release`] exactly once per handle, including when reading
/// the values or folding them fails.
pub trait ProcessResults: Send {
    /// Property names with values in this result. Order is stable per handle.
    fn available_properties(&self) -> Vec<String>;

    /// The property's value(s) joined by `separator`.
    fn values_string(&self, property: &str, separator: &str) -> Result<String>;

    /// Release engine-owned resources held by this handle.
    fn release(self: Box<Self>) {}
}

/// Environment action that makes the engine treat its backing data as changed.
pub trait ReloadTrigger: Send + Sync {
    /// Signal a change. Failures are expected while a reload is in flight.
    fn trigger(&self) -> Result<()>;

    /// Human-readable target for diagnostics.
    fn target(&self) -> String;
}
