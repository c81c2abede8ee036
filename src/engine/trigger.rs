//! Reload trigger that marks a file as modified by setting its times to now.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use filetime::{FileTime, set_file_times};

use crate::core::errors::{HsvError, Result};
use crate::engine::ReloadTrigger;

/// Touches the engine's data file without changing its content.
///
/// Only meaningful for engines whose file watch treats a timestamp-only
/// change as a change of data. [`crate::engine::reloading::ReloadingEngine`]
/// does: it compares modification times, never content.
#[derive(Debug, Clone)]
pub struct TouchTrigger {
    path: PathBuf,
}

impl TouchTrigger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReloadTrigger for TouchTrigger {
    fn trigger(&self) -> Result<()> {
        let now = FileTime::now();
        set_file_times(&self.path, now, now).map_err(|source| HsvError::ReloadTrigger {
            path: self.path.clone(),
            source,
        })
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}
