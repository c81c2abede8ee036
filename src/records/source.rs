//! Restartable record source backed by a YAML multi-document file.
//!
//! Each `---`-separated document is one flat mapping of evidence keys to
//! values. JSON objects are valid YAML documents, so a file of JSON objects
//! separated by `---` lines reads the same way. Empty documents are skipped.
//! Every [`RecordSource::open`] re-reads the file, so each iteration decodes
//! the same sequence as long as the content is not rewritten between passes.

#![allow(missing_docs)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::errors::{HsvError, Result};
use crate::records::record::Record;

/// Handle on a record file; cheap to clone and share across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSource {
    path: PathBuf,
}

impl RecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh pass over the file. Documents are decoded lazily.
    pub fn open(&self) -> Result<RecordIter> {
        let bytes = fs::read(&self.path).map_err(|source| HsvError::io(&self.path, source))?;
        Ok(RecordIter {
            path: self.path.clone(),
            documents: serde_yaml::Deserializer::from_reader(Cursor::new(bytes)),
            entry: 0,
            done: false,
        })
    }

    /// Decode the whole file once and return the number of records.
    ///
    /// Decoding (rather than counting separators) guarantees the count matches
    /// what the dispatcher will actually enqueue.
    pub fn count(&self) -> Result<u64> {
        let mut count = 0_u64;
        for record in self.open()? {
            record?;
            count += 1;
        }
        Ok(count)
    }
}

/// One pass over a record file. Stops permanently after the first error.
pub struct RecordIter {
    path: PathBuf,
    documents: serde_yaml::Deserializer<'static>,
    entry: u64,
    done: bool,
}

impl RecordIter {
    /// Zero-based ordinal of the next record to be decoded.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.entry
    }

    fn decode_error(&mut self, details: String) -> HsvError {
        self.done = true;
        HsvError::Decode {
            path: self.path.clone(),
            entry: self.entry,
            details,
        }
    }
}

impl Iterator for RecordIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let Some(document) = self.documents.next() else {
                self.done = true;
                return None;
            };
            match Option::<Record>::deserialize(document) {
                Ok(None) => {}
                Ok(Some(record)) => {
                    self.entry += 1;
                    return Some(Ok(record));
                }
                Err(err) => return Some(Err(self.decode_error(err.to_string()))),
            }
        }
        None
    }
}
