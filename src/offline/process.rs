//! Offline processing: classify each record once and write the results next
//! to the evidence file as YAML documents.
//!
//! Every output document maps `device.<lowercased property>` to the
//! property's joined values. Properties without values are left out. The
//! stream ends with a `...` marker so a reader knows it is complete.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::{HsvError, Result};
use crate::engine::Engine;
use crate::records::record::Record;
use crate::records::source::RecordSource;

/// Default output location: `<dir>/<stem>.processed.yml` beside the evidence.
#[must_use]
pub fn output_path(evidence: &Path) -> PathBuf {
    let stem = evidence
        .file_stem()
        .map_or_else(|| "evidence".into(), |s| s.to_string_lossy());
    evidence.with_file_name(format!("{stem}.processed.yml"))
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub records: u64,
    pub output: PathBuf,
}

/// Output mapping for one record.
pub fn classify(
    engine: &dyn Engine,
    record: &Record,
    separator: &str,
) -> Result<BTreeMap<String, String>> {
    let results = engine.process(record)?;
    let mut out = BTreeMap::new();
    let mut failure = None;
    for property in results.available_properties() {
        match results.values_string(&property, separator) {
            Ok(value) if value.is_empty() => {}
            Ok(value) => {
                out.insert(format!("device.{}", property.to_lowercase()), value);
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    results.release();
    failure.map_or(Ok(out), Err)
}

/// Classify every record of `source` and write the documents to `output`.
///
/// The output file is replaced. On error it may hold a partial stream
/// without the closing marker.
pub fn process_file(
    engine: &dyn Engine,
    source: &RecordSource,
    output: &Path,
    separator: &str,
) -> Result<ProcessSummary> {
    let file = File::create(output).map_err(|err| HsvError::io(output, err))?;
    let mut writer = BufWriter::new(file);
    let io_error = |err: std::io::Error| HsvError::io(output, err);

    let mut records = 0_u64;
    for record in source.open()? {
        let record = record?;
        let values = classify(engine, &record, separator).map_err(|err| HsvError::Engine {
            iteration: 0,
            record: records,
            details: err.to_string(),
        })?;
        let document = serde_yaml::to_string(&values).map_err(|err| HsvError::Serialization {
            context: "yaml",
            details: err.to_string(),
        })?;
        writer.write_all(b"---\n").map_err(io_error)?;
        writer.write_all(document.as_bytes()).map_err(io_error)?;
        records += 1;
    }
    writer.write_all(b"...\n").map_err(io_error)?;
    writer.flush().map_err(io_error)?;

    Ok(ProcessSummary {
        records,
        output: output.to_path_buf(),
    })
}
