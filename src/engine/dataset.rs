//! Data file model for the bundled engine.
//!
//! The file is JSON:
//!
//! ```json
//! {
//!   "version": "2024.1",
//!   "properties": [
//!     {
//!       "name": "IsMobile",
//!       "default": ["False"],
//!       "rules": [
//!         { "evidence": "header.user-agent", "pattern": "Mobile|Android", "values": ["True"] }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! For each property the first rule whose regex matches the named evidence
//! value wins; otherwise the default values apply.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::core::errors::{HsvError, Result};
use crate::records::record::Record;

#[derive(Debug, Deserialize)]
struct DatasetFile {
    #[serde(default)]
    version: Option<String>,
    properties: Vec<PropertyDef>,
}

#[derive(Debug, Deserialize)]
struct PropertyDef {
    name: String,
    #[serde(default)]
    default: Vec<String>,
    #[serde(default)]
    rules: Vec<RuleDef>,
}

#[derive(Debug, Deserialize)]
struct RuleDef {
    evidence: String,
    pattern: String,
    values: Vec<String>,
}

#[derive(Debug)]
struct Rule {
    evidence: String,
    regex: Regex,
    values: Vec<String>,
}

#[derive(Debug)]
struct Property {
    name: String,
    default: Vec<String>,
    rules: Vec<Rule>,
}

impl Property {
    fn evaluate(&self, record: &Record) -> &[String] {
        self.rules
            .iter()
            .find(|rule| {
                record
                    .get_ignore_ascii_case(&rule.evidence)
                    .is_some_and(|value| rule.regex.is_match(value))
            })
            .map_or(&self.default, |rule| &rule.values)
    }
}

/// A loaded, immutable dataset. Swapped wholesale on reload.
#[derive(Debug)]
pub struct Dataset {
    version: Option<String>,
    digest: String,
    properties: Vec<Property>,
}

impl Dataset {
    /// Read and compile a data file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|source| HsvError::io(path, source))?;
        Self::from_slice(&bytes, path)
    }

    /// Compile a dataset from raw bytes; `origin` is used in error messages.
    pub fn from_slice(bytes: &[u8], origin: &Path) -> Result<Self> {
        let load_error = |details: String| HsvError::DatasetLoad {
            path: origin.to_path_buf(),
            details,
        };

        let file: DatasetFile =
            serde_json::from_slice(bytes).map_err(|e| load_error(e.to_string()))?;

        let mut properties: Vec<Property> = Vec::with_capacity(file.properties.len());
        for def in file.properties {
            if properties.iter().any(|p| p.name == def.name) {
                return Err(load_error(format!("property {:?} defined twice", def.name)));
            }
            let mut rules = Vec::with_capacity(def.rules.len());
            for rule in def.rules {
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    load_error(format!("property {:?}: bad pattern: {e}", def.name))
                })?;
                rules.push(Rule {
                    evidence: rule.evidence,
                    regex,
                    values: rule.values,
                });
            }
            properties.push(Property {
                name: def.name,
                default: def.default,
                rules,
            });
        }

        Ok(Self {
            version: file.version,
            digest: sha256_hex(bytes),
            properties,
        })
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// SHA-256 of the file content this dataset was compiled from.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|p| p.name.as_str())
    }

    /// Resolve property names to indexes. Empty `names` selects every property.
    pub fn select(&self, names: &[String]) -> Result<Vec<usize>> {
        if names.is_empty() {
            return Ok((0..self.properties.len()).collect());
        }
        names
            .iter()
            .map(|name| {
                self.properties
                    .iter()
                    .position(|p| &p.name == name)
                    .ok_or_else(|| HsvError::InvalidConfig {
                        details: format!("property {name:?} is not in the data file"),
                    })
            })
            .collect()
    }

    /// Values of each selected property for `record`, in selection order.
    #[must_use]
    pub fn classify(&self, record: &Record, selection: &[usize]) -> Vec<(String, Vec<String>)> {
        selection
            .iter()
            .filter_map(|idx| self.properties.get(*idx))
            .map(|p| (p.name.clone(), p.evaluate(record).to_vec()))
            .collect()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
