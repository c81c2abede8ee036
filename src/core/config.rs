//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{HsvError, Result};

/// Full harness configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub harness: HarnessConfig,
    pub engine: EngineConfig,
    pub perf: PerfConfig,
    pub paths: PathsConfig,
}

/// Knobs for the dispatcher and the reload driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Number of full passes over the record file.
    pub iterations: usize,
    /// Delay between reload triggers.
    pub reload_interval_ms: u64,
    /// Worker threads processing records. 0 spawns one thread per record.
    pub parallelism: usize,
    /// Abort the run when it has not completed within this many seconds. 0 disables.
    pub watchdog_secs: u64,
    /// Separator handed to the engine when joining multi-valued properties.
    pub value_separator: String,
}

/// Settings for the bundled file-backed engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the data file's modification time is polled.
    pub watch_interval_ms: u64,
    /// Properties to report. Empty reports every property in the data file.
    pub properties: Vec<String>,
}

/// Throughput measurement settings for `hsv perf`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PerfConfig {
    /// Property read from every result.
    pub property: String,
    /// Results whose property value equals this are tallied separately.
    pub match_value: String,
    /// Where the plain-text report is written.
    pub report_file: PathBuf,
}

/// Files consumed and produced by a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub data_file: PathBuf,
    pub evidence_file: PathBuf,
    pub activity_log: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            iterations: 4,
            reload_interval_ms: 1_300,
            parallelism: 0,
            watchdog_secs: 0,
            value_separator: ",".to_string(),
        }
    }
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            property: "IsMobile".to_string(),
            match_value: "True".to_string(),
            report_file: PathBuf::from("performance_report.log"),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            watch_interval_ms: 250,
            properties: Vec::new(),
        }
    }
}

impl HarnessConfig {
    #[must_use]
    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms)
    }

    #[must_use]
    pub fn watchdog(&self) -> Option<Duration> {
        (self.watchdog_secs > 0).then(|| Duration::from_secs(self.watchdog_secs))
    }
}

impl EngineConfig {
    #[must_use]
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!("[HSV-CONFIG] WARNING: HOME not set, falling back to /tmp");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        home_dir.join(".config").join("hsv").join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| HsvError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(HsvError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a keeps the value stable across processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Render the effective config as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HsvError::Serialization {
            context: "toml",
            details: e.to_string(),
        })
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("HSV_ITERATIONS") {
            self.harness.iterations = parse_env_usize("HSV_ITERATIONS", &raw)?;
        }
        if let Some(raw) = lookup("HSV_RELOAD_INTERVAL_MS") {
            self.harness.reload_interval_ms = parse_env_u64("HSV_RELOAD_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("HSV_PARALLELISM") {
            self.harness.parallelism = parse_env_usize("HSV_PARALLELISM", &raw)?;
        }
        if let Some(raw) = lookup("HSV_WATCHDOG_SECS") {
            self.harness.watchdog_secs = parse_env_u64("HSV_WATCHDOG_SECS", &raw)?;
        }
        if let Some(raw) = lookup("HSV_WATCH_INTERVAL_MS") {
            self.engine.watch_interval_ms = parse_env_u64("HSV_WATCH_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("HSV_PROPERTIES") {
            self.engine.properties = raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(raw) = lookup("HSV_DATA_FILE") {
            self.paths.data_file = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("HSV_EVIDENCE_FILE") {
            self.paths.evidence_file = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("HSV_ACTIVITY_LOG") {
            self.paths.activity_log = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("HSV_REPORT_FILE") {
            self.perf.report_file = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Check invariants the harness relies on.
    pub fn validate(&self) -> Result<()> {
        if self.harness.iterations == 0 {
            return Err(HsvError::InvalidConfig {
                details: "harness.iterations must be >= 1".to_string(),
            });
        }
        if self.harness.reload_interval_ms == 0 {
            return Err(HsvError::InvalidConfig {
                details: "harness.reload_interval_ms must be > 0".to_string(),
            });
        }
        if self.harness.value_separator.is_empty() {
            return Err(HsvError::InvalidConfig {
                details: "harness.value_separator must not be empty".to_string(),
            });
        }
        if self.engine.watch_interval_ms == 0 {
            return Err(HsvError::InvalidConfig {
                details: "engine.watch_interval_ms must be > 0".to_string(),
            });
        }
        if self.perf.property.trim().is_empty() {
            return Err(HsvError::InvalidConfig {
                details: "perf.property must not be empty".to_string(),
            });
        }
        if let Some(dup) = first_duplicate(&self.engine.properties) {
            return Err(HsvError::InvalidConfig {
                details: format!("engine.properties lists {dup:?} more than once"),
            });
        }
        Ok(())
    }
}

fn first_duplicate(names: &[String]) -> Option<&str> {
    names
        .iter()
        .enumerate()
        .find(|(idx, name)| names[..*idx].contains(name))
        .map(|(_, name)| name.as_str())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|error| HsvError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim().parse::<usize>().map_err(|error| HsvError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
