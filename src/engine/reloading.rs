//! File-backed engine that hot-reloads its dataset when the data file's
//! modification time changes.
//!
//! A watcher thread polls the file's mtime. On change it compiles the new file
//! off to the side and swaps it in under a write lock; a file that fails to
//! load leaves the previous dataset serving. Every results handle pins the
//! dataset it was computed from, so a swap never invalidates handles that are
//! still outstanding.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use parking_lot::{Mutex, RwLock};

use crate::core::config::EngineConfig;
use crate::core::errors::{HsvError, Result};
use crate::engine::dataset::Dataset;
use crate::engine::{Engine, ProcessResults};
use crate::logger::activity::{ActivityEvent, MaybeLogger, emit};
use crate::records::record::Record;

/// A dataset together with the resolved property selection.
struct Loaded {
    dataset: Dataset,
    selection: Vec<usize>,
}

struct Shared {
    path: PathBuf,
    properties: Vec<String>,
    current: RwLock<Arc<Loaded>>,
    reloads: AtomicU64,
    reload_failures: AtomicU64,
    outstanding: Arc<AtomicUsize>,
    logger: MaybeLogger,
}

impl Shared {
    fn load(path: &Path, properties: &[String]) -> Result<Loaded> {
        let dataset = Dataset::load(path)?;
        let selection = dataset.select(properties)?;
        Ok(Loaded { dataset, selection })
    }

    fn reload(&self) {
        match Self::load(&self.path, &self.properties) {
            Ok(loaded) => {
                let digest = loaded.dataset.digest().to_string();
                *self.current.write() = Arc::new(loaded);
                self.reloads.fetch_add(1, Ordering::Relaxed);
                emit(
                    &self.logger,
                    ActivityEvent::DatasetReloaded {
                        path: self.path.display().to_string(),
                        digest: Some(digest),
                        error_message: None,
                    },
                );
            }
            Err(err) => {
                self.reload_failures.fetch_add(1, Ordering::Relaxed);
                eprintln!(
                    "[HSV-ENGINE] reload of {} failed, keeping previous dataset: {err}",
                    self.path.display()
                );
                emit(
                    &self.logger,
                    ActivityEvent::DatasetReloaded {
                        path: self.path.display().to_string(),
                        digest: None,
                        error_message: Some(err.to_string()),
                    },
                );
            }
        }
    }
}

/// Hot-reloading engine over a JSON data file.
pub struct ReloadingEngine {
    shared: Arc<Shared>,
    stop_tx: Mutex<Option<Sender<()>>>,
    watcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ReloadingEngine {
    /// Load `data_file` and start watching it.
    ///
    /// Fails when the file cannot be loaded or names no property from
    /// `config.properties`.
    pub fn start(data_file: &Path, config: &EngineConfig, logger: MaybeLogger) -> Result<Self> {
        if config.watch_interval_ms == 0 {
            return Err(HsvError::InvalidConfig {
                details: "engine.watch_interval_ms must be > 0".to_string(),
            });
        }
        // Baseline before the load so a change landing in between still reloads.
        let baseline = modified(data_file);
        let initial = Shared::load(data_file, &config.properties)?;
        let shared = Arc::new(Shared {
            path: data_file.to_path_buf(),
            properties: config.properties.clone(),
            current: RwLock::new(Arc::new(initial)),
            reloads: AtomicU64::new(0),
            reload_failures: AtomicU64::new(0),
            outstanding: Arc::new(AtomicUsize::new(0)),
            logger,
        });

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let watch_shared = Arc::clone(&shared);
        let interval = config.watch_interval();
        let watcher = thread::Builder::new()
            .name("hsv-watch".to_string())
            .spawn(move || {
                let mut last_seen = baseline;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(now) = modified(&watch_shared.path) else {
                        continue;
                    };
                    if last_seen == Some(now) {
                        continue;
                    }
                    last_seen = Some(now);
                    watch_shared.reload();
                }
            })
            .map_err(|e| HsvError::Runtime {
                details: format!("failed to spawn watcher thread: {e}"),
            })?;

        Ok(Self {
            shared,
            stop_tx: Mutex::new(Some(stop_tx)),
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Successful dataset swaps since start.
    pub fn reload_count(&self) -> u64 {
        self.shared.reloads.load(Ordering::Relaxed)
    }

    /// Reloads that failed and left the previous dataset in place.
    pub fn reload_failures(&self) -> u64 {
        self.shared.reload_failures.load(Ordering::Relaxed)
    }

    /// Results handles created and not yet released.
    pub fn outstanding_results(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Digest of the dataset currently serving new calls.
    pub fn current_digest(&self) -> String {
        self.shared.current.read().dataset.digest().to_string()
    }

    /// Force a reload now, regardless of the file's mtime.
    pub fn reload_now(&self) {
        self.shared.reload();
    }

    /// Stop the watcher and wait for it. Idempotent.
    pub fn stop(&self) {
        drop(self.stop_tx.lock().take());
        if let Some(handle) = self.watcher.lock().take() {
            if handle.join().is_err() {
                eprintln!("[HSV-ENGINE] watcher thread panicked");
            }
        }
    }
}

impl Drop for ReloadingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Engine for ReloadingEngine {
    fn process(&self, record: &Record) -> Result<Box<dyn ProcessResults>> {
        let loaded = Arc::clone(&*self.shared.current.read());
        let values = loaded.dataset.classify(record, &loaded.selection);
        Ok(Box::new(DatasetResults::new(
            loaded,
            values,
            Arc::clone(&self.shared.outstanding),
        )))
    }
}

/// Results of one call, pinned to the dataset that produced them.
pub struct DatasetResults {
    loaded: Arc<Loaded>,
    values: Vec<(String, Vec<String>)>,
    outstanding: Arc<AtomicUsize>,
}

impl DatasetResults {
    fn new(
        loaded: Arc<Loaded>,
        values: Vec<(String, Vec<String>)>,
        outstanding: Arc<AtomicUsize>,
    ) -> Self {
        outstanding.fetch_add(1, Ordering::AcqRel);
        Self {
            loaded,
            values,
            outstanding,
        }
    }

    /// Digest of the dataset these results came from.
    #[must_use]
    pub fn dataset_digest(&self) -> &str {
        self.loaded.dataset.digest()
    }
}

impl Drop for DatasetResults {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ProcessResults for DatasetResults {
    fn available_properties(&self) -> Vec<String> {
        self.values.iter().map(|(name, _)| name.clone()).collect()
    }

    fn values_string(&self, property: &str, separator: &str) -> Result<String> {
        self.values
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, values)| values.join(separator))
            .ok_or_else(|| HsvError::Runtime {
                details: format!("property {property:?} is not available"),
            })
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
