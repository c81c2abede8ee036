#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;

use hotswap_verify::core::errors::{HsvError, Result};
use hotswap_verify::engine::{Engine, ProcessResults, ReloadTrigger};
use hotswap_verify::records::record::Record;

// ──────────────────── fixtures ────────────────────

pub const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148",
    "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/126.0",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) Chrome/126.0 Mobile",
    "curl/8.5.0",
];

pub const SAMPLE_DATASET: &str = r#"{
  "version": "test-1",
  "properties": [
    {
      "name": "IsMobile",
      "default": ["False"],
      "rules": [
        { "evidence": "header.user-agent", "pattern": "Mobile|Android|iPhone", "values": ["True"] }
      ]
    },
    {
      "name": "BrowserName",
      "default": ["Unknown"],
      "rules": [
        { "evidence": "header.user-agent", "pattern": "Firefox/", "values": ["Firefox"] },
        { "evidence": "header.user-agent", "pattern": "Chrome/", "values": ["Chrome", "Chromium"] }
      ]
    },
    {
      "name": "PlatformName",
      "default": ["Other"],
      "rules": [
        { "evidence": "header.user-agent", "pattern": "Linux|Android", "values": ["Linux"] },
        { "evidence": "header.user-agent", "pattern": "Windows", "values": ["Windows"] },
        { "evidence": "header.user-agent", "pattern": "iPhone", "values": ["iOS"] }
      ]
    }
  ]
}"#;

/// Write one YAML document per record, cycling through `USER_AGENTS`.
pub fn write_evidence(dir: &Path, records: usize) -> PathBuf {
    let path = dir.join("evidence.yml");
    let mut out = String::new();
    for idx in 0..records {
        let ua = USER_AGENTS[idx % USER_AGENTS.len()];
        out.push_str("---\n");
        out.push_str(&format!("header.user-agent: {}\n", serde_json::to_string(ua).unwrap()));
        out.push_str(&format!("query.ordinal: \"{idx}\"\n"));
    }
    out.push_str("...\n");
    fs::write(&path, out).expect("write evidence");
    path
}

pub fn write_dataset(dir: &Path) -> PathBuf {
    let path = dir.join("data.json");
    fs::write(&path, SAMPLE_DATASET).expect("write dataset");
    path
}

// ──────────────────── mock engines ────────────────────

/// Results holding fixed property values.
pub struct MapResults {
    pub values: Vec<(String, String)>,
    /// Extra property reported as available that has no values.
    pub phantom: Option<String>,
    pub released: Arc<AtomicUsize>,
}

impl ProcessResults for MapResults {
    fn available_properties(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|(name, _)| name.clone())
            .chain(self.phantom.clone())
            .collect()
    }

    fn values_string(&self, property: &str, _separator: &str) -> Result<String> {
        self.values
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| HsvError::Runtime {
                details: format!("no property {property}"),
            })
    }

    fn release(self: Box<Self>) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Behaviour knobs for [`MockEngine`].
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Sleep a random 0..=n ms before answering.
    pub jitter_ms: u64,
    /// Fixed sleep before answering.
    pub delay_ms: u64,
    /// Answer differently on the n-th call (0-based) for a given record.
    pub diverge_on_call: Option<usize>,
    /// Return no properties at all.
    pub empty: bool,
    /// Fail on records whose ordinal equals this value.
    pub fail_ordinal: Option<String>,
    /// Report a property whose values cannot be read.
    pub phantom_property: bool,
}

/// Deterministic engine derived from each record's user agent.
pub struct MockEngine {
    behavior: MockBehavior,
    pub calls: AtomicU64,
    pub released: Arc<AtomicUsize>,
    per_record: Mutex<std::collections::HashMap<String, usize>>,
}

impl MockEngine {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicU64::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            per_record: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Engine for MockEngine {
    fn process(&self, record: &Record) -> Result<Box<dyn ProcessResults>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior.delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.behavior.delay_ms));
        }
        if self.behavior.jitter_ms > 0 {
            let ms = rand::rng().random_range(0..=self.behavior.jitter_ms);
            thread::sleep(Duration::from_millis(ms));
        }

        let ordinal = record.get("query.ordinal").unwrap_or_default().to_string();
        if self.behavior.fail_ordinal.as_deref() == Some(ordinal.as_str()) {
            return Err(HsvError::Runtime {
                details: format!("engine refused record {ordinal}"),
            });
        }
        if self.behavior.empty {
            return Ok(Box::new(MapResults {
                values: Vec::new(),
                phantom: None,
                released: Arc::clone(&self.released),
            }));
        }

        let call = {
            let mut seen = self.per_record.lock();
            let count = seen.entry(ordinal.clone()).or_insert(0);
            let call = *count;
            *count += 1;
            call
        };
        let ua = record.get("header.user-agent").unwrap_or_default();
        let mut values = vec![
            ("UserAgentLength".to_string(), ua.len().to_string()),
            ("Ordinal".to_string(), ordinal),
        ];
        if self.behavior.diverge_on_call == Some(call) {
            values[0].1.push_str("-drift");
        }
        Ok(Box::new(MapResults {
            values,
            phantom: self
                .behavior
                .phantom_property
                .then(|| "DeviceId".to_string()),
            released: Arc::clone(&self.released),
        }))
    }
}

// ──────────────────── triggers ────────────────────

/// Trigger that counts calls and optionally fails every one of them.
#[derive(Default)]
pub struct CountingTrigger {
    pub calls: AtomicU64,
    pub always_fail: bool,
}

impl CountingTrigger {
    pub fn failing() -> Self {
        Self {
            calls: AtomicU64::new(0),
            always_fail: true,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReloadTrigger for CountingTrigger {
    fn trigger(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(HsvError::ReloadTrigger {
                path: PathBuf::from("/mock/data.json"),
                source: std::io::Error::new(std::io::ErrorKind::ResourceBusy, "reload in flight"),
            });
        }
        Ok(())
    }

    fn target(&self) -> String {
        "mock".to_string()
    }
}

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_hsv") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "hsv.exe" } else { "hsv" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve hsv binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("hsv-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env("HOME", &root)
        .env_remove("HSV_OUTPUT_FORMAT");
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("execute hsv command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
