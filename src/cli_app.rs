//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use hotswap_verify::core::config::Config;
use hotswap_verify::core::errors::HsvError;
use hotswap_verify::engine::Engine;
use hotswap_verify::engine::reloading::ReloadingEngine;
use hotswap_verify::engine::trigger::TouchTrigger;
use hotswap_verify::harness::{Harness, HarnessOptions};
use hotswap_verify::logger::activity::{MaybeLogger, spawn_logger};
use hotswap_verify::logger::jsonl::JsonlConfig;
use hotswap_verify::offline::perf::{self, PerfOptions};
use hotswap_verify::offline::process;
use hotswap_verify::records::source::RecordSource;

/// Hotswap Verify: proves an engine gives stable answers across data reloads.
#[derive(Debug, Parser)]
#[command(
    name = "hsv",
    author,
    version,
    about = "Hotswap Verify - reload consistency harness",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Process the evidence file repeatedly while reloading the data file.
    Run(RunArgs),
    /// Measure engine throughput over the evidence file without reloads.
    Perf(PerfArgs),
    /// Classify each evidence record once and write the results to a YAML file.
    Process(ProcessArgs),
    /// Count the records in an evidence file.
    Count(CountArgs),
    /// View configuration state.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct RunArgs {
    /// Engine data file; touched to trigger reloads.
    #[arg(long, value_name = "PATH")]
    data_file: Option<PathBuf>,
    /// Evidence records file (YAML documents, one record each).
    #[arg(long, value_name = "PATH")]
    evidence_file: Option<PathBuf>,
    /// Number of full passes over the evidence file.
    #[arg(long, value_name = "N")]
    iterations: Option<usize>,
    /// Delay between reload triggers in milliseconds.
    #[arg(long, value_name = "MS")]
    reload_interval_ms: Option<u64>,
    /// Worker threads (0 = one thread per record).
    #[arg(long, value_name = "N")]
    parallelism: Option<usize>,
    /// Engine file watch poll interval in milliseconds.
    #[arg(long, value_name = "MS")]
    watch_interval_ms: Option<u64>,
    /// Abort a run that takes longer than this many seconds (0 disables).
    #[arg(long, value_name = "SECONDS")]
    watchdog_secs: Option<u64>,
    /// Property to include in each record's signature (repeatable).
    #[arg(long = "property", value_name = "NAME")]
    properties: Vec<String>,
    /// Append activity events as JSONL to this file.
    #[arg(long, value_name = "PATH")]
    activity_log: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.data_file {
            config.paths.data_file.clone_from(path);
        }
        if let Some(path) = &self.evidence_file {
            config.paths.evidence_file.clone_from(path);
        }
        if let Some(n) = self.iterations {
            config.harness.iterations = n;
        }
        if let Some(ms) = self.reload_interval_ms {
            config.harness.reload_interval_ms = ms;
        }
        if let Some(n) = self.parallelism {
            config.harness.parallelism = n;
        }
        if let Some(ms) = self.watch_interval_ms {
            config.engine.watch_interval_ms = ms;
        }
        if let Some(secs) = self.watchdog_secs {
            config.harness.watchdog_secs = secs;
        }
        if !self.properties.is_empty() {
            config.engine.properties.clone_from(&self.properties);
        }
        if let Some(path) = &self.activity_log {
            config.paths.activity_log = Some(path.clone());
        }
    }
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct PerfArgs {
    /// Engine data file.
    #[arg(long, value_name = "PATH")]
    data_file: Option<PathBuf>,
    /// Evidence records file.
    #[arg(long, value_name = "PATH")]
    evidence_file: Option<PathBuf>,
    /// Number of full passes over the evidence file.
    #[arg(long, value_name = "N")]
    iterations: Option<usize>,
    /// Worker threads (0 = one thread per record).
    #[arg(long, value_name = "N")]
    parallelism: Option<usize>,
    /// Property read from every result.
    #[arg(long, value_name = "NAME")]
    property: Option<String>,
    /// Value of the property that is tallied.
    #[arg(long, value_name = "VALUE")]
    match_value: Option<String>,
    /// Report file to write.
    #[arg(long, value_name = "PATH")]
    report_file: Option<PathBuf>,
}

impl PerfArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.data_file {
            config.paths.data_file.clone_from(path);
        }
        if let Some(path) = &self.evidence_file {
            config.paths.evidence_file.clone_from(path);
        }
        if let Some(n) = self.iterations {
            config.harness.iterations = n;
        }
        if let Some(n) = self.parallelism {
            config.harness.parallelism = n;
        }
        if let Some(name) = &self.property {
            config.perf.property.clone_from(name);
        }
        if let Some(value) = &self.match_value {
            config.perf.match_value.clone_from(value);
        }
        if let Some(path) = &self.report_file {
            config.perf.report_file.clone_from(path);
        }
    }
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ProcessArgs {
    /// Engine data file.
    #[arg(long, value_name = "PATH")]
    data_file: Option<PathBuf>,
    /// Evidence records file.
    #[arg(long, value_name = "PATH")]
    evidence_file: Option<PathBuf>,
    /// Output file. Defaults to `<evidence stem>.processed.yml` beside the evidence.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Property to include in the output (repeatable).
    #[arg(long = "property", value_name = "NAME")]
    properties: Vec<String>,
}

impl ProcessArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.data_file {
            config.paths.data_file.clone_from(path);
        }
        if let Some(path) = &self.evidence_file {
            config.paths.evidence_file.clone_from(path);
        }
        if !self.properties.is_empty() {
            config.engine.properties.clone_from(&self.properties);
        }
    }
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct CountArgs {
    /// Evidence file to count. Defaults to `paths.evidence_file`.
    #[arg(value_name = "PATH")]
    evidence_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure, including fatal run errors.
    #[error("{0}")]
    Runtime(String),
    /// The run completed but iterations disagreed.
    #[error("{0}")]
    Verification(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) | Self::Json(_) => 2,
            Self::Verification(_) => 3,
        }
    }
}

impl From<HsvError> for CliError {
    fn from(err: HsvError) -> Self {
        let message = err.to_string();
        match err {
            HsvError::InvalidConfig { .. }
            | HsvError::MissingConfig { .. }
            | HsvError::ConfigParse { .. } => Self::User(message),
            ref e if e.is_consistency_failure() => Self::Verification(message),
            _ => Self::Runtime(message),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_harness(cli, args),
        Command::Perf(args) => run_perf(cli, args),
        Command::Process(args) => run_process(cli, args),
        Command::Count(args) => run_count(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

fn run_harness(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    require_inputs(&config)?;

    let config_hash = config.stable_hash()?;
    let (logger, logger_join): (MaybeLogger, _) = match &config.paths.activity_log {
        Some(path) => {
            let (handle, join) = spawn_logger(JsonlConfig::new(path))?;
            (Some(handle), Some(join))
        }
        None => (None, None),
    };

    let engine = Arc::new(ReloadingEngine::start(
        &config.paths.data_file,
        &config.engine,
        logger.clone(),
    )?);
    let engine_dyn: Arc<dyn Engine> = engine.clone();
    let harness = Harness::new(
        engine_dyn,
        Arc::new(TouchTrigger::new(&config.paths.data_file)),
        RecordSource::new(&config.paths.evidence_file),
        HarnessOptions::from(&config.harness),
    )
    .with_logger(logger.clone())
    .with_config_hash(config_hash);

    let outcome = harness.run();
    engine.stop();
    let engine_reloads = engine.reload_count();
    let engine_reload_failures = engine.reload_failures();

    if let Some(handle) = &logger {
        let dropped = handle.dropped_events();
        if dropped > 0 {
            eprintln!("[HSV-LOG] {dropped} activity events dropped under back-pressure");
        }
        handle.shutdown();
    }
    if let Some(join) = logger_join {
        if join.join().is_err() {
            eprintln!("[HSV-LOG] logger thread panicked");
        }
    }

    match outcome {
        Ok(report) => {
            match output_mode(cli) {
                OutputMode::Human => {
                    print!("{}", report.render_text());
                    println!(
                        "Engine swapped its dataset '{engine_reloads}' times ('{engine_reload_failures}' failed loads)."
                    );
                    println!("{}", "PASS".green().bold());
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "run",
                        "passed": true,
                        "report": serde_json::to_value(&report)?,
                        "engine": {
                            "reloads": engine_reloads,
                            "reload_failures": engine_reload_failures,
                        },
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Err(err) => {
            match output_mode(cli) {
                // The error itself is printed once by the caller.
                OutputMode::Human => eprintln!("{}", "FAIL".red().bold()),
                OutputMode::Json => {
                    let mut payload = json!({
                        "command": "run",
                        "passed": false,
                        "error_code": err.code(),
                        "error": err.to_string(),
                        "engine": {
                            "reloads": engine_reloads,
                            "reload_failures": engine_reload_failures,
                        },
                    });
                    if let HsvError::HashMismatch {
                        baseline,
                        mismatches,
                    } = &err
                    {
                        payload["baseline"] = json!(baseline);
                        payload["mismatches"] = serde_json::to_value(mismatches)?;
                    }
                    write_json_line(&payload)?;
                }
            }
            Err(err.into())
        }
    }
}

fn require_inputs(config: &Config) -> Result<(), CliError> {
    if config.paths.data_file.as_os_str().is_empty() {
        return Err(CliError::User(
            "no data file: pass --data-file or set paths.data_file".to_string(),
        ));
    }
    if config.paths.evidence_file.as_os_str().is_empty() {
        return Err(CliError::User(
            "no evidence file: pass --evidence-file or set paths.evidence_file".to_string(),
        ));
    }
    Ok(())
}

fn run_perf(cli: &Cli, args: &PerfArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    require_inputs(&config)?;

    let engine = ReloadingEngine::start(&config.paths.data_file, &config.engine, None)?;
    let measured = perf::measure(
        &engine,
        &RecordSource::new(&config.paths.evidence_file),
        &PerfOptions::from(&config),
    );
    engine.stop();
    let report = measured?;
    let report_file = &config.perf.report_file;
    report.write_to(report_file)?;

    match output_mode(cli) {
        OutputMode::Human => {
            print!("{}", report.render_text());
            println!("Output report to file \"{}\".", report_file.display());
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "perf",
                "report": serde_json::to_value(&report)?,
                "report_file": report_file.to_string_lossy(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_process(cli: &Cli, args: &ProcessArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    require_inputs(&config)?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| process::output_path(&config.paths.evidence_file));
    let engine = ReloadingEngine::start(&config.paths.data_file, &config.engine, None)?;
    let outcome = process::process_file(
        &engine,
        &RecordSource::new(&config.paths.evidence_file),
        &output,
        &config.harness.value_separator,
    );
    engine.stop();
    let summary = outcome?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Output to \"{}\".", summary.output.display());
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "process",
                "records": summary.records,
                "output": summary.output.to_string_lossy(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_count(cli: &Cli, args: &CountArgs) -> Result<(), CliError> {
    let path = match &args.evidence_file {
        Some(path) => path.clone(),
        None => {
            let config = Config::load(cli.config.as_deref())?;
            if config.paths.evidence_file.as_os_str().is_empty() {
                return Err(CliError::User(
                    "no evidence file: pass a path or set paths.evidence_file".to_string(),
                ));
            }
            config.paths.evidence_file
        }
    };

    let records = RecordSource::new(&path).count()?;
    match output_mode(cli) {
        OutputMode::Human => {
            println!("Found '{records}' records in {}.", path.display());
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "count",
                "path": path.to_string_lossy(),
                "records": records,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        None | Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", config.to_toml()?);
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    let payload = json!({
                        "command": "config show",
                        "config": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("HSV_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
