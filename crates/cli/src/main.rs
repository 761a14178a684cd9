// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

mod synthetic;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tandem_config::{Settings, TitleOverrides};
use tandem_core::metrics::PerfResults;
use tandem_core::snapshot::DirectoryStore;
use tandem_core::timing::Timer;
use tandem_core::{IterationReport, ResultStatus, Signal, System};
use tracing::{error, info, warn};

use synthetic::{parse_program_id, SyntheticPlatform, TitleManifest};

const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const REPORT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScriptedSignal {
    iteration: u64,
    signal: Signal,
}

/// Parses `ITER:KIND[:SLOT]`, e.g. `100:save:1` or `250:shutdown`.
fn parse_scripted_signal(s: &str) -> Result<ScriptedSignal, String> {
    let mut parts = s.trim().split(':');
    let iteration = parts
        .next()
        .unwrap_or_default()
        .parse::<u64>()
        .map_err(|e| format!("Invalid iteration in '{}': {}", s, e))?;
    let kind = parts.next().unwrap_or_default();
    let slot = parts
        .next()
        .map(|slot| {
            slot.parse::<u32>()
                .map_err(|e| format!("Invalid slot in '{}': {}", s, e))
        })
        .transpose()?;
    if parts.next().is_some() {
        return Err(format!("Too many fields in '{}'", s));
    }

    let signal = match (kind, slot) {
        ("reset", None) => Signal::Reset,
        ("shutdown", None) => Signal::Shutdown,
        ("load", Some(slot)) => Signal::Load { slot },
        ("save", Some(slot)) => Signal::Save { slot },
        ("load" | "save", None) => return Err(format!("'{}' needs a slot", s)),
        ("reset" | "shutdown", Some(_)) => return Err(format!("'{}' takes no slot", s)),
        _ => {
            return Err(format!(
                "Unknown signal '{}' (expected reset, shutdown, load or save)",
                kind
            ))
        }
    };
    Ok(ScriptedSignal { iteration, signal })
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Tandem multi-core scheduler host", long_about = None)]
struct Cli {
    /// Enable debug-level scheduler logging
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a title manifest and drive the run loop.
    Run(RunArgs),

    /// Print the effective settings for a program id after title overrides.
    TitleInfo(TitleInfoArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the title manifest (YAML)
    #[arg(long)]
    title: PathBuf,

    /// Path to emulator settings (YAML)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Additional title overrides (YAML), applied after the built-in table
    #[arg(long)]
    overrides: Option<PathBuf>,

    /// Maximum number of run loop iterations
    #[arg(long, default_value = "10000")]
    max_iterations: u64,

    /// Control signal to post before an iteration, as ITER:KIND[:SLOT] (repeatable)
    #[arg(long = "signal", value_parser = parse_scripted_signal)]
    signals: Vec<ScriptedSignal>,

    /// Keep save states in this directory instead of memory
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Print a JSON report on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct TitleInfoArgs {
    /// Program id, decimal or 0x-prefixed hex
    #[arg(value_parser = parse_program_id)]
    program_id: u64,

    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long)]
    overrides: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    report_schema_version: &'static str,
    status: &'static str,
    result_status: ResultStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    status_details: String,
    title: String,
    title_id: String,
    manifest_sha256: String,
    num_cores: usize,
    iterations: u64,
    global_ticks: u64,
    core_ticks: Vec<u64>,
    frames: u64,
    signals_sent: u64,
    signals_rejected: u64,
    savestate_errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_iteration: Option<IterationReport>,
    perf: PerfResults,
}

#[derive(Debug, Serialize)]
struct TitleInfo {
    program_id: String,
    applied_overrides: Vec<String>,
    num_cores: usize,
    settings: Settings,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::TitleInfo(args) => title_info(args),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::from_file(path),
        None => Ok(Settings::default()),
    }
}

fn load_overrides(path: Option<&Path>) -> Result<TitleOverrides> {
    let mut overrides = TitleOverrides::builtin();
    if let Some(path) = path {
        overrides.extend(TitleOverrides::from_file(path)?);
    }
    Ok(overrides)
}

fn load_manifest(path: &Path) -> Result<(TitleManifest, String)> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read title manifest {:?}", path))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let hash = format!("{:x}", hasher.finalize());
    let yaml = String::from_utf8(bytes).context("Title manifest is not UTF-8")?;
    Ok((TitleManifest::from_yaml(&yaml)?, hash))
}

fn title_info(args: TitleInfoArgs) -> ExitCode {
    let (mut settings, overrides) = match load_settings(args.settings.as_deref())
        .and_then(|s| Ok((s, load_overrides(args.overrides.as_deref())?)))
    {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let applied_overrides = overrides.apply(args.program_id, &mut settings);
    let info = TitleInfo {
        program_id: format!("{:016X}", args.program_id),
        applied_overrides,
        num_cores: settings.num_cores(),
        settings,
    };
    match serde_yaml::to_string(&info) {
        Ok(yaml) => {
            print!("{}", yaml);
            ExitCode::from(EXIT_OK)
        }
        Err(e) => {
            error!("Failed to render title info: {}", e);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

fn run(args: RunArgs) -> ExitCode {
    let settings = match load_settings(args.settings.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let overrides = match load_overrides(args.overrides.as_deref()) {
        Ok(o) => o,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let (manifest, manifest_sha256) = match load_manifest(&args.title) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let title = manifest.name.clone();
    let platform = SyntheticPlatform::new(args.title.clone(), manifest);
    let frames = platform.frame_counter();
    let mut system = System::new(Box::new(platform), settings).with_overrides(overrides);
    if let Some(dir) = &args.state_dir {
        system = system.with_save_state_store(Box::new(DirectoryStore::new(dir)));
    }

    let mut report = RunReport {
        report_schema_version: REPORT_SCHEMA_VERSION,
        status: "finished",
        result_status: ResultStatus::Success,
        status_details: String::new(),
        title,
        title_id: String::new(),
        manifest_sha256,
        num_cores: 0,
        iterations: 0,
        global_ticks: 0,
        core_ticks: Vec::new(),
        frames: 0,
        signals_sent: 0,
        signals_rejected: 0,
        savestate_errors: 0,
        last_iteration: None,
        perf: PerfResults::default(),
    };

    let status = system.load(&args.title);
    if status.is_error() {
        error!(
            "Failed to load {:?}: {:?} {}",
            args.title,
            status,
            system.status_details()
        );
        report.status = "load_failed";
        report.result_status = status;
        report.status_details = system.status_details().to_string();
        emit_report(&report, args.json);
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }
    info!(
        "Running {:016X} on {} core(s) for up to {} iterations",
        system.title_id(),
        system.num_cores(),
        args.max_iterations
    );

    let mut script = args.signals.clone();
    script.sort_by_key(|s| s.iteration);
    let mut script = script.into_iter().peekable();
    let sender = system.signal_sender();
    let mut last_frames = frames.load(Ordering::SeqCst);

    for iteration in 0..args.max_iterations {
        while let Some(scripted) = script.next_if(|s| s.iteration <= iteration) {
            if sender.send(scripted.signal) {
                report.signals_sent += 1;
            } else {
                report.signals_rejected += 1;
            }
        }

        let status = system.run_loop();
        report.iterations += 1;

        let frames_now = frames.load(Ordering::SeqCst);
        if frames_now > last_frames {
            if let Some(perf) = system.perf_stats() {
                perf.end_system_frame();
                perf.end_game_frame();
                perf.begin_system_frame();
            }
        }
        last_frames = frames_now;

        match status {
            ResultStatus::Success => {}
            ResultStatus::ShutdownRequested => {
                info!("Shutdown requested after {} iterations", report.iterations);
                report.status = "shutdown_requested";
                break;
            }
            ResultStatus::ErrorSavestate => {
                warn!("Save state failed: {}", system.status_details());
                report.savestate_errors += 1;
            }
            other => {
                error!("Run loop reported {:?}: {}", other, system.status_details());
            }
        }

        if !system.is_powered_on() {
            error!("Session ended unexpectedly: {}", system.status_details());
            report.status = "powered_off";
            break;
        }
    }

    report.result_status = system.status();
    report.status_details = system.status_details().to_string();
    report.title_id = format!("{:016X}", system.title_id());
    report.num_cores = system.num_cores();
    if let Some(timing) = system.timing() {
        report.global_ticks = timing.global_ticks();
        report.core_ticks = timing.timers().iter().map(Timer::ticks).collect();
    }
    report.frames = frames.load(Ordering::SeqCst);
    report.last_iteration = Some(system.last_report().clone());
    report.perf = system.get_and_reset_perf_stats();
    system.shutdown();

    emit_report(&report, args.json);
    if report.status == "powered_off" {
        ExitCode::from(EXIT_RUNTIME_ERROR)
    } else {
        ExitCode::from(EXIT_OK)
    }
}

fn emit_report(report: &RunReport, json: bool) {
    if json {
        match serde_json::to_string(report) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to serialize report: {}", e),
        }
        return;
    }

    info!("Run loop finished: {}", report.status);
    info!("Iterations: {}", report.iterations);
    info!("Global ticks: {}", report.global_ticks);
    info!("Core ticks: {:?}", report.core_ticks);
    info!("Frames: {}", report.frames);
    info!(
        "Performance: {:.1} system fps, {:.1} game fps, {:.2}% speed",
        report.perf.system_fps,
        report.perf.game_fps,
        report.perf.emulation_speed * 100.0
    );
}
