//! runwatch-replay: debug harness for the run-progress aggregator.
//!
//! Feeds a captured automation log (and optionally a JSONL file of state
//! patches) through a fresh session and prints the final snapshot as JSON.
//! Useful for checking how a new log format is attributed to shards.

mod logging;
mod replay;

use clap::Parser;
use runwatch_core::{
    default_config_path, load_engine_config, load_engine_config_strict, EngineConfig, Result,
    RunwatchError, SessionController,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "runwatch-replay")]
#[command(about = "Replay a captured run log through the progress aggregator")]
#[command(version)]
struct Cli {
    /// Captured log: `<run_id>\t<stdout|stderr|patch>\t<text>` or plain lines
    #[arg(value_name = "LOG")]
    log: PathBuf,

    /// Run id for plain lines without a run column
    #[arg(long, default_value = "")]
    run_id: String,

    /// JSONL file of `{"run_id": ..., "patch": {...}}`, applied after the log
    #[arg(long, value_name = "PATH")]
    patches: Option<PathBuf>,

    /// Expected shard ids, comma separated
    #[arg(long, value_delimiter = ',')]
    profiles: Vec<String>,

    /// Run ids owned by this session; arms the run filter
    #[arg(long = "active-run", value_name = "RUN_ID")]
    active_runs: Vec<String>,

    /// Floor for the expected link target
    #[arg(long)]
    target: Option<u64>,

    /// Engine config file (defaults to ~/.runwatch/config.json if present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write logs to a daily-rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    let _logging_guard = logging::init(cli.log_dir.as_deref());

    if let Err(e) = run(&cli) {
        tracing::error!(error = %e, "runwatch-replay failed");
        std::process::exit(1);
    }
}

fn resolve_config(cli: &Cli) -> Result<EngineConfig> {
    let config = match &cli.config {
        Some(path) => load_engine_config_strict(path)?,
        None => default_config_path()
            .map(|path| load_engine_config(&path))
            .unwrap_or_default(),
    };
    Ok(config.with_env_overrides())
}

fn run(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    tracing::debug!(?config, "Engine config resolved");

    let mut events = replay::parse_capture(&replay::read_input(&cli.log)?, &cli.run_id)?;
    if let Some(path) = &cli.patches {
        events.extend(replay::parse_patch_file(
            &replay::read_input(path)?,
            &cli.run_id,
        )?);
    }

    let mut controller = SessionController::with_config(config);
    controller.reset();
    if let Some(target) = cli.target {
        controller.set_expected_shard_target(target);
    }
    if !cli.profiles.is_empty() {
        controller.set_shard_profiles(&cli.profiles);
    }
    for run_id in &cli.active_runs {
        controller.set_active_run_id(run_id);
    }

    let stats = replay::replay(&mut controller, &events);
    tracing::info!(
        events = events.len(),
        applied = stats.applied,
        ignored = stats.ignored,
        "Replay complete"
    );

    let snapshot = controller.snapshot();
    let json = serde_json::to_string_pretty(&snapshot).map_err(|source| RunwatchError::Json {
        context: "serializing snapshot".to_string(),
        source,
    })?;
    println!("{json}");

    controller.dispose();
    Ok(())
}
