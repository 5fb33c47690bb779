//! Command-line driver: load settings, set up logging, run one backup pass.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use replidump_core::{MysqlReplica, Orchestrator, Settings};

#[derive(Debug, Parser)]
#[command(name = "replidump", version, about = "Dump, dedup, and rotate MySQL replica backups")]
struct Args {
    /// The settings file to execute.
    #[arg(short = 's', long = "settings-file")]
    settings_file: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // The log may not be initialized yet, so the error goes to
            // stderr unconditionally.
            eprintln!("replidump: {err:#}");
            tracing::error!(error = %format!("{err:#}"), "backup run failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    // The absolute settings path doubles as the run-cache key, so resolve it
    // before anything else looks at it.
    let settings_path = args
        .settings_file
        .canonicalize()
        .with_context(|| format!("cannot resolve settings file {}", args.settings_file.display()))?;
    let settings = Settings::load(&settings_path)?;

    init_tracing(&settings)?;

    // A short random id keeps interleaved concurrent runs apart in a shared
    // logfile.
    let run_id = uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase();
    let span = tracing::info_span!("backup_run", id = %run_id);
    let _guard = span.entered();

    let server = MysqlReplica::connect(&settings)
        .with_context(|| format!("cannot connect to MySQL at {}", settings.mysql.host))?;
    let mut orchestrator = Orchestrator::new(Arc::new(settings), server)?;
    orchestrator.run()?;
    Ok(())
}


fn init_tracing(settings: &Settings) -> anyhow::Result<()> {
    let logfile = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.logging.logfile)
        .with_context(|| {
            format!("cannot open logfile {}", settings.logging.logfile.display())
        })?;

    let filter = EnvFilter::try_new(&settings.logging.loglevel)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Arc::new(logfile)),
        )
        .with(filter)
        .init();
    Ok(())
}
