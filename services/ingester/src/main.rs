//! Simulation output ingester.
//!
//! `start` ingests output files into the array store while the simulation
//! runs and stops once the run is complete. `wait` blocks until the
//! simulation and every writer have finished.

mod config_loader;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ingestion::{
    wait_for_path, CompletionWaiter, IngestionError, MasterLog, Orchestrator, RunConfiguration,
};
use netcdf_parser::{silence_hdf5_errors, NetCdfReader};
use storage::ZarrArrayStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Exit code for invalid or missing configuration.
const EXIT_CONFIG: u8 = 2;
/// Exit code for any other failure.
const EXIT_FAILURE: u8 = 99;

#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(about = "Writes simulation output into a tiled array store while the simulation runs")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Run configuration file
    #[arg(
        short = 'f',
        long = "file",
        global = true,
        env = "INGESTER_CONFIG",
        default_value = "/etc/wrf-writer/config.yaml"
    )]
    file: PathBuf,

    /// Shorthand for --log-level debug
    #[arg(long, global = true)]
    debug: bool,

    /// Write partitions in parallel (not supported)
    #[arg(short = 'm', long, global = true)]
    parallel: bool,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Ingest output files until the run is complete
    Start,
    /// Wait until the simulation and every writer have finished
    Wait,
}

fn init_tracing(args: &Args) -> Result<()> {
    let level = if args.debug {
        Level::DEBUG
    } else {
        match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            token.cancel();
        }
    });
}

fn is_config_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<IngestionError>()
            .map_or(false, IngestionError::is_config)
    })
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<IngestionError>(), Some(IngestionError::Cancelled(_))))
}

async fn start(config: &RunConfiguration, cancel: CancellationToken) -> Result<()> {
    silence_hdf5_errors();

    let store = Arc::new(
        ZarrArrayStore::open(&config.paths.store_dir)
            .with_context(|| format!("Failed to open store at {:?}", config.paths.store_dir))?,
    );
    let reader = Arc::new(NetCdfReader::new());

    let orchestrator = Orchestrator::new(config, store, reader)
        .context("Failed to set up ingestion")?
        .exit_on_complete(true);
    let state = orchestrator.run(cancel).await?;
    info!(state = ?state, "Ingestion stopped");
    Ok(())
}

async fn wait(config: &RunConfiguration, cancel: CancellationToken) -> Result<()> {
    let log = MasterLog::new(config.master_log_path(), &config.polling.completion_marker);
    let waiter = CompletionWaiter::new(Box::new(log), config.logs_dir(), config.polling.interval());
    waiter.wait_for_finish(&cancel).await?;
    Ok(())
}

async fn run(args: Args, config: RunConfiguration) -> Result<()> {
    if args.parallel {
        return Err(IngestionError::Unsupported("parallel writing (-m/--parallel)".to_string()).into());
    }

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    wait_for_path(&config.paths.run_dir, config.polling.interval(), &cancel).await?;

    match args.command {
        Command::Start => start(&config, cancel).await,
        Command::Wait => wait(&config, cancel).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if let Err(e) = init_tracing(&args) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::from(EXIT_FAILURE);
    }

    info!(command = ?args.command, config = %args.file.display(), "Starting ingester");

    let config = match config_loader::load_run_config(&args.file) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to load configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    info!(
        run_id = config.run.id.as_deref().unwrap_or_default(),
        out_dir = %config.paths.out_dir.display(),
        store_dir = %config.paths.store_dir.display(),
        "Loaded configuration"
    );

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_cancelled(&e) => {
            info!("Interrupted");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Ingester failed");
            if is_config_error(&e) {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
    }
}
