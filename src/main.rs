//! Fleet Overlord job worker
//!
//! Entry point for the `overlord-jobs` command-line tool.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fleet_overlord::locks::MemoryCoordinator;
use fleet_overlord::providers::NoopProvider;
use fleet_overlord::queue::MemoryQueue;
use fleet_overlord::shutdown::{self, ShutdownState};
use fleet_overlord::store::MemoryStore;
use fleet_overlord::{
    logging, register_builtin_jobs, JobContext, JobExecutor, JobRegistry, LockManager,
    OverlordConfig,
};
use overlord_power::{IpmitoolRunner, PowerDriver};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "overlord-jobs")]
#[command(about = "Bare-metal fleet job worker", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the job queue until interrupted
    Run {
        /// Path to config file (default: /etc/overlord/overlord.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Number of worker threads (overrides jobs.worker_count)
        #[arg(long, short = 'w')]
        workers: Option<usize>,

        /// Log filter directives (overrides logging.filter)
        #[arg(long)]
        log_filter: Option<String>,
    },

    /// Print the effective configuration as JSON
    Config {
        /// Path to config file (default: /etc/overlord/overlord.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            workers,
            log_filter,
        } => run_jobs(config, workers, log_filter),
        Commands::Config { config } => run_config(config),
    }
}

fn load_config(path: Option<PathBuf>) -> OverlordConfig {
    match OverlordConfig::load_or_default(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    }
}

fn run_config(path: Option<PathBuf>) {
    let config = load_config(path);
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing config: {}", e);
            process::exit(1);
        }
    }
}

fn run_jobs(path: Option<PathBuf>, workers: Option<usize>, log_filter: Option<String>) {
    let mut config = load_config(path);
    if let Some(workers) = workers {
        config.jobs.worker_count = workers;
    }
    if let Some(filter) = log_filter {
        config.logging.filter = filter;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        process::exit(1);
    }

    logging::init(&config.logging);

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let locks = Arc::new(LockManager::new(
        Arc::new(MemoryCoordinator::new()),
        config.lock_manager_config(),
    ));
    let power = PowerDriver::new(
        Arc::new(IpmitoolRunner::new(config.ipmitool_config())),
        config.power_driver_config(),
    );
    let ctx = JobContext::new(store, queue, locks.clone(), power, config.job_settings())
        .with_images(Arc::new(NoopProvider))
        .with_network(Arc::new(NoopProvider))
        .with_agent(Arc::new(NoopProvider));

    let mut registry = JobRegistry::new();
    register_builtin_jobs(&mut registry);

    let executor = JobExecutor::new(ctx, registry);
    let shutdown_state = Arc::new(ShutdownState::new());
    let stopper = executor.clone();
    if let Err(e) = shutdown::install(shutdown_state, move || stopper.stop()) {
        error!(error = %e, "failed to install signal handler");
        process::exit(1);
    }

    if let Err(e) = executor.run(config.jobs.worker_count) {
        error!(error = %e, "failed to start workers");
        locks.shutdown();
        process::exit(1);
    }

    locks.shutdown();
    info!("shutdown complete");
}
