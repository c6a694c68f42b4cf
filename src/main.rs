//! Signal tuner - main entry point
//!
//! This binary provides three subcommands:
//! - optimize: Run the genetic search and validate the best configurations
//! - backtest: Evaluate one configuration on train/validation/test
//! - params: Print the parameter space

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "signal-tuner")]
#[command(about = "Self-tuning of trading signal parameters with replay, genetic search and validation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search for better parameters and validate them against the baseline
    Optimize {
        /// Path to configuration file (defaults plus environment when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Population size
        #[arg(long)]
        population: Option<usize>,

        /// Number of generations
        #[arg(long)]
        generations: Option<usize>,

        /// Crossover probability
        #[arg(long)]
        crossover: Option<f64>,

        /// Per-gene mutation probability
        #[arg(long)]
        mutation: Option<f64>,

        /// RNG seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,

        /// Fitness worker threads (default: cores - 1)
        #[arg(long)]
        workers: Option<usize>,

        /// Stop after the current generation once this file exists
        #[arg(long)]
        stop_file: Option<PathBuf>,
    },

    /// Evaluate the baseline (or a saved vector) on every split
    Backtest {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// JSON file holding a configuration vector (array of numbers or a proposal)
        #[arg(long)]
        vector: Option<PathBuf>,
    },

    /// Print the parameter space with bounds and baseline values
    Params {
        /// Also print the decoded baseline configuration
        #[arg(long)]
        resolved: bool,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if file_only {
        // Console belongs to the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(tracing_appender::rolling::never("logs", &log_filename))
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        // File layer - same format without ANSI colors
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(tracing_appender::rolling::never("logs", &log_filename))
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Optimize { .. } => ("optimize", true),
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Params { .. } => ("params", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Optimize {
            config,
            population,
            generations,
            crossover,
            mutation,
            seed,
            workers,
            stop_file,
        } => commands::optimize::run(commands::optimize::OptimizeArgs {
            config,
            population,
            generations,
            crossover,
            mutation,
            seed,
            workers,
            stop_file,
        }),

        Commands::Backtest { config, vector } => commands::backtest::run(config, vector),

        Commands::Params { resolved } => commands::params::run(resolved),
    }
}
