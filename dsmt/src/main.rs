//! dsmt - drive an in-process dsmc cluster from the command line.
//!
//! Boots hosts over the loopback network, runs a named coherence scenario
//! to quiescence and prints each host's directory dump and statistics.

mod commands;
mod config;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{run_init, run_scenarios, run_simulate, InitArgs, Scenario, SimulateArgs};
use config::Config;
use error::{DsmtError, Result};

/// dsmt - coherence directory simulator
#[derive(Parser, Debug)]
#[command(name = "dsmt")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run coherence scenarios on an in-process dsmc cluster", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output (logs every protocol event)
    #[arg(short, long, global = true, env = "DSMT_VERBOSE")]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "DSMT_CONFIG")]
    config: Option<PathBuf>,

    /// Disable color output
    #[arg(long, global = true, env = "DSMT_NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scenario on a simulated cluster
    Simulate(SimulateCommand),

    /// Write a default dsmt.toml
    Init(InitCommand),

    /// List the available scenarios
    Scenarios,
}

#[derive(Parser, Debug)]
struct SimulateCommand {
    /// Scenario to run
    #[arg(short, long, value_enum)]
    scenario: Scenario,

    /// Number of hosts (default: from config)
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u32).range(1..=1024))]
    hosts: Option<u32>,

    /// Rounds after which the cluster counts as stuck (default: from config)
    #[arg(short, long)]
    rounds: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct InitCommand {
    /// Directory to write into (default: current directory)
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Overwrite an existing dsmt.toml
    #[arg(short, long)]
    force: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.no_color)?;

    let config = load_config(cli.config.as_deref())?;

    execute_command(cli.command, cli.verbose, config)
}

/// Route `tracing` events, and the library's `log` records, to stderr.
fn init_logging(verbose: bool, no_color: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let subscriber = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_target(verbose)
        .with_thread_ids(false)
        .with_thread_names(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(subscriber)
        .try_init()
        .map_err(|e| DsmtError::Config(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

fn load_config(config_path: Option<&std::path::Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

fn execute_command(command: Commands, verbose: bool, config: Config) -> Result<()> {
    match command {
        Commands::Simulate(args) => run_simulate(
            SimulateArgs {
                scenario: args.scenario,
                hosts: args.hosts,
                rounds: args.rounds,
                json: args.json,
                verbose,
            },
            &config,
        ),
        Commands::Init(args) => {
            let path = run_init(InitArgs {
                path: args.path,
                force: args.force,
            })?;
            println!("created {}", path.display());
            Ok(())
        },
        Commands::Scenarios => run_scenarios(),
    }
}
