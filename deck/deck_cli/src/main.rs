use clap::{Parser, Subcommand};
use deck_core::utils::LogLevel;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod console;
mod flow;
mod services;

use commands::graph::{execute_graph, GraphArgs};
use commands::login::{execute_login, LoginArgs};
use config::CliConfig;

/// Deck Command Line Interface
///
/// Drives the demo login workflow on a console runner.
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Path to a TOML configuration file
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides RUST_LOG
    #[clap(long, global = true)]
    log_level: Option<LogLevel>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in through the login workflow
    Login(LoginArgs),

    /// Print the login workflow graph
    Graph(GraphArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = CliConfig::load_or_default(cli.config.as_deref())?;
    init_logging(cli.log_level, config.log_level);

    match &cli.command {
        Commands::Login(args) => execute_login(args, &config),
        Commands::Graph(args) => {
            execute_graph(args, &config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Routes `log` records into a stderr subscriber.
///
/// `--log-level` wins over RUST_LOG, which wins over the config file.
fn init_logging(flag: Option<LogLevel>, configured: Option<LogLevel>) {
    let filter = match flag {
        Some(level) => EnvFilter::new(level.as_directive()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(configured.map_or("warn", |level| level.as_directive()))
        }),
    };
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        eprintln!("Logging was already initialized");
    }
}
