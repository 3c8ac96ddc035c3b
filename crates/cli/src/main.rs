//! Veil CLI - veil command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;
mod fixture;
mod util;

use cmd::simulate::{SimulateArgs, StateChange};

/// Veil - Per-item hiding for video feeds
#[derive(Parser)]
#[command(name = "veil")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run recomputation passes over a feed fixture
    Simulate {
        /// Feed fixture (JSON element tree)
        feed: PathBuf,
        /// Record store (JSON array of video state records)
        #[arg(long)]
        store: Option<PathBuf>,
        /// Config file (TOML; defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Video ids on screen after the first pass
        #[arg(long = "visible", value_name = "ID")]
        visible: Vec<String>,
        /// Total passes, including the initial full scan (default: 2)
        #[arg(long, default_value = "2")]
        passes: usize,
        /// State writes applied after the passes
        #[arg(long = "set", value_name = "ID=STATE")]
        set: Vec<StateChange>,
    },
    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Config file (defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate a config file
    Validate {
        /// Config file
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            feed,
            store,
            config,
            visible,
            passes,
            set,
        } => {
            cmd::simulate::run(SimulateArgs {
                feed,
                store,
                config,
                visible,
                passes,
                set,
            })
            .await
        }
        Commands::Config(ConfigCommands::Show { config }) => cmd::config::run_show(config.as_deref()).await,
        Commands::Config(ConfigCommands::Validate { config }) => cmd::config::run_validate(&config).await,
    }
}
