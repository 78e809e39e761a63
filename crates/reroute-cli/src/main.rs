//! `reroute` command-line entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use reroute_cli::commands;
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "reroute")]
#[command(about = "Unit reroute engine - scenario validation and simulation")]
#[command(version)]
struct Cli {
    /// Log engine activity at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a scenario file
    Validate {
        /// Scenario file path
        file: PathBuf,
    },

    /// Show which units are active on a location
    Check {
        /// Scenario file path
        file: PathBuf,

        /// Location to check
        location: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Start an engine and visit every route of a scenario
    Simulate {
        /// Scenario file path
        file: PathBuf,

        /// Print one JSON line per route
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    smol::block_on(async {
        match cli.command {
            Commands::Validate { file } => commands::validate::run(&file).await,
            Commands::Check {
                file,
                location,
                json,
            } => commands::check::run(&file, location, json).await,
            Commands::Simulate { file, json } => commands::simulate::run(&file, json).await,
        }
    })
}
