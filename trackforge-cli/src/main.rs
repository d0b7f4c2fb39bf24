//! TrackForge CLI - command-line interface
//!
//! This binary provides a command-line interface to the TrackForge library:
//! GPX inspection and conversion, terrain elevation lookups, and tile cache
//! maintenance.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::cache::CacheAction;

#[derive(Debug, Parser)]
#[command(
    name = "trackforge",
    version,
    about = "GPX track editing and terrain elevation from the command line"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Inspect a GPX file and report import diagnostics
    Info {
        /// GPX file to inspect
        file: PathBuf,
    },

    /// Import a GPX file and write it back out normalised
    Convert {
        /// Input GPX file
        input: PathBuf,
        /// Output GPX file
        output: PathBuf,
    },

    /// Sample terrain elevation at a coordinate
    Elevation {
        /// Latitude in decimal degrees
        lat: f64,
        /// Longitude in decimal degrees
        lon: f64,
    },

    /// Manage the elevation tile cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Info { file } => commands::info::run(&file),
        Commands::Convert { input, output } => commands::convert::run(&input, &output),
        Commands::Elevation { lat, lon } => commands::elevation::run(lat, lon),
        Commands::Cache { action } => commands::cache::run(action),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
