//! Cache management CLI commands.

use clap::Subcommand;
use trackforge::config::{format_size, ConfigFile};
use trackforge::elevation::{cache_stats, clear_cache};

use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Clear the elevation tile cache, removing all downloaded tiles
    Clear,
    /// Show elevation tile cache statistics
    Stats,
}

/// Run a cache subcommand.
pub fn run(action: CacheAction) -> Result<(), CliError> {
    let config = ConfigFile::load().unwrap_or_default();
    let cache_dir = &config.elevation.cache_directory;

    match action {
        CacheAction::Clear => {
            println!("Clearing tile cache at: {}", cache_dir.display());

            match clear_cache(cache_dir) {
                Ok(removed) => {
                    println!("Deleted {removed} tiles");
                    Ok(())
                }
                Err(e) => Err(CliError::CacheClear(e.to_string())),
            }
        }
        CacheAction::Stats => {
            println!("Tile cache: {}", cache_dir.display());

            match cache_stats(cache_dir) {
                Ok(stats) => {
                    println!("  Tiles: {}", stats.tiles);
                    println!("  Size:  {}", format_size(stats.bytes));
                    Ok(())
                }
                Err(e) => Err(CliError::CacheStats(e.to_string())),
            }
        }
    }
}
