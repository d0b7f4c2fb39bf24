//! CLI error types.

use thiserror::Error;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration or argument problem.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// GPX import aborted; the file is unusable.
    #[error("Import failed: {0}")]
    Import(#[from] trackforge::gpx::ImportError),

    /// GPX export failed.
    #[error("Export failed: {0}")]
    Export(#[from] trackforge::gpx::ExportError),

    /// Elevation lookup failed.
    #[error("Elevation lookup failed: {0}")]
    Elevation(String),

    /// Tile cache wipe failed.
    #[error("Cache clear failed: {0}")]
    CacheClear(String),

    /// Tile cache inspection failed.
    #[error("Cache stats failed: {0}")]
    CacheStats(String),
}
