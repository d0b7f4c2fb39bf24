//! Elevation tile subsystem.
//!
//! Terrain elevation is served from 1 degree x 1 degree tiles of signed
//! 16-bit samples, downloaded on demand and cached on disk in the ASCII
//! grid format:
//!
//! - [`TileKey`] / [`ElevationTile`]: tile identity, the
//!   Empty -> Pending -> Loaded | Error state machine, and nearest-cell
//!   sampling.
//! - [`ElevationGrid`]: the grid file decoder.
//! - [`TileFetcher`] / [`HttpTileFetcher`]: the download capability.
//! - [`ElevationService`]: catalog + FIFO download queue + background
//!   decode, driven by a single daemon task.
//!
//! See [`service`] for the acquisition flow.

pub mod fetch;
pub mod grid;
pub mod service;
pub mod tile;

pub use fetch::{BoxFuture, FetchError, HttpTileFetcher, TileFetcher, DEFAULT_FETCH_TIMEOUT};
pub use grid::{ElevationGrid, GridError, GRID_FORMAT};
pub use service::{
    ElevationConfig, ElevationError, ElevationService, TileEvent, DEFAULT_DRAIN_INTERVAL,
    DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_IN_FLIGHT, DEFAULT_SOURCE_URL,
};
pub use tile::{ElevationTile, TileKey, TileState};

use std::fs;
use std::io;
use std::path::Path;

/// Cache directory statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of tile files.
    pub tiles: u64,
    /// Total size of tile files in bytes.
    pub bytes: u64,
}

/// Counts tile files and their total size under a cache directory.
///
/// A missing directory counts as empty; files that are not tile files are
/// ignored.
pub fn cache_stats(dir: &Path) -> io::Result<CacheStats> {
    let mut stats = CacheStats::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(stats),
        Err(error) => return Err(error),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if TileKey::from_cache_file_name(name).is_none() {
            continue;
        }
        stats.tiles += 1;
        stats.bytes += entry.metadata()?.len();
    }
    Ok(stats)
}

/// Deletes all tile files under a cache directory, returning the number
/// removed. Unrelated files are left alone.
pub fn clear_cache(dir: &Path) -> io::Result<u64> {
    let mut removed = 0;
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(error) => return Err(error),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if TileKey::from_cache_file_name(name).is_none() {
            continue;
        }
        fs::remove_file(entry.path())?;
        removed += 1;
    }
    Ok(removed)
}
