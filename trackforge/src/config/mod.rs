//! User configuration file.
//!
//! Settings live in an INI file under the platform config directory
//! (`~/.config/trackforge/config.ini` on Linux). Every key has a built-in
//! default, so a missing file loads as [`ConfigFile::default`] and a fresh
//! install needs no setup.

use std::io;
use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use crate::elevation::ElevationConfig;

/// Name of the per-user configuration file.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Configuration load/store failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Read(#[from] ini::Error),

    #[error("could not write config file: {0}")]
    Write(#[from] io::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Parsed configuration file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigFile {
    pub elevation: ElevationSection,
    pub gpx: GpxSection,
}

/// `[elevation]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationSection {
    /// Directory holding downloaded tile files.
    pub cache_directory: PathBuf,

    /// Base URL queried for missing tiles.
    pub source_url: String,

    /// Maximum number of tile downloads in flight at once.
    pub max_downloads: usize,
}

impl Default for ElevationSection {
    fn default() -> Self {
        Self {
            cache_directory: default_cache_dir(),
            source_url: crate::elevation::DEFAULT_SOURCE_URL.to_string(),
            max_downloads: crate::elevation::DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// `[gpx]` section.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GpxSection {
    /// Creator stamped on exported files that do not carry one of their
    /// own. Unset means the built-in application creator.
    pub creator: Option<String>,
}

impl ConfigFile {
    /// Loads the configuration from the default path.
    ///
    /// A missing file yields the defaults; a present but unreadable or
    /// invalid file is an error.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Loads the configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let ini = match Ini::load_from_file(path) {
            Ok(ini) => ini,
            Err(ini::Error::Io(error)) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(error) => return Err(error.into()),
        };

        let mut config = Self::default();
        if let Some(section) = ini.section(Some("elevation")) {
            if let Some(dir) = section.get("cache_directory") {
                config.elevation.cache_directory = PathBuf::from(dir);
            }
            if let Some(url) = section.get("source_url") {
                config.elevation.source_url = url.to_string();
            }
            if let Some(max) = section.get("max_downloads") {
                config.elevation.max_downloads =
                    max.trim()
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue {
                            key: "elevation.max_downloads",
                            value: max.to_string(),
                        })?;
            }
        }
        if let Some(section) = ini.section(Some("gpx")) {
            if let Some(creator) = section.get("creator") {
                config.gpx.creator = Some(creator.to_string());
            }
        }
        Ok(config)
    }

    /// Writes the configuration to the default path, creating parent
    /// directories as needed.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Writes the configuration to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut ini = Ini::new();
        ini.with_section(Some("elevation"))
            .set(
                "cache_directory",
                self.elevation.cache_directory.display().to_string(),
            )
            .set("source_url", self.elevation.source_url.as_str())
            .set("max_downloads", self.elevation.max_downloads.to_string());
        if let Some(creator) = &self.gpx.creator {
            ini.with_section(Some("gpx")).set("creator", creator.as_str());
        }
        ini.write_to_file(path)?;
        Ok(())
    }

    /// Elevation service configuration derived from this file.
    pub fn elevation_config(&self) -> ElevationConfig {
        ElevationConfig::new(&self.elevation.cache_directory)
            .with_source_url(self.elevation.source_url.as_str())
            .with_max_in_flight(self.elevation.max_downloads)
    }
}

/// Path of the per-user configuration file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trackforge")
        .join(CONFIG_FILE_NAME)
}

/// Default elevation tile cache directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trackforge")
        .join("elevation")
}

/// Human-readable rendering of a byte count, binary-tiered up to GB.
pub fn format_size(bytes: u64) -> String {
    const STEP: f64 = 1024.0;

    if bytes < 1024 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes as f64 / STEP;
    let mut unit = "KB";
    for next in ["MB", "GB"] {
        if value < STEP {
            break;
        }
        value /= STEP;
        unit = next;
    }
    format!("{value:.2} {unit}")
}
