//! Elevation command - sample terrain height at a coordinate.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use trackforge::config::ConfigFile;
use trackforge::elevation::{ElevationService, HttpTileFetcher, TileEvent};

use crate::error::CliError;

/// Run the elevation command.
pub fn run(lat: f64, lon: f64) -> Result<(), CliError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(CliError::Config(format!(
            "Latitude {lat} is outside -90..90"
        )));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(CliError::Config(format!(
            "Longitude {lon} is outside -180..180"
        )));
    }

    let config = ConfigFile::load().unwrap_or_default();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(sample(config, lat, lon))
}

async fn sample(config: ConfigFile, lat: f64, lon: f64) -> Result<(), CliError> {
    let service_config = config.elevation_config();
    println!("Tile cache: {}", service_config.cache_dir.display());

    let fetcher = HttpTileFetcher::with_timeout(service_config.fetch_timeout)
        .map_err(|e| CliError::Elevation(e.to_string()))?;
    let service = ElevationService::start(service_config, Arc::new(fetcher))
        .map_err(|e| CliError::Elevation(e.to_string()))?;

    // Subscribe before requesting so the ready event cannot slip past.
    let mut events = service.subscribe();
    let tile = service.request_tile(lat, lon, true);
    let key = tile.key();
    println!("Tile {key}: waiting for elevation data...");

    let outcome = loop {
        match events.recv().await {
            Ok(event) if event.key() == key => break event,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Event stream lagged while waiting for tile");
                continue;
            }
            Err(RecvError::Closed) => {
                return Err(CliError::Elevation(
                    "elevation service stopped unexpectedly".to_string(),
                ));
            }
        }
    };

    let result = match outcome {
        TileEvent::Ready(_) => {
            println!("Elevation at {lat:.5}, {lon:.5}: {} m", tile.elevation(lat, lon));
            Ok(())
        }
        TileEvent::Failed(_) => Err(CliError::Elevation(format!(
            "tile {key} could not be downloaded or decoded"
        ))),
    };

    service.shutdown().await;
    result
}
