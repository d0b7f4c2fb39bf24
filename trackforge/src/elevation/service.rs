//! Elevation tile service.
//!
//! The [`ElevationService`] owns a catalog of [`ElevationTile`]s and a
//! background daemon task that acquires missing tiles:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       ElevationDaemon                            │
//! │                                                                  │
//! │  Acquire ──► ┌────────────┐                                      │
//! │              │ Cache file │──► Present ──► Decode (blocking task)│
//! │              └─────┬──────┘                                      │
//! │                    │ Missing                                     │
//! │                    ▼                                             │
//! │              ┌────────────┐   drain tick   ┌──────────────┐      │
//! │              │ FIFO queue │───────────────►│ Fetch (max 2)│      │
//! │              └────────────┘                └──────┬───────┘      │
//! │                                                   ▼              │
//! │                                            Decode, then          │
//! │                                            broadcast Ready/Failed│
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`ElevationService::request_tile`] never blocks: it returns the tile
//! handle synchronously and posts an acquire command to the daemon. All
//! ready/failed notifications are emitted from the daemon task, so a caller
//! that subscribes before requesting always stores the returned handle
//! before it can observe an event for it, even when the tile was already
//! cached.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::fetch::{FetchError, TileFetcher, DEFAULT_FETCH_TIMEOUT};
use super::grid::{ElevationGrid, GridError, GRID_FORMAT};
use super::tile::{ElevationTile, TileKey, TileState};

// =============================================================================
// Configuration
// =============================================================================

/// Default maximum number of downloads in flight at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 2;

/// Default period of the download queue drain tick.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(250);

/// Default capacity of the tile event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default elevation data endpoint.
///
/// The tile bounding box and output format are appended as query
/// parameters.
pub const DEFAULT_SOURCE_URL: &str =
    "https://portal.opentopography.org/API/globaldem?demtype=SRTMGL3";

/// Configuration for the elevation service.
#[derive(Debug, Clone)]
pub struct ElevationConfig {
    /// Directory holding downloaded tile files.
    pub cache_dir: PathBuf,

    /// Base URL queried for missing tiles.
    pub source_url: String,

    /// Maximum number of downloads in flight at once.
    pub max_in_flight: usize,

    /// Period of the queue drain tick.
    pub drain_interval: Duration,

    /// Timeout for a single tile download.
    pub fetch_timeout: Duration,
}

impl ElevationConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            source_url: DEFAULT_SOURCE_URL.to_string(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = url.into();
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        // At least one download slot, or the queue would never drain.
        self.max_in_flight = max.max(1);
        self
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

// =============================================================================
// Events and errors
// =============================================================================

/// Broadcast notification about a tile acquisition outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEvent {
    /// Samples are attached; lookups on the tile will succeed.
    Ready(TileKey),
    /// Download or decode failed; the tile stays retryable.
    Failed(TileKey),
}

impl TileEvent {
    pub fn key(&self) -> TileKey {
        match self {
            TileEvent::Ready(key) | TileEvent::Failed(key) => *key,
        }
    }
}

/// Errors produced by the elevation service.
#[derive(Debug, Error)]
pub enum ElevationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("grid decode failed: {0}")]
    Grid(#[from] GridError),

    #[error("tile fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Commands consumed by the daemon task.
enum Command {
    /// Start or re-check acquisition for a tile.
    Acquire {
        key: TileKey,
        notify_if_loaded: bool,
    },
    /// A download finished.
    FetchDone {
        key: TileKey,
        result: Result<(), FetchError>,
    },
    /// A background decode finished.
    DecodeDone {
        key: TileKey,
        result: Result<ElevationGrid, ElevationError>,
    },
}

// =============================================================================
// Service handle
// =============================================================================

type TileCatalog = Arc<Mutex<HashMap<TileKey, Arc<ElevationTile>>>>;

/// Handle to a running elevation service.
pub struct ElevationService {
    catalog: TileCatalog,
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<TileEvent>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ElevationService {
    /// Creates the cache directory and spawns the daemon task.
    pub fn start(
        config: ElevationConfig,
        fetcher: Arc<dyn TileFetcher>,
    ) -> Result<Self, ElevationError> {
        std::fs::create_dir_all(&config.cache_dir)?;

        let catalog: TileCatalog = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let shutdown = CancellationToken::new();

        let daemon = ElevationDaemon {
            config,
            fetcher,
            catalog: Arc::clone(&catalog),
            cmd_tx: cmd_tx.clone(),
            cmd_rx,
            events: events.clone(),
            queue: VecDeque::new(),
            in_flight: 0,
            ticker: None,
        };
        let task = tokio::spawn(daemon.run(shutdown.clone()));

        Ok(Self {
            catalog,
            cmd_tx,
            events,
            shutdown,
            task,
        })
    }

    /// Subscribes to ready/failed notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TileEvent> {
        self.events.subscribe()
    }

    /// Returns the tile covering a coordinate, creating it on first request.
    ///
    /// Never blocks. The returned handle may not be loaded yet; subscribe to
    /// events or poll [`ElevationTile::state`]. With `notify_if_loaded` set,
    /// requesting an already-loaded tile emits a fresh [`TileEvent::Ready`]
    /// so the caller does not need a separate cached/fresh code path.
    pub fn request_tile(&self, lat: f64, lon: f64, notify_if_loaded: bool) -> Arc<ElevationTile> {
        let key = TileKey::for_coordinate(lat, lon);
        let tile = {
            let mut catalog = self.catalog.lock();
            Arc::clone(
                catalog
                    .entry(key)
                    .or_insert_with(|| Arc::new(ElevationTile::new(key))),
            )
        };
        if self
            .cmd_tx
            .send(Command::Acquire {
                key,
                notify_if_loaded,
            })
            .is_err()
        {
            warn!(tile = %key, "Elevation service stopped; tile will not be acquired");
        }
        tile
    }

    /// Tile handle for a key, if one was ever requested.
    pub fn tile(&self, key: TileKey) -> Option<Arc<ElevationTile>> {
        self.catalog.lock().get(&key).cloned()
    }

    /// Elevation in metres at a coordinate; 0 unless a loaded tile covers it.
    pub fn sample(&self, lat: f64, lon: f64) -> i16 {
        let key = TileKey::for_coordinate(lat, lon);
        self.tile(key)
            .map(|tile| tile.elevation(lat, lon))
            .unwrap_or(0)
    }

    /// Stops the daemon task and waits for it to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(error) = self.task.await {
            warn!(%error, "Elevation daemon task join failed");
        }
    }
}

// =============================================================================
// Daemon
// =============================================================================

/// The elevation daemon.
///
/// Single consumer of the command channel; all tile state transitions and
/// event emissions happen on this task. Spawned fetches and decodes report
/// back via [`Command`] messages instead of touching shared state.
struct ElevationDaemon {
    config: ElevationConfig,
    fetcher: Arc<dyn TileFetcher>,
    catalog: TileCatalog,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<TileEvent>,
    /// Keys waiting for a download slot, oldest first.
    queue: VecDeque<TileKey>,
    /// Downloads currently running.
    in_flight: usize,
    /// Drain tick, present only while the queue has work.
    ticker: Option<Interval>,
}

impl ElevationDaemon {
    /// Runs the daemon until shutdown is signalled.
    async fn run(mut self, shutdown: CancellationToken) {
        info!("Elevation daemon starting");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Elevation daemon shutting down");
                    break;
                }

                command = self.cmd_rx.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command).await;
                }

                _ = Self::next_tick(self.ticker.as_mut()) => {
                    self.drain_queue();
                }
            }
        }

        info!("Elevation daemon stopped");
    }

    /// Resolves on the next drain tick; never resolves while the ticker is
    /// stopped.
    async fn next_tick(ticker: Option<&mut Interval>) {
        match ticker {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Acquire {
                key,
                notify_if_loaded,
            } => self.handle_acquire(key, notify_if_loaded).await,
            Command::FetchDone { key, result } => self.handle_fetch_done(key, result),
            Command::DecodeDone { key, result } => self.handle_decode_done(key, result),
        }
    }

    async fn handle_acquire(&mut self, key: TileKey, notify_if_loaded: bool) {
        let Some(tile) = self.tile(key) else {
            warn!(tile = %key, "Acquire for a tile missing from the catalog");
            return;
        };
        match tile.state() {
            TileState::Loaded => {
                if notify_if_loaded {
                    debug!(tile = %key, "Tile already loaded");
                    let _ = self.events.send(TileEvent::Ready(key));
                }
            }
            TileState::Pending => {
                debug!(tile = %key, "Acquisition already in progress");
            }
            TileState::Empty | TileState::Error => {
                self.begin_acquisition(key, &tile).await;
            }
        }
    }

    async fn begin_acquisition(&mut self, key: TileKey, tile: &ElevationTile) {
        let cache_file = self.cache_file(key);
        tile.set_pending();
        match tokio::fs::try_exists(&cache_file).await {
            Ok(true) => {
                debug!(tile = %key, "Cache file present, decoding");
                self.spawn_decode(key, cache_file);
            }
            // An unreadable cache directory counts as a miss; the download
            // recreates it.
            Ok(false) | Err(_) => {
                debug!(tile = %key, "Cache miss, queueing download");
                self.queue.push_back(key);
                self.ensure_ticker();
            }
        }
    }

    fn handle_fetch_done(&mut self, key: TileKey, result: Result<(), FetchError>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let Some(tile) = self.tile(key) else {
            return;
        };
        match result {
            Ok(()) => {
                debug!(tile = %key, "Download complete, decoding");
                self.spawn_decode(key, self.cache_file(key));
            }
            Err(error) => {
                error!(tile = %key, %error, "Tile download failed");
                tile.set_error();
                let _ = self.events.send(TileEvent::Failed(key));
            }
        }
    }

    fn handle_decode_done(&mut self, key: TileKey, result: Result<ElevationGrid, ElevationError>) {
        let Some(tile) = self.tile(key) else {
            return;
        };
        match result {
            Ok(grid) => {
                info!(tile = %key, "Elevation tile loaded");
                tile.attach_grid(grid);
                let _ = self.events.send(TileEvent::Ready(key));
            }
            Err(error) => {
                error!(tile = %key, %error, "Tile decode failed");
                tile.set_error();
                let _ = self.events.send(TileEvent::Failed(key));
            }
        }
    }

    /// Starts up to `max_in_flight` downloads from the head of the queue,
    /// then stops the ticker once nothing is queued or running.
    fn drain_queue(&mut self) {
        while self.in_flight < self.config.max_in_flight {
            let Some(key) = self.queue.pop_front() else {
                break;
            };
            self.start_fetch(key);
        }
        if self.queue.is_empty() && self.in_flight == 0 && self.ticker.take().is_some() {
            debug!("Download queue drained, stopping drain tick");
        }
    }

    fn start_fetch(&mut self, key: TileKey) {
        let url = tile_url(&self.config.source_url, key);
        let dest = self.cache_file(key);
        let fetcher = Arc::clone(&self.fetcher);
        let cmd_tx = self.cmd_tx.clone();
        self.in_flight += 1;
        info!(tile = %key, "Downloading elevation tile");
        debug!(tile = %key, url = %url, "Tile source");
        tokio::spawn(async move {
            let result = fetcher.fetch(&url, &dest).await;
            let _ = cmd_tx.send(Command::FetchDone { key, result });
        });
    }

    /// Reads and decodes a cache file off the daemon task, reporting the
    /// result as a [`Command::DecodeDone`].
    fn spawn_decode(&self, key: TileKey, path: PathBuf) {
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let result = decode_tile_file(path).await;
            let _ = cmd_tx.send(Command::DecodeDone { key, result });
        });
    }

    fn ensure_ticker(&mut self) {
        if self.ticker.is_none() {
            debug!("Starting download queue drain tick");
            let mut interval = tokio::time::interval(self.config.drain_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.ticker = Some(interval);
        }
    }

    fn tile(&self, key: TileKey) -> Option<Arc<ElevationTile>> {
        self.catalog.lock().get(&key).cloned()
    }

    fn cache_file(&self, key: TileKey) -> PathBuf {
        self.config.cache_dir.join(key.cache_file_name())
    }
}

/// Grid parsing is synchronous CPU/IO-bound work, pushed onto a blocking
/// worker so it never stalls the daemon.
async fn decode_tile_file(path: PathBuf) -> Result<ElevationGrid, ElevationError> {
    let text = tokio::fs::read_to_string(&path).await?;
    let grid = tokio::task::spawn_blocking(move || ElevationGrid::decode(&text)).await??;
    Ok(grid)
}

/// Builds the source URL for one tile's bounding box.
fn tile_url(base: &str, key: TileKey) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{base}{separator}south={}&north={}&west={}&east={}&outputFormat={GRID_FORMAT}",
        key.lat_base(),
        key.lat_base() + 1,
        key.lon_base(),
        key.lon_base() + 1,
    )
}
