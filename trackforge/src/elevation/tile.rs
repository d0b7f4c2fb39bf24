//! Elevation tiles and their cache keys.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use super::grid::{ElevationGrid, GRID_FORMAT};

/// Identity of a 1 degree x 1 degree tile: the integer floor of latitude
/// and longitude of any coordinate it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    lat_base: i32,
    lon_base: i32,
}

impl TileKey {
    pub fn new(lat_base: i32, lon_base: i32) -> Self {
        Self { lat_base, lon_base }
    }

    /// Key of the tile covering a coordinate.
    pub fn for_coordinate(lat: f64, lon: f64) -> Self {
        Self {
            lat_base: lat.floor() as i32,
            lon_base: lon.floor() as i32,
        }
    }

    pub fn lat_base(&self) -> i32 {
        self.lat_base
    }

    pub fn lon_base(&self) -> i32 {
        self.lon_base
    }

    /// True when the coordinate falls inside this tile's cell.
    pub fn covers(&self, lat: f64, lon: f64) -> bool {
        let lat_off = lat - f64::from(self.lat_base);
        let lon_off = lon - f64::from(self.lon_base);
        (0.0..1.0).contains(&lat_off) && (0.0..1.0).contains(&lon_off)
    }

    /// Deterministic cache file name for this tile.
    ///
    /// # Examples
    ///
    /// ```
    /// use trackforge::elevation::TileKey;
    ///
    /// let key = TileKey::for_coordinate(48.12, 11.57);
    /// assert_eq!(key.cache_file_name(), "N48E011.AAIGrid");
    ///
    /// let key = TileKey::for_coordinate(-33.87, 151.21);
    /// assert_eq!(key.cache_file_name(), "S34E151.AAIGrid");
    /// ```
    pub fn cache_file_name(&self) -> String {
        format!("{self}.{GRID_FORMAT}")
    }

    /// Parses a cache file name back into a key; `None` for anything that
    /// is not a tile file.
    pub fn from_cache_file_name(name: &str) -> Option<Self> {
        let captures = cache_name_pattern().captures(name)?;
        let lat_base = hemisphere_value(&captures[1], &captures[2])?;
        let lon_base = hemisphere_value(&captures[3], &captures[4])?;
        Some(Self::new(lat_base, lon_base))
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lat_letter = match self.lat_base.cmp(&0) {
            Ordering::Greater => 'N',
            Ordering::Less => 'S',
            Ordering::Equal => 'Z',
        };
        let lon_letter = match self.lon_base.cmp(&0) {
            Ordering::Greater => 'E',
            Ordering::Less => 'W',
            Ordering::Equal => 'Z',
        };
        write!(
            f,
            "{}{:02}{}{:03}",
            lat_letter,
            self.lat_base.abs(),
            lon_letter,
            self.lon_base.abs()
        )
    }
}

/// Cache file name pattern.
///
/// Hemisphere letter and two-digit latitude, hemisphere letter and
/// three-digit longitude, grid format suffix. `Z` marks a zero base.
fn cache_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"^([NSZ])(\d{{2}})([EWZ])(\d{{3}})\.{GRID_FORMAT}$")).unwrap()
    })
}

fn hemisphere_value(letter: &str, digits: &str) -> Option<i32> {
    let value: i32 = digits.parse().ok()?;
    match letter {
        "N" | "E" => Some(value),
        "S" | "W" => Some(-value),
        // Z is only valid for a zero base.
        _ => (value == 0).then_some(0),
    }
}

/// Acquisition state of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    /// Created, no acquisition attempted yet.
    Empty,
    /// Queued or downloading or decoding.
    Pending,
    /// Samples attached, ready to serve lookups.
    Loaded,
    /// Last acquisition failed; a new request retries.
    Error,
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileState::Empty => write!(f, "empty"),
            TileState::Pending => write!(f, "pending"),
            TileState::Loaded => write!(f, "loaded"),
            TileState::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug)]
struct TileInner {
    state: TileState,
    grid: Option<ElevationGrid>,
}

/// One 1 degree x 1 degree grid of elevation samples.
///
/// The key is immutable; state and samples live behind a read-write lock so
/// lookups can run concurrently with acquisition progress.
#[derive(Debug)]
pub struct ElevationTile {
    key: TileKey,
    inner: RwLock<TileInner>,
}

impl ElevationTile {
    pub fn new(key: TileKey) -> Self {
        Self {
            key,
            inner: RwLock::new(TileInner {
                state: TileState::Empty,
                grid: None,
            }),
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn state(&self) -> TileState {
        self.inner.read().state
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == TileState::Loaded
    }

    pub fn set_pending(&self) {
        self.inner.write().state = TileState::Pending;
    }

    pub fn set_error(&self) {
        self.inner.write().state = TileState::Error;
    }

    /// Attaches decoded samples and flips the state to Loaded in a single
    /// write critical section, so readers never observe Loaded without
    /// samples.
    pub fn attach_grid(&self, grid: ElevationGrid) {
        let mut inner = self.inner.write();
        inner.grid = Some(grid);
        inner.state = TileState::Loaded;
    }

    /// Elevation in metres at a coordinate, by nearest-cell lookup.
    ///
    /// Returns 0 when the tile is not Loaded or the coordinate falls
    /// outside the tile's cell.
    pub fn elevation(&self, lat: f64, lon: f64) -> i16 {
        let inner = self.inner.read();
        if inner.state != TileState::Loaded {
            return 0;
        }
        let Some(grid) = inner.grid.as_ref() else {
            return 0;
        };
        let lat_off = lat - f64::from(self.key.lat_base);
        let lon_off = lon - f64::from(self.key.lon_base);
        if !(0.0..1.0).contains(&lat_off) || !(0.0..1.0).contains(&lon_off) {
            debug!(tile = %self.key, lat, lon, "Coordinate outside tile cell");
            return 0;
        }
        let nrows = grid.nrows();
        let ncols = grid.ncols();
        // Row 0 is the north edge; the south edge (lat_off == 0) clamps
        // onto the last row.
        let row = (((1.0 - lat_off) * nrows as f64) as usize).min(nrows - 1);
        let col = ((lon_off * ncols as f64) as usize).min(ncols - 1);
        grid.value_at(row, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_2x2(key: TileKey) -> ElevationTile {
        // Row 0 (north): 1 2, row 1 (south): 3 4.
        let grid = ElevationGrid::decode("ncols 2\nnrows 2\n1 2\n3 4\n").unwrap();
        let tile = ElevationTile::new(key);
        tile.attach_grid(grid);
        tile
    }

    #[test]
    fn test_key_floors_coordinates() {
        assert_eq!(TileKey::for_coordinate(48.9, 11.1), TileKey::new(48, 11));
        assert_eq!(TileKey::for_coordinate(-0.5, -0.5), TileKey::new(-1, -1));
        assert_eq!(TileKey::for_coordinate(-33.87, 151.21), TileKey::new(-34, 151));
        assert_eq!(TileKey::for_coordinate(0.0, 0.0), TileKey::new(0, 0));
    }

    #[test]
    fn test_covers_boundaries() {
        let key = TileKey::new(48, 11);
        assert!(key.covers(48.0, 11.0));
        assert!(key.covers(48.999, 11.999));
        assert!(!key.covers(49.0, 11.5));
        assert!(!key.covers(48.5, 12.0));
        assert!(!key.covers(47.999, 11.5));
    }

    #[test]
    fn test_cache_file_name_hemispheres() {
        assert_eq!(TileKey::new(48, 11).cache_file_name(), "N48E011.AAIGrid");
        assert_eq!(TileKey::new(-34, 151).cache_file_name(), "S34E151.AAIGrid");
        assert_eq!(TileKey::new(7, -80).cache_file_name(), "N07W080.AAIGrid");
        assert_eq!(TileKey::new(0, 0).cache_file_name(), "Z00Z000.AAIGrid");
        assert_eq!(TileKey::new(0, -1).cache_file_name(), "Z00W001.AAIGrid");
    }

    #[test]
    fn test_from_cache_file_name() {
        assert_eq!(
            TileKey::from_cache_file_name("N48E011.AAIGrid"),
            Some(TileKey::new(48, 11))
        );
        assert_eq!(
            TileKey::from_cache_file_name("S34W151.AAIGrid"),
            Some(TileKey::new(-34, -151))
        );
        assert_eq!(
            TileKey::from_cache_file_name("Z00Z000.AAIGrid"),
            Some(TileKey::new(0, 0))
        );
    }

    #[test]
    fn test_from_cache_file_name_rejects() {
        // Z with a non-zero base is not a name we ever write.
        assert_eq!(TileKey::from_cache_file_name("Z05E011.AAIGrid"), None);
        assert_eq!(TileKey::from_cache_file_name("N48E011.txt"), None);
        assert_eq!(TileKey::from_cache_file_name("n48e011.AAIGrid"), None);
        assert_eq!(TileKey::from_cache_file_name("N48E11.AAIGrid"), None);
        assert_eq!(TileKey::from_cache_file_name("notatile"), None);
    }

    #[test]
    fn test_new_tile_is_empty() {
        let tile = ElevationTile::new(TileKey::new(48, 11));
        assert_eq!(tile.state(), TileState::Empty);
        assert!(!tile.is_loaded());
        assert_eq!(tile.elevation(48.5, 11.5), 0);
    }

    #[test]
    fn test_state_transitions() {
        let tile = ElevationTile::new(TileKey::new(48, 11));
        tile.set_pending();
        assert_eq!(tile.state(), TileState::Pending);
        tile.set_error();
        assert_eq!(tile.state(), TileState::Error);
        // Retry path goes back through Pending before Loaded.
        tile.set_pending();
        let grid = ElevationGrid::decode("ncols 1\nnrows 1\n42\n").unwrap();
        tile.attach_grid(grid);
        assert!(tile.is_loaded());
    }

    #[test]
    fn test_elevation_nearest_cell() {
        let tile = loaded_2x2(TileKey::new(0, 0));
        // North-west quadrant hits row 0, col 0.
        assert_eq!(tile.elevation(0.75, 0.25), 1);
        // North-east quadrant.
        assert_eq!(tile.elevation(0.75, 0.75), 2);
        // South-west quadrant.
        assert_eq!(tile.elevation(0.25, 0.25), 3);
        // South-east quadrant.
        assert_eq!(tile.elevation(0.25, 0.75), 4);
    }

    #[test]
    fn test_elevation_edge_clamps() {
        let tile = loaded_2x2(TileKey::new(0, 0));
        // The south edge clamps onto the last row instead of indexing
        // past the grid.
        assert_eq!(tile.elevation(0.0, 0.0), 3);
        assert_eq!(tile.elevation(0.0, 0.999), 4);
        // North edge is row 0.
        assert_eq!(tile.elevation(0.999, 0.0), 1);
    }

    #[test]
    fn test_elevation_outside_cell_is_zero() {
        let tile = loaded_2x2(TileKey::new(0, 0));
        assert_eq!(tile.elevation(1.5, 0.5), 0);
        assert_eq!(tile.elevation(-0.5, 0.5), 0);
        assert_eq!(tile.elevation(0.5, 1.0), 0);
    }

    #[test]
    fn test_elevation_negative_base() {
        let tile = loaded_2x2(TileKey::new(-34, 151));
        assert_eq!(tile.elevation(-33.25, 151.25), 1);
        assert_eq!(tile.elevation(-33.75, 151.75), 4);
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_key_covers_own_coordinate(
                lat in -89.0..89.0_f64,
                lon in -179.0..179.0_f64
            ) {
                let key = TileKey::for_coordinate(lat, lon);
                prop_assert!(key.covers(lat, lon));
                prop_assert!(f64::from(key.lat_base()) <= lat);
                prop_assert!(f64::from(key.lon_base()) <= lon);
            }

            #[test]
            fn test_cache_file_name_roundtrip(
                lat_base in -89i32..=89,
                lon_base in -179i32..=179
            ) {
                let key = TileKey::new(lat_base, lon_base);
                let parsed = TileKey::from_cache_file_name(&key.cache_file_name());
                prop_assert_eq!(parsed, Some(key));
            }
        }
    }
}
