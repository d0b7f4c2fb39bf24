//! ASCII elevation grid decoding.
//!
//! Tiles are stored in the Arc/Info ASCII grid format ("AAIGrid"): a short
//! header of `key value` pairs followed by one line of whitespace-separated
//! integer samples per grid row, north row first:
//!
//! ```text
//! ncols         1201
//! nrows         1201
//! xllcorner     11.0
//! yllcorner     48.0
//! cellsize      0.000833
//! NODATA_value  -9999
//! 520 521 523 ...
//! 519 520 522 ...
//! ```
//!
//! Any dimension mismatch is a hard decode failure: a short or long data
//! line, missing `ncols`/`nrows` before the data section, or fewer than
//! `nrows` data lines all reject the file instead of padding it. Content
//! after row `nrows` is not read.

use thiserror::Error;

/// Output-format identifier, used both as the cache file extension and as
/// the `outputFormat` query parameter on the tile source URL.
pub const GRID_FORMAT: &str = "AAIGrid";

/// Upper bound on `ncols * nrows` for a decodable grid. The largest tile in
/// common use is 1/3-arc-second at 10801 x 10801, about 117M samples.
const MAX_SAMPLES: usize = 128 * 1024 * 1024;

/// Errors produced while decoding a grid file.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("data section reached without positive ncols/nrows in header")]
    MissingDimensions,

    #[error("invalid header value for {key}: {value:?}")]
    InvalidHeader { key: String, value: String },

    #[error("grid dimensions {ncols} x {nrows} exceed the supported tile size")]
    Oversized { ncols: usize, nrows: usize },

    #[error("data row {row} has {found} samples, expected {expected}")]
    RowLength {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("grid ended after {found} data rows, expected {expected}")]
    RowCount { expected: usize, found: usize },

    #[error("sample at row {row}, column {col} is not a 16-bit integer: {value:?}")]
    Sample {
        row: usize,
        col: usize,
        value: String,
    },
}

/// A decoded elevation grid: `ncols x nrows` signed 16-bit samples,
/// row-major, row 0 at the north edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationGrid {
    ncols: usize,
    nrows: usize,
    samples: Vec<i16>,
}

impl ElevationGrid {
    /// Parses grid text into a sample array.
    pub fn decode(text: &str) -> Result<Self, GridError> {
        let mut lines = text.lines();
        let mut ncols: Option<usize> = None;
        let mut nrows: Option<usize> = None;
        let mut first_data_line: Option<&str> = None;

        for line in lines.by_ref() {
            let mut tokens = line.split_whitespace();
            let Some(first) = tokens.next() else {
                continue;
            };
            // The first token of a data line is a number; header keys never
            // are.
            if first.parse::<f64>().is_ok() {
                first_data_line = Some(line);
                break;
            }
            let value = tokens.next().unwrap_or("");
            match first.to_ascii_lowercase().as_str() {
                "ncols" => ncols = Some(parse_dimension("ncols", value)?),
                "nrows" => nrows = Some(parse_dimension("nrows", value)?),
                // Corner coordinates, cell size and the no-data sentinel are
                // accepted but not needed for sampling.
                _ => {}
            }
        }

        let (Some(ncols), Some(nrows)) = (ncols, nrows) else {
            return Err(GridError::MissingDimensions);
        };
        let total = ncols
            .checked_mul(nrows)
            .filter(|&total| total <= MAX_SAMPLES)
            .ok_or(GridError::Oversized { ncols, nrows })?;

        let mut samples = Vec::with_capacity(total);
        let mut row = 0usize;
        for line in first_data_line.into_iter().chain(lines) {
            if row == nrows {
                break;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() != ncols {
                return Err(GridError::RowLength {
                    row,
                    expected: ncols,
                    found: fields.len(),
                });
            }
            for (col, field) in fields.iter().enumerate() {
                let value = field.parse::<i16>().map_err(|_| GridError::Sample {
                    row,
                    col,
                    value: (*field).to_string(),
                })?;
                samples.push(value);
            }
            row += 1;
        }

        if row < nrows {
            return Err(GridError::RowCount {
                expected: nrows,
                found: row,
            });
        }

        Ok(Self {
            ncols,
            nrows,
            samples,
        })
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Sample at `(row, col)`, row 0 = north edge.
    pub fn value_at(&self, row: usize, col: usize) -> i16 {
        debug_assert!(row < self.nrows && col < self.ncols, "grid index out of range");
        self.samples[row * self.ncols + col]
    }
}

fn parse_dimension(key: &str, value: &str) -> Result<usize, GridError> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(GridError::InvalidHeader {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_two_by_two() {
        let grid = ElevationGrid::decode("ncols 2\nnrows 2\n1 2\n3 4\n").unwrap();
        assert_eq!(grid.ncols(), 2);
        assert_eq!(grid.nrows(), 2);
        assert_eq!(grid.value_at(0, 0), 1);
        assert_eq!(grid.value_at(0, 1), 2);
        assert_eq!(grid.value_at(1, 0), 3);
        assert_eq!(grid.value_at(1, 1), 4);
    }

    #[test]
    fn test_decode_full_header() {
        let text = "ncols         3\n\
                    nrows         2\n\
                    xllcorner     11.0\n\
                    yllcorner     48.0\n\
                    cellsize      0.5\n\
                    NODATA_value  -9999\n\
                    10 20 30\n\
                    -5 0 -9999\n";
        let grid = ElevationGrid::decode(text).unwrap();
        assert_eq!(grid.value_at(0, 2), 30);
        assert_eq!(grid.value_at(1, 0), -5);
        assert_eq!(grid.value_at(1, 2), -9999);
    }

    #[test]
    fn test_decode_header_keys_case_insensitive() {
        let grid = ElevationGrid::decode("NCOLS 1\nNrows 1\n7\n").unwrap();
        assert_eq!(grid.value_at(0, 0), 7);
    }

    #[test]
    fn test_decode_ignores_rows_past_nrows() {
        let grid = ElevationGrid::decode("ncols 1\nnrows 1\n5\n6\n7\n").unwrap();
        assert_eq!(grid.nrows(), 1);
        assert_eq!(grid.value_at(0, 0), 5);
    }

    #[test]
    fn test_decode_missing_dimensions() {
        let err = ElevationGrid::decode("xllcorner 1.0\n1 2\n3 4\n").unwrap_err();
        assert!(matches!(err, GridError::MissingDimensions));

        let err = ElevationGrid::decode("ncols 2\n1 2\n").unwrap_err();
        assert!(matches!(err, GridError::MissingDimensions));
    }

    #[test]
    fn test_decode_invalid_dimension_value() {
        let err = ElevationGrid::decode("ncols abc\nnrows 2\n1\n2\n").unwrap_err();
        assert!(matches!(err, GridError::InvalidHeader { .. }));

        let err = ElevationGrid::decode("ncols 0\nnrows 2\n").unwrap_err();
        assert!(matches!(err, GridError::InvalidHeader { .. }));
    }

    #[test]
    fn test_decode_oversized_dimensions_fail() {
        // A dimension pair whose product overflows the sample count must be
        // rejected up front, not reserved.
        let text = "ncols 4294967295\nnrows 4294967295\n1 2\n";
        let err = ElevationGrid::decode(text).unwrap_err();
        assert!(matches!(
            err,
            GridError::Oversized {
                ncols: 4294967295,
                nrows: 4294967295,
            }
        ));

        // Within range for the multiply but far past any real tile.
        let err = ElevationGrid::decode("ncols 100000\nnrows 100000\n1 2\n").unwrap_err();
        assert!(matches!(err, GridError::Oversized { .. }));

        // A real tile header stays under the cap; this one then fails on
        // its missing data section, not on its dimensions.
        let err = ElevationGrid::decode("ncols 1201\nnrows 1201\n").unwrap_err();
        assert!(matches!(err, GridError::RowCount { .. }));
    }

    #[test]
    fn test_decode_short_data_line_fails() {
        let err = ElevationGrid::decode("ncols 3\nnrows 2\n1 2 3\n4 5\n").unwrap_err();
        match err {
            GridError::RowLength {
                row,
                expected,
                found,
            } => {
                assert_eq!(row, 1);
                assert_eq!(expected, 3);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_long_data_line_fails() {
        let err = ElevationGrid::decode("ncols 2\nnrows 2\n1 2 3\n4 5\n").unwrap_err();
        assert!(matches!(err, GridError::RowLength { row: 0, .. }));
    }

    #[test]
    fn test_decode_too_few_rows_fails() {
        let err = ElevationGrid::decode("ncols 2\nnrows 3\n1 2\n3 4\n").unwrap_err();
        match err {
            GridError::RowCount { expected, found } => {
                assert_eq!(expected, 3);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_non_integer_sample_fails() {
        let err = ElevationGrid::decode("ncols 2\nnrows 1\n1 high\n").unwrap_err();
        assert!(matches!(err, GridError::Sample { row: 0, col: 1, .. }));

        // Out of i16 range is rejected too.
        let err = ElevationGrid::decode("ncols 1\nnrows 1\n70000\n").unwrap_err();
        assert!(matches!(err, GridError::Sample { .. }));
    }

    #[test]
    fn test_decode_skips_blank_lines_between_rows() {
        let grid = ElevationGrid::decode("ncols 1\nnrows 2\n1\n\n2\n").unwrap();
        assert_eq!(grid.value_at(1, 0), 2);
    }
}
