//! Spatial grid index.
//!
//! The world is cut into square lat/lng cells whose edge length depends on
//! the viewer's zoom level. A cell id doubles as a broadcast "room": a
//! connection joins the rooms covering its viewport, and a position update
//! is offered to the members of the room containing the point. Everything
//! here is pure; the live room membership lives in the engine.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::geo::{normalize_bounds, Bounds};

/// Cell size used when a viewport arrives without a usable zoom level.
pub const DEFAULT_CELL_SIZE: CellSize = CellSize(0.1);

/// Zoom thresholds (inclusive lower bound) and their cell edge in degrees.
const ZOOM_STEPS: &[(f64, f64)] = &[
    (16.0, 0.01),
    (14.0, 0.02),
    (12.0, 0.05),
    (10.0, 0.1),
    (8.0, 0.25),
    (6.0, 0.5),
    (4.0, 1.0),
];
const COARSEST_CELL: f64 = 2.0;

/// Cell edge length in degrees. Hashable so it can key reference counts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellSize(f64);

impl CellSize {
    /// Wrap a positive, finite size. Anything else falls back to the default.
    pub fn new(degrees: f64) -> Self {
        if degrees.is_finite() && degrees > 0.0 {
            Self(degrees)
        } else {
            DEFAULT_CELL_SIZE
        }
    }

    pub fn degrees(self) -> f64 {
        self.0
    }
}

impl Eq for CellSize {}

impl Hash for CellSize {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for CellSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room key for one grid cell, namespaced by its cell size.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of enumerating the cells under a rectangle.
#[derive(Clone, Debug, Default)]
pub struct CellCover {
    pub cells: Vec<CellId>,
    /// True when the rectangle spans more than `max_cells` cells.
    pub truncated: bool,
}

/// Map a zoom level to a cell size; absent or NaN zoom uses the default.
pub fn cell_size_for_zoom(zoom: Option<f64>) -> CellSize {
    let Some(zoom) = zoom.filter(|z| !z.is_nan()) else {
        return DEFAULT_CELL_SIZE;
    };
    ZOOM_STEPS
        .iter()
        .find(|(threshold, _)| zoom >= *threshold)
        .map(|(_, size)| CellSize(*size))
        .unwrap_or(CellSize(COARSEST_CELL))
}

fn lat_index(lat: f64, size: CellSize) -> i64 {
    ((lat + 90.0) / size.0).floor() as i64
}

fn lng_index(lng: f64, size: CellSize) -> i64 {
    ((lng + 180.0) / size.0).floor() as i64
}

fn cell_key(lat_idx: i64, lng_idx: i64, size: CellSize) -> CellId {
    CellId(format!("grid:{size}:{lat_idx}:{lng_idx}"))
}

/// The cell containing `(lat, lng)` at the given size.
pub fn cell_id(lat: f64, lng: f64, size: CellSize) -> CellId {
    cell_key(lat_index(lat, size), lng_index(lng, size), size)
}

/// Enumerate every cell intersecting `bounds`, stopping at `max_cells`.
pub fn cells_for_bounds(bounds: &Bounds, size: CellSize, max_cells: usize) -> CellCover {
    let b = normalize_bounds(bounds);
    let (lat_lo, lat_hi) = (lat_index(b.min_lat, size), lat_index(b.max_lat, size));
    let (lng_lo, lng_hi) = (lng_index(b.min_lng, size), lng_index(b.max_lng, size));

    let rows = (lat_hi - lat_lo + 1) as u64;
    let cols = (lng_hi - lng_lo + 1) as u64;
    let truncated = rows.saturating_mul(cols) > max_cells as u64;

    let mut cells = Vec::with_capacity(rows.saturating_mul(cols).min(max_cells as u64) as usize);
    'outer: for lat_idx in lat_lo..=lat_hi {
        for lng_idx in lng_lo..=lng_hi {
            if cells.len() >= max_cells {
                break 'outer;
            }
            cells.push(cell_key(lat_idx, lng_idx, size));
        }
    }

    CellCover { cells, truncated }
}
