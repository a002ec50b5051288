//! Viewport subscriptions: which grid rooms each connection has joined and
//! the exact bounds used for the final containment check.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use tracker_core::errors::ValidationError;
use tracker_core::events::ViewportRequest;
use tracker_core::geo::{is_point_in_bounds, normalize_bounds, Bounds, Point};
use tracker_core::grid::{cell_id, cell_size_for_zoom, cells_for_bounds, CellId, CellSize};
use tracker_core::ids::ConnId;
use tracker_settings::ViewportSettings;

use crate::rooms::RoomRegistry;

#[derive(Clone, Debug)]
pub struct ViewportSubscription {
    pub bounds: Bounds,
    pub cell_size: CellSize,
    pub rooms: HashSet<CellId>,
    pub truncated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewportOutcome {
    Applied {
        joined: usize,
        left: usize,
        cells: usize,
        truncated: bool,
    },
    /// Arrived inside the throttle window; dropped without a reply.
    Throttled,
}

pub struct ViewportManager {
    subscriptions: DashMap<ConnId, ViewportSubscription>,
    last_applied: DashMap<ConnId, Instant>,
    cell_sizes: Mutex<HashMap<CellSize, usize>>,
    rooms: Arc<RoomRegistry>,
    throttle: Duration,
    max_cells: usize,
}

impl ViewportManager {
    pub fn new(settings: &ViewportSettings, rooms: Arc<RoomRegistry>) -> Self {
        Self {
            subscriptions: DashMap::new(),
            last_applied: DashMap::new(),
            cell_sizes: Mutex::new(HashMap::new()),
            rooms,
            throttle: Duration::from_millis(settings.throttle_ms),
            max_cells: settings.max_cells,
        }
    }

    /// Replace the connection's viewport, moving it between rooms.
    pub fn update(
        &self,
        conn: &ConnId,
        request: &ViewportRequest,
        now: Instant,
    ) -> Result<ViewportOutcome, ValidationError> {
        if let Some(last) = self.last_applied.get(conn) {
            if now.saturating_duration_since(*last) < self.throttle {
                return Ok(ViewportOutcome::Throttled);
            }
        }

        let raw = request.bounds();
        raw.validate()?;
        let bounds = normalize_bounds(&raw);
        let cell_size = cell_size_for_zoom(request.zoom);
        let cover = cells_for_bounds(&bounds, cell_size, self.max_cells);
        let next: HashSet<CellId> = cover.cells.into_iter().collect();

        let previous = self.subscriptions.remove(conn).map(|(_, s)| s);
        let (stale, prev_size) = match &previous {
            Some(p) => (p.rooms.difference(&next).cloned().collect::<Vec<_>>(), Some(p.cell_size)),
            None => (Vec::new(), None),
        };
        let fresh: Vec<CellId> = match &previous {
            Some(p) => next.difference(&p.rooms).cloned().collect(),
            None => next.iter().cloned().collect(),
        };

        for room in &stale {
            self.rooms.leave(room, conn);
        }
        for room in &fresh {
            self.rooms.join(room, conn);
        }

        if prev_size != Some(cell_size) {
            let mut sizes = self.cell_sizes.lock();
            if let Some(old) = prev_size {
                release_size(&mut sizes, old);
            }
            *sizes.entry(cell_size).or_insert(0) += 1;
        }

        let outcome = ViewportOutcome::Applied {
            joined: fresh.len(),
            left: stale.len(),
            cells: next.len(),
            truncated: cover.truncated,
        };
        let _ = self.subscriptions.insert(
            conn.clone(),
            ViewportSubscription {
                bounds,
                cell_size,
                rooms: next,
                truncated: cover.truncated,
            },
        );
        let _ = self.last_applied.insert(conn.clone(), now);

        debug!(conn_id = %conn, cell_size = %cell_size, ?outcome, "viewport updated");
        Ok(outcome)
    }

    /// Leave every room and forget the connection.
    pub fn remove(&self, conn: &ConnId) {
        let _ = self.last_applied.remove(conn);
        let Some((_, sub)) = self.subscriptions.remove(conn) else {
            return;
        };
        for room in &sub.rooms {
            self.rooms.leave(room, conn);
        }
        release_size(&mut self.cell_sizes.lock(), sub.cell_size);
    }

    pub fn subscription(&self, conn: &ConnId) -> Option<ViewportSubscription> {
        self.subscriptions.get(conn).map(|s| s.clone())
    }

    /// Exact containment against the connection's latest viewport.
    pub fn contains(&self, conn: &ConnId, point: Point) -> bool {
        self.subscriptions
            .get(conn)
            .is_some_and(|s| is_point_in_bounds(point.lat, point.lng, &s.bounds))
    }

    pub fn cell_sizes_in_use(&self) -> Vec<CellSize> {
        self.cell_sizes.lock().keys().copied().collect()
    }

    /// Connections whose rooms cover `point` at any cell size in use. This
    /// is a coarse prefilter; callers still check [`Self::contains`].
    pub fn candidates(&self, point: Point) -> HashSet<ConnId> {
        let mut out = HashSet::new();
        for size in self.cell_sizes_in_use() {
            out.extend(self.rooms.members(&cell_id(point.lat, point.lng, size)));
        }
        out
    }
}

fn release_size(sizes: &mut HashMap<CellSize, usize>, size: CellSize) {
    if let Some(count) = sizes.get_mut(&size) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            let _ = sizes.remove(&size);
        }
    }
}
