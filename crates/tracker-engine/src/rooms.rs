use std::collections::HashSet;

use dashmap::DashMap;

use tracker_core::grid::CellId;
use tracker_core::ids::ConnId;

/// Live membership of grid-cell rooms. Empty rooms are dropped.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<CellId, HashSet<ConnId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: &CellId, conn: &ConnId) {
        let _ = self.rooms.entry(room.clone()).or_default().insert(conn.clone());
    }

    pub fn leave(&self, room: &CellId, conn: &ConnId) {
        let emptied = match self.rooms.get_mut(room) {
            Some(mut members) => {
                let _ = members.remove(conn);
                members.is_empty()
            }
            None => false,
        };
        if emptied {
            let _ = self.rooms.remove_if(room, |_, members| members.is_empty());
        }
    }

    pub fn members(&self, room: &CellId) -> Vec<ConnId> {
        self.rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracker_core::grid::{cell_id, DEFAULT_CELL_SIZE};

    #[test]
    fn join_leave_and_cleanup() {
        let rooms = RoomRegistry::new();
        let cell = cell_id(51.5, -0.12, DEFAULT_CELL_SIZE);
        let a = ConnId::new();
        let b = ConnId::new();

        rooms.join(&cell, &a);
        rooms.join(&cell, &b);
        rooms.join(&cell, &a);
        assert_eq!(rooms.members(&cell).len(), 2);

        rooms.leave(&cell, &a);
        assert_eq!(rooms.members(&cell), vec![b.clone()]);
        rooms.leave(&cell, &b);
        assert!(rooms.members(&cell).is_empty());
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn leaving_unknown_room_is_noop() {
        let rooms = RoomRegistry::new();
        rooms.leave(&cell_id(0.0, 0.0, DEFAULT_CELL_SIZE), &ConnId::new());
        assert_eq!(rooms.room_count(), 0);
    }
}
