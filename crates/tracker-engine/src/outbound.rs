use tracker_core::events::ServerEvent;
use tracker_core::ids::ConnId;

/// Delivery of typed events to individual connections.
///
/// Implementations must not block: a full or closed connection queue
/// returns `false` and the event is dropped.
pub trait Outbound: Send + Sync {
    fn send(&self, conn: &ConnId, event: &ServerEvent) -> bool;
}
