//! Real-time scoped geobroadcast and geofence engine.
//!
//! [`Tracker`] owns the live registries (sessions, presence, viewports,
//! rooms, breach state, rate buckets) and exposes the connection lifecycle
//! and the per-update orchestration. Transport is abstracted behind
//! [`Outbound`]; persistence and directories behind the traits in
//! `tracker_core::directory`.

pub mod breach;
pub mod broadcast;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod outbound;
pub mod presence;
pub mod rate_limit;
pub mod rooms;
pub mod scope;
pub mod sessions;
pub mod tracker;
pub mod viewport;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::TrackerError;
pub use outbound::Outbound;
pub use tracker::{Collaborators, Tracker, TrackerStats};
