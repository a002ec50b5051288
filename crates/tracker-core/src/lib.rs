//! Shared types for the tracker: identifiers, geometry, the spatial grid
//! index, visibility scopes, wire events and the traits implemented by
//! external collaborators (stores and directories).

pub mod directory;
pub mod entity;
pub mod errors;
pub mod events;
pub mod geo;
pub mod grid;
pub mod ids;
pub mod scope;
