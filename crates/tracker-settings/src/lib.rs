//! # tracker-settings
//!
//! Layered configuration for the tracker server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TrackerSettings::default()`]
//! 2. **Settings file**: `~/.tracker/settings.json` or an explicit path
//! 3. **Environment variables**: `TRACKER_*` overrides (highest priority)
//!
//! Settings are loaded once at startup and passed down explicitly; there is
//! no global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::PathBuf;

/// Base directory for tracker state (`$HOME/.tracker`, `/tmp/.tracker` fallback).
pub fn tracker_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".tracker")
}
