//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TrackerSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `TRACKER_*` environment overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::TrackerSettings;

/// Default settings file location (`~/.tracker/settings.json`).
pub fn settings_path() -> PathBuf {
    crate::tracker_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TrackerSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an inconsistent result
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TrackerSettings> {
    let defaults = serde_json::to_value(TrackerSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TrackerSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides. Invalid values are warned about
/// and ignored.
pub fn apply_env_overrides(settings: &mut TrackerSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("TRACKER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("TRACKER_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("TRACKER_DB") {
        settings.database.path = PathBuf::from(v);
    }

    // ── Telemetry ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("TRACKER_LOG_LEVEL") {
        settings.telemetry.log_level = v;
    }
    if let Some(v) = read_env_bool("TRACKER_LOG_TO_SQLITE") {
        settings.telemetry.log_to_sqlite = v;
    }

    // ── Geofence ────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("TRACKER_BREACH_GRACE_MS", 0, 3_600_000) {
        settings.breach.grace_ms = v;
    }
    if let Some(v) = read_env_u64("TRACKER_BREACH_COOLDOWN_MS", 0, 3_600_000) {
        settings.breach.cooldown_ms = v;
    }
    if let Some(v) = read_env_u64("TRACKER_BREACH_SUSTAINED_MS", 0, 86_400_000) {
        settings.breach.sustained_ms = v;
    }
    if let Some(v) = read_env_u64("TRACKER_GPS_TOLERANCE_METERS", 0, 10_000) {
        settings.breach.tolerance_meters = v as f64;
    }
    if let Some(v) = read_env_bool("TRACKER_APPROACHING_ENABLED") {
        settings.breach.approaching_enabled = v;
    }

    // ── Throttling ──────────────────────────────────────────────────
    if let Some(v) = read_env_u64("TRACKER_RATE_MIN_INTERVAL_MS", 0, 60_000) {
        settings.rate_limit.min_interval_ms = v;
    }
    if let Some(v) = read_env_usize("TRACKER_VIEWPORT_MAX_CELLS", 1, 100_000) {
        settings.viewport.max_cells = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
