//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so partial
//! JSON files are accepted; missing fields keep their compiled default.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings for the tracker server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerSettings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub telemetry: TelemetrySettings,
    pub presence: PresenceSettings,
    pub viewport: ViewportSettings,
    pub rate_limit: RateLimitSettings,
    pub breach: BreachSettings,
    pub nearby: NearbySettings,
}

impl TrackerSettings {
    /// Cross-field checks that serde defaults cannot express.
    pub fn validate(&self) -> crate::Result<()> {
        let b = &self.breach;
        if b.grace_ms > b.sustained_ms {
            return Err(crate::SettingsError::InvalidValue(
                "breach.graceMs must not exceed breach.sustainedMs".into(),
            ));
        }
        if b.tolerance_meters < 0.0 || b.approaching_meters < 0.0 {
            return Err(crate::SettingsError::InvalidValue(
                "breach distances must be non-negative".into(),
            ));
        }
        let timers = [
            ("server.heartbeatIntervalSecs", self.server.heartbeat_interval_secs),
            ("server.cleanupIntervalSecs", self.server.cleanup_interval_secs),
            ("presence.flushIntervalMs", self.presence.flush_interval_ms),
        ];
        if let Some((name, _)) = timers.iter().find(|(_, period)| *period == 0) {
            return Err(crate::SettingsError::InvalidValue(format!("{name} must be positive")));
        }
        if self.viewport.max_cells == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "viewport.maxCells must be at least 1".into(),
            ));
        }
        if self.nearby.default_radius_km > self.nearby.max_radius_km {
            return Err(crate::SettingsError::InvalidValue(
                "nearby.defaultRadiusKm must not exceed nearby.maxRadiusKm".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// Connections silent for longer than this are reaped.
    pub client_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9300,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            cleanup_interval_secs: 60,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: crate::tracker_home().join("database").join("tracker.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Default level; `RUST_LOG` wins when set.
    pub log_level: String,
    /// Persist warn+ events to a SQLite log database.
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_to_sqlite: true,
            log_db_path: crate::tracker_home().join("database").join("logs.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSettings {
    /// Delay before an emptied connection set is persisted as offline.
    pub offline_debounce_ms: u64,
    /// Period of the batched online-transition flush.
    pub flush_interval_ms: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            offline_debounce_ms: 5_000,
            flush_interval_ms: 2_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewportSettings {
    /// Minimum spacing between accepted viewport changes per connection.
    pub throttle_ms: u64,
    /// Hard cap on grid rooms joined per viewport.
    pub max_cells: usize,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            throttle_ms: 250,
            max_cells: 400,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSettings {
    pub min_interval_ms: u64,
    pub window_ms: u64,
    pub max_per_window: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 500,
            window_ms: 60_000,
            max_per_window: 120,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreachSettings {
    /// Points this close outside an AO edge still count as inside.
    pub tolerance_meters: f64,
    pub grace_ms: u64,
    pub cooldown_ms: u64,
    pub sustained_ms: u64,
    pub approaching_enabled: bool,
    pub approaching_meters: f64,
    pub approaching_cooldown_ms: u64,
}

impl Default for BreachSettings {
    fn default() -> Self {
        Self {
            tolerance_meters: 15.0,
            grace_ms: 10_000,
            cooldown_ms: 60_000,
            sustained_ms: 120_000,
            approaching_enabled: true,
            approaching_meters: 50.0,
            approaching_cooldown_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NearbySettings {
    pub default_radius_km: f64,
    pub max_radius_km: f64,
}

impl Default for NearbySettings {
    fn default() -> Self {
        Self {
            default_radius_km: 5.0,
            max_radius_km: 100.0,
        }
    }
}
