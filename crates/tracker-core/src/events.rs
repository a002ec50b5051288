use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{AoSummary, CoarseRole, EntityPosition};
use crate::geo::{Bounds, Point};
use crate::ids::EntityId;

/// Outbound messages, serialized as `{ "event": <name>, "data": {...} }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connected")]
    Connected(Connected),

    /// Minimal payload for viewport subscribers.
    #[serde(rename = "location:update")]
    LocationUpdate(MinimalLocation),

    /// Full payload with display data.
    #[serde(rename = "location:updated")]
    LocationUpdated(FullLocation),

    #[serde(rename = "location:updated:confirm")]
    LocationConfirm(MinimalLocation),

    #[serde(rename = "location:response")]
    LocationResponse(NearbyResponse),

    #[serde(rename = "presence:update")]
    PresenceUpdate(PresenceChange),

    #[serde(rename = "presence:user_joined")]
    PresenceUserJoined(PresenceChange),

    #[serde(rename = "presence:user_left")]
    PresenceUserLeft(PresenceChange),

    #[serde(rename = "presence:users")]
    PresenceUsers(PresenceSnapshot),

    #[serde(rename = "ao:breach")]
    AoBreach(BreachNotice),

    #[serde(rename = "admin:location:updated")]
    AdminLocationUpdated(FullLocation),

    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::LocationUpdate(_) => "location:update",
            Self::LocationUpdated(_) => "location:updated",
            Self::LocationConfirm(_) => "location:updated:confirm",
            Self::LocationResponse(_) => "location:response",
            Self::PresenceUpdate(_) => "presence:update",
            Self::PresenceUserJoined(_) => "presence:user_joined",
            Self::PresenceUserLeft(_) => "presence:user_left",
            Self::PresenceUsers(_) => "presence:users",
            Self::AoBreach(_) => "ao:breach",
            Self::AdminLocationUpdated(_) => "admin:location:updated",
            Self::Error(_) => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
            details: None,
        })
    }

    pub fn error_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
            details: Some(details),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub entity_id: EntityId,
    pub role: CoarseRole,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinimalLocation {
    pub user_id: EntityId,
    pub coordinates: Point,
    pub updated_at: DateTime<Utc>,
    pub ao: Option<AoSummary>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullLocation {
    pub user_id: EntityId,
    pub name: String,
    pub email: String,
    pub role: CoarseRole,
    pub coordinates: Point,
    /// GeoJSON point, as persisted on the entity record.
    pub location: serde_json::Value,
    pub ao: Option<AoSummary>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyResponse {
    /// `[lat, lng]`, echoing the request ordering.
    pub center: [f64; 2],
    pub radius: f64,
    pub users: Vec<NearbyEntity>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyEntity {
    #[serde(flatten)]
    pub position: EntityPosition,
    pub distance_meters: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    pub user_id: EntityId,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub users: Vec<PresenceChange>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreachNotice {
    pub user_id: EntityId,
    pub name: String,
    pub coordinates: Point,
    pub timestamp: DateTime<Utc>,
    pub breach_since: DateTime<Utc>,
    /// Last AO the entity was known to be inside.
    pub ao: Option<AoSummary>,
    pub tolerance_meters: f64,
    pub grace_ms: u64,
    pub cooldown_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

// ── Inbound payloads ──

/// `location:update`: a position report from the entity itself.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    /// `[lng, lat]`
    pub coordinates: [f64; 2],
    /// Client clock, informational only; the server stamps its own time.
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
}

/// `location:request`: one-shot nearby query.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyRequest {
    /// `[lat, lng]`
    pub center: [f64; 2],
    /// Kilometers.
    #[serde(default)]
    pub radius: Option<f64>,
    #[serde(default)]
    pub exclude_self: Option<bool>,
}

/// `viewport:subscribe`
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportRequest {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
    #[serde(default)]
    pub zoom: Option<f64>,
}

impl ViewportRequest {
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.min_lat, self.min_lng, self.max_lat, self.max_lng)
    }
}
