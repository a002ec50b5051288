//! Connection lifecycle and the non-location client requests.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tracker_core::entity::Identity;
use tracker_core::errors::ValidationError;
use tracker_core::events::{
    Connected, NearbyEntity, NearbyRequest, NearbyResponse, PresenceChange, PresenceSnapshot,
    ServerEvent, ViewportRequest,
};
use tracker_core::geo::{haversine_meters, Point};
use tracker_core::ids::{ConnId, EntityId};
use tracker_core::scope::Scope;

use crate::error::TrackerError;
use crate::sessions::Session;
use crate::tracker::Tracker;
use crate::viewport::ViewportOutcome;

impl Tracker {
    /// Register an authenticated connection. Returns whether the entity came
    /// online with it.
    pub async fn connect(&self, conn: &ConnId, identity: Identity) -> bool {
        let scope = match self.scopes.resolve(&identity).await {
            Ok(scope) => scope,
            Err(e) => {
                warn!(entity_id = %identity.entity_id, conn_id = %conn, error = %e, "scope resolution failed, using empty scope");
                Scope::empty()
            }
        };

        let entity = identity.entity_id.clone();
        let role = identity.role;
        self.sessions.insert(Session::new(conn.clone(), identity, scope));
        let was_offline = self.presence.add_socket(&entity, conn);

        let _ = self.broadcaster.reply(
            conn,
            ServerEvent::Connected(Connected {
                entity_id: entity.clone(),
                role,
                timestamp: Utc::now(),
            }),
        );

        if was_offline {
            if let Some(session) = self.sessions.get(conn) {
                self.publish_presence(&session.identity, true);
            }
        }
        info!(entity_id = %entity, conn_id = %conn, was_offline, "connection registered");
        was_offline
    }

    /// Tear down everything owned by `conn`. Returns false for an unknown
    /// connection.
    pub fn disconnect(&self, conn: &ConnId) -> bool {
        let Some(session) = self.sessions.remove(conn) else {
            return false;
        };
        let entity = session.entity_id().clone();
        let now_online = self.presence.remove_socket(&entity, conn);
        self.viewport.remove(conn);
        self.rate.clear(conn);

        if !now_online {
            self.breach.clear(&entity);
            self.publish_presence(&session.identity, false);
        }
        info!(entity_id = %entity, conn_id = %conn, now_online, "connection closed");
        true
    }

    fn publish_presence(&self, identity: &Identity, online: bool) {
        let last_seen = self
            .presence
            .record(&identity.entity_id)
            .map(|r| r.last_seen)
            .unwrap_or_else(Utc::now);
        let change = PresenceChange {
            user_id: identity.entity_id.clone(),
            online,
            last_seen,
        };
        let transition = if online {
            ServerEvent::PresenceUserJoined(change.clone())
        } else {
            ServerEvent::PresenceUserLeft(change.clone())
        };
        let delivered = self
            .broadcaster
            .to_presence_subscribers(identity, &[transition, ServerEvent::PresenceUpdate(change)]);
        debug!(entity_id = %identity.entity_id, online, delivered, "presence published");
    }

    /// Flag `conn` for presence notifications and reply with the online
    /// entities it may see.
    pub fn subscribe_presence(&self, conn: &ConnId) -> Result<usize, TrackerError> {
        if !self.sessions.set_presence_subscribed(conn) {
            return Err(TrackerError::SessionNotFound(conn.to_string()));
        }
        let session = self
            .sessions
            .get(conn)
            .ok_or_else(|| TrackerError::SessionNotFound(conn.to_string()))?;

        let mut users: Vec<PresenceChange> = self
            .sessions
            .connected_identities()
            .into_iter()
            .filter(|identity| session.admits(identity))
            .filter_map(|identity| {
                let record = self.presence.record(&identity.entity_id)?;
                record.online.then(|| PresenceChange {
                    user_id: identity.entity_id.clone(),
                    online: true,
                    last_seen: record.last_seen,
                })
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        let count = users.len();
        let _ = self
            .broadcaster
            .reply(conn, ServerEvent::PresenceUsers(PresenceSnapshot { users }));
        Ok(count)
    }

    /// Replace the viewport of `conn`. Invalid bounds are answered with an
    /// `error`; throttled updates are dropped silently.
    pub fn subscribe_viewport(
        &self,
        conn: &ConnId,
        request: ViewportRequest,
    ) -> Result<ViewportOutcome, TrackerError> {
        if !self.sessions.contains(conn) {
            return Err(TrackerError::SessionNotFound(conn.to_string()));
        }
        match self.viewport.update(conn, &request, Instant::now()) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.reply_invalid(conn, &err);
                Err(err.into())
            }
        }
    }

    /// One-shot scoped nearby query. `center` arrives as `[lat, lng]`.
    pub async fn request_nearby(&self, conn: &ConnId, request: NearbyRequest) -> Result<usize, TrackerError> {
        let session = self
            .sessions
            .get(conn)
            .ok_or_else(|| TrackerError::SessionNotFound(conn.to_string()))?;

        let [lat, lng] = request.center;
        let center = match Point::parse(lng, lat) {
            Ok(p) => p,
            Err(err) => {
                self.reply_invalid(conn, &err);
                return Err(err.into());
            }
        };
        let radius_km = match self.nearby_radius_km(request.radius) {
            Ok(r) => r,
            Err(err) => {
                self.reply_invalid(conn, &err);
                return Err(err.into());
            }
        };

        let found = match self
            .collab
            .entities
            .nearby(center, radius_km * 1_000.0, &session.scope)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(conn_id = %conn, error = %e, "nearby lookup failed");
                let _ = self
                    .broadcaster
                    .reply(conn, ServerEvent::error("nearby lookup unavailable"));
                return Err(e.into());
            }
        };

        let exclude_self = request.exclude_self.unwrap_or(true);
        let users: Vec<NearbyEntity> = found
            .into_iter()
            .filter(|p| !(exclude_self && &p.entity_id == session.entity_id()))
            .map(|position| NearbyEntity {
                distance_meters: haversine_meters(center, position.coordinates),
                position,
            })
            .collect();

        let count = users.len();
        let _ = self.broadcaster.reply(
            conn,
            ServerEvent::LocationResponse(NearbyResponse {
                center: request.center,
                radius: radius_km,
                users,
            }),
        );
        Ok(count)
    }

    fn nearby_radius_km(&self, requested: Option<f64>) -> Result<f64, ValidationError> {
        let cfg = &self.settings.nearby;
        match requested {
            None => Ok(cfg.default_radius_km),
            Some(r) if r.is_finite() && r > 0.0 => Ok(r.min(cfg.max_radius_km)),
            Some(r) => Err(ValidationError::InvalidParameter(format!(
                "radius must be a positive number of kilometers, got {r}"
            ))),
        }
    }

    /// Re-read the entity's placement and recompute the scope of every open
    /// connection it has. Breach tracking restarts when the company changed.
    pub async fn refresh_scope(&self, entity: &EntityId) -> Result<usize, TrackerError> {
        let conns = self.sessions.conns_for_entity(entity);
        if conns.is_empty() {
            return Ok(0);
        }
        let fresh = self.collab.entities.identity(entity).await?;
        let scope = Arc::new(self.scopes.resolve(&fresh).await?);
        let fresh = Arc::new(fresh);

        let mut updated = 0;
        let mut company_changed = false;
        for conn in conns {
            if let Some(previous) = self.sessions.get(&conn) {
                company_changed |= previous.identity.hierarchy.company_id != fresh.hierarchy.company_id;
            }
            if self.sessions.update_access(&conn, Arc::clone(&fresh), Arc::clone(&scope)) {
                updated += 1;
            }
        }
        if company_changed {
            self.breach.clear(entity);
        }
        info!(entity_id = %entity, updated, company_changed, "scope refreshed");
        Ok(updated)
    }

    pub(crate) fn reply_invalid(&self, conn: &ConnId, err: &ValidationError) {
        let _ = self.broadcaster.reply(
            conn,
            ServerEvent::error_with(err.to_string(), serde_json::json!({ "kind": err.kind() })),
        );
    }
}
