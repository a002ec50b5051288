//! The per-report pipeline: validate, persist, evaluate geofences, fan out,
//! acknowledge.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tracker_core::entity::{AreaOfOperations, Identity, ViolationEvent, ViolationKind};
use tracker_core::errors::ValidationError;
use tracker_core::events::{BreachNotice, FullLocation, LocationReport, MinimalLocation, ServerEvent};
use tracker_core::geo::Point;
use tracker_core::ids::{ConnId, ViolationId};

use crate::breach::{display_ao, Detection, Stamp};
use crate::broadcast::FanOut;
use crate::tracker::Tracker;

#[derive(Clone, Debug, PartialEq)]
pub enum LocationOutcome {
    Accepted(FanOut),
    Rejected(ValidationError),
    /// The connection was already gone.
    Ignored,
}

impl Tracker {
    /// Handle a `location:update` report from `conn`.
    pub async fn report_location(&self, conn: &ConnId, report: LocationReport) -> LocationOutcome {
        let Some(session) = self.sessions.get(conn) else {
            return LocationOutcome::Ignored;
        };
        let identity = Arc::clone(&session.identity);

        let [lng, lat] = report.coordinates;
        let point = match Point::parse(lng, lat) {
            Ok(p) => p,
            Err(err) => {
                self.reply_invalid(conn, &err);
                return LocationOutcome::Rejected(err);
            }
        };
        if let Err(throttled) = self.rate.check(conn, Instant::now()) {
            let err = ValidationError::from(throttled.clone());
            let _ = self.broadcaster.reply(
                conn,
                ServerEvent::error_with(
                    err.to_string(),
                    serde_json::json!({
                        "kind": err.kind(),
                        "retryAfterMs": throttled.retry_after.as_millis() as u64,
                    }),
                ),
            );
            return LocationOutcome::Rejected(err);
        }

        let now = Stamp::now();

        if let Err(e) = self.collab.entities.update_location(&identity.entity_id, point, now.wall).await {
            warn!(entity_id = %identity.entity_id, error = %e, "location persist failed");
        }

        let aos = self.company_aos(&identity).await;
        let ao = aos.as_deref().and_then(|aos| display_ao(point, aos));

        // a disconnect may have landed while the store calls were in flight
        if !self.sessions.contains(conn) {
            debug!(entity_id = %identity.entity_id, conn_id = %conn, "connection closed mid-report");
            return LocationOutcome::Ignored;
        }

        match aos.as_deref() {
            Some(aos) => self.apply_breach_rules(&identity, point, aos, now),
            None if identity.ao_company().is_none() => self.breach.clear(&identity.entity_id),
            // lookup failed: leave breach state untouched
            None => {}
        }

        let minimal = MinimalLocation {
            user_id: identity.entity_id.clone(),
            coordinates: point,
            updated_at: now.wall,
            ao: ao.clone(),
        };
        let full = FullLocation {
            user_id: identity.entity_id.clone(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            role: identity.role,
            coordinates: point,
            location: point.to_geojson(),
            ao,
            timestamp: now.wall,
        };
        let stats = self.broadcaster.location(&identity, Some(conn), point, &minimal, &full);
        let _ = self.broadcaster.reply(conn, ServerEvent::LocationConfirm(minimal));
        debug!(
            entity_id = %identity.entity_id,
            conn_id = %conn,
            viewers = stats.viewers,
            elevated = stats.elevated,
            "location processed"
        );
        LocationOutcome::Accepted(stats)
    }

    /// Active AOs for the entity's company. `None` when the entity has no
    /// company or the directory lookup failed.
    async fn company_aos(&self, identity: &Identity) -> Option<Vec<AreaOfOperations>> {
        let company = identity.ao_company()?;
        match self.collab.aos.active_for_company(company).await {
            Ok(aos) => Some(aos),
            Err(e) => {
                warn!(entity_id = %identity.entity_id, company_id = %company, error = %e, "AO lookup failed");
                None
            }
        }
    }

    fn apply_breach_rules(&self, identity: &Identity, point: Point, aos: &[AreaOfOperations], now: Stamp) {
        let detections = self.breach.evaluate(&identity.entity_id, point, aos, now);
        if detections.is_empty() {
            return;
        }

        if let Some(breach) = detections.iter().find(|d| d.kind == ViolationKind::Breach) {
            self.notify_breach(identity, point, breach, now);
        }

        let events: Vec<ViolationEvent> = detections
            .into_iter()
            .map(|d| violation_event(identity, point, d, now.wall))
            .collect();
        for e in &events {
            info!(
                entity_id = %identity.entity_id,
                kind = %e.kind,
                ao_id = e.ao_id.as_ref().map(|id| id.as_str()),
                distance_meters = e.distance_meters,
                "geofence violation"
            );
        }

        let log = Arc::clone(&self.collab.violations);
        let entity = identity.entity_id.clone();
        let _ = tokio::spawn(async move {
            if let Err(e) = log.append(&events).await {
                warn!(entity_id = %entity, count = events.len(), error = %e, "violation write failed");
            }
        });
    }

    fn notify_breach(&self, identity: &Identity, point: Point, breach: &Detection, now: Stamp) {
        let s = self.breach.settings();
        let event = ServerEvent::AoBreach(BreachNotice {
            user_id: identity.entity_id.clone(),
            name: identity.name.clone(),
            coordinates: point,
            timestamp: now.wall,
            breach_since: breach.breach_since.unwrap_or(now.wall),
            ao: breach.ao.clone(),
            tolerance_meters: s.tolerance_meters,
            grace_ms: s.grace_ms,
            cooldown_ms: s.cooldown_ms,
        });
        let _ = self.broadcaster.to_entity(identity, &event);
        let _ = self.broadcaster.to_elevated(identity, &event);
    }
}

fn violation_event(identity: &Identity, point: Point, d: Detection, now: DateTime<Utc>) -> ViolationEvent {
    ViolationEvent {
        id: ViolationId::new(),
        kind: d.kind,
        entity_id: identity.entity_id.clone(),
        hierarchy: identity.hierarchy.clone(),
        ao_id: d.ao.map(|ao| ao.id),
        coordinates: point,
        distance_meters: d.distance_meters,
        breach_since: d.breach_since,
        occurred_at: now,
    }
}
