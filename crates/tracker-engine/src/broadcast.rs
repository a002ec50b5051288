//! Fan-out of location, breach and presence events to the connections
//! allowed to see them.

use std::sync::Arc;

use tracing::trace;

use tracker_core::entity::Identity;
use tracker_core::events::{FullLocation, MinimalLocation, ServerEvent};
use tracker_core::geo::Point;
use tracker_core::ids::ConnId;

use crate::outbound::Outbound;
use crate::sessions::SessionRegistry;
use crate::viewport::ViewportManager;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    pub candidates: usize,
    pub viewers: usize,
    pub elevated: usize,
}

pub struct Broadcaster {
    sessions: Arc<SessionRegistry>,
    viewport: Arc<ViewportManager>,
    outbound: Arc<dyn Outbound>,
}

impl Broadcaster {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        viewport: Arc<ViewportManager>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            sessions,
            viewport,
            outbound,
        }
    }

    /// Deliver a position to viewport subscribers that exactly contain it and
    /// whose scope admits the entity, then to admitting elevated observers.
    pub fn location(
        &self,
        subject: &Identity,
        origin: Option<&ConnId>,
        point: Point,
        minimal: &MinimalLocation,
        full: &FullLocation,
    ) -> FanOut {
        let mut stats = FanOut::default();
        let candidates = self.viewport.candidates(point);
        stats.candidates = candidates.len();

        let minimal_event = ServerEvent::LocationUpdate(minimal.clone());
        let full_event = ServerEvent::LocationUpdated(full.clone());
        for conn in candidates {
            if origin == Some(&conn) || !self.viewport.contains(&conn, point) {
                continue;
            }
            let Some(session) = self.sessions.get(&conn) else {
                continue;
            };
            if !session.admits(subject) {
                continue;
            }
            let _ = self.outbound.send(&conn, &minimal_event);
            let _ = self.outbound.send(&conn, &full_event);
            stats.viewers += 1;
        }

        stats.elevated = self.to_elevated(subject, &ServerEvent::AdminLocationUpdated(full.clone()));
        trace!(
            entity_id = %subject.entity_id,
            candidates = stats.candidates,
            viewers = stats.viewers,
            elevated = stats.elevated,
            "location fan-out"
        );
        stats
    }

    /// Every elevated connection whose scope admits `subject`.
    pub fn to_elevated(&self, subject: &Identity, event: &ServerEvent) -> usize {
        self.sessions
            .elevated()
            .into_iter()
            .filter(|s| s.admits(subject))
            .filter(|s| self.outbound.send(&s.conn_id, event))
            .count()
    }

    /// Every open connection of the subject entity.
    pub fn to_entity(&self, subject: &Identity, event: &ServerEvent) -> usize {
        self.sessions
            .conns_for_entity(&subject.entity_id)
            .iter()
            .filter(|conn| self.outbound.send(conn, event))
            .count()
    }

    /// Presence subscribers whose scope admits `subject`.
    pub fn to_presence_subscribers(&self, subject: &Identity, events: &[ServerEvent]) -> usize {
        let mut delivered = 0;
        for session in self.sessions.presence_subscribers() {
            if !session.admits(subject) {
                continue;
            }
            for event in events {
                let _ = self.outbound.send(&session.conn_id, event);
            }
            delivered += 1;
        }
        delivered
    }

    pub fn reply(&self, conn: &ConnId, event: ServerEvent) -> bool {
        self.outbound.send(conn, &event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::RoomRegistry;
    use crate::sessions::Session;
    use crate::test_support::{elevated, member, scope_of_company, RecordingOutbound};
    use chrono::Utc;
    use tokio::time::Instant;
    use tracker_core::events::ViewportRequest;
    use tracker_core::scope::Scope;
    use tracker_settings::ViewportSettings;

    struct Harness {
        sessions: Arc<SessionRegistry>,
        viewport: Arc<ViewportManager>,
        outbound: Arc<RecordingOutbound>,
        broadcaster: Broadcaster,
    }

    fn harness() -> Harness {
        let sessions = Arc::new(SessionRegistry::new());
        let viewport = Arc::new(ViewportManager::new(
            &ViewportSettings::default(),
            Arc::new(RoomRegistry::new()),
        ));
        let outbound = Arc::new(RecordingOutbound::default());
        let broadcaster = Broadcaster::new(sessions.clone(), viewport.clone(), outbound.clone());
        Harness { sessions, viewport, outbound, broadcaster }
    }

    fn watch(h: &Harness, conn: &ConnId, min: f64, max: f64) {
        let req = ViewportRequest {
            min_lat: min,
            min_lng: min,
            max_lat: max,
            max_lng: max,
            zoom: Some(12.0),
        };
        h.viewport.update(conn, &req, Instant::now()).unwrap();
    }

    fn payloads(subject: &Identity, point: Point) -> (MinimalLocation, FullLocation) {
        let now = Utc::now();
        (
            MinimalLocation {
                user_id: subject.entity_id.clone(),
                coordinates: point,
                updated_at: now,
                ao: None,
            },
            FullLocation {
                user_id: subject.entity_id.clone(),
                name: subject.name.clone(),
                email: subject.email.clone(),
                role: subject.role,
                coordinates: point,
                location: point.to_geojson(),
                ao: None,
                timestamp: now,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_only_to_containing_and_admitting_viewers() {
        let h = harness();
        let subject = member("mover", "s1", "t1", "c1");
        let point = Point::new(0.1, 0.1);

        let in_view = ConnId::new();
        let out_of_view = ConnId::new();
        let out_of_scope = ConnId::new();
        h.sessions.insert(Session::new(in_view.clone(), member("v1", "s2", "t1", "c1"), scope_of_company("c1")));
        h.sessions.insert(Session::new(out_of_view.clone(), member("v2", "s2", "t1", "c1"), scope_of_company("c1")));
        h.sessions.insert(Session::new(out_of_scope.clone(), member("v3", "s9", "t9", "c9"), scope_of_company("c9")));
        watch(&h, &in_view, 0.0, 0.2);
        // exact bounds stop just short of the point
        watch(&h, &out_of_view, 0.0, 0.099);
        watch(&h, &out_of_scope, 0.0, 0.2);

        let (minimal, full) = payloads(&subject, point);
        let stats = h.broadcaster.location(&subject, None, point, &minimal, &full);
        assert_eq!(stats.viewers, 1);

        assert_eq!(
            h.outbound.event_names(&in_view),
            vec!["location:update", "location:updated"]
        );
        assert!(h.outbound.event_names(&out_of_view).is_empty());
        assert!(h.outbound.event_names(&out_of_scope).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn elevated_receive_regardless_of_viewport() {
        let h = harness();
        let subject = member("mover", "s1", "t1", "c1");
        let admin = ConnId::new();
        let other_admin = ConnId::new();
        h.sessions.insert(Session::new(admin.clone(), elevated("ops", "c1"), scope_of_company("c1")));
        h.sessions.insert(Session::new(other_admin.clone(), elevated("ops2", "c2"), scope_of_company("c2")));

        let point = Point::new(0.1, 0.1);
        let (minimal, full) = payloads(&subject, point);
        let stats = h.broadcaster.location(&subject, None, point, &minimal, &full);
        assert_eq!(stats.elevated, 1);
        assert_eq!(h.outbound.event_names(&admin), vec!["admin:location:updated"]);
        assert!(h.outbound.event_names(&other_admin).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn origin_is_skipped_but_self_passes_scope() {
        let h = harness();
        let subject = member("mover", "s1", "t1", "c1");
        let origin = ConnId::new();
        let second_device = ConnId::new();
        h.sessions.insert(Session::new(origin.clone(), subject.clone(), Scope::empty()));
        h.sessions.insert(Session::new(second_device.clone(), subject.clone(), Scope::empty()));
        watch(&h, &origin, 0.0, 0.2);
        watch(&h, &second_device, 0.0, 0.2);

        let point = Point::new(0.1, 0.1);
        let (minimal, full) = payloads(&subject, point);
        h.broadcaster.location(&subject, Some(&origin), point, &minimal, &full);
        assert!(h.outbound.event_names(&origin).is_empty());
        assert_eq!(h.outbound.event_names(&second_device).len(), 2);
    }

    #[tokio::test]
    async fn presence_goes_to_admitting_subscribers() {
        let h = harness();
        let subject = member("e1", "s1", "t1", "c1");
        let watcher = ConnId::new();
        let outsider = ConnId::new();
        h.sessions.insert(Session::new(watcher.clone(), member("w", "s2", "t1", "c1"), scope_of_company("c1")));
        h.sessions.insert(Session::new(outsider.clone(), member("x", "s9", "t9", "c9"), scope_of_company("c9")));
        h.sessions.set_presence_subscribed(&watcher);
        h.sessions.set_presence_subscribed(&outsider);

        let sent = h.broadcaster.to_presence_subscribers(&subject, &[ServerEvent::error("probe")]);
        assert_eq!(sent, 1);
        assert_eq!(h.outbound.event_names(&watcher), vec!["error"]);
    }
}
