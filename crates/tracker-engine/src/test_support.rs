//! Shared fixtures for the engine's unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use tracker_core::directory::{PresenceStore, PresenceWrite};
use tracker_core::entity::{AreaOfOperations, CoarseRole, HierarchyRef, HierarchyRole, Identity};
use tracker_core::errors::DirectoryError;
use tracker_core::events::ServerEvent;
use tracker_core::geo::Point;
use tracker_core::ids::{AoId, CompanyId, ConnId, EntityId, SquadId, TeamId, UnitId};
use tracker_core::scope::Scope;
use tracker_settings::TrackerSettings;
use tracker_store::{AoRepo, Database, EntityRepo, HierarchyRepo, ViolationRepo};

use crate::outbound::Outbound;
use crate::tracker::{Collaborators, Tracker};

/// Captures every event handed to the transport.
#[derive(Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<(ConnId, ServerEvent)>>,
}

impl RecordingOutbound {
    pub fn events_for(&self, conn: &ConnId) -> Vec<ServerEvent> {
        self.sent
            .lock()
            .iter()
            .filter(|(c, _)| c == conn)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn event_names(&self, conn: &ConnId) -> Vec<&'static str> {
        self.events_for(conn).iter().map(ServerEvent::event_name).collect()
    }

    pub fn all(&self) -> Vec<(ConnId, ServerEvent)> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Outbound for RecordingOutbound {
    fn send(&self, conn: &ConnId, event: &ServerEvent) -> bool {
        self.sent.lock().push((conn.clone(), event.clone()));
        true
    }
}

#[derive(Default)]
pub struct RecordingPresenceStore {
    batches: Mutex<Vec<Vec<PresenceWrite>>>,
}

impl RecordingPresenceStore {
    pub fn batches(&self) -> Vec<Vec<PresenceWrite>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl PresenceStore for RecordingPresenceStore {
    async fn write_presence(&self, writes: &[PresenceWrite]) -> Result<(), DirectoryError> {
        self.batches.lock().push(writes.to_vec());
        Ok(())
    }
}

/// Squad-tier member placed under unit `u1`.
pub fn member(id: &str, squad: &str, team: &str, company: &str) -> Identity {
    Identity {
        entity_id: EntityId::from_raw(id),
        name: format!("Member {id}"),
        email: format!("{id}@example.test"),
        role: CoarseRole::Normal,
        hierarchy_role: Some(HierarchyRole::Squad),
        hierarchy: HierarchyRef {
            unit_id: Some(UnitId::from_raw("u1")),
            company_id: Some(CompanyId::from_raw(company)),
            team_id: Some(TeamId::from_raw(team)),
            squad_id: Some(SquadId::from_raw(squad)),
        },
    }
}

/// Member of `s1`/`t1`/`c1` with the given hierarchy tier.
pub fn member_with_role(id: &str, role: HierarchyRole) -> Identity {
    with_role(member(id, "s1", "t1", "c1"), role)
}

pub fn with_role(mut identity: Identity, role: HierarchyRole) -> Identity {
    identity.hierarchy_role = Some(role);
    identity
}

/// Company-tier elevated observer with no squad or team.
pub fn elevated(id: &str, company: &str) -> Identity {
    Identity {
        entity_id: EntityId::from_raw(id),
        name: format!("Ops {id}"),
        email: format!("{id}@example.test"),
        role: CoarseRole::Elevated,
        hierarchy_role: Some(HierarchyRole::Company),
        hierarchy: HierarchyRef {
            unit_id: Some(UnitId::from_raw("u1")),
            company_id: Some(CompanyId::from_raw(company)),
            team_id: None,
            squad_id: None,
        },
    }
}

pub fn scope_of_company(company: &str) -> Scope {
    let mut scope = Scope::empty();
    let _ = scope.companies.insert(CompanyId::from_raw(company));
    scope
}

/// Axis-aligned square AO with its south-west corner at (`min_lng`, `min_lat`).
pub fn square_ao(id: &str, company: &str, min_lng: f64, min_lat: f64, size: f64) -> AreaOfOperations {
    AreaOfOperations {
        id: AoId::from_raw(id),
        name: format!("AO {id}"),
        company_id: CompanyId::from_raw(company),
        active: true,
        color: Some("#3388ff".into()),
        ring: vec![
            Point::new(min_lng, min_lat),
            Point::new(min_lng + size, min_lat),
            Point::new(min_lng + size, min_lat + size),
            Point::new(min_lng, min_lat + size),
            Point::new(min_lng, min_lat),
        ],
    }
}

pub struct Fixture {
    pub hierarchy: Arc<HierarchyRepo>,
    pub aos: Arc<AoRepo>,
    pub entities: Arc<EntityRepo>,
    pub violations: Arc<ViolationRepo>,
}

/// In-memory store seeded with:
///
/// ```text
/// u1 ─┬─ c1 ─┬─ t1 ─┬─ s1   e1
///     │      │      └─ s2   e2
///     │      └─ t2 ─── s3   e3
///     └─ c2 ─── t3 ─── s4   e4
/// ```
///
/// plus `ops`, an elevated observer of `c1`.
pub fn fixture() -> Fixture {
    let db = Database::in_memory().unwrap();
    let hierarchy = Arc::new(HierarchyRepo::new(db.clone()));
    let entities = Arc::new(EntityRepo::new(db.clone()));

    hierarchy.insert_unit(&UnitId::from_raw("u1"), "First").unwrap();
    for (company, name) in [("c1", "Alpha"), ("c2", "Bravo")] {
        hierarchy
            .insert_company(&CompanyId::from_raw(company), &UnitId::from_raw("u1"), name)
            .unwrap();
    }
    for (team, company) in [("t1", "c1"), ("t2", "c1"), ("t3", "c2")] {
        hierarchy
            .insert_team(&TeamId::from_raw(team), &CompanyId::from_raw(company), team)
            .unwrap();
    }
    for (squad, team) in [("s1", "t1"), ("s2", "t1"), ("s3", "t2"), ("s4", "t3")] {
        hierarchy
            .insert_squad(&SquadId::from_raw(squad), &TeamId::from_raw(team), squad)
            .unwrap();
    }

    for identity in [
        member("e1", "s1", "t1", "c1"),
        member("e2", "s2", "t1", "c1"),
        member("e3", "s3", "t2", "c1"),
        member("e4", "s4", "t3", "c2"),
        elevated("ops", "c1"),
    ] {
        entities.insert(&identity).unwrap();
    }

    Fixture {
        aos: Arc::new(AoRepo::new(db.clone())),
        violations: Arc::new(ViolationRepo::new(db)),
        hierarchy,
        entities,
    }
}

pub struct Engine {
    pub tracker: Tracker,
    pub outbound: Arc<RecordingOutbound>,
    pub store: Arc<EntityRepo>,
    pub aos: Arc<AoRepo>,
    pub violations: Arc<ViolationRepo>,
}

pub fn engine() -> Engine {
    engine_with(TrackerSettings::default())
}

/// A tracker wired to the seeded fixture store and a recording transport.
pub fn engine_with(settings: TrackerSettings) -> Engine {
    let fx = fixture();
    let outbound = Arc::new(RecordingOutbound::default());
    let collab = Collaborators {
        hierarchy: fx.hierarchy.clone(),
        aos: fx.aos.clone(),
        entities: fx.entities.clone(),
        presence: fx.entities.clone(),
        violations: fx.violations.clone(),
    };
    Engine {
        tracker: Tracker::new(settings, collab, outbound.clone()),
        outbound,
        store: fx.entities,
        aos: fx.aos,
        violations: fx.violations,
    }
}
