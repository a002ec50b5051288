use async_trait::async_trait;
use tracing::instrument;

use tracker_core::directory::ViolationLog;
use tracker_core::entity::{HierarchyRef, ViolationEvent, ViolationKind};
use tracker_core::errors::DirectoryError;
use tracker_core::geo::Point;
use tracker_core::ids::{AoId, CompanyId, EntityId, SquadId, TeamId, UnitId, ViolationId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Append-only log of geofence violations.
pub struct ViolationRepo {
    db: Database,
}

impl ViolationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, events), fields(count = events.len()))]
    pub fn insert_batch(&self, events: &[ViolationEvent]) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO violation_events
                    (id, kind, entity_id, unit_id, company_id, team_id, squad_id, ao_id,
                     lng, lat, distance_meters, breach_since, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for e in events {
                let h = &e.hierarchy;
                let _ = stmt.execute(rusqlite::params![
                    e.id.as_str(),
                    e.kind.as_str(),
                    e.entity_id.as_str(),
                    h.unit_id.as_ref().map(|id| id.as_str()),
                    h.company_id.as_ref().map(|id| id.as_str()),
                    h.team_id.as_ref().map(|id| id.as_str()),
                    h.squad_id.as_ref().map(|id| id.as_str()),
                    e.ao_id.as_ref().map(|id| id.as_str()),
                    e.coordinates.lng,
                    e.coordinates.lat,
                    e.distance_meters,
                    e.breach_since.map(|t| t.to_rfc3339()),
                    e.occurred_at.to_rfc3339(),
                ])?;
            }
            Ok(())
        })
    }

    /// Most recent violations for an entity, newest first.
    #[instrument(skip(self), fields(entity_id = %entity, limit))]
    pub fn list_for_entity(&self, entity: &EntityId, limit: u32) -> Result<Vec<ViolationEvent>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, entity_id, unit_id, company_id, team_id, squad_id, ao_id,
                        lng, lat, distance_meters, breach_since, occurred_at
                 FROM violation_events WHERE entity_id = ?1
                 ORDER BY occurred_at DESC, id DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![entity.as_str(), limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_violation(row)?);
            }
            Ok(out)
        })
    }
}

const TABLE: &str = "violation_events";

fn row_to_violation(row: &rusqlite::Row<'_>) -> Result<ViolationEvent, StoreError> {
    let kind: String = row_helpers::get(row, 1, TABLE, "kind")?;
    let unit: Option<String> = row_helpers::get_opt(row, 3, TABLE, "unit_id")?;
    let company: Option<String> = row_helpers::get_opt(row, 4, TABLE, "company_id")?;
    let team: Option<String> = row_helpers::get_opt(row, 5, TABLE, "team_id")?;
    let squad: Option<String> = row_helpers::get_opt(row, 6, TABLE, "squad_id")?;
    let ao: Option<String> = row_helpers::get_opt(row, 7, TABLE, "ao_id")?;
    let occurred_at: String = row_helpers::get(row, 12, TABLE, "occurred_at")?;
    Ok(ViolationEvent {
        id: ViolationId::from_raw(row_helpers::get::<String>(row, 0, TABLE, "id")?),
        kind: row_helpers::parse_enum::<ViolationKind>(&kind, TABLE, "kind")?,
        entity_id: EntityId::from_raw(row_helpers::get::<String>(row, 2, TABLE, "entity_id")?),
        hierarchy: HierarchyRef {
            unit_id: unit.map(UnitId::from_raw),
            company_id: company.map(CompanyId::from_raw),
            team_id: team.map(TeamId::from_raw),
            squad_id: squad.map(SquadId::from_raw),
        },
        ao_id: ao.map(AoId::from_raw),
        coordinates: Point::new(
            row_helpers::get(row, 8, TABLE, "lng")?,
            row_helpers::get(row, 9, TABLE, "lat")?,
        ),
        distance_meters: row_helpers::get_opt(row, 10, TABLE, "distance_meters")?,
        breach_since: row_helpers::parse_timestamp_opt(
            row_helpers::get_opt(row, 11, TABLE, "breach_since")?,
            TABLE,
            "breach_since",
        )?,
        occurred_at: row_helpers::parse_timestamp(&occurred_at, TABLE, "occurred_at")?,
    })
}

#[async_trait]
impl ViolationLog for ViolationRepo {
    async fn append(&self, events: &[ViolationEvent]) -> Result<(), DirectoryError> {
        if events.is_empty() {
            return Ok(());
        }
        Ok(self.insert_batch(events)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn event(kind: ViolationKind, offset_secs: i64) -> ViolationEvent {
        let now = Utc::now();
        ViolationEvent {
            id: ViolationId::new(),
            kind,
            entity_id: EntityId::from_raw("e1"),
            hierarchy: HierarchyRef {
                company_id: Some(CompanyId::from_raw("c1")),
                ..Default::default()
            },
            ao_id: Some(AoId::from_raw("a1")),
            coordinates: Point::new(1.5, 0.5),
            distance_meters: Some(42.0),
            breach_since: Some(now),
            occurred_at: now + Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn append_and_list_newest_first() {
        let repo = ViolationRepo::new(Database::in_memory().unwrap());
        let first = event(ViolationKind::Breach, 0);
        let second = event(ViolationKind::SustainedBreach, 120);
        repo.append(&[first.clone(), second.clone()]).await.unwrap();

        let listed = repo.list_for_entity(&EntityId::from_raw("e1"), 10).unwrap();
        assert_eq!(listed, vec![second, first]);
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let repo = ViolationRepo::new(Database::in_memory().unwrap());
        repo.append(&[]).await.unwrap();
        assert!(repo.list_for_entity(&EntityId::from_raw("e1"), 10).unwrap().is_empty());
    }

    #[test]
    fn duplicate_id_rolls_back_batch() {
        let repo = ViolationRepo::new(Database::in_memory().unwrap());
        let e = event(ViolationKind::ApproachingBoundary, 0);
        assert!(repo.insert_batch(&[e.clone(), e]).is_err());
        assert!(repo.list_for_entity(&EntityId::from_raw("e1"), 10).unwrap().is_empty());
    }
}
