use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use tracing::{debug, instrument};

use tracker_core::directory::{EntityStore, PresenceStore, PresenceWrite};
use tracker_core::entity::{CoarseRole, EntityPosition, HierarchyRef, HierarchyRole, Identity};
use tracker_core::errors::DirectoryError;
use tracker_core::geo::{bounding_box, haversine_meters, Point};
use tracker_core::ids::{CompanyId, EntityId, SquadId, TeamId, UnitId};
use tracker_core::scope::Scope;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;
use crate::scope_filter::scope_clause;

/// Persisted presence columns for one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct PresenceRow {
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

pub struct EntityRepo {
    db: Database,
}

impl EntityRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register an entity with its identity and placement.
    #[instrument(skip(self, identity), fields(entity_id = %identity.entity_id))]
    pub fn insert(&self, identity: &Identity) -> Result<(), StoreError> {
        let h = &identity.hierarchy;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entities (id, name, email, role, hierarchy_role, unit_id, company_id, team_id, squad_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    identity.entity_id.as_str(),
                    identity.name,
                    identity.email,
                    identity.role.as_str(),
                    identity.hierarchy_role.map(|r| r.as_str()),
                    h.unit_id.as_ref().map(|id| id.as_str()),
                    h.company_id.as_ref().map(|id| id.as_str()),
                    h.team_id.as_ref().map(|id| id.as_str()),
                    h.squad_id.as_ref().map(|id| id.as_str()),
                ],
            )?;
            Ok(())
        })
    }

    /// Move an entity to another place in the hierarchy.
    #[instrument(skip(self, hierarchy), fields(entity_id = %entity))]
    pub fn reassign(&self, entity: &EntityId, hierarchy: &HierarchyRef) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE entities SET unit_id = ?1, company_id = ?2, team_id = ?3, squad_id = ?4 WHERE id = ?5",
                rusqlite::params![
                    hierarchy.unit_id.as_ref().map(|id| id.as_str()),
                    hierarchy.company_id.as_ref().map(|id| id.as_str()),
                    hierarchy.team_id.as_ref().map(|id| id.as_str()),
                    hierarchy.squad_id.as_ref().map(|id| id.as_str()),
                    entity.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("entity {entity}")));
            }
            Ok(())
        })
    }

    /// Persist the latest position as a GeoJSON point plus indexed lng/lat columns.
    #[instrument(skip(self), fields(entity_id = %entity))]
    pub fn set_location(&self, entity: &EntityId, point: Point, at: DateTime<Utc>) -> Result<(), StoreError> {
        let location = serde_json::to_string(&point.to_geojson())?;
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE entities SET location = ?1, lng = ?2, lat = ?3, location_updated_at = ?4 WHERE id = ?5",
                rusqlite::params![location, point.lng, point.lat, at.to_rfc3339(), entity.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("entity {entity}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(entity_id = %entity))]
    pub fn get_identity(&self, entity: &EntityId) -> Result<Identity, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, email, role, hierarchy_role, unit_id, company_id, team_id, squad_id
                 FROM entities WHERE id = ?1",
            )?;
            let mut rows = stmt.query([entity.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_identity(row),
                None => Err(StoreError::NotFound(format!("entity {entity}"))),
            }
        })
    }

    #[instrument(skip(self), fields(entity_id = %entity))]
    pub fn presence(&self, entity: &EntityId) -> Result<PresenceRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT online, last_seen FROM entities WHERE id = ?1")?;
            let mut rows = stmt.query([entity.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(PresenceRow {
                    online: row_helpers::get(row, 0, "entities", "online")?,
                    last_seen: row_helpers::parse_timestamp_opt(
                        row_helpers::get_opt(row, 1, "entities", "last_seen")?,
                        "entities",
                        "last_seen",
                    )?,
                }),
                None => Err(StoreError::NotFound(format!("entity {entity}"))),
            }
        })
    }

    /// Apply a batch of presence changes in one transaction. Unknown entities
    /// are skipped.
    #[instrument(skip(self, writes), fields(count = writes.len()))]
    pub fn apply_presence(&self, writes: &[PresenceWrite]) -> Result<usize, StoreError> {
        self.db.with_tx(|tx| {
            let mut stmt = tx.prepare("UPDATE entities SET online = ?1, last_seen = ?2 WHERE id = ?3")?;
            let mut applied = 0;
            for w in writes {
                applied += stmt.execute(rusqlite::params![
                    w.online,
                    w.last_seen.to_rfc3339(),
                    w.entity_id.as_str()
                ])?;
            }
            Ok(applied)
        })
    }

    /// Stored positions within `radius_m` of `center` whose hierarchy the
    /// scope admits, nearest first. A bounding box and the scope predicate
    /// prefilter in SQL; exact distance is checked afterwards.
    #[instrument(skip(self, scope), fields(lng = center.lng, lat = center.lat, radius_m))]
    pub fn positions_near(
        &self,
        center: Point,
        radius_m: f64,
        scope: &Scope,
    ) -> Result<Vec<EntityPosition>, StoreError> {
        let Some(clause) = scope_clause(scope) else {
            return Ok(Vec::new());
        };
        let bbox = bounding_box(center, radius_m);

        let sql = format!(
            "SELECT id, name, unit_id, company_id, team_id, squad_id, lng, lat, online, location_updated_at
             FROM entities
             WHERE lng IS NOT NULL AND lat IS NOT NULL
               AND lat BETWEEN ? AND ? AND lng BETWEEN ? AND ?
               AND {}",
            clause.sql
        );
        let mut params = vec![
            SqlValue::Real(bbox.min_lat),
            SqlValue::Real(bbox.max_lat),
            SqlValue::Real(bbox.min_lng),
            SqlValue::Real(bbox.max_lng),
        ];
        params.extend(clause.params.into_iter().map(SqlValue::Text));

        let candidates = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_position(row)?);
            }
            Ok(out)
        })?;

        let prefiltered = candidates.len();
        let mut within: Vec<(f64, EntityPosition)> = candidates
            .into_iter()
            .map(|p| (haversine_meters(center, p.coordinates), p))
            .filter(|(d, _)| *d <= radius_m)
            .collect();
        within.sort_by(|a, b| a.0.total_cmp(&b.0));
        debug!(prefiltered, matched = within.len(), "nearby query");
        Ok(within.into_iter().map(|(_, p)| p).collect())
    }
}

fn hierarchy_from(row: &rusqlite::Row<'_>, first: usize) -> Result<HierarchyRef, StoreError> {
    let unit: Option<String> = row_helpers::get_opt(row, first, "entities", "unit_id")?;
    let company: Option<String> = row_helpers::get_opt(row, first + 1, "entities", "company_id")?;
    let team: Option<String> = row_helpers::get_opt(row, first + 2, "entities", "team_id")?;
    let squad: Option<String> = row_helpers::get_opt(row, first + 3, "entities", "squad_id")?;
    Ok(HierarchyRef {
        unit_id: unit.map(UnitId::from_raw),
        company_id: company.map(CompanyId::from_raw),
        team_id: team.map(TeamId::from_raw),
        squad_id: squad.map(SquadId::from_raw),
    })
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> Result<Identity, StoreError> {
    let role: String = row_helpers::get(row, 3, "entities", "role")?;
    let hierarchy_role: Option<String> = row_helpers::get_opt(row, 4, "entities", "hierarchy_role")?;
    Ok(Identity {
        entity_id: EntityId::from_raw(row_helpers::get::<String>(row, 0, "entities", "id")?),
        name: row_helpers::get(row, 1, "entities", "name")?,
        email: row_helpers::get(row, 2, "entities", "email")?,
        role: row_helpers::parse_enum::<CoarseRole>(&role, "entities", "role")?,
        hierarchy_role: HierarchyRole::parse_lenient(hierarchy_role.as_deref()),
        hierarchy: hierarchy_from(row, 5)?,
    })
}

fn row_to_position(row: &rusqlite::Row<'_>) -> Result<EntityPosition, StoreError> {
    Ok(EntityPosition {
        entity_id: EntityId::from_raw(row_helpers::get::<String>(row, 0, "entities", "id")?),
        name: row_helpers::get(row, 1, "entities", "name")?,
        hierarchy: hierarchy_from(row, 2)?,
        coordinates: Point::new(
            row_helpers::get(row, 6, "entities", "lng")?,
            row_helpers::get(row, 7, "entities", "lat")?,
        ),
        online: row_helpers::get(row, 8, "entities", "online")?,
        updated_at: row_helpers::parse_timestamp_opt(
            row_helpers::get_opt(row, 9, "entities", "location_updated_at")?,
            "entities",
            "location_updated_at",
        )?,
    })
}

#[async_trait]
impl EntityStore for EntityRepo {
    async fn update_location(
        &self,
        entity: &EntityId,
        point: Point,
        at: DateTime<Utc>,
    ) -> Result<(), DirectoryError> {
        Ok(self.set_location(entity, point, at)?)
    }

    async fn identity(&self, entity: &EntityId) -> Result<Identity, DirectoryError> {
        Ok(self.get_identity(entity)?)
    }

    async fn nearby(
        &self,
        center: Point,
        radius_m: f64,
        scope: &Scope,
    ) -> Result<Vec<EntityPosition>, DirectoryError> {
        Ok(self.positions_near(center, radius_m, scope)?)
    }
}

#[async_trait]
impl PresenceStore for EntityRepo {
    async fn write_presence(&self, writes: &[PresenceWrite]) -> Result<(), DirectoryError> {
        let _ = self.apply_presence(writes)?;
        Ok(())
    }
}
