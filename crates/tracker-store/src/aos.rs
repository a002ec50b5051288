use async_trait::async_trait;
use tracing::instrument;

use tracker_core::directory::AoDirectory;
use tracker_core::entity::AreaOfOperations;
use tracker_core::errors::DirectoryError;
use tracker_core::ids::{AoId, CompanyId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

pub struct AoRepo {
    db: Database,
}

impl AoRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace an AO. The ring is stored as `[[lng, lat], ...]` JSON.
    #[instrument(skip(self, ao), fields(ao_id = %ao.id, company_id = %ao.company_id))]
    pub fn upsert(&self, ao: &AreaOfOperations) -> Result<(), StoreError> {
        let polygon = serde_json::to_string(&ao.ring)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO aos (id, company_id, name, color, active, polygon)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    company_id = excluded.company_id, name = excluded.name,
                    color = excluded.color, active = excluded.active,
                    polygon = excluded.polygon",
                rusqlite::params![
                    ao.id.as_str(),
                    ao.company_id.as_str(),
                    ao.name,
                    ao.color,
                    ao.active,
                    polygon,
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(ao_id = %id, active))]
    pub fn set_active(&self, id: &AoId, active: bool) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE aos SET active = ?1 WHERE id = ?2",
                rusqlite::params![active, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("ao {id}")));
            }
            Ok(())
        })
    }

    /// Active AOs owned by `company`, ordered by id.
    #[instrument(skip(self), fields(company_id = %company))]
    pub fn list_active(&self, company: &CompanyId) -> Result<Vec<AreaOfOperations>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, company_id, name, color, active, polygon
                 FROM aos WHERE company_id = ?1 AND active = 1 ORDER BY id",
            )?;
            let mut rows = stmt.query([company.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_ao(row)?);
            }
            Ok(out)
        })
    }
}

fn row_to_ao(row: &rusqlite::Row<'_>) -> Result<AreaOfOperations, StoreError> {
    let polygon: String = row_helpers::get(row, 5, "aos", "polygon")?;
    Ok(AreaOfOperations {
        id: AoId::from_raw(row_helpers::get::<String>(row, 0, "aos", "id")?),
        company_id: CompanyId::from_raw(row_helpers::get::<String>(row, 1, "aos", "company_id")?),
        name: row_helpers::get(row, 2, "aos", "name")?,
        color: row_helpers::get_opt(row, 3, "aos", "color")?,
        active: row_helpers::get(row, 4, "aos", "active")?,
        ring: row_helpers::parse_ring(&polygon, "aos", "polygon")?,
    })
}

#[async_trait]
impl AoDirectory for AoRepo {
    async fn active_for_company(
        &self,
        company: &CompanyId,
    ) -> Result<Vec<AreaOfOperations>, DirectoryError> {
        Ok(self.list_active(company)?)
    }
}
