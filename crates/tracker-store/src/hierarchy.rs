use async_trait::async_trait;
use tracing::instrument;

use tracker_core::directory::HierarchyDirectory;
use tracker_core::errors::DirectoryError;
use tracker_core::ids::{CompanyId, SquadId, TeamId, UnitId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Read access to the unit > company > team > squad tree, plus seeding
/// helpers for administrators and tests.
pub struct HierarchyRepo {
    db: Database,
}

impl HierarchyRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(unit_id = %id))]
    pub fn insert_unit(&self, id: &UnitId, name: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO units (id, name) VALUES (?1, ?2)",
                rusqlite::params![id.as_str(), name],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(company_id = %id, unit_id = %unit))]
    pub fn insert_company(&self, id: &CompanyId, unit: &UnitId, name: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO companies (id, unit_id, name) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.as_str(), unit.as_str(), name],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(team_id = %id, company_id = %company))]
    pub fn insert_team(&self, id: &TeamId, company: &CompanyId, name: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO teams (id, company_id, name) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.as_str(), company.as_str(), name],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(squad_id = %id, team_id = %team))]
    pub fn insert_squad(&self, id: &SquadId, team: &TeamId, name: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO squads (id, team_id, name) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.as_str(), team.as_str(), name],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(team_id = %team))]
    pub fn squads_of(&self, team: &TeamId) -> Result<Vec<SquadId>, StoreError> {
        self.children("SELECT id FROM squads WHERE team_id = ?1 ORDER BY id", team.as_str(), "squads")
            .map(|ids| ids.into_iter().map(SquadId::from_raw).collect())
    }

    #[instrument(skip(self), fields(company_id = %company))]
    pub fn teams_of(&self, company: &CompanyId) -> Result<Vec<TeamId>, StoreError> {
        self.children(
            "SELECT id FROM teams WHERE company_id = ?1 ORDER BY id",
            company.as_str(),
            "teams",
        )
        .map(|ids| ids.into_iter().map(TeamId::from_raw).collect())
    }

    #[instrument(skip(self), fields(unit_id = %unit))]
    pub fn companies_of(&self, unit: &UnitId) -> Result<Vec<CompanyId>, StoreError> {
        self.children(
            "SELECT id FROM companies WHERE unit_id = ?1 ORDER BY id",
            unit.as_str(),
            "companies",
        )
        .map(|ids| ids.into_iter().map(CompanyId::from_raw).collect())
    }

    fn children(&self, sql: &str, parent: &str, table: &'static str) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([parent])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_helpers::get::<String>(row, 0, table, "id")?);
            }
            Ok(out)
        })
    }
}

#[async_trait]
impl HierarchyDirectory for HierarchyRepo {
    async fn squads_in_team(&self, team: &TeamId) -> Result<Vec<SquadId>, DirectoryError> {
        Ok(self.squads_of(team)?)
    }

    async fn teams_in_company(&self, company: &CompanyId) -> Result<Vec<TeamId>, DirectoryError> {
        Ok(self.teams_of(company)?)
    }

    async fn companies_in_unit(&self, unit: &UnitId) -> Result<Vec<CompanyId>, DirectoryError> {
        Ok(self.companies_of(unit)?)
    }
}
