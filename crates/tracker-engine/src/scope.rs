//! Visibility scope resolution from an entity's hierarchy role and placement.

use std::sync::Arc;

use tracing::debug;

use tracker_core::directory::HierarchyDirectory;
use tracker_core::entity::{HierarchyRole, Identity};
use tracker_core::errors::DirectoryError;
use tracker_core::ids::{CompanyId, TeamId, UnitId};
use tracker_core::scope::Scope;

pub struct ScopeResolver {
    hierarchy: Arc<dyn HierarchyDirectory>,
}

impl ScopeResolver {
    pub fn new(hierarchy: Arc<dyn HierarchyDirectory>) -> Self {
        Self { hierarchy }
    }

    /// Expand the identity's node into every descendant it may observe.
    ///
    /// An unset or unknown role resolves as squad-tier. A tier whose own node
    /// id is missing resolves to the empty scope.
    pub async fn resolve(&self, identity: &Identity) -> Result<Scope, DirectoryError> {
        let h = &identity.hierarchy;
        let role = identity.hierarchy_role.unwrap_or(HierarchyRole::Squad);
        let mut scope = Scope::empty();

        match role {
            HierarchyRole::Squad => {
                if let Some(squad) = &h.squad_id {
                    let _ = scope.squads.insert(squad.clone());
                }
            }
            HierarchyRole::Team => {
                if let Some(team) = &h.team_id {
                    self.expand_team(team, &mut scope).await?;
                }
            }
            HierarchyRole::Company => {
                if let Some(company) = &h.company_id {
                    self.expand_company(company, &mut scope).await?;
                }
            }
            HierarchyRole::Unit | HierarchyRole::Headquarters => {
                if let Some(unit) = &h.unit_id {
                    self.expand_unit(unit, &mut scope).await?;
                }
            }
        }

        debug!(
            entity_id = %identity.entity_id,
            role = role.as_str(),
            squads = scope.squads.len(),
            teams = scope.teams.len(),
            companies = scope.companies.len(),
            units = scope.units.len(),
            "scope resolved"
        );
        Ok(scope)
    }

    async fn expand_team(&self, team: &TeamId, scope: &mut Scope) -> Result<(), DirectoryError> {
        scope.squads.extend(self.hierarchy.squads_in_team(team).await?);
        let _ = scope.teams.insert(team.clone());
        Ok(())
    }

    async fn expand_company(&self, company: &CompanyId, scope: &mut Scope) -> Result<(), DirectoryError> {
        for team in self.hierarchy.teams_in_company(company).await? {
            self.expand_team(&team, scope).await?;
        }
        let _ = scope.companies.insert(company.clone());
        Ok(())
    }

    async fn expand_unit(&self, unit: &UnitId, scope: &mut Scope) -> Result<(), DirectoryError> {
        for company in self.hierarchy.companies_in_unit(unit).await? {
            self.expand_company(&company, scope).await?;
        }
        let _ = scope.units.insert(unit.clone());
        Ok(())
    }
}
