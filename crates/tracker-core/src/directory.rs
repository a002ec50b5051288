//! Interfaces to the collaborators that own data the tracker only reads or
//! writes a few fields of: the hierarchy and AO directories, the entity
//! store, the presence/violation sinks and the identity provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{AreaOfOperations, EntityPosition, Identity, ViolationEvent};
use crate::errors::DirectoryError;
use crate::geo::Point;
use crate::ids::{CompanyId, EntityId, SquadId, TeamId, UnitId};
use crate::scope::Scope;

/// Parent → children lookups over the unit/company/team/squad tree.
#[async_trait]
pub trait HierarchyDirectory: Send + Sync {
    async fn squads_in_team(&self, team: &TeamId) -> Result<Vec<SquadId>, DirectoryError>;
    async fn teams_in_company(&self, company: &CompanyId) -> Result<Vec<TeamId>, DirectoryError>;
    async fn companies_in_unit(&self, unit: &UnitId) -> Result<Vec<CompanyId>, DirectoryError>;
}

#[async_trait]
pub trait AoDirectory: Send + Sync {
    /// Active AOs owned by `company`.
    async fn active_for_company(
        &self,
        company: &CompanyId,
    ) -> Result<Vec<AreaOfOperations>, DirectoryError>;
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn update_location(
        &self,
        entity: &EntityId,
        point: Point,
        at: DateTime<Utc>,
    ) -> Result<(), DirectoryError>;

    /// Current profile and hierarchy assignment of an entity.
    async fn identity(&self, entity: &EntityId) -> Result<Identity, DirectoryError>;

    /// Entities with a stored position within `radius_m` of `center` that
    /// `scope` admits. An empty scope yields an empty result.
    async fn nearby(
        &self,
        center: Point,
        radius_m: f64,
        scope: &Scope,
    ) -> Result<Vec<EntityPosition>, DirectoryError>;
}

/// One pending presence change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresenceWrite {
    pub entity_id: EntityId,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Apply a batch of presence changes in one write.
    async fn write_presence(&self, writes: &[PresenceWrite]) -> Result<(), DirectoryError>;
}

#[async_trait]
pub trait ViolationLog: Send + Sync {
    async fn append(&self, events: &[ViolationEvent]) -> Result<(), DirectoryError>;
}

/// Resolves a bearer token into a verified identity.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Identity, DirectoryError>;
}
