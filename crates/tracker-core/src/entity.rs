use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Point;
use crate::ids::{AoId, CompanyId, EntityId, SquadId, TeamId, UnitId, ViolationId};

/// Coarse visibility class. Elevated connections observe organization-wide
/// without viewport filtering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoarseRole {
    #[default]
    Normal,
    Elevated,
}

impl CoarseRole {
    pub fn is_elevated(self) -> bool {
        matches!(self, Self::Elevated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Elevated => "elevated",
        }
    }
}

impl FromStr for CoarseRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" | "user" => Ok(Self::Normal),
            "elevated" | "admin" => Ok(Self::Elevated),
            other => Err(format!("unknown coarse role: {other}")),
        }
    }
}

/// Position of an entity in the command hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyRole {
    Squad,
    Team,
    Company,
    Unit,
    Headquarters,
}

impl HierarchyRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Squad => "squad",
            Self::Team => "team",
            Self::Company => "company",
            Self::Unit => "unit",
            Self::Headquarters => "headquarters",
        }
    }

    /// Lenient parse used for directory-supplied strings. Unknown values map
    /// to `None`, which scope resolution treats as squad-tier.
    pub fn parse_lenient(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for HierarchyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HierarchyRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "squad" | "squad_leader" => Ok(Self::Squad),
            "team" | "team_leader" => Ok(Self::Team),
            "company" | "company_commander" => Ok(Self::Company),
            "unit" | "unit_commander" => Ok(Self::Unit),
            "headquarters" | "hq" => Ok(Self::Headquarters),
            other => Err(format!("unknown hierarchy role: {other}")),
        }
    }
}

/// The hierarchy nodes an entity (or any scoped item) belongs to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyRef {
    pub unit_id: Option<UnitId>,
    pub company_id: Option<CompanyId>,
    pub team_id: Option<TeamId>,
    pub squad_id: Option<SquadId>,
}

/// Verified identity attached to a connection by the authenticator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub entity_id: EntityId,
    pub name: String,
    pub email: String,
    pub role: CoarseRole,
    pub hierarchy_role: Option<HierarchyRole>,
    pub hierarchy: HierarchyRef,
}

impl Identity {
    /// Companies own the AO set an entity is checked against.
    pub fn ao_company(&self) -> Option<&CompanyId> {
        self.hierarchy.company_id.as_ref()
    }
}

/// An Area of Operations polygon, read from the AO directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaOfOperations {
    pub id: AoId,
    pub name: String,
    pub company_id: CompanyId,
    pub active: bool,
    pub color: Option<String>,
    /// Closed ring of `[lng, lat]` points.
    pub ring: Vec<Point>,
}

impl AreaOfOperations {
    pub fn summary(&self) -> AoSummary {
        AoSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }
}

/// The part of an AO carried in broadcast payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AoSummary {
    pub id: AoId,
    pub name: String,
    pub color: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    ApproachingBoundary,
    Breach,
    SustainedBreach,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApproachingBoundary => "APPROACHING_BOUNDARY",
            Self::Breach => "BREACH",
            Self::SustainedBreach => "SUSTAINED_BREACH",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "APPROACHING_BOUNDARY" => Ok(Self::ApproachingBoundary),
            "BREACH" => Ok(Self::Breach),
            "SUSTAINED_BREACH" => Ok(Self::SustainedBreach),
            other => Err(format!("unknown violation kind: {other}")),
        }
    }
}

/// Append-only geofence violation record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationEvent {
    pub id: ViolationId,
    pub kind: ViolationKind,
    pub entity_id: EntityId,
    pub hierarchy: HierarchyRef,
    pub ao_id: Option<AoId>,
    pub coordinates: Point,
    pub distance_meters: Option<f64>,
    pub breach_since: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// A stored position, used for one-shot nearby queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPosition {
    pub entity_id: EntityId,
    pub name: String,
    pub hierarchy: HierarchyRef,
    pub coordinates: Point,
    pub online: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_role_parse() {
        assert_eq!("team".parse::<HierarchyRole>().unwrap(), HierarchyRole::Team);
        assert_eq!("hq".parse::<HierarchyRole>().unwrap(), HierarchyRole::Headquarters);
        assert!("colonel".parse::<HierarchyRole>().is_err());
        assert_eq!(HierarchyRole::parse_lenient(Some("colonel")), None);
        assert_eq!(HierarchyRole::parse_lenient(None), None);
    }

    #[test]
    fn coarse_role_parse() {
        assert_eq!("admin".parse::<CoarseRole>().unwrap(), CoarseRole::Elevated);
        assert!(CoarseRole::Elevated.is_elevated());
        assert!(!CoarseRole::default().is_elevated());
    }

    #[test]
    fn violation_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(ViolationKind::SustainedBreach).unwrap(),
            "SUSTAINED_BREACH"
        );
        for kind in [
            ViolationKind::ApproachingBoundary,
            ViolationKind::Breach,
            ViolationKind::SustainedBreach,
        ] {
            assert_eq!(kind.as_str().parse::<ViolationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn hierarchy_ref_camel_case() {
        let h = HierarchyRef {
            squad_id: Some(SquadId::from_raw("s1")),
            ..Default::default()
        };
        let v = serde_json::to_value(&h).unwrap();
        assert_eq!(v["squadId"], "s1");
        assert!(v["teamId"].is_null());
    }
}
