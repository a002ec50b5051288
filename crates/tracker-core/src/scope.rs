//! Visibility scopes.
//!
//! A scope lists every hierarchy node its holder may observe. Access is a
//! single-match test: an item is visible when any one of its squad, team,
//! company or unit ids appears in the matching scope set. An empty scope
//! sees nothing.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::entity::HierarchyRef;
use crate::ids::{CompanyId, SquadId, TeamId, UnitId};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub squads: HashSet<SquadId>,
    pub teams: HashSet<TeamId>,
    pub companies: HashSet<CompanyId>,
    pub units: HashSet<UnitId>,
}

impl Scope {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.squads.is_empty()
            && self.teams.is_empty()
            && self.companies.is_empty()
            && self.units.is_empty()
    }

    /// True iff any tier of `item` is in this scope.
    pub fn admits(&self, item: &HierarchyRef) -> bool {
        has_scope_access(item, self)
    }
}

pub fn has_scope_access(item: &HierarchyRef, scope: &Scope) -> bool {
    item.squad_id.as_ref().is_some_and(|id| scope.squads.contains(id))
        || item.team_id.as_ref().is_some_and(|id| scope.teams.contains(id))
        || item.company_id.as_ref().is_some_and(|id| scope.companies.contains(id))
        || item.unit_id.as_ref().is_some_and(|id| scope.units.contains(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(squad: &str, team: &str, company: &str, unit: &str) -> HierarchyRef {
        HierarchyRef {
            unit_id: Some(UnitId::from_raw(unit)),
            company_id: Some(CompanyId::from_raw(company)),
            team_id: Some(TeamId::from_raw(team)),
            squad_id: Some(SquadId::from_raw(squad)),
        }
    }

    #[test]
    fn empty_scope_admits_nothing() {
        let scope = Scope::empty();
        assert!(scope.is_empty());
        assert!(!scope.admits(&member("s1", "t1", "c1", "u1")));
    }

    #[test]
    fn single_tier_match_is_enough() {
        let mut scope = Scope::empty();
        scope.companies.insert(CompanyId::from_raw("c1"));
        assert!(scope.admits(&member("s9", "t9", "c1", "u9")));
        assert!(!scope.admits(&member("s9", "t9", "c2", "u9")));
    }

    #[test]
    fn unset_item_ids_never_match() {
        let mut scope = Scope::empty();
        scope.squads.insert(SquadId::from_raw("s1"));
        assert!(!scope.admits(&HierarchyRef::default()));
    }
}
