//! SQL rendering of a [`Scope`] as an OR-of-membership predicate.

use tracker_core::scope::Scope;

/// A WHERE fragment plus its positional parameters, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeClause {
    pub sql: String,
    pub params: Vec<String>,
}

/// Render `(squad_id IN (?,..) OR team_id IN (..) OR ..)` for the non-empty
/// tiers of `scope`. An empty scope yields `None`; callers must then return
/// no rows rather than omit the filter.
pub fn scope_clause(scope: &Scope) -> Option<ScopeClause> {
    let mut parts = Vec::new();
    let mut params = Vec::new();

    push_tier(&mut parts, &mut params, "squad_id", scope.squads.iter().map(|id| id.as_str()));
    push_tier(&mut parts, &mut params, "team_id", scope.teams.iter().map(|id| id.as_str()));
    push_tier(
        &mut parts,
        &mut params,
        "company_id",
        scope.companies.iter().map(|id| id.as_str()),
    );
    push_tier(&mut parts, &mut params, "unit_id", scope.units.iter().map(|id| id.as_str()));

    if parts.is_empty() {
        return None;
    }
    Some(ScopeClause {
        sql: format!("({})", parts.join(" OR ")),
        params,
    })
}

fn push_tier<'a>(
    parts: &mut Vec<String>,
    params: &mut Vec<String>,
    column: &str,
    ids: impl Iterator<Item = &'a str>,
) {
    let mut ids: Vec<&str> = ids.collect();
    if ids.is_empty() {
        return;
    }
    // Stable ordering keeps statements cacheable.
    ids.sort_unstable();
    let placeholders = vec!["?"; ids.len()].join(", ");
    parts.push(format!("{column} IN ({placeholders})"));
    params.extend(ids.into_iter().map(str::to_string));
}
