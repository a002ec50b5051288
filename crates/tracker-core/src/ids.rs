use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(EntityId, "ent");
branded_id!(ConnId, "conn");
branded_id!(UnitId, "unit");
branded_id!(CompanyId, "coy");
branded_id!(TeamId, "team");
branded_id!(SquadId, "sqd");
branded_id!(AoId, "ao");
branded_id!(ViolationId, "vio");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_id_has_prefix() {
        let id = ConnId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn hierarchy_ids_have_prefixes() {
        assert!(UnitId::new().as_str().starts_with("unit_"));
        assert!(CompanyId::new().as_str().starts_with("coy_"));
        assert!(TeamId::new().as_str().starts_with("team_"));
        assert!(SquadId::new().as_str().starts_with("sqd_"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(ConnId::new(), ConnId::new());
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = EntityId::from_raw("user-42");
        assert_eq!(id.as_str(), "user-42");
        assert_eq!(id.to_string(), "user-42");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = SquadId::from_raw("sqd_a");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"sqd_a\"");
        let parsed: SquadId = serde_json::from_str("\"sqd_a\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<ViolationId> = (0..50).map(|_| ViolationId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0] < w[1], "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
