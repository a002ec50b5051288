use async_trait::async_trait;
use tracing::{instrument, warn};

use tracker_core::directory::Authenticator;
use tracker_core::entity::Identity;
use tracker_core::errors::DirectoryError;
use tracker_core::ids::EntityId;

use crate::database::Database;
use crate::entities::EntityRepo;
use crate::error::StoreError;

/// Opaque bearer tokens mapped to entities. Token issuance itself lives
/// outside the tracker; `issue` exists for seeding.
pub struct TokenAuthenticator {
    db: Database,
    entities: EntityRepo,
}

impl TokenAuthenticator {
    pub fn new(db: Database) -> Self {
        Self {
            entities: EntityRepo::new(db.clone()),
            db,
        }
    }

    #[instrument(skip(self, token), fields(entity_id = %entity))]
    pub fn issue(&self, entity: &EntityId, token: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO auth_tokens (token, entity_id) VALUES (?1, ?2)",
                rusqlite::params![token, entity.as_str()],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self, token))]
    pub fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM auth_tokens WHERE token = ?1", [token])?;
            Ok(removed > 0)
        })
    }

    fn lookup(&self, token: &str) -> Result<Option<EntityId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT entity_id FROM auth_tokens WHERE token = ?1")?;
            let mut rows = stmt.query([token])?;
            match rows.next()? {
                Some(row) => Ok(Some(EntityId::from_raw(row.get::<_, String>(0)?))),
                None => Ok(None),
            }
        })
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, DirectoryError> {
        if token.is_empty() {
            return Err(DirectoryError::Unauthorized("missing token".into()));
        }
        let Some(entity) = self.lookup(token)? else {
            warn!("rejected unknown token");
            return Err(DirectoryError::Unauthorized("unknown token".into()));
        };
        match self.entities.get_identity(&entity) {
            Ok(identity) => Ok(identity),
            Err(StoreError::NotFound(_)) => Err(DirectoryError::Unauthorized(format!(
                "token bound to missing entity {entity}"
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
