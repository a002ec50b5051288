use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use tracker_core::entity::Identity;
use tracker_core::ids::{ConnId, EntityId};
use tracker_core::scope::Scope;

/// Per-connection state: who is connected and what they may see.
#[derive(Clone, Debug)]
pub struct Session {
    pub conn_id: ConnId,
    pub identity: Arc<Identity>,
    pub scope: Arc<Scope>,
    pub presence_subscribed: bool,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new(conn_id: ConnId, identity: Identity, scope: Scope) -> Self {
        Self {
            conn_id,
            identity: Arc::new(identity),
            scope: Arc::new(scope),
            presence_subscribed: false,
            connected_at: Utc::now(),
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.identity.entity_id
    }

    pub fn is_elevated(&self) -> bool {
        self.identity.role.is_elevated()
    }

    /// Whether this connection may observe items placed at `identity`.
    /// An entity always sees itself.
    pub fn admits(&self, identity: &Identity) -> bool {
        identity.entity_id == self.identity.entity_id || self.scope.admits(&identity.hierarchy)
    }
}

/// Registry of authenticated connections.
///
/// A lookup miss is the signal that a connection has gone away; anything
/// that completes after a disconnect checks here and does nothing.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        let _ = self.sessions.insert(session.conn_id.clone(), session);
    }

    pub fn remove(&self, conn: &ConnId) -> Option<Session> {
        self.sessions.remove(conn).map(|(_, s)| s)
    }

    pub fn get(&self, conn: &ConnId) -> Option<Session> {
        self.sessions.get(conn).map(|s| s.clone())
    }

    pub fn contains(&self, conn: &ConnId) -> bool {
        self.sessions.contains_key(conn)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn set_presence_subscribed(&self, conn: &ConnId) -> bool {
        match self.sessions.get_mut(conn) {
            Some(mut s) => {
                s.presence_subscribed = true;
                true
            }
            None => false,
        }
    }

    /// Replace identity and scope on one connection.
    pub fn update_access(&self, conn: &ConnId, identity: Arc<Identity>, scope: Arc<Scope>) -> bool {
        match self.sessions.get_mut(conn) {
            Some(mut s) => {
                s.identity = identity;
                s.scope = scope;
                true
            }
            None => false,
        }
    }

    /// Open connections belonging to `entity`.
    pub fn conns_for_entity(&self, entity: &EntityId) -> Vec<ConnId> {
        self.sessions
            .iter()
            .filter(|s| s.entity_id() == entity)
            .map(|s| s.conn_id.clone())
            .collect()
    }

    pub fn elevated(&self) -> Vec<Session> {
        self.filtered(Session::is_elevated)
    }

    pub fn presence_subscribers(&self) -> Vec<Session> {
        self.filtered(|s| s.presence_subscribed)
    }

    /// One identity per connected entity.
    pub fn connected_identities(&self) -> Vec<Arc<Identity>> {
        let mut by_entity: HashMap<EntityId, Arc<Identity>> = HashMap::new();
        for s in self.sessions.iter() {
            let _ = by_entity
                .entry(s.identity.entity_id.clone())
                .or_insert_with(|| Arc::clone(&s.identity));
        }
        by_entity.into_values().collect()
    }

    fn filtered(&self, pred: impl Fn(&Session) -> bool) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|s| pred(s.value()))
            .map(|s| s.value().clone())
            .collect()
    }
}
