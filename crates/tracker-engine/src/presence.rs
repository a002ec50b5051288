//! Online/offline tracking across multiple connections per entity.
//!
//! All lookups are in-memory. Online transitions are batched and written
//! by a periodic flush; offline transitions wait out a debounce window so a
//! quick reconnect never shows as offline in the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tracker_core::directory::{PresenceStore, PresenceWrite};
use tracker_core::ids::{ConnId, EntityId};
use tracker_settings::PresenceSettings;

#[derive(Clone, Debug, PartialEq)]
pub struct PresenceRecord {
    pub sockets: HashSet<ConnId>,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

pub struct PresenceManager {
    records: Arc<DashMap<EntityId, PresenceRecord>>,
    pending: Mutex<HashMap<EntityId, PresenceWrite>>,
    offline_timers: Arc<DashMap<EntityId, JoinHandle<()>>>,
    store: Arc<dyn PresenceStore>,
    offline_debounce: Duration,
    flush_interval: Duration,
}

impl PresenceManager {
    pub fn new(settings: &PresenceSettings, store: Arc<dyn PresenceStore>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            pending: Mutex::new(HashMap::new()),
            offline_timers: Arc::new(DashMap::new()),
            store,
            offline_debounce: Duration::from_millis(settings.offline_debounce_ms),
            flush_interval: Duration::from_millis(settings.flush_interval_ms),
        }
    }

    /// Register `conn` for `entity`. Returns `true` when the entity was
    /// offline before this call.
    pub fn add_socket(&self, entity: &EntityId, conn: &ConnId) -> bool {
        if let Some((_, timer)) = self.offline_timers.remove(entity) {
            timer.abort();
        }
        let now = Utc::now();
        let was_offline = {
            let mut record = self.records.entry(entity.clone()).or_insert_with(|| PresenceRecord {
                sockets: HashSet::new(),
                online: false,
                last_seen: now,
            });
            let was_offline = !record.online;
            let _ = record.sockets.insert(conn.clone());
            record.online = true;
            record.last_seen = now;
            was_offline
        };
        if was_offline {
            self.queue(PresenceWrite {
                entity_id: entity.clone(),
                online: true,
                last_seen: now,
            });
        }
        was_offline
    }

    /// Drop `conn` from `entity`. Returns whether the entity is still online.
    /// Must run inside a tokio runtime: the last removal arms the offline timer.
    pub fn remove_socket(&self, entity: &EntityId, conn: &ConnId) -> bool {
        let now = Utc::now();
        let now_online = match self.records.get_mut(entity) {
            Some(mut record) => {
                let _ = record.sockets.remove(conn);
                record.last_seen = now;
                if record.sockets.is_empty() {
                    record.online = false;
                }
                record.online
            }
            None => return false,
        };
        if !now_online {
            // A queued online write must not land after the offline one.
            let _ = self.pending.lock().remove(entity);
            self.schedule_offline(entity.clone());
        }
        now_online
    }

    fn schedule_offline(&self, entity: EntityId) {
        let records = Arc::clone(&self.records);
        let timers = Arc::clone(&self.offline_timers);
        let store = Arc::clone(&self.store);
        let delay = self.offline_debounce;
        let key = entity.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let last_seen = match records.get(&entity) {
                Some(r) if !r.online && r.sockets.is_empty() => r.last_seen,
                _ => return,
            };
            let _ = timers.remove(&entity);
            let write = PresenceWrite {
                entity_id: entity.clone(),
                online: false,
                last_seen,
            };
            if let Err(e) = store.write_presence(std::slice::from_ref(&write)).await {
                warn!(entity_id = %entity, error = %e, "offline presence write failed");
            } else {
                debug!(entity_id = %entity, "entity marked offline");
            }
        });
        if let Some(previous) = self.offline_timers.insert(key, handle) {
            previous.abort();
        }
    }

    fn queue(&self, write: PresenceWrite) {
        let _ = self.pending.lock().insert(write.entity_id.clone(), write);
    }

    /// Write all queued transitions as one batch. Failures are logged and
    /// the batch is dropped.
    pub async fn flush(&self) -> usize {
        let batch: Vec<PresenceWrite> = self.pending.lock().drain().map(|(_, w)| w).collect();
        if batch.is_empty() {
            return 0;
        }
        let count = batch.len();
        match self.store.write_presence(&batch).await {
            Ok(()) => debug!(count, "presence batch flushed"),
            Err(e) => warn!(count, error = %e, "presence batch write failed"),
        }
        count
    }

    /// Periodic flush of queued online transitions.
    pub fn start_flush_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.flush_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let _ = self.flush().await;
            }
        })
    }

    pub fn is_online(&self, entity: &EntityId) -> bool {
        self.records.get(entity).is_some_and(|r| r.online)
    }

    pub fn sockets(&self, entity: &EntityId) -> Vec<ConnId> {
        self.records
            .get(entity)
            .map(|r| r.sockets.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn online_entity_ids(&self) -> Vec<EntityId> {
        self.records
            .iter()
            .filter(|r| r.online)
            .map(|r| r.key().clone())
            .collect()
    }

    pub fn online_count(&self) -> usize {
        self.records.iter().filter(|r| r.online).count()
    }

    pub fn record(&self, entity: &EntityId) -> Option<PresenceRecord> {
        self.records.get(entity).map(|r| r.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingPresenceStore;

    fn manager(store: Arc<RecordingPresenceStore>) -> PresenceManager {
        PresenceManager::new(&PresenceSettings::default(), store)
    }

    #[tokio::test(start_paused = true)]
    async fn first_socket_reports_was_offline() {
        let store = Arc::new(RecordingPresenceStore::default());
        let pm = manager(store.clone());
        let entity = EntityId::from_raw("e1");
        let (a, b) = (ConnId::new(), ConnId::new());

        assert!(pm.add_socket(&entity, &a));
        assert!(!pm.add_socket(&entity, &b));
        assert!(pm.is_online(&entity));
        assert_eq!(pm.sockets(&entity).len(), 2);

        assert!(pm.remove_socket(&entity, &a));
        assert!(!pm.remove_socket(&entity, &b));
        assert!(!pm.is_online(&entity));
        assert!(pm.online_entity_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn online_transitions_flush_as_one_batch() {
        let store = Arc::new(RecordingPresenceStore::default());
        let pm = manager(store.clone());
        pm.add_socket(&EntityId::from_raw("e1"), &ConnId::new());
        pm.add_socket(&EntityId::from_raw("e2"), &ConnId::new());

        assert_eq!(pm.flush().await, 2);
        assert_eq!(store.batches().len(), 1);
        assert_eq!(store.batches()[0].len(), 2);
        assert_eq!(pm.flush().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_write_is_debounced() {
        let store = Arc::new(RecordingPresenceStore::default());
        let pm = manager(store.clone());
        let entity = EntityId::from_raw("e1");
        let conn = ConnId::new();
        pm.add_socket(&entity, &conn);
        pm.remove_socket(&entity, &conn);

        tokio::time::sleep(Duration::from_millis(4_000)).await;
        assert!(store.batches().is_empty());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert!(!batches[0][0].online);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_debounce_cancels_offline_write() {
        let store = Arc::new(RecordingPresenceStore::default());
        let pm = manager(store.clone());
        let entity = EntityId::from_raw("e1");
        let first = ConnId::new();
        pm.add_socket(&entity, &first);
        let _ = pm.flush().await;
        pm.remove_socket(&entity, &first);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(pm.add_socket(&entity, &ConnId::new()));

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        // only the first online flush; no offline write
        assert!(store.batches().iter().flatten().all(|w| w.online));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_task_runs_periodically() {
        let store = Arc::new(RecordingPresenceStore::default());
        let pm = Arc::new(manager(store.clone()));
        let handle = Arc::clone(&pm).start_flush_task();
        pm.add_socket(&EntityId::from_raw("e1"), &ConnId::new());

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(store.batches().len(), 1);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn removing_unknown_entity_is_harmless() {
        let store = Arc::new(RecordingPresenceStore::default());
        let pm = manager(store);
        assert!(!pm.remove_socket(&EntityId::from_raw("ghost"), &ConnId::new()));
        assert!(pm.record(&EntityId::from_raw("ghost")).is_none());
    }
}
