use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use tracker_core::directory::{AoDirectory, EntityStore, HierarchyDirectory, PresenceStore, ViolationLog};
use tracker_settings::TrackerSettings;

use crate::breach::BreachDetector;
use crate::broadcast::Broadcaster;
use crate::outbound::Outbound;
use crate::presence::PresenceManager;
use crate::rate_limit::RateLimiter;
use crate::rooms::RoomRegistry;
use crate::scope::ScopeResolver;
use crate::sessions::SessionRegistry;
use crate::viewport::ViewportManager;

/// External directories and stores the engine reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub hierarchy: Arc<dyn HierarchyDirectory>,
    pub aos: Arc<dyn AoDirectory>,
    pub entities: Arc<dyn EntityStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub violations: Arc<dyn ViolationLog>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub connections: usize,
    pub online: usize,
}

/// Owns every live registry. Construct one per server instance.
pub struct Tracker {
    pub(crate) settings: TrackerSettings,
    pub(crate) collab: Collaborators,
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) presence: Arc<PresenceManager>,
    pub(crate) viewport: Arc<ViewportManager>,
    pub(crate) scopes: ScopeResolver,
    pub(crate) breach: BreachDetector,
    pub(crate) rate: RateLimiter,
    pub(crate) broadcaster: Broadcaster,
}

impl Tracker {
    pub fn new(settings: TrackerSettings, collab: Collaborators, outbound: Arc<dyn Outbound>) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let rooms = Arc::new(RoomRegistry::new());
        let viewport = Arc::new(ViewportManager::new(&settings.viewport, rooms));
        let presence = Arc::new(PresenceManager::new(&settings.presence, Arc::clone(&collab.presence)));
        let broadcaster = Broadcaster::new(Arc::clone(&sessions), Arc::clone(&viewport), outbound);

        Self {
            scopes: ScopeResolver::new(Arc::clone(&collab.hierarchy)),
            breach: BreachDetector::new(settings.breach.clone()),
            rate: RateLimiter::new(&settings.rate_limit),
            sessions,
            presence,
            viewport,
            broadcaster,
            collab,
            settings,
        }
    }

    /// Start the periodic presence flush.
    pub fn start_background(&self) -> JoinHandle<()> {
        Arc::clone(&self.presence).start_flush_task()
    }

    /// Write any queued presence transitions now.
    pub async fn flush(&self) -> usize {
        self.presence.flush().await
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            connections: self.sessions.count(),
            online: self.presence.online_count(),
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn presence(&self) -> &PresenceManager {
        &self.presence
    }

    pub fn viewport(&self) -> &ViewportManager {
        &self.viewport
    }

    pub fn breach(&self) -> &BreachDetector {
        &self.breach
    }
}
