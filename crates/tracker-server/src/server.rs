use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use tracker_core::directory::Authenticator;
use tracker_core::entity::Identity;
use tracker_engine::{Collaborators, Tracker};
use tracker_settings::{ServerSettings, TrackerSettings};

use crate::client::{self, ClientRegistry, Inbound};
use crate::handlers::{self, HandlerState};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

impl ServerConfig {
    pub fn from_settings(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_send_queue: s.max_send_queue,
            heartbeat_interval: Duration::from_secs(s.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(s.client_timeout_secs),
            cleanup_interval: Duration::from_secs(s.cleanup_interval_secs),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub client_registry: Arc<ClientRegistry>,
    pub authenticator: Arc<dyn Authenticator>,
    pub inbound_tx: mpsc::Sender<Inbound>,
    pub heartbeat_interval: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    settings: TrackerSettings,
    collab: Collaborators,
    authenticator: Arc<dyn Authenticator>,
) -> Result<ServerHandle, std::io::Error> {
    settings
        .validate()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let config = ServerConfig::from_settings(&settings.server);
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue, config.client_timeout));
    let tracker = Arc::new(Tracker::new(settings, collab, client_registry.clone()));

    let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(1024);

    let presence_flush = tracker.start_background();
    let cleanup = client::start_cleanup_task(
        Arc::clone(&client_registry),
        inbound_tx.clone(),
        config.cleanup_interval,
    );

    let handler_state = HandlerState::new(Arc::clone(&tracker), Arc::clone(&client_registry));
    let dispatcher = tokio::spawn(process_inbound(inbound_rx, handler_state));

    let app_state = AppState {
        tracker: Arc::clone(&tracker),
        client_registry,
        authenticator,
        inbound_tx,
        heartbeat_interval: config.heartbeat_interval,
    };
    let router = build_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(host = %config.host, port = local_addr.port(), "tracker server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server exited");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        tracker,
        tasks: vec![server, dispatcher, cleanup, presence_flush],
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    tracker: Arc<Tracker>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    /// Stop accepting work and write any queued presence changes.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        let flushed = self.tracker.flush().await;
        tracing::info!(flushed, "tracker server stopped");
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    token: Option<String>,
}

/// WebSocket upgrade handler. The token is verified before upgrading.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let token = params.token.unwrap_or_default();
    let identity = match state.authenticator.authenticate(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(error = %e, "websocket authentication failed");
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "unauthorized" })),
            )
                .into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
}

async fn handle_socket(socket: WebSocket, identity: Identity, state: AppState) {
    let (conn, rx) = state.client_registry.register(identity.entity_id.clone());
    tracing::info!(conn_id = %conn, entity_id = %identity.entity_id, "websocket client connected");

    let opened = Inbound::Opened {
        conn: conn.clone(),
        identity: Box::new(identity),
    };
    if state.inbound_tx.send(opened).await.is_err() {
        let _ = state.client_registry.unregister(&conn);
        return;
    }

    client::handle_ws_connection(
        socket,
        conn,
        rx,
        state.client_registry,
        state.inbound_tx,
        state.heartbeat_interval,
    )
    .await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.tracker.stats();
    Json(serde_json::json!({
        "status": "healthy",
        "connections": stats.connections,
        "online": stats.online,
    }))
}

/// Single consumer of all inbound work; each item runs to completion.
async fn process_inbound(mut rx: mpsc::Receiver<Inbound>, state: HandlerState) {
    while let Some(work) = rx.recv().await {
        handlers::handle(&state, work).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracker_store::{AoRepo, Database, EntityRepo, HierarchyRepo, TokenAuthenticator, ViolationRepo};

    fn collaborators(db: &Database) -> Collaborators {
        let entities = Arc::new(EntityRepo::new(db.clone()));
        Collaborators {
            hierarchy: Arc::new(HierarchyRepo::new(db.clone())),
            aos: Arc::new(AoRepo::new(db.clone())),
            entities: entities.clone(),
            presence: entities,
            violations: Arc::new(ViolationRepo::new(db.clone())),
        }
    }

    fn local_settings() -> TrackerSettings {
        let mut settings = TrackerSettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        settings
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let db = Database::in_memory().unwrap();
        let auth = Arc::new(TokenAuthenticator::new(db.clone()));
        let handle = start(local_settings(), collaborators(&db), auth).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["online"], 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn start_refuses_zero_heartbeat() {
        let db = Database::in_memory().unwrap();
        let auth = Arc::new(TokenAuthenticator::new(db.clone()));
        let mut settings = local_settings();
        settings.server.heartbeat_interval_secs = 0;
        let err = start(settings, collaborators(&db), auth).await.err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn config_follows_settings() {
        let mut s = ServerSettings::default();
        s.heartbeat_interval_secs = 5;
        s.client_timeout_secs = 15;
        let config = ServerConfig::from_settings(&s);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.client_timeout, Duration::from_secs(15));
        assert_eq!(ServerConfig::default().port, ServerSettings::default().port);
    }

    #[tokio::test]
    async fn build_router_creates_routes() {
        let db = Database::in_memory().unwrap();
        let registry = Arc::new(ClientRegistry::new(32, Duration::from_secs(90)));
        let tracker = Arc::new(Tracker::new(
            TrackerSettings::default(),
            collaborators(&db),
            registry.clone(),
        ));
        let (inbound_tx, _) = mpsc::channel(32);

        let state = AppState {
            tracker,
            client_registry: registry,
            authenticator: Arc::new(TokenAuthenticator::new(db)),
            inbound_tx,
            heartbeat_interval: Duration::from_secs(30),
        };
        let _router = build_router(state);
    }
}
