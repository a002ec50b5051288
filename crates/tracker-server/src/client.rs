use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use tracker_core::entity::Identity;
use tracker_core::events::ServerEvent;
use tracker_core::ids::{ConnId, EntityId};
use tracker_engine::Outbound;

/// Work for the dispatcher. Every connection's traffic, including its
/// open and close, travels on one channel so per-connection order holds.
#[derive(Debug)]
pub enum Inbound {
    Opened { conn: ConnId, identity: Box<Identity> },
    Frame { conn: ConnId, text: String },
    Closed { conn: ConnId },
}

/// A connected WebSocket client.
pub struct Client {
    pub id: ConnId,
    pub entity_id: EntityId,
    pub tx: mpsc::Sender<String>,
    pub connected: AtomicBool,
    pub last_pong: AtomicU64,
}

impl Client {
    fn new(id: ConnId, entity_id: EntityId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            entity_id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ConnId, Arc<Client>>,
    max_send_queue: usize,
    client_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize, client_timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
            client_timeout,
        }
    }

    /// Register a new client for `entity` and return its id + receiver.
    pub fn register(&self, entity: EntityId) -> (ConnId, mpsc::Receiver<String>) {
        let id = ConnId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let _ = self
            .clients
            .insert(id.clone(), Arc::new(Client::new(id.clone(), entity, tx)));
        (id, rx)
    }

    /// Remove a client. Returns false when it was already gone.
    pub fn unregister(&self, id: &ConnId) -> bool {
        match self.clients.remove(id) {
            Some((_, client)) => {
                client.connected.store(false, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Queue a frame for one client. A full queue drops the frame.
    pub fn send_to(&self, conn: &ConnId, message: String) -> bool {
        let Some(client) = self.clients.get(conn).map(|c| Arc::clone(c.value())) else {
            return false;
        };
        if !client.is_connected() {
            return false;
        }
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    conn_id = %conn,
                    entity_id = %client.entity_id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn conns_for_entity(&self, entity: &EntityId) -> Vec<ConnId> {
        self.clients
            .iter()
            .filter(|c| &c.entity_id == entity)
            .map(|c| c.key().clone())
            .collect()
    }

    fn mark_disconnected(&self, conn: &ConnId) {
        if let Some(client) = self.clients.get(conn) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    fn record_pong(&self, conn: &ConnId) {
        if let Some(client) = self.clients.get(conn) {
            client.record_pong();
        }
    }

    /// Remove clients that haven't answered a ping within the timeout.
    /// Returns the removed ids.
    pub fn cleanup_dead_clients(&self) -> Vec<ConnId> {
        let dead: Vec<ConnId> = self
            .clients
            .iter()
            .filter(|c| !c.is_alive(self.client_timeout))
            .map(|c| c.key().clone())
            .collect();

        dead.into_iter()
            .filter(|id| {
                let removed = self.unregister(id);
                if removed {
                    tracing::info!(conn_id = %id, "cleaned up dead client");
                }
                removed
            })
            .collect()
    }
}

impl Outbound for ClientRegistry {
    fn send(&self, conn: &ConnId, event: &ServerEvent) -> bool {
        match crate::protocol::encode(event) {
            Ok(json) => self.send_to(conn, json),
            Err(e) => {
                tracing::error!(conn_id = %conn, event = event.event_name(), error = %e, "failed to encode event");
                false
            }
        }
    }
}

/// Drive one WebSocket: split into reader/writer, ping on `heartbeat`, and
/// report the close to the dispatcher unless the reaper got there first.
pub async fn handle_ws_connection(
    socket: WebSocket,
    conn: ConnId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    inbound: mpsc::Sender<Inbound>,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_conn = conn.clone();
    let writer_registry = Arc::clone(&registry);
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(conn_id = %writer_conn, "sent ping");
                }
            }
        }
        writer_registry.mark_disconnected(&writer_conn);
    });

    let reader_conn = conn.clone();
    let reader_registry = Arc::clone(&registry);
    let reader_inbound = inbound.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let frame = Inbound::Frame {
                        conn: reader_conn.clone(),
                        text: text.to_string(),
                    };
                    if reader_inbound.send(frame).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => reader_registry.record_pong(&reader_conn),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // dropping both halves closes the socket
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if registry.unregister(&conn) {
        let _ = inbound.send(Inbound::Closed { conn }).await;
    }
}

/// Periodically reap silent clients and hand each to the dispatcher as a
/// close.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    inbound: mpsc::Sender<Inbound>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if !removed.is_empty() {
                tracing::info!(removed = removed.len(), "dead client cleanup");
            }
            for conn in removed {
                if inbound.send(Inbound::Closed { conn }).await.is_err() {
                    return;
                }
            }
        }
    })
}
