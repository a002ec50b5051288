//! Routes inbound frames to the tracker.

use std::sync::Arc;

use tracker_core::events::ServerEvent;
use tracker_core::ids::ConnId;
use tracker_engine::{Outbound, Tracker};

use crate::client::{ClientRegistry, Inbound};
use crate::protocol::{ClientFrame, ProtocolError};

/// Shared state available to the dispatcher.
pub struct HandlerState {
    pub tracker: Arc<Tracker>,
    pub registry: Arc<ClientRegistry>,
}

impl HandlerState {
    pub fn new(tracker: Arc<Tracker>, registry: Arc<ClientRegistry>) -> Self {
        Self { tracker, registry }
    }
}

/// Run one unit of dispatcher work to completion.
pub async fn handle(state: &HandlerState, work: Inbound) {
    match work {
        Inbound::Opened { conn, identity } => {
            let _ = state.tracker.connect(&conn, *identity).await;
        }
        Inbound::Frame { conn, text } => dispatch(state, &conn, &text).await,
        Inbound::Closed { conn } => {
            let _ = state.tracker.disconnect(&conn);
        }
    }
}

/// Decode a client frame and hand it to the matching tracker operation.
/// Operation failures have already been answered by the tracker; they are
/// only traced here.
pub async fn dispatch(state: &HandlerState, conn: &ConnId, raw: &str) {
    let frame = match ClientFrame::parse(raw) {
        Ok(frame) => frame,
        Err(e) => {
            reject(state, conn, &e);
            return;
        }
    };

    let tracker = &state.tracker;
    let result = match frame {
        ClientFrame::LocationUpdate(report) => {
            let _ = tracker.report_location(conn, report).await;
            Ok(())
        }
        ClientFrame::LocationRequest(request) => tracker.request_nearby(conn, request).await.map(drop),
        ClientFrame::PresenceSubscribe => tracker.subscribe_presence(conn).map(drop),
        ClientFrame::ViewportSubscribe(request) => tracker.subscribe_viewport(conn, request).map(drop),
    };
    if let Err(e) = result {
        tracing::debug!(conn_id = %conn, error = %e, "request not completed");
    }
}

fn reject(state: &HandlerState, conn: &ConnId, err: &ProtocolError) {
    tracing::debug!(conn_id = %conn, error = %err, "rejected frame");
    let event = ServerEvent::error_with(err.to_string(), serde_json::json!({ "kind": err.kind() }));
    let _ = state.registry.send(conn, &event);
}
