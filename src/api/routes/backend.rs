//! Backend Routes
//!
//! The registration channel event-handler backends use.
//!
//! - GET /server/hubs/:hub?events=a,b&name=x - Registration stream (WebSocket)
//! - POST /api/v1/hubs/:hub/approvals - Approve or reject a pending connection
//! - POST /api/v1/hubs/:hub/broadcast - Send a payload to every client of a hub

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, Query, State,
    },
    http::StatusCode,
    response::Response,
    Json,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::api::dto::{BackendCommand, BroadcastRequest, BroadcastResponse, ListenQuery};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::routing::{ApprovalMessage, Event, EventSink, Router, SinkError};

/// GET /server/hubs/:hub
///
/// Registers the caller as a backend of the hub and streams envelopes to it
/// as JSON text frames for as long as the socket stays open.
pub async fn listen(
    ws: WebSocketUpgrade,
    Path(hub): Path<String>,
    Query(query): Query<ListenQuery>,
    peer: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let identity = query
        .name
        .clone()
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    let events = query.event_names();
    let router = Arc::clone(&state.router);

    ws.on_upgrade(move |socket| handle_backend_socket(socket, router, hub, identity, events))
}

/// Run a backend registration until its socket closes
async fn handle_backend_socket(
    socket: WebSocket,
    router: Arc<Router>,
    hub: String,
    identity: String,
    events: Vec<String>,
) {
    let mut registration = router.register_backend(&hub, &identity, events);
    let (sender, mut receiver) = socket.split();
    let mut sink = SocketEventSink(sender);
    let cancel = router.shutdown_token();

    tokio::select! {
        result = registration.drain(&mut sink) => {
            if let Err(e) = result {
                tracing::debug!(
                    hub = %hub,
                    backend_id = %registration.id(),
                    error = %e,
                    "Backend stream write failed"
                );
            }
        }
        _ = receive_commands(&router, &hub, &mut receiver) => {}
        _ = cancel.cancelled() => {
            // Deliver the shutdown notice queued before cancellation
            let _ = registration.flush(&mut sink).await;
        }
    }

    registration.close();
    let _ = sink.0.close().await;
}

/// Read commands from the backend until it closes the socket
async fn receive_commands(router: &Router, hub: &str, receiver: &mut SplitStream<WebSocket>) {
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<BackendCommand>(&text) {
                Ok(command) => apply_command(router, hub, command),
                Err(e) => {
                    tracing::debug!(hub = %hub, error = %e, "Invalid backend command");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(hub = %hub, error = %e, "Backend receive error");
                break;
            }
        }
    }
}

/// Dispatch a backend command to the router
pub fn apply_command(router: &Router, hub: &str, command: BackendCommand) {
    match command {
        BackendCommand::Approve(approval) => router.acknowledge(hub, approval),
        BackendCommand::SendToAll { payload } => {
            router.broadcast(hub, payload);
        }
        BackendCommand::SendToConnection {
            connection_id,
            payload,
        } => {
            if !router.send_to_connection(hub, &connection_id, payload) {
                tracing::debug!(
                    hub = %hub,
                    connection_id = %connection_id,
                    "Send to unknown or inactive connection dropped"
                );
            }
        }
    }
}

/// Writes envelopes to a backend socket as JSON text frames
struct SocketEventSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl EventSink for SocketEventSink {
    async fn send_event(&mut self, event: &Event) -> Result<(), SinkError> {
        let text = serde_json::to_string(event).map_err(|e| SinkError(e.to_string()))?;
        self.0
            .send(Message::Text(text))
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}

/// POST /api/v1/hubs/:hub/approvals
///
/// Accepted whenever it names a connection; unknown or stale connections
/// are ignored.
pub async fn approve(
    Path(hub): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(approval): Json<ApprovalMessage>,
) -> ApiResult<StatusCode> {
    if approval.connection_id.trim().is_empty() {
        return Err(ApiError::Validation(
            "connection_id must not be empty".to_string(),
        ));
    }

    state.router.acknowledge(&hub, approval);
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/v1/hubs/:hub/broadcast
pub async fn broadcast(
    Path(hub): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<BroadcastRequest>,
) -> (StatusCode, Json<BroadcastResponse>) {
    let sent = state.router.broadcast(&hub, request.payload);
    (StatusCode::ACCEPTED, Json(BroadcastResponse { sent }))
}
