//! Client Routes
//!
//! WebSocket ingress for end-user connections.
//!
//! - GET /client/hubs/:hub - Route, await backend approval, then upgrade

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::HeaderMap,
    response::Response,
};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::relay::{self, relay_socket};
use crate::routing::ConnectionContext;

/// GET /client/hubs/:hub
///
/// The upgrade is only completed once a backend approves the connection;
/// refusals answer with an error status and no upgrade.
pub async fn connect(
    ws: WebSocketUpgrade,
    Path(hub): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    let context = context_from_headers(&headers);
    let pending = relay::open(&state.router, &hub, context)?;
    let approved = pending.await_approval().await?;

    let ws = match approved.sub_protocol() {
        Some(protocol) => ws.protocols([protocol.to_string()]),
        None => ws,
    };

    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(e) = relay_socket(approved, socket).await {
            tracing::debug!(error = %e, "Client relay ended with error");
        }
    }))
}

/// Capture request headers; repeated headers are joined with commas
pub fn context_from_headers(headers: &HeaderMap) -> ConnectionContext {
    let mut context = ConnectionContext::new();
    for name in headers.keys() {
        let value = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        context.headers.insert(name.as_str().to_string(), value);
    }
    context
}
