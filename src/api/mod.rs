//! Tunnelhub HTTP API
//!
//! HTTP and WebSocket surface, built with Axum.
//!
//! # Endpoints
//!
//! ## Clients
//! - `GET /client/hubs/:hub` - WebSocket ingress, upgraded once a backend approves
//!
//! ## Backends
//! - `GET /server/hubs/:hub?events=a,b&name=x` - Registration stream (WebSocket)
//! - `POST /api/v1/hubs/:hub/approvals` - Approve or reject a pending connection
//! - `POST /api/v1/hubs/:hub/broadcast` - Send to every client of a hub
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use tunnelhub::api::{serve, ApiConfig, AppState};
//! use tunnelhub::routing::{Router, RouterConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Arc::new(Router::new(RouterConfig::default()));
//!     let config = ApiConfig::default();
//!
//!     serve(AppState::new(router, config.clone()), &config).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/hubs/:hub/approvals", post(routes::backend::approve))
        .route("/hubs/:hub/broadcast", post(routes::backend::broadcast));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let cors = cors_layer(&state.config.cors_origins);

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .route("/client/hubs/:hub", get(routes::client::connect))
        .route("/server/hubs/:hub", get(routes::backend::listen))
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if allowed.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new().allow_origin(AllowOrigin::list(allowed))
    }
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let hub_router = Arc::clone(&state.router);
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Tunnelhub listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        hub_router.shutdown();
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Tunnelhub shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{ConnectionContext, Payload, RouterConfig};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Message};
    use tower::util::ServiceExt;

    fn create_test_app() -> (Router, Arc<crate::routing::Router>) {
        let hub_router = Arc::new(crate::routing::Router::new(RouterConfig::default()));
        let state = AppState::new(Arc::clone(&hub_router), ApiConfig::default());
        (build_router(state), hub_router)
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready_until_shutdown() {
        let (app, hub_router) = create_test_app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        hub_router.shutdown();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (app, hub_router) = create_test_app();
        let _backend = hub_router.register_backend("chat", "server-1", ["connect"]);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["hubs"]["chat"]["backends"], 1);
    }

    #[tokio::test]
    async fn test_approval_accepted_for_any_connection() {
        let (app, hub_router) = create_test_app();
        let _backend = hub_router.register_backend("chat", "server-1", ["connect"]);
        let route = hub_router
            .route_connect("chat", ConnectionContext::default(), "connect")
            .unwrap();

        let body = format!(
            r#"{{"connection_id": "{}", "result": {{"success": {{"sub_protocol": "v1"}}}}}}"#,
            route.client.id()
        );
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/hubs/chat/approvals")
                    .header("Content-Type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(route.client.wait().await, Ok(Some("v1".to_string())));

        // Unknown hub and connection are tolerated
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/hubs/other/approvals")
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        r#"{"connection_id": "missing", "result": {"failure": {"reason": "no"}}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_approval_requires_connection_id() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/hubs/chat/approvals")
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        r#"{"connection_id": " ", "result": {"success": {}}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_approval_invalid_json() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/hubs/chat/approvals")
                    .header("Content-Type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_broadcast_without_clients() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/hubs/chat/broadcast")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"payload": {"type": "text", "data": "hello"}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"sent":0}"#);
    }

    #[tokio::test]
    async fn test_client_requires_websocket() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/client/hubs/chat")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_end_to_end_over_websocket() {
        let (app, hub_router) = create_test_app();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Backend registers for connect and message
        let backend_url = format!("ws://{}/server/hubs/chat?events=connect,message&name=b1", addr);
        let (mut backend, _) = tokio_tungstenite::connect_async(backend_url).await.unwrap();
        for _ in 0..100 {
            if hub_router.hub_stats("chat").map(|s| s.backends) == Some(1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Client connects asking for subprotocol v1; the upgrade waits for approval
        let mut request = format!("ws://{}/client/hubs/chat", addr)
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", "v1".parse().unwrap());
        let client_task = tokio::spawn(tokio_tungstenite::connect_async(request));

        let connect = next_event(&mut backend).await;
        assert_eq!(connect["kind"], "connect");
        let connection_id = connect["connection_id"].as_str().unwrap().to_string();

        let approve = serde_json::json!({
            "type": "approve",
            "connection_id": connection_id,
            "result": {"success": {"sub_protocol": "v1"}}
        });
        backend
            .send(Message::Text(approve.to_string()))
            .await
            .unwrap();

        let (mut client, response) = client_task.await.unwrap().unwrap();
        assert_eq!(
            response
                .headers()
                .get("sec-websocket-protocol")
                .and_then(|v| v.to_str().ok()),
            Some("v1")
        );

        client.send(Message::Text("hi".to_string())).await.unwrap();
        let user = next_event(&mut backend).await;
        assert_eq!(user["kind"], "user");
        assert_eq!(user["connection_id"], connection_id.as_str());
        assert_eq!(user["payload"]["type"], "text");
        assert_eq!(user["payload"]["data"], "hi");

        let broadcast = serde_json::json!({
            "type": "send_to_all",
            "payload": Payload::Text("welcome".to_string())
        });
        backend
            .send(Message::Text(broadcast.to_string()))
            .await
            .unwrap();
        let received = next_text(&mut client).await;
        assert_eq!(received, "welcome");

        client.close(None).await.unwrap();
        let disconnect = next_event(&mut backend).await;
        assert_eq!(disconnect["kind"], "disconnect");
    }

    async fn next_event<S>(socket: &mut S) -> serde_json::Value
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let text = next_text(socket).await;
        serde_json::from_str(&text).unwrap()
    }

    async fn next_text<S>(socket: &mut S) -> String
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Text(text) = message {
                return text;
            }
        }
    }
}
