//! # Tunnelhub
//!
//! Event tunnel hub - accepts inbound WebSocket connections and routes them to
//! event-handler backends registered per hub.
//!
//! ## Features
//!
//! - **Per-hub routing**: backends register for event kinds; connections are
//!   matched to the first (or next, round-robin) interested backend
//! - **Approval handshake**: a backend approves or rejects each connection
//!   within a deadline, with exactly one outcome per connection
//! - **Ordered relay**: client messages reach the matched backend in order
//!   through a bounded per-backend queue
//! - **Fan-out**: backends can send to one client or to every client of a hub
//!
//! ## Modules
//!
//! - [`routing`]: Router, hub registries, connection state and selection
//! - [`relay`]: Per-connection relay loop over an abstract frame transport
//! - [`api`]: HTTP and WebSocket surface with Axum
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tunnelhub::routing::{ApprovalMessage, ApprovalResult, ConnectionContext, Router, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Arc::new(Router::new(RouterConfig::default()));
//!
//!     // A backend registers for connection events on the "chat" hub
//!     let mut backend = router.register_backend("chat", "server-1", ["connect", "message"]);
//!
//!     // An inbound connection is routed and announced to the backend
//!     let pending = tunnelhub::relay::open(&router, "chat", ConnectionContext::new())?;
//!     let connect = backend.recv().await.expect("connect envelope");
//!
//!     // The backend approves it
//!     router.acknowledge(
//!         "chat",
//!         ApprovalMessage::new(connect.connection_id, ApprovalResult::success(None)),
//!     );
//!     let approved = pending.await_approval().await?;
//!     println!("approved {}", approved.connection_id());
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod relay;
pub mod routing;

// Re-export top-level types for convenience
pub use routing::{
    ApprovalMessage, ApprovalResult, ConnectionContext, Event, EventKind, Payload, RouteError,
    Router, RouterConfig, SelectionPolicy,
};

pub use relay::{ApprovedRelay, PendingRelay, RelayEnd, RelayError};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig, RoutingConfig, ServerConfig};
