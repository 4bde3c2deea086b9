//! Connection Routing
//!
//! Matches inbound client connections to backend registrations and carries
//! the approval handshake between them.
//!
//! ## Architecture
//!
//! - **Router**: facade over all hubs
//! - **HubRegistry**: backends and clients of one hub, plus matching
//! - **ServerConnection**: a backend's interest set and envelope queue
//! - **ClientConnection**: a pending inbound connection and its approval
//!
//! ## Example
//!
//! ```rust,no_run
//! use tunnelhub::routing::*;
//!
//! # async fn example() {
//! let router = Router::new(RouterConfig::default());
//! let mut backend = router.register_backend("chat", "10.0.0.5:4000", ["connect", "message"]);
//!
//! let route = router
//!     .route_connect("chat", ConnectionContext::default(), "connect")
//!     .unwrap();
//! route.backend
//!     .enqueue(Event::connect("chat", route.client.id(), ConnectionContext::default()))
//!     .unwrap();
//!
//! let connect = backend.recv().await.unwrap();
//! router.acknowledge(
//!     "chat",
//!     ApprovalMessage::new(connect.connection_id, ApprovalResult::success(Some("v1"))),
//! );
//! assert_eq!(route.client.wait().await, Ok(Some("v1".to_string())));
//! # }
//! ```

mod client;
mod error;
mod events;
mod registry;
mod router;
mod selection;
mod server;

pub use client::{ClientConnection, ClientConnectionHandle, HandshakeState};
pub use error::{AckRejection, HandshakeError, RouteError, RouteResult, SinkError};
pub use events::{
    ApprovalMessage, ApprovalResult, ConnectionContext, ConnectionId, Event, EventKind, Payload,
};
pub use registry::{HubRegistry, HubStats};
pub use router::{Route, Router, RouterConfig};
pub use selection::{FirstMatch, RoundRobin, SelectionPolicy, SelectionStrategy};
pub use server::{EventSink, ServerConnection, ServerConnectionHandle};
