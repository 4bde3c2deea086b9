//! Routing error types
//!
//! Defines the errors surfaced by the router and the client handshake.

use thiserror::Error;

/// Errors that can occur while routing a client or queueing an envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// No registration in the hub declares interest in the event
    #[error("No backend in hub '{hub}' handles event '{event}'")]
    NoRoute { hub: String, event: String },

    /// The backend queue reached its capacity
    #[error("Backend queue full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    /// The backend registration is gone
    #[error("Backend registration closed")]
    Closed,
}

/// Outcome of a handshake that did not end in approval.
///
/// Callers treat both variants the same way: the inbound request fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The backend refused the connection
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// No acknowledgement arrived before the deadline
    #[error("Connection approval timed out")]
    TimedOut,
}

impl HandshakeError {
    /// Reason reported to the inbound client
    pub fn reason(&self) -> &str {
        match self {
            HandshakeError::Rejected(reason) => reason,
            HandshakeError::TimedOut => "approval timed out",
        }
    }
}

/// Failure writing an envelope to a backend's stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Backend stream write failed: {0}")]
pub struct SinkError(pub String);

/// Why an acknowledgement was not applied.
///
/// Never surfaced to the caller of `Router::acknowledge`; only logged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckRejection {
    #[error("Unknown hub")]
    UnknownHub,

    #[error("Unknown connection")]
    UnknownConnection,

    #[error("Connection already resolved")]
    AlreadyResolved,

    #[error("Approval deadline elapsed")]
    DeadlineElapsed,
}

/// Result type alias for routing operations
pub type RouteResult<T> = Result<T, RouteError>;
