//! Data Transfer Objects
//!
//! Request and response types for the HTTP endpoints and the backend
//! WebSocket channel. These types are serialized/deserialized to/from JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::routing::{ApprovalMessage, HubStats, Payload};

// ============================================
// BACKEND CHANNEL DTOs
// ============================================

/// Query parameters of a backend registration stream
#[derive(Debug, Default, Deserialize)]
pub struct ListenQuery {
    /// Comma-separated event kinds the backend handles
    #[serde(default)]
    pub events: String,
    /// Backend name; the peer address is used when absent
    #[serde(default)]
    pub name: Option<String>,
}

impl ListenQuery {
    /// Parsed, de-duplicated event names
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .events
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Commands a backend sends over its registration stream
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendCommand {
    /// Approve or reject a pending client connection
    Approve(ApprovalMessage),
    /// Send a payload to every client of the hub
    SendToAll { payload: Payload },
    /// Send a payload to a single client
    SendToConnection {
        connection_id: String,
        payload: Payload,
    },
}

// ============================================
// BROADCAST DTOs
// ============================================

/// Send-to-all request
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub payload: Payload,
}

/// Send-to-all response
#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    /// Number of clients the payload was handed to
    pub sent: usize,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy" or "shutting_down"
    pub status: String,
    /// Per-hub registration counts
    pub hubs: BTreeMap<String, HubStats>,
    pub uptime_seconds: u64,
    pub version: String,
}
