//! Event Envelopes
//!
//! Defines the envelopes relayed from inbound client connections to
//! backends, and the approval messages backends send back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for a client connection or backend registration
pub type ConnectionId = String;

/// Kind tag of an event envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A client asks to connect and awaits approval
    Connect,
    /// A message sent by an approved client
    User,
    /// An approved client went away
    Disconnect,
    /// Hub-level notification not tied to a client
    Service,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::User => "user",
            EventKind::Disconnect => "disconnect",
            EventKind::Service => "service",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request context captured when a client connects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    /// Request headers of the upgrade request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Authenticated user, if the caller established one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ConnectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header to the context
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the user id
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Message body carried by an envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl Payload {
    /// Size of the payload body in bytes
    pub(crate) fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Json(value) => value.to_string().len(),
            Payload::Binary(data) => data.len(),
        }
    }
}

/// Envelope relayed to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub connection_id: ConnectionId,
    pub hub: String,
    #[serde(default)]
    pub context: ConnectionContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl Event {
    /// Envelope announcing a client that awaits approval
    pub fn connect(hub: &str, connection_id: &str, context: ConnectionContext) -> Self {
        Self {
            kind: EventKind::Connect,
            connection_id: connection_id.to_string(),
            hub: hub.to_string(),
            context,
            payload: None,
        }
    }

    /// Envelope carrying one message from an approved client
    pub fn user(
        hub: &str,
        connection_id: &str,
        context: ConnectionContext,
        payload: Payload,
    ) -> Self {
        Self {
            kind: EventKind::User,
            connection_id: connection_id.to_string(),
            hub: hub.to_string(),
            context,
            payload: Some(payload),
        }
    }

    /// Envelope announcing that an approved client went away
    pub fn disconnect(hub: &str, connection_id: &str, context: ConnectionContext) -> Self {
        Self {
            kind: EventKind::Disconnect,
            connection_id: connection_id.to_string(),
            hub: hub.to_string(),
            context,
            payload: None,
        }
    }

    /// Hub-level notification addressed to a backend registration
    pub fn service(hub: &str, registration_id: &str, payload: Payload) -> Self {
        Self {
            kind: EventKind::Service,
            connection_id: registration_id.to_string(),
            hub: hub.to_string(),
            context: ConnectionContext::default(),
            payload: Some(payload),
        }
    }
}

/// A backend's decision on a pending client connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalResult {
    Success {
        /// Application subprotocol to complete the upgrade with
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sub_protocol: Option<String>,
    },
    Failure {
        reason: String,
    },
}

impl ApprovalResult {
    pub fn success(sub_protocol: Option<&str>) -> Self {
        ApprovalResult::Success {
            sub_protocol: sub_protocol.map(str::to_string),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        ApprovalResult::Failure {
            reason: reason.into(),
        }
    }
}

/// Acknowledgement of a pending client connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalMessage {
    pub connection_id: ConnectionId,
    pub result: ApprovalResult,
}

impl ApprovalMessage {
    pub fn new(connection_id: impl Into<String>, result: ApprovalResult) -> Self {
        Self {
            connection_id: connection_id.into(),
            result,
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
