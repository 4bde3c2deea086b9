//! Client Handshake
//!
//! A pending inbound connection waits here for a backend to approve or
//! reject it. The result resolves exactly once: the first of an
//! acknowledgement or the deadline wins, later writers are ignored.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use super::error::{AckRejection, HandshakeError};
use super::events::{ApprovalResult, ConnectionContext, ConnectionId, Payload};
use super::registry::HubRegistry;

/// Handshake state of a client connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Pending,
    Approved(Option<String>),
    Rejected(String),
    TimedOut,
}

impl HandshakeState {
    pub fn is_pending(&self) -> bool {
        matches!(self, HandshakeState::Pending)
    }

    fn into_result(self) -> Result<Option<String>, HandshakeError> {
        match self {
            HandshakeState::Approved(sub_protocol) => Ok(sub_protocol),
            HandshakeState::Rejected(reason) => Err(HandshakeError::Rejected(reason)),
            HandshakeState::TimedOut | HandshakeState::Pending => Err(HandshakeError::TimedOut),
        }
    }
}

impl From<ApprovalResult> for HandshakeState {
    fn from(result: ApprovalResult) -> Self {
        match result {
            ApprovalResult::Success { sub_protocol } => HandshakeState::Approved(sub_protocol),
            ApprovalResult::Failure { reason } => HandshakeState::Rejected(reason),
        }
    }
}

/// An inbound connection routed to a backend
pub struct ClientConnection {
    id: ConnectionId,
    hub: String,
    backend_id: ConnectionId,
    context: ConnectionContext,
    created_at: DateTime<Utc>,
    deadline: Instant,
    /// Set by whichever writer resolves the handshake first
    resolved: AtomicBool,
    state_tx: watch::Sender<HandshakeState>,
    /// Outbound channel to the transport, present once the relay is running
    outbound: Mutex<Option<mpsc::UnboundedSender<Payload>>>,
}

impl ClientConnection {
    pub(crate) fn new(
        hub: &str,
        backend_id: &str,
        context: ConnectionContext,
        timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(HandshakeState::Pending);

        Self {
            id: Uuid::new_v4().simple().to_string(),
            hub: hub.to_string(),
            backend_id: backend_id.to_string(),
            context,
            created_at: Utc::now(),
            deadline: Instant::now() + timeout,
            resolved: AtomicBool::new(false),
            state_tx,
            outbound: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    /// Registration id of the backend this client was routed to
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Current handshake state
    pub fn state(&self) -> HandshakeState {
        self.state_tx.borrow().clone()
    }

    pub fn is_approved(&self) -> bool {
        matches!(self.state(), HandshakeState::Approved(_))
    }

    /// Apply a backend's decision.
    ///
    /// Fails if the handshake already resolved or the deadline passed; in the
    /// latter case the connection resolves as timed out.
    pub fn acknowledge(&self, result: ApprovalResult) -> Result<(), AckRejection> {
        if self.resolved.load(Ordering::Acquire) {
            return Err(AckRejection::AlreadyResolved);
        }

        if Instant::now() >= self.deadline {
            self.resolve(HandshakeState::TimedOut);
            return Err(AckRejection::DeadlineElapsed);
        }

        if self.resolve(result.into()) {
            Ok(())
        } else {
            Err(AckRejection::AlreadyResolved)
        }
    }

    /// Wait for the handshake to resolve.
    ///
    /// Returns the approved subprotocol, or the reason the connection must
    /// be refused. Timeouts and rejections are both errors.
    pub async fn wait(&self) -> Result<Option<String>, HandshakeError> {
        let mut rx = self.state_tx.subscribe();

        let settled =
            match tokio::time::timeout_at(self.deadline, rx.wait_for(|s| !s.is_pending())).await {
                Ok(Ok(state)) => Some(state.clone()),
                _ => None,
            };
        if let Some(state) = settled {
            return state.into_result();
        }

        if self.resolve(HandshakeState::TimedOut) {
            tracing::debug!(
                hub = %self.hub,
                connection_id = %self.id,
                "Connection approval timed out"
            );
            return Err(HandshakeError::TimedOut);
        }

        // Lost the race to an acknowledgement that is still publishing its result
        let settled = match rx.wait_for(|s| !s.is_pending()).await {
            Ok(state) => state.clone(),
            Err(_) => HandshakeState::TimedOut,
        };
        settled.into_result()
    }

    fn resolve(&self, state: HandshakeState) -> bool {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.state_tx.send_replace(state);
        true
    }

    /// Attach the channel that writes to this client's transport
    pub(crate) fn attach_outbound(&self, sender: mpsc::UnboundedSender<Payload>) {
        *self.outbound.lock() = Some(sender);
    }

    pub(crate) fn detach_outbound(&self) {
        self.outbound.lock().take();
    }

    /// Hand a payload to the client's transport without waiting.
    ///
    /// Returns false if the client has no running relay.
    pub fn send(&self, payload: Payload) -> bool {
        match self.outbound.lock().as_ref() {
            Some(sender) => sender.send(payload).is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("hub", &self.hub)
            .field("backend_id", &self.backend_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Owning handle of a routed client connection.
///
/// Dropping the handle removes the connection from its hub.
#[derive(Debug)]
pub struct ClientConnectionHandle {
    connection: Arc<ClientConnection>,
    registry: Weak<HubRegistry>,
}

impl ClientConnectionHandle {
    pub(crate) fn new(connection: Arc<ClientConnection>, registry: Weak<HubRegistry>) -> Self {
        Self {
            connection,
            registry,
        }
    }

    /// Shared reference to the underlying connection
    pub fn connection(&self) -> Arc<ClientConnection> {
        Arc::clone(&self.connection)
    }
}

impl Deref for ClientConnectionHandle {
    type Target = ClientConnection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl Drop for ClientConnectionHandle {
    fn drop(&mut self) {
        self.connection.detach_outbound();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_client(self.connection.id());
            registry.prune_if_empty();
        }
    }
}
