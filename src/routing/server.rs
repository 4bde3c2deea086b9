//! Backend Registration
//!
//! A backend declares the event kinds it handles and receives envelopes
//! through a bounded FIFO queue. The handle returned on registration owns the
//! receiving side and deregisters the backend when it is closed or dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::error::{RouteError, RouteResult, SinkError};
use super::events::{ConnectionId, Event};
use super::registry::HubRegistry;

/// Destination a drain loop writes envelopes to
#[async_trait]
pub trait EventSink: Send {
    async fn send_event(&mut self, event: &Event) -> Result<(), SinkError>;
}

#[async_trait]
impl EventSink for mpsc::UnboundedSender<Event> {
    async fn send_event(&mut self, event: &Event) -> Result<(), SinkError> {
        self.send(event.clone())
            .map_err(|_| SinkError("receiver dropped".to_string()))
    }
}

/// A registered backend
pub struct ServerConnection {
    id: ConnectionId,
    hub: String,
    /// Opaque descriptor of the backend, e.g. its peer address
    identity: String,
    interested_events: HashSet<String>,
    created_at: DateTime<Utc>,
    queue: mpsc::Sender<Event>,
    capacity: usize,
    closed: AtomicBool,
}

impl ServerConnection {
    pub(crate) fn new<I, S>(
        hub: &str,
        identity: &str,
        interested_events: I,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Event>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let capacity = capacity.max(1);
        let (queue, receiver) = mpsc::channel(capacity);

        let connection = Self {
            id: Uuid::new_v4().simple().to_string(),
            hub: hub.to_string(),
            identity: identity.to_string(),
            interested_events: interested_events.into_iter().map(Into::into).collect(),
            created_at: Utc::now(),
            queue,
            capacity,
            closed: AtomicBool::new(false),
        };

        (connection, receiver)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn interested_events(&self) -> &HashSet<String> {
        &self.interested_events
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether this backend declared interest in the event
    pub fn can_handle(&self, event: &str) -> bool {
        self.interested_events.contains(event)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of envelopes waiting to be drained
    pub fn queued(&self) -> usize {
        self.capacity - self.queue.capacity()
    }

    /// Append an envelope to the backend queue without waiting
    pub fn enqueue(&self, event: Event) -> RouteResult<()> {
        if self.is_closed() {
            return Err(RouteError::Closed);
        }

        self.queue.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => {
                tracing::warn!(
                    hub = %self.hub,
                    backend_id = %self.id,
                    connection_id = %event.connection_id,
                    kind = %event.kind,
                    capacity = self.capacity,
                    "Backend queue full, envelope refused"
                );
                RouteError::QueueFull {
                    capacity: self.capacity,
                }
            }
            TrySendError::Closed(_) => RouteError::Closed,
        })
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id)
            .field("hub", &self.hub)
            .field("identity", &self.identity)
            .field("interested_events", &self.interested_events)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owning handle of a backend registration.
///
/// State machine: registered until `close()` is called or the handle is
/// dropped, then closed for good.
#[derive(Debug)]
pub struct ServerConnectionHandle {
    connection: Arc<ServerConnection>,
    receiver: mpsc::Receiver<Event>,
    registry: Weak<HubRegistry>,
}

impl ServerConnectionHandle {
    pub(crate) fn new(
        connection: Arc<ServerConnection>,
        receiver: mpsc::Receiver<Event>,
        registry: Weak<HubRegistry>,
    ) -> Self {
        Self {
            connection,
            receiver,
            registry,
        }
    }

    pub fn id(&self) -> &str {
        self.connection.id()
    }

    pub fn hub(&self) -> &str {
        self.connection.hub()
    }

    /// Shared reference to the underlying registration
    pub fn connection(&self) -> Arc<ServerConnection> {
        Arc::clone(&self.connection)
    }

    /// Next queued envelope, or None once the registration is closed and drained
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Write queued envelopes to the sink in FIFO order.
    ///
    /// Waits while the queue is empty and only returns once the sink fails.
    /// Callers stop it by dropping the future, e.g. from a `select!`.
    pub async fn drain<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> Result<(), SinkError> {
        while let Some(event) = self.receiver.recv().await {
            sink.send_event(&event).await?;
            while let Ok(event) = self.receiver.try_recv() {
                sink.send_event(&event).await?;
            }
        }
        Ok(())
    }

    /// Write whatever is queued right now without waiting for more
    pub async fn flush<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize, SinkError> {
        let mut written = 0;
        while let Ok(event) = self.receiver.try_recv() {
            sink.send_event(&event).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Deregister the backend from its hub. Idempotent.
    pub fn close(&mut self) {
        if self.connection.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.receiver.close();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_backend(self.connection.id());
            registry.prune_if_empty();
        }
        tracing::info!(
            hub = %self.connection.hub(),
            backend_id = %self.connection.id(),
            identity = %self.connection.identity(),
            "Backend deregistered"
        );
    }
}

impl Drop for ServerConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}
