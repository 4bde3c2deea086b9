//! Hub Registry
//!
//! Per-hub collections of backend registrations and client connections,
//! plus backend matching. Backends keep registration order so matching is
//! deterministic; scans work on a snapshot taken under a short read lock.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::client::{ClientConnection, ClientConnectionHandle};
use super::events::{ConnectionContext, ConnectionId};
use super::selection::SelectionStrategy;
use super::server::{ServerConnection, ServerConnectionHandle};

/// Hub registries keyed by hub name
pub(crate) type HubMap = RwLock<HashMap<String, Arc<HubRegistry>>>;

/// Registrations and connections of a single hub
pub struct HubRegistry {
    hub: String,
    /// Backend registrations in registration order
    backends: RwLock<IndexMap<ConnectionId, Arc<ServerConnection>>>,
    clients: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    strategy: Box<dyn SelectionStrategy>,
    queue_capacity: usize,
    handshake_timeout: Duration,
    /// Map this registry is stored in; it removes itself once empty
    owner: Weak<HubMap>,
}

/// Counts reported for a hub
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub backends: usize,
    pub clients: usize,
    pub approved_clients: usize,
}

impl HubRegistry {
    pub fn new(
        hub: &str,
        strategy: Box<dyn SelectionStrategy>,
        queue_capacity: usize,
        handshake_timeout: Duration,
    ) -> Arc<Self> {
        Self::with_owner(hub, strategy, queue_capacity, handshake_timeout, Weak::new())
    }

    pub(crate) fn with_owner(
        hub: &str,
        strategy: Box<dyn SelectionStrategy>,
        queue_capacity: usize,
        handshake_timeout: Duration,
        owner: Weak<HubMap>,
    ) -> Arc<Self> {
        Arc::new(Self {
            hub: hub.to_string(),
            backends: RwLock::new(IndexMap::new()),
            clients: RwLock::new(HashMap::new()),
            strategy,
            queue_capacity,
            handshake_timeout,
            owner,
        })
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    /// Create and store a backend registration
    pub fn add_backend<I, S>(self: &Arc<Self>, identity: &str, events: I) -> ServerConnectionHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (connection, receiver) =
            ServerConnection::new(&self.hub, identity, events, self.queue_capacity);
        let connection = Arc::new(connection);

        self.backends
            .write()
            .insert(connection.id().to_string(), Arc::clone(&connection));

        ServerConnectionHandle::new(connection, receiver, Arc::downgrade(self))
    }

    /// Create and store a client connection routed to `backend_id`
    pub fn add_client(
        self: &Arc<Self>,
        backend_id: &str,
        context: ConnectionContext,
    ) -> ClientConnectionHandle {
        let connection = Arc::new(ClientConnection::new(
            &self.hub,
            backend_id,
            context,
            self.handshake_timeout,
        ));

        self.clients
            .write()
            .insert(connection.id().to_string(), Arc::clone(&connection));

        ClientConnectionHandle::new(connection, Arc::downgrade(self))
    }

    /// Pick a backend interested in `event`
    pub fn select_backend(&self, event: &str) -> Option<Arc<ServerConnection>> {
        let candidates: Vec<Arc<ServerConnection>> = self
            .backends
            .read()
            .values()
            .filter(|backend| !backend.is_closed() && backend.can_handle(event))
            .cloned()
            .collect();

        self.strategy.select(&candidates).cloned()
    }

    pub fn client(&self, id: &str) -> Option<Arc<ClientConnection>> {
        self.clients.read().get(id).cloned()
    }

    /// Snapshot of backends in registration order
    pub fn backends(&self) -> Vec<Arc<ServerConnection>> {
        self.backends.read().values().cloned().collect()
    }

    /// Snapshot of client connections
    pub fn clients(&self) -> Vec<Arc<ClientConnection>> {
        self.clients.read().values().cloned().collect()
    }

    pub fn remove_backend(&self, id: &str) -> Option<Arc<ServerConnection>> {
        self.backends.write().shift_remove(id)
    }

    pub fn remove_client(&self, id: &str) -> Option<Arc<ClientConnection>> {
        self.clients.write().remove(id)
    }

    pub fn is_empty(&self) -> bool {
        let no_backends = self.backends.read().is_empty();
        let no_clients = self.clients.read().is_empty();
        no_backends && no_clients
    }

    /// Drop this registry from its owning map if it holds nothing.
    ///
    /// Emptiness is re-checked under the map's write lock; registration and
    /// routing hold the map's read lock while adding.
    pub(crate) fn prune_if_empty(&self) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };

        let mut hubs = owner.write();
        let is_current = hubs
            .get(&self.hub)
            .is_some_and(|registry| std::ptr::eq(Arc::as_ptr(registry), self));
        if is_current && self.is_empty() {
            hubs.remove(&self.hub);
            tracing::debug!(hub = %self.hub, "Hub removed");
        }
    }

    pub fn stats(&self) -> HubStats {
        let backends = self.backends.read().len();
        let clients = self.clients.read();
        HubStats {
            backends,
            clients: clients.len(),
            approved_clients: clients.values().filter(|c| c.is_approved()).count(),
        }
    }
}

impl std::fmt::Debug for HubRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubRegistry")
            .field("hub", &self.hub)
            .field("strategy", &self.strategy.name())
            .field("stats", &self.stats())
            .finish()
    }
}
