//! Router
//!
//! Top-level facade over all hubs: backend registration, connection routing,
//! acknowledgements and sends toward clients. Every operation is scoped by
//! hub first; nothing crosses hubs.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::client::ClientConnectionHandle;
use super::error::{AckRejection, RouteError, RouteResult};
use super::events::{ApprovalMessage, ConnectionContext, Event, Payload};
use super::registry::{HubMap, HubRegistry, HubStats};
use super::selection::SelectionPolicy;
use super::server::{ServerConnection, ServerConnectionHandle};

/// Configuration for the router
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How long a backend has to approve a pending connection
    pub handshake_timeout: Duration,
    /// Capacity of each backend queue
    pub backend_queue_capacity: usize,
    /// How a backend is picked among interested registrations
    pub selection: SelectionPolicy,
    /// Largest reassembled client message accepted by the relay
    pub max_message_bytes: usize,
    /// Whether the relay tells the backend when an approved client leaves
    pub emit_disconnect: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(5000),
            backend_queue_capacity: 10_000,
            selection: SelectionPolicy::FirstMatch,
            max_message_bytes: 1024 * 1024,
            emit_disconnect: true,
        }
    }
}

/// A client connection and the backend it was matched to
#[derive(Debug)]
pub struct Route {
    pub client: ClientConnectionHandle,
    pub backend: Arc<ServerConnection>,
}

/// Routes inbound connections to backend registrations across hubs.
///
/// A hub exists while it has a backend or a client; the last handle dropped
/// removes it.
#[derive(Debug)]
pub struct Router {
    hubs: Arc<HubMap>,
    config: RouterConfig,
    shutdown: CancellationToken,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            hubs: Arc::new(RwLock::new(HashMap::new())),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Register a backend interested in `events`. Always succeeds.
    pub fn register_backend<I, S>(
        &self,
        hub: &str,
        identity: &str,
        events: I,
    ) -> ServerConnectionHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let handle = self.with_hub(hub, |registry| registry.add_backend(identity, events));
        let backend = handle.connection();

        tracing::info!(
            hub = %hub,
            backend_id = %handle.id(),
            identity = %identity,
            events = ?backend.interested_events(),
            "Backend registered"
        );

        handle
    }

    /// Match an inbound connection to a backend interested in `event`.
    ///
    /// The client connection is only created once a backend is found.
    pub fn route_connect(
        &self,
        hub: &str,
        context: ConnectionContext,
        event: &str,
    ) -> RouteResult<Route> {
        let no_route = || RouteError::NoRoute {
            hub: hub.to_string(),
            event: event.to_string(),
        };

        // Held while adding so the hub cannot be pruned underneath the new client
        let hubs = self.hubs.read();
        let registry = hubs.get(hub).ok_or_else(no_route)?;
        let backend = registry.select_backend(event).ok_or_else(no_route)?;
        let client = registry.add_client(backend.id(), context);
        drop(hubs);

        tracing::debug!(
            hub = %hub,
            connection_id = %client.id(),
            backend_id = %backend.id(),
            event = %event,
            "Connection routed"
        );

        Ok(Route { client, backend })
    }

    /// Apply a backend's approval. Best-effort: unknown hubs or connections,
    /// duplicates and late acknowledgements are dropped silently.
    pub fn acknowledge(&self, hub: &str, approval: ApprovalMessage) {
        let connection_id = approval.connection_id.clone();
        match self.try_acknowledge(hub, approval) {
            Ok(()) => {
                tracing::debug!(hub = %hub, connection_id = %connection_id, "Connection acknowledged");
            }
            Err(reason) => {
                tracing::debug!(
                    hub = %hub,
                    connection_id = %connection_id,
                    reason = %reason,
                    "Acknowledgement dropped"
                );
            }
        }
    }

    /// Like `acknowledge`, but reports why an acknowledgement was not applied
    pub fn try_acknowledge(&self, hub: &str, approval: ApprovalMessage) -> Result<(), AckRejection> {
        let registry = self.hub(hub).ok_or(AckRejection::UnknownHub)?;
        let client = registry
            .client(&approval.connection_id)
            .ok_or(AckRejection::UnknownConnection)?;
        client.acknowledge(approval.result)
    }

    /// Send a payload to every approved client of a hub without waiting.
    ///
    /// Returns how many clients it was handed to.
    pub fn broadcast(&self, hub: &str, payload: Payload) -> usize {
        let Some(registry) = self.hub(hub) else {
            return 0;
        };

        let sent = registry
            .clients()
            .iter()
            .filter(|client| client.send(payload.clone()))
            .count();

        tracing::trace!(hub = %hub, clients = sent, "Broadcast payload");
        sent
    }

    /// Send a payload to one approved client without waiting
    pub fn send_to_connection(&self, hub: &str, connection_id: &str, payload: Payload) -> bool {
        self.hub(hub)
            .and_then(|registry| registry.client(connection_id))
            .map(|client| client.send(payload))
            .unwrap_or(false)
    }

    /// Queue a service envelope on every backend of a hub
    pub fn notify_service(&self, hub: &str, payload: Payload) -> usize {
        let Some(registry) = self.hub(hub) else {
            return 0;
        };

        registry
            .backends()
            .iter()
            .filter(|backend| {
                backend
                    .enqueue(Event::service(hub, backend.id(), payload.clone()))
                    .is_ok()
            })
            .count()
    }

    /// Names of all hubs with a registry
    pub fn hubs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hubs.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn hub_stats(&self, hub: &str) -> Option<HubStats> {
        self.hub(hub).map(|registry| registry.stats())
    }

    /// Statistics for every hub
    pub fn stats(&self) -> BTreeMap<String, HubStats> {
        self.hubs
            .read()
            .iter()
            .map(|(name, registry)| (name.clone(), registry.stats()))
            .collect()
    }

    /// Token cancelled when the router shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Announce shutdown to every backend and cancel running relays
    pub fn shutdown(&self) {
        let notice = Payload::Json(serde_json::json!({ "event": "shutdown" }));
        for hub in self.hubs() {
            let notified = self.notify_service(&hub, notice.clone());
            tracing::debug!(hub = %hub, backends = notified, "Shutdown announced");
        }
        self.shutdown.cancel();
    }

    fn hub(&self, hub: &str) -> Option<Arc<HubRegistry>> {
        self.hubs.read().get(hub).cloned()
    }

    /// Run `f` on the hub's registry, creating it if needed, while the hub
    /// map is locked
    fn with_hub<R>(&self, hub: &str, f: impl FnOnce(&Arc<HubRegistry>) -> R) -> R {
        {
            let hubs = self.hubs.read();
            if let Some(registry) = hubs.get(hub) {
                return f(registry);
            }
        }

        let mut hubs = self.hubs.write();
        let registry = hubs.entry(hub.to_string()).or_insert_with(|| {
            tracing::debug!(hub = %hub, selection = ?self.config.selection, "Hub created");
            HubRegistry::with_owner(
                hub,
                self.config.selection.build(),
                self.config.backend_queue_capacity,
                self.config.handshake_timeout,
                Arc::downgrade(&self.hubs),
            )
        });
        f(registry)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}
