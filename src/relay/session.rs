//! Relay Session
//!
//! Drives one inbound connection: route it, announce it to the matched
//! backend, wait for approval, then relay client messages as user envelopes
//! while writing outbound payloads back to the client.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use super::frames::{FrameSink, FrameSource, MessageReader, TransportError};
use crate::routing::{
    ClientConnectionHandle, ConnectionContext, Event, HandshakeError, RouteError, Router,
    ServerConnection,
};

/// Event name inbound connections are routed on
pub const CONNECT_EVENT: &str = "connect";

/// Errors that end a relay session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Why an approved relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The client closed the transport
    Closed,
    /// The router shut down
    Cancelled,
}

/// A routed connection whose connect envelope is queued on the backend
#[derive(Debug)]
pub struct PendingRelay {
    router: Arc<Router>,
    client: ClientConnectionHandle,
    backend: Arc<ServerConnection>,
}

/// Route an inbound connection and queue its connect envelope
pub fn open(
    router: &Arc<Router>,
    hub: &str,
    context: ConnectionContext,
) -> Result<PendingRelay, RelayError> {
    let route = router.route_connect(hub, context, CONNECT_EVENT)?;
    let client = route.client;
    let backend = route.backend;

    backend.enqueue(Event::connect(hub, client.id(), client.context().clone()))?;

    tracing::info!(
        hub = %hub,
        connection_id = %client.id(),
        backend_id = %backend.id(),
        "Connection awaiting approval"
    );

    Ok(PendingRelay {
        router: Arc::clone(router),
        client,
        backend,
    })
}

impl PendingRelay {
    pub fn connection_id(&self) -> &str {
        self.client.id()
    }

    pub fn backend_id(&self) -> &str {
        self.backend.id()
    }

    /// Wait for the backend's decision.
    ///
    /// Rejection and timeout both fail; the connection is removed from its hub.
    pub async fn await_approval(self) -> Result<ApprovedRelay, RelayError> {
        match self.client.wait().await {
            Ok(sub_protocol) => {
                tracing::info!(
                    hub = %self.client.hub(),
                    connection_id = %self.client.id(),
                    sub_protocol = ?sub_protocol,
                    "Connection approved"
                );
                Ok(ApprovedRelay {
                    router: self.router,
                    client: self.client,
                    backend: self.backend,
                    sub_protocol,
                })
            }
            Err(e) => {
                tracing::info!(
                    hub = %self.client.hub(),
                    connection_id = %self.client.id(),
                    reason = %e,
                    "Connection refused"
                );
                Err(e.into())
            }
        }
    }
}

/// An approved connection ready to relay
#[derive(Debug)]
pub struct ApprovedRelay {
    router: Arc<Router>,
    client: ClientConnectionHandle,
    backend: Arc<ServerConnection>,
    sub_protocol: Option<String>,
}

impl ApprovedRelay {
    pub fn connection_id(&self) -> &str {
        self.client.id()
    }

    /// Subprotocol chosen by the backend
    pub fn sub_protocol(&self) -> Option<&str> {
        self.sub_protocol.as_deref()
    }

    /// Relay until the client closes, the transport fails, or the router
    /// shuts down.
    pub async fn run<S, K>(self, source: S, mut sink: K) -> Result<RelayEnd, RelayError>
    where
        S: FrameSource,
        K: FrameSink,
    {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        self.client.attach_outbound(outbound_tx);

        let max_bytes = self.router.config().max_message_bytes;
        let mut reader = MessageReader::new(source, max_bytes);
        let cancel = self.router.shutdown_token();
        let hub = self.client.hub().to_string();

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(RelayEnd::Cancelled),
                Some(payload) = outbound_rx.recv() => {
                    if let Err(e) = sink.send_payload(&payload).await {
                        break Err(e.into());
                    }
                }
                message = reader.read_message() => match message {
                    Ok(Some(payload)) => {
                        tracing::trace!(
                            hub = %hub,
                            connection_id = %self.client.id(),
                            bytes = payload.len(),
                            "Client message queued"
                        );
                        let event = Event::user(
                            &hub,
                            self.client.id(),
                            self.client.context().clone(),
                            payload,
                        );
                        if let Err(e) = self.backend.enqueue(event) {
                            break Err(e.into());
                        }
                    }
                    Ok(None) => break Ok(RelayEnd::Closed),
                    Err(e) => break Err(e.into()),
                },
            }
        };

        self.client.detach_outbound();
        let _ = sink.close().await;

        if self.router.config().emit_disconnect {
            let event = Event::disconnect(&hub, self.client.id(), self.client.context().clone());
            if let Err(e) = self.backend.enqueue(event) {
                tracing::debug!(
                    hub = %hub,
                    connection_id = %self.client.id(),
                    error = %e,
                    "Disconnect envelope dropped"
                );
            }
        }

        match &result {
            Ok(end) => tracing::info!(
                hub = %hub,
                connection_id = %self.client.id(),
                end = ?end,
                "Relay ended"
            ),
            Err(e) => tracing::info!(
                hub = %hub,
                connection_id = %self.client.id(),
                error = %e,
                "Relay failed"
            ),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::frames::{testing::transport, Frame};
    use crate::routing::{ApprovalMessage, ApprovalResult, EventKind, Payload, RouterConfig};
    use std::time::Duration;

    fn router() -> Arc<Router> {
        Arc::new(Router::default())
    }

    #[tokio::test]
    async fn test_chat_scenario() {
        let router = router();
        let mut backend = router.register_backend("chat", "server-1", ["connect", "message"]);

        let context = ConnectionContext::new().header("origin", "http://localhost");
        let pending = open(&router, "chat", context.clone()).unwrap();
        let connection_id = pending.connection_id().to_string();

        let connect = backend.recv().await.unwrap();
        assert_eq!(connect.kind, EventKind::Connect);
        assert_eq!(connect.connection_id, connection_id);
        assert_eq!(connect.context, context);

        router.acknowledge(
            "chat",
            ApprovalMessage::new(connection_id.clone(), ApprovalResult::success(Some("v1"))),
        );
        let approved = pending.await_approval().await.unwrap();
        assert_eq!(approved.sub_protocol(), Some("v1"));

        let (frames, source, sink, _outbound) = transport();
        let relay = tokio::spawn(approved.run(source, sink));

        frames.send(Frame::text("hi", true)).unwrap();
        let user = backend.recv().await.unwrap();
        assert_eq!(user.kind, EventKind::User);
        assert_eq!(user.connection_id, connection_id);
        assert_eq!(user.payload, Some(Payload::Text("hi".to_string())));
        assert_eq!(user.context, context);

        frames.send(Frame::close()).unwrap();
        assert_eq!(relay.await.unwrap(), Ok(RelayEnd::Closed));

        let disconnect = backend.recv().await.unwrap();
        assert_eq!(disconnect.kind, EventKind::Disconnect);
        assert_eq!(disconnect.connection_id, connection_id);
        assert_eq!(router.hub_stats("chat").unwrap().clients, 0);
    }

    #[tokio::test]
    async fn test_messages_keep_order() {
        let router = router();
        let mut backend = router.register_backend("chat", "server-1", ["connect"]);
        let pending = open(&router, "chat", ConnectionContext::default()).unwrap();
        let _connect = backend.recv().await.unwrap();
        router.acknowledge(
            "chat",
            ApprovalMessage::new(pending.connection_id(), ApprovalResult::success(None)),
        );
        let approved = pending.await_approval().await.unwrap();

        let (frames, source, sink, _outbound) = transport();
        let relay = tokio::spawn(approved.run(source, sink));

        frames.send(Frame::text("one", true)).unwrap();
        frames.send(Frame::binary(vec![2], false)).unwrap();
        frames.send(Frame::continuation(vec![2], true)).unwrap();
        frames.send(Frame::text("three", true)).unwrap();
        drop(frames);

        let payloads: Vec<_> = [
            backend.recv().await.unwrap(),
            backend.recv().await.unwrap(),
            backend.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|event| event.payload.unwrap())
        .collect();
        assert_eq!(
            payloads,
            vec![
                Payload::Text("one".to_string()),
                Payload::Binary(vec![2, 2]),
                Payload::Text("three".to_string()),
            ]
        );
        assert_eq!(relay.await.unwrap(), Ok(RelayEnd::Closed));
    }

    #[tokio::test]
    async fn test_open_without_backend() {
        let router = router();
        let err = open(&router, "chat", ConnectionContext::default()).unwrap_err();
        assert!(matches!(err, RelayError::Route(RouteError::NoRoute { .. })));
    }

    #[tokio::test]
    async fn test_rejection_removes_client() {
        let router = router();
        let _backend = router.register_backend("chat", "server-1", ["connect"]);
        let pending = open(&router, "chat", ConnectionContext::default()).unwrap();
        router.acknowledge(
            "chat",
            ApprovalMessage::new(pending.connection_id(), ApprovalResult::failure("full")),
        );

        let err = pending.await_approval().await.unwrap_err();
        assert_eq!(
            err,
            RelayError::Handshake(HandshakeError::Rejected("full".to_string()))
        );
        assert_eq!(router.hub_stats("chat").unwrap().clients, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_refused() {
        let router = router();
        let _backend = router.register_backend("chat", "server-1", ["connect"]);
        let pending = open(&router, "chat", ConnectionContext::default()).unwrap();

        let err = pending.await_approval().await.unwrap_err();
        assert_eq!(err, RelayError::Handshake(HandshakeError::TimedOut));
    }

    #[tokio::test]
    async fn test_full_backend_queue_fails_open() {
        let router = Arc::new(Router::new(RouterConfig {
            backend_queue_capacity: 1,
            ..Default::default()
        }));
        let _backend = router.register_backend("chat", "server-1", ["connect"]);

        let _first = open(&router, "chat", ConnectionContext::default()).unwrap();
        let err = open(&router, "chat", ConnectionContext::default()).unwrap_err();
        assert_eq!(err, RelayError::Route(RouteError::QueueFull { capacity: 1 }));
        assert_eq!(router.hub_stats("chat").unwrap().clients, 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_running_relay() {
        let router = router();
        let mut backend = router.register_backend("chat", "server-1", ["connect"]);
        let pending = open(&router, "chat", ConnectionContext::default()).unwrap();
        let _connect = backend.recv().await.unwrap();
        router.acknowledge(
            "chat",
            ApprovalMessage::new(pending.connection_id(), ApprovalResult::success(None)),
        );
        let approved = pending.await_approval().await.unwrap();

        let (frames, source, sink, mut outbound) = transport();
        let relay = tokio::spawn(approved.run(source, sink));

        // The relay attaches its outbound channel once it starts running
        let mut sent = 0;
        for _ in 0..100 {
            sent = router.broadcast("chat", Payload::Text("news".to_string()));
            if sent > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sent, 1);
        assert_eq!(outbound.recv().await, Some(Payload::Text("news".to_string())));

        drop(frames);
        assert_eq!(relay.await.unwrap(), Ok(RelayEnd::Closed));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_relay() {
        let router = router();
        let _backend = router.register_backend("chat", "server-1", ["connect"]);
        let pending = open(&router, "chat", ConnectionContext::default()).unwrap();
        router.acknowledge(
            "chat",
            ApprovalMessage::new(pending.connection_id(), ApprovalResult::success(None)),
        );
        let approved = pending.await_approval().await.unwrap();

        let (_frames, source, sink, _outbound) = transport();
        let relay = tokio::spawn(approved.run(source, sink));
        router.shutdown();

        assert_eq!(relay.await.unwrap(), Ok(RelayEnd::Cancelled));
    }

    #[tokio::test]
    async fn test_disconnect_can_be_disabled() {
        let router = Arc::new(Router::new(RouterConfig {
            emit_disconnect: false,
            ..Default::default()
        }));
        let mut backend = router.register_backend("chat", "server-1", ["connect"]);
        let pending = open(&router, "chat", ConnectionContext::default()).unwrap();
        let _connect = backend.recv().await.unwrap();
        router.acknowledge(
            "chat",
            ApprovalMessage::new(pending.connection_id(), ApprovalResult::success(None)),
        );
        let approved = pending.await_approval().await.unwrap();

        let (frames, source, sink, _outbound) = transport();
        drop(frames);
        assert_eq!(approved.run(source, sink).await, Ok(RelayEnd::Closed));

        let connection = backend.connection();
        assert_eq!(connection.queued(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_ends_relay() {
        let router = router();
        let mut backend = router.register_backend("chat", "server-1", ["connect"]);
        let pending = open(&router, "chat", ConnectionContext::default()).unwrap();
        let _connect = backend.recv().await.unwrap();
        router.acknowledge(
            "chat",
            ApprovalMessage::new(pending.connection_id(), ApprovalResult::success(None)),
        );
        let approved = pending.await_approval().await.unwrap();

        let (frames, source, sink, _outbound) = transport();
        frames.send(Frame::text("ok", true)).unwrap();
        frames.send(Frame::text(vec![0xff], true)).unwrap();

        let result = approved.run(source, sink).await;
        assert_eq!(
            result,
            Err(RelayError::Transport(TransportError::InvalidUtf8))
        );

        let user = backend.recv().await.unwrap();
        assert_eq!(user.payload, Some(Payload::Text("ok".to_string())));
        let disconnect = backend.recv().await.unwrap();
        assert_eq!(disconnect.kind, EventKind::Disconnect);
    }
}
