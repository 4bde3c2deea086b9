//! WebSocket Transport
//!
//! Adapts an axum WebSocket to the relay's frame source and sink.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use super::frames::{Frame, FrameSink, FrameSource, TransportError};
use super::session::{ApprovedRelay, RelayEnd, RelayError};
use crate::routing::Payload;

/// Inbound half of a client WebSocket
pub struct SocketSource(SplitStream<WebSocket>);

/// Outbound half of a client WebSocket
pub struct SocketSink(SplitSink<WebSocket, Message>);

/// Split a WebSocket into relay halves
pub fn split(socket: WebSocket) -> (SocketSource, SocketSink) {
    let (sender, receiver) = socket.split();
    (SocketSource(receiver), SocketSink(sender))
}

#[async_trait]
impl FrameSource for SocketSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.0.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            };

            // axum delivers whole messages; each one is a final frame
            return match message {
                Message::Text(text) => Some(Ok(Frame::text(text.into_bytes(), true))),
                Message::Binary(data) => Some(Ok(Frame::binary(data, true))),
                Message::Close(_) => Some(Ok(Frame::close())),
                // Ping/pong is answered by axum
                Message::Ping(_) | Message::Pong(_) => continue,
            };
        }
    }
}

#[async_trait]
impl FrameSink for SocketSink {
    async fn send_payload(&mut self, payload: &Payload) -> Result<(), TransportError> {
        let message = match payload {
            Payload::Text(text) => Message::Text(text.clone()),
            Payload::Json(value) => Message::Text(value.to_string()),
            Payload::Binary(data) => Message::Binary(data.clone()),
        };
        self.0
            .send(message)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0
            .close()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

/// Relay an upgraded WebSocket until it closes
pub async fn relay_socket(relay: ApprovedRelay, socket: WebSocket) -> Result<RelayEnd, RelayError> {
    let (source, sink) = split(socket);
    relay.run(source, sink).await
}
