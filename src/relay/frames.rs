//! Transport Frames
//!
//! Abstract bidirectional message transport used by the relay, and the
//! reader that reassembles fragmented frames into whole messages.

use async_trait::async_trait;
use thiserror::Error;

use crate::routing::Payload;

/// Frame type as seen on the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
    /// Follow-up fragment of a message started by a text or binary frame
    Continuation,
    Close,
}

/// One read from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub data: Vec<u8>,
    /// Marks the last fragment of a message
    pub fin: bool,
}

impl Frame {
    pub fn text(data: impl Into<Vec<u8>>, fin: bool) -> Self {
        Self {
            kind: FrameKind::Text,
            data: data.into(),
            fin,
        }
    }

    pub fn binary(data: impl Into<Vec<u8>>, fin: bool) -> Self {
        Self {
            kind: FrameKind::Binary,
            data: data.into(),
            fin,
        }
    }

    pub fn continuation(data: impl Into<Vec<u8>>, fin: bool) -> Self {
        Self {
            kind: FrameKind::Continuation,
            data: data.into(),
            fin,
        }
    }

    pub fn close() -> Self {
        Self {
            kind: FrameKind::Close,
            data: Vec::new(),
            fin: true,
        }
    }
}

/// Transport errors seen by the relay
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport IO error: {0}")]
    Io(String),

    #[error("Text message is not valid UTF-8")]
    InvalidUtf8,

    #[error("Message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Inbound half of a client transport
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or None once the transport is gone
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Outbound half of a client transport
#[async_trait]
pub trait FrameSink: Send {
    async fn send_payload(&mut self, payload: &Payload) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Reassembles fragmented frames into whole messages.
///
/// Partial messages live in the reader, so a `read_message` future that is
/// dropped between frames resumes where it left off on the next call.
pub struct MessageReader<S> {
    source: S,
    max_bytes: usize,
    buffer: Vec<u8>,
    kind: Option<FrameKind>,
}

impl<S: FrameSource> MessageReader<S> {
    pub fn new(source: S, max_bytes: usize) -> Self {
        Self {
            source,
            max_bytes,
            buffer: Vec::new(),
            kind: None,
        }
    }

    /// Read one full logical message.
    ///
    /// Returns None when the transport closes.
    pub async fn read_message(&mut self) -> Result<Option<Payload>, TransportError> {
        loop {
            let frame = match self.source.next_frame().await {
                Some(frame) => frame?,
                None => return Ok(None),
            };

            match (self.kind, frame.kind) {
                (_, FrameKind::Close) => return Ok(None),
                (None, FrameKind::Continuation) => {
                    return Err(TransportError::Protocol(
                        "continuation without a message start".to_string(),
                    ));
                }
                (None, kind) => self.kind = Some(kind),
                (Some(_), FrameKind::Continuation) => {}
                (Some(_), _) => {
                    return Err(TransportError::Protocol(
                        "new message started before the previous one finished".to_string(),
                    ));
                }
            }

            if self.buffer.len() + frame.data.len() > self.max_bytes {
                return Err(TransportError::MessageTooLarge {
                    limit: self.max_bytes,
                });
            }
            self.buffer.extend_from_slice(&frame.data);

            if frame.fin {
                let data = std::mem::take(&mut self.buffer);
                return match self.kind.take() {
                    Some(FrameKind::Text) => String::from_utf8(data)
                        .map(|text| Some(Payload::Text(text)))
                        .map_err(|_| TransportError::InvalidUtf8),
                    _ => Ok(Some(Payload::Binary(data))),
                };
            }
        }
    }
}
