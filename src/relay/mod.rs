//! Relay Loop
//!
//! Per-connection control flow between a client transport and the backend
//! it was matched to.
//!
//! ## Flow
//!
//! 1. [`open`] routes the connection on the `connect` event and queues a
//!    connect envelope on the matched backend.
//! 2. [`PendingRelay::await_approval`] waits for the backend's decision,
//!    bounded by the handshake timeout.
//! 3. [`ApprovedRelay::run`] reassembles client frames into messages and
//!    queues each as a user envelope, while writing broadcasts back to the
//!    client.
//!
//! Dropping a relay at any step removes its client connection from the hub.

mod frames;
mod session;
mod socket;

pub use frames::{Frame, FrameKind, FrameSink, FrameSource, MessageReader, TransportError};
pub use session::{open, ApprovedRelay, PendingRelay, RelayEnd, RelayError, CONNECT_EVENT};
pub use socket::{relay_socket, split, SocketSink, SocketSource};
