//! Transport module - message-oriented connections.
//!
//! A session talks to its peer through a [`Connection`]: a [`WriterHandle`]
//! for ordered, boundary-preserving sends and a stream of [`TransportEvent`]s
//! for everything coming back.
//!
//! Provides:
//! - WebSocket (client `connect`, server `accept`)
//! - An in-memory pair for tests and embedders with their own channels

mod memory;
pub mod websocket;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::writer::{Outbound, WriterHandle};

pub use memory::pair;

/// Notifications from the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is established.
    Open,
    /// One complete message.
    Message(Bytes),
    /// The connection is gone. Nothing follows.
    Close,
    /// The transport hit an error. A `Close` usually follows.
    Error(String),
}

/// Both halves of one message-oriented connection.
#[derive(Debug)]
pub struct Connection {
    /// Outbound half.
    pub writer: WriterHandle,
    /// Inbound half.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Connection {
    /// Assemble a connection from its halves.
    pub fn new(writer: WriterHandle, events: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self { writer, events }
    }

    /// Create a connection driven by hand.
    ///
    /// Returns the connection plus the raw outbound receiver and the event
    /// sender, for adapters over other transports and for tests.
    pub fn channel() -> (
        Self,
        mpsc::UnboundedReceiver<Outbound>,
        mpsc::UnboundedSender<TransportEvent>,
    ) {
        let (writer, outbound) = WriterHandle::channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        (Self::new(writer, events), outbound, events_tx)
    }
}
