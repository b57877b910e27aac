//! Outbound message path.
//!
//! Sessions never await the transport. Every frame goes into an unbounded
//! channel through a [`WriterHandle`] and a transport-owned task drains it.
//! Memory use stays bounded by the flow-control credit, not by the channel.
//!
//! # Architecture
//!
//! ```text
//! Session ─► WriterHandle ─► mpsc::UnboundedSender<Outbound> ─► writer_loop ─► Sink
//! ```
//!
//! The loop batches every message that is ready into a single flush.

use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;

use crate::protocol::{data_frames, Frame, StreamId};

/// Maximum messages to batch before a flush.
const MAX_BATCH_SIZE: usize = 64;

/// An instruction for the transport's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send one message, preserving its boundary.
    Message(Bytes),
    /// Close the transport.
    Close,
}

/// Handle for sending messages to the transport.
///
/// This is cheaply cloneable. Sends are fire-and-forget: a message sent after
/// the transport went away is dropped with a trace log.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl WriterHandle {
    /// Wrap an existing outbound channel.
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    /// Create a handle together with the receiver a writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Send one raw message.
    ///
    /// Returns `false` if the transport is gone.
    pub fn send(&self, message: Bytes) -> bool {
        if self.tx.send(Outbound::Message(message)).is_err() {
            tracing::trace!("transport gone, message dropped");
            return false;
        }
        true
    }

    /// Encode and send one frame.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        tracing::trace!(kind = frame.kind(), len = frame.encoded_len(), "sending frame");
        self.send(frame.encode())
    }

    /// Send `data` on `stream`, split into frames of at most `max_payload`
    /// bytes.
    ///
    /// Returns the payload length of each frame sent, in order.
    pub fn send_data(&self, stream: StreamId, data: Bytes, max_payload: usize) -> Vec<usize> {
        data_frames(stream, data, max_payload)
            .map(|frame| {
                let len = frame.encoded_len() - 2;
                self.send_frame(&frame);
                len
            })
            .collect()
    }

    /// Ask the writer task to close the transport.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// Check if the writer task has stopped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Drain `rx` into `sink` until the channel closes or [`Outbound::Close`]
/// arrives.
///
/// `wrap` turns a raw message into the sink's item type. On close the sink is
/// closed too, which for WebSocket sends the close frame.
pub async fn writer_loop<S, M>(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut sink: S,
    wrap: fn(Bytes) -> M,
) -> Result<(), S::Error>
where
    S: Sink<M> + Unpin,
{
    loop {
        // Wait for first message
        let Some(first) = rx.recv().await else {
            // Every handle dropped, clean shutdown
            return sink.close().await;
        };

        // Collect additional ready messages (non-blocking)
        let mut closing = false;
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        match first {
            Outbound::Message(message) => batch.push(message),
            Outbound::Close => closing = true,
        }
        while !closing && batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(Outbound::Message(message)) => batch.push(message),
                Ok(Outbound::Close) => closing = true,
                Err(_) => break,
            }
        }

        for message in batch {
            sink.feed(wrap(message)).await?;
        }
        sink.flush().await?;

        if closing {
            return sink.close().await;
        }
    }
}
