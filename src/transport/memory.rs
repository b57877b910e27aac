//! In-memory connection pair.
//!
//! Each side's outbound messages are relayed, in order, as `Message` events
//! on the other side. Closing either side (or dropping every writer handle)
//! delivers `Close` to both ends exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Connection, TransportEvent};
use crate::writer::Outbound;

/// Create two connected ends. Both start with an `Open` event queued.
///
/// Must be called from within a tokio runtime: each direction is relayed by
/// its own task.
pub fn pair() -> (Connection, Connection) {
    let (a, a_outbound, a_events) = Connection::channel();
    let (b, b_outbound, b_events) = Connection::channel();

    let _ = a_events.send(TransportEvent::Open);
    let _ = b_events.send(TransportEvent::Open);

    let closed = Arc::new(AtomicBool::new(false));
    tokio::spawn(relay(
        a_outbound,
        b_events.clone(),
        a_events.clone(),
        closed.clone(),
    ));
    tokio::spawn(relay(b_outbound, a_events, b_events, closed));

    (a, b)
}

/// Forward one direction until it closes.
async fn relay(
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    peer: mpsc::UnboundedSender<TransportEvent>,
    local: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
) {
    while let Some(next) = outbound.recv().await {
        match next {
            Outbound::Message(message) => {
                if closed.load(Ordering::Acquire) {
                    break;
                }
                let _ = peer.send(TransportEvent::Message(message));
            }
            Outbound::Close => break,
        }
    }

    if !closed.swap(true, Ordering::AcqRel) {
        tracing::debug!("memory transport closed");
        let _ = peer.send(TransportEvent::Close);
        let _ = local.send(TransportEvent::Close);
    }
}
