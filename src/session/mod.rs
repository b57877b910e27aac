//! Protocol sessions.
//!
//! A [`Session`] is one end of one connection running one command. The frame
//! decoding, the once-only Open/Exit/Abort bookkeeping and the outbound path
//! are shared; what each frame *means* is supplied by the [`Role`]:
//!
//! - [`Initiator`]: asks for the command, feeds stdin, consumes stdout/stderr.
//! - [`Executor`]: runs the command, feeds its output, consumes stdin.
//!
//! Sessions are synchronous state machines. They never await: frames go out
//! through a [`WriterHandle`] and notifications through a [`SessionEvent`]
//! channel. The async drivers in [`client`](crate::client) and
//! [`server`](crate::server) pin each session to a single task and feed it
//! transport events and local I/O completions in turn.

mod executor;
mod initiator;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::error::ShellError;
use crate::protocol::{Frame, StreamId};
use crate::transport::TransportEvent;
use crate::writer::WriterHandle;

pub use executor::{ChildEvent, CommandHandle, Executor};
pub use initiator::{Completion, Initiator};

/// Notification from a session.
#[derive(Debug)]
pub enum SessionEvent {
    /// The transport is up. Emitted at most once.
    Open,
    /// Something went wrong. The session keeps running.
    Error(ShellError),
    /// The command finished. Emitted exactly once.
    Exit(bool),
}

/// Shared per-connection state handed to role hooks.
#[derive(Debug)]
pub struct Link {
    writer: WriterHandle,
    events: mpsc::UnboundedSender<SessionEvent>,
    config: SessionConfig,
    opened: bool,
    exited: bool,
    aborted: bool,
    closed: bool,
}

impl Link {
    fn new(
        writer: WriterHandle,
        events: mpsc::UnboundedSender<SessionEvent>,
        config: SessionConfig,
    ) -> Self {
        Self {
            writer,
            events,
            config,
            opened: false,
            exited: false,
            aborted: false,
            closed: false,
        }
    }

    /// Session configuration.
    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether Exit has been observed (initiator) or sent (executor).
    #[inline]
    pub fn has_exited(&self) -> bool {
        self.exited
    }

    /// Whether the transport has closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn send_frame(&self, frame: &Frame) {
        self.writer.send_frame(frame);
    }

    /// Send `data` split into frames. Returns each frame's payload length.
    pub(crate) fn send_data(&self, stream: StreamId, data: Bytes) -> Vec<usize> {
        self.writer
            .send_data(stream, data, self.config.max_message_size)
    }

    pub(crate) fn send_ack(&self, stream: StreamId, count: u32) {
        tracing::debug!(stream = ?stream, count, "sending ack");
        self.send_frame(&Frame::ack(stream, count));
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn emit_error(&self, error: ShellError) {
        tracing::warn!(error = %error, "session error");
        self.emit(SessionEvent::Error(error));
    }

    /// Record the exit. Returns `false` if it was already recorded.
    pub(crate) fn mark_exited(&mut self, success: bool) -> bool {
        if self.exited {
            return false;
        }
        self.exited = true;
        self.emit(SessionEvent::Exit(success));
        true
    }

    /// Record an abort. Returns `false` if one was already sent.
    pub(crate) fn mark_aborted(&mut self) -> bool {
        !std::mem::replace(&mut self.aborted, true)
    }

    pub(crate) fn close_transport(&self) {
        self.writer.close();
    }
}

/// Frame handlers that give a session its behavior.
pub trait Role {
    /// Name used in log fields.
    const NAME: &'static str;

    /// A DATA frame arrived. `payload` is empty at end of stream.
    fn on_data(&mut self, link: &mut Link, stream: StreamId, payload: Bytes);

    /// An ACK frame arrived.
    fn on_ack(&mut self, link: &mut Link, stream: StreamId, count: u32);

    /// A SIZE frame arrived.
    fn on_size(&mut self, _link: &mut Link, cols: u16, rows: u16) {
        tracing::debug!(role = Self::NAME, cols, rows, "ignoring size frame");
    }

    /// An ABORT frame arrived.
    fn on_abort(&mut self, _link: &mut Link) {
        tracing::debug!(role = Self::NAME, "ignoring abort frame");
    }

    /// An EXIT frame arrived.
    fn on_exit(&mut self, _link: &mut Link, success: bool) {
        tracing::debug!(role = Self::NAME, success, "ignoring exit frame");
    }

    /// The transport closed.
    fn on_transport_close(&mut self, link: &mut Link);

    /// The transport reported an error.
    fn on_transport_error(&mut self, link: &mut Link, error: String);
}

/// One end of a command session.
#[derive(Debug)]
pub struct Session<R: Role> {
    link: Link,
    role: R,
}

impl<R: Role> Session<R> {
    /// Bind `role` to a transport writer.
    ///
    /// Returns the session and the receiver for its events.
    pub fn new(
        writer: WriterHandle,
        config: SessionConfig,
        role: R,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            link: Link::new(writer, events_tx, config),
            role,
        };
        (session, events_rx)
    }

    /// Feed one transport event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.handle_open(),
            TransportEvent::Message(message) => self.handle_message(message),
            TransportEvent::Close => self.handle_transport_close(),
            TransportEvent::Error(error) => self.handle_transport_error(error),
        }
    }

    /// The transport is up.
    pub fn handle_open(&mut self) {
        if self.link.opened {
            return;
        }
        self.link.opened = true;
        tracing::debug!(role = R::NAME, "session open");
        self.link.emit(SessionEvent::Open);
    }

    /// Decode and dispatch one inbound message.
    ///
    /// Malformed messages are logged and dropped.
    pub fn handle_message(&mut self, message: Bytes) {
        let frame = match Frame::decode(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(role = R::NAME, error = %e, "dropping malformed frame");
                return;
            }
        };

        tracing::trace!(role = R::NAME, kind = frame.kind(), "received frame");
        let link = &mut self.link;
        match frame {
            Frame::Data { stream, payload } => self.role.on_data(link, stream, payload),
            Frame::Ack { stream, count } => self.role.on_ack(link, stream, count),
            Frame::Size { cols, rows } => self.role.on_size(link, cols, rows),
            Frame::Abort => self.role.on_abort(link),
            Frame::Exit { success } => self.role.on_exit(link, success),
        }
    }

    /// The transport closed.
    pub fn handle_transport_close(&mut self) {
        if self.link.closed {
            return;
        }
        self.link.closed = true;
        tracing::debug!(role = R::NAME, exited = self.link.exited, "transport closed");
        self.role.on_transport_close(&mut self.link);
    }

    /// The transport reported an error.
    pub fn handle_transport_error(&mut self, error: String) {
        tracing::warn!(role = R::NAME, error = %error, "transport error");
        self.role.on_transport_error(&mut self.link, error);
    }

    /// Whether the transport reported `Open`.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.link.opened
    }

    /// Whether Exit has been observed or sent.
    #[inline]
    pub fn has_exited(&self) -> bool {
        self.link.exited
    }

    /// Whether the transport has closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.link.closed
    }

    /// Get the role.
    #[inline]
    pub fn role(&self) -> &R {
        &self.role
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::writer::Outbound;

    /// Decode every frame queued on the writer so far.
    pub(crate) fn sent_frames(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(next) = rx.try_recv() {
            if let Outbound::Message(message) = next {
                frames.push(Frame::decode(message).unwrap());
            }
        }
        frames
    }

    /// Whether a close was queued on the writer (consumes the queue).
    pub(crate) fn close_queued(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> bool {
        let mut closed = false;
        while let Ok(next) = rx.try_recv() {
            closed |= next == Outbound::Close;
        }
        closed
    }

    /// Collect every event emitted so far.
    pub(crate) fn events(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}
