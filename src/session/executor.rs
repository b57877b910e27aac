//! Executor role: the end that runs the command.
//!
//! Child output is framed and sent as soon as it arrives. Each output stream
//! has a [`SourceCredit`]; when the initiator falls a full window behind the
//! stream is paused on the child, and resumed when acknowledgments catch up.
//! Stdin frames are written to the child and acknowledged as each write
//! completes.

use bytes::Bytes;

use super::{Link, Role, Session};
use crate::backpressure::{FlowSignal, SourceCredit};
use crate::config::SessionConfig;
use crate::error::ShellError;
use crate::protocol::{Frame, StreamId};

/// Control surface of a running child command.
///
/// Every method must return without blocking; results come back as
/// [`ChildEvent`]s. Stdin writes must complete in submission order.
pub trait CommandHandle: Send + 'static {
    /// Queue bytes for the child's stdin. Completion is reported with
    /// [`ChildEvent::StdinWritten`].
    fn write_stdin(&mut self, data: Bytes);

    /// Close the child's stdin after queued writes. Completion is reported
    /// with [`ChildEvent::StdinClosed`].
    fn close_stdin(&mut self);

    /// Stop reading `stream` from the child.
    fn pause_output(&mut self, stream: StreamId);

    /// Read `stream` from the child again.
    fn resume_output(&mut self, stream: StreamId);

    /// Resize the child's terminal. Returns `false` if there is none.
    fn resize(&mut self, _cols: u16, _rows: u16) -> bool {
        false
    }

    /// Terminate the child.
    fn kill(&mut self);
}

/// Something that happened to the child command.
#[derive(Debug)]
pub enum ChildEvent {
    /// A chunk of stdout or stderr.
    Output(StreamId, Bytes),
    /// Stdout or stderr reached end of file.
    OutputEnd(StreamId),
    /// A stdin write of this many bytes completed.
    StdinWritten(usize),
    /// Stdin was closed.
    StdinClosed,
    /// The child exited. `None` when killed by a signal.
    Exited(Option<i32>),
    /// The child could not be run or failed while running.
    Failed(std::io::Error),
}

/// State of the command-running end.
#[derive(Debug)]
pub struct Executor<C: CommandHandle> {
    child: C,
    stdout: SourceCredit,
    stderr: SourceCredit,
    stdin_closed: bool,
}

impl<C: CommandHandle> Executor<C> {
    /// Wrap a running child.
    pub fn new(child: C, config: &SessionConfig) -> Self {
        Self {
            child,
            stdout: SourceCredit::new(config.high_water_mark),
            stderr: SourceCredit::new(config.high_water_mark),
            stdin_closed: false,
        }
    }

    /// Get the child handle.
    #[inline]
    pub fn child(&self) -> &C {
        &self.child
    }

    /// Unacknowledged bytes sent on `stream`.
    pub fn outstanding(&self, stream: StreamId) -> usize {
        self.credit(stream).map_or(0, SourceCredit::outstanding)
    }

    fn credit(&self, stream: StreamId) -> Option<&SourceCredit> {
        match stream {
            StreamId::Stdout => Some(&self.stdout),
            StreamId::Stderr => Some(&self.stderr),
            StreamId::Stdin => None,
        }
    }

    fn credit_mut(&mut self, stream: StreamId) -> Option<&mut SourceCredit> {
        match stream {
            StreamId::Stdout => Some(&mut self.stdout),
            StreamId::Stderr => Some(&mut self.stderr),
            StreamId::Stdin => None,
        }
    }
}

impl<C: CommandHandle> Role for Executor<C> {
    const NAME: &'static str = "executor";

    fn on_data(&mut self, _link: &mut Link, stream: StreamId, payload: Bytes) {
        if stream != StreamId::Stdin {
            tracing::debug!(stream = ?stream, "ignoring output data from initiator");
            return;
        }
        if self.stdin_closed {
            tracing::warn!(len = payload.len(), "dropping stdin data after end of input");
            return;
        }

        if payload.is_empty() {
            tracing::debug!("closing child stdin");
            self.stdin_closed = true;
            self.child.close_stdin();
        } else {
            self.child.write_stdin(payload);
        }
    }

    fn on_ack(&mut self, link: &mut Link, stream: StreamId, count: u32) {
        let Some(credit) = self.credit_mut(stream) else {
            tracing::debug!(count, "ignoring stdin ack from initiator");
            return;
        };

        match credit.on_ack(count) {
            Ok(Some(FlowSignal::Resume)) => {
                tracing::debug!(stream = ?stream, "resuming child output");
                self.child.resume_output(stream);
            }
            Ok(_) => {}
            Err(e) => link.emit_error(e),
        }
    }

    fn on_size(&mut self, _link: &mut Link, cols: u16, rows: u16) {
        if !self.child.resize(cols, rows) {
            tracing::debug!(cols, rows, "child has no terminal, ignoring resize");
        }
    }

    fn on_abort(&mut self, _link: &mut Link) {
        tracing::debug!("abort requested, killing child");
        self.child.kill();
    }

    fn on_transport_close(&mut self, link: &mut Link) {
        if !link.has_exited() {
            tracing::debug!("transport closed before exit, killing child");
            self.child.kill();
        }
    }

    fn on_transport_error(&mut self, link: &mut Link, error: String) {
        link.emit_error(ShellError::Transport(error));
        self.child.kill();
    }
}

impl<C: CommandHandle> Session<Executor<C>> {
    /// Feed one event from the child command.
    pub fn handle_child_event(&mut self, event: ChildEvent) {
        match event {
            ChildEvent::Output(stream, data) => self.forward_output(stream, data),
            ChildEvent::OutputEnd(stream) => {
                tracing::debug!(stream = ?stream, "child output ended");
                self.link.send_frame(&Frame::end_of_stream(stream));
            }
            ChildEvent::StdinWritten(len) => {
                let count = u32::try_from(len).unwrap_or(u32::MAX);
                self.link.send_ack(StreamId::Stdin, count);
            }
            ChildEvent::StdinClosed => self.link.send_ack(StreamId::Stdin, 0),
            ChildEvent::Exited(code) => {
                tracing::debug!(code = ?code, "child exited");
                self.finish(code == Some(0));
            }
            ChildEvent::Failed(e) => {
                tracing::error!(error = %e, "child command failed");
                self.link.emit_error(ShellError::Command(e.to_string()));
                self.finish(false);
            }
        }
    }

    /// Whether Exit has been sent.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.link.has_exited()
    }

    fn forward_output(&mut self, stream: StreamId, data: Bytes) {
        if !stream.is_output() {
            tracing::debug!("ignoring stdin output from child");
            return;
        }
        if self.link.has_exited() || data.is_empty() {
            return;
        }
        let sent: usize = self.link.send_data(stream, data).iter().sum();

        let Some(credit) = self.role.credit_mut(stream) else {
            return;
        };
        if let Some(FlowSignal::Pause) = credit.on_sent(sent) {
            tracing::debug!(stream = ?stream, outstanding = credit.outstanding(), "pausing child output");
            self.role.child.pause_output(stream);
        }
    }

    /// Send Exit once, then close the transport.
    fn finish(&mut self, success: bool) {
        if !self.link.mark_exited(success) {
            return;
        }
        tracing::debug!(success, "sending exit");
        self.link.send_frame(&Frame::Exit { success });
        self.link.close_transport();
    }
}
