//! Initiator role: the end that asked for the command.
//!
//! Stdin writes are split into frames and queued in a [`PendingWrites`]
//! until the executor acknowledges them. Stdout/stderr payloads are pushed
//! into the caller's [`OutputStream`]s and acknowledged as the caller keeps up.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::{Link, Role, Session};
use crate::backpressure::{AckCoalescer, PendingWrites};
use crate::config::SessionConfig;
use crate::error::{Result, ShellError};
use crate::pipe::{output_pipe, OutputStream, OutputWriter};
use crate::protocol::{Frame, StreamId};

/// Completion of a stdin write, resolved when the executor acknowledges it.
pub type Completion = oneshot::Sender<Result<()>>;

/// One inbound output stream.
#[derive(Debug)]
struct OutputSink {
    writer: OutputWriter,
    acks: AckCoalescer,
}

impl OutputSink {
    fn new(writer: OutputWriter) -> Self {
        Self {
            writer,
            acks: AckCoalescer::new(),
        }
    }
}

/// State of the command-requesting end.
#[derive(Debug)]
pub struct Initiator {
    pending: PendingWrites<Completion>,
    input_ended: bool,
    stdout: OutputSink,
    stderr: OutputSink,
}

impl Initiator {
    /// Create the role and the caller's stdout and stderr.
    ///
    /// `drained` receives a stream id whenever a backlogged output has been
    /// read empty; feed it back through [`Session::handle_drained`].
    pub fn new(
        config: &SessionConfig,
        drained: mpsc::UnboundedSender<StreamId>,
    ) -> (Self, OutputStream, OutputStream) {
        let hwm = config.output_high_water_mark;
        let (stdout_writer, stdout) = output_pipe(StreamId::Stdout, hwm, drained.clone());
        let (stderr_writer, stderr) = output_pipe(StreamId::Stderr, hwm, drained);

        let role = Self {
            pending: PendingWrites::new(),
            input_ended: false,
            stdout: OutputSink::new(stdout_writer),
            stderr: OutputSink::new(stderr_writer),
        };
        (role, stdout, stderr)
    }

    /// Stdin bytes sent but not yet acknowledged.
    #[inline]
    pub fn unacknowledged(&self) -> usize {
        self.pending.unacknowledged()
    }

    /// Whether stdin has been ended.
    #[inline]
    pub fn is_input_ended(&self) -> bool {
        self.input_ended
    }

    fn output_mut(&mut self, stream: StreamId) -> Option<&mut OutputSink> {
        match stream {
            StreamId::Stdout => Some(&mut self.stdout),
            StreamId::Stderr => Some(&mut self.stderr),
            StreamId::Stdin => None,
        }
    }

    fn fail_pending(&mut self) {
        for done in self.pending.drain() {
            let _ = done.send(Err(ShellError::ConnectionClosed));
        }
    }
}

impl Role for Initiator {
    const NAME: &'static str = "initiator";

    fn on_data(&mut self, link: &mut Link, stream: StreamId, payload: Bytes) {
        let Some(sink) = self.output_mut(stream) else {
            tracing::debug!("ignoring stdin data from executor");
            return;
        };

        if payload.is_empty() {
            tracing::debug!(stream = ?stream, "output ended");
            sink.writer.end();
            return;
        }

        let len = payload.len();
        let accepted = sink.writer.push(payload);
        if let Some(count) = sink.acks.on_delivered(len, accepted) {
            link.send_ack(stream, count);
        } else {
            tracing::debug!(stream = ?stream, held = sink.acks.held(), "output backlogged, holding ack");
        }
    }

    fn on_ack(&mut self, link: &mut Link, stream: StreamId, count: u32) {
        if stream != StreamId::Stdin {
            tracing::debug!(stream = ?stream, count, "ignoring output ack from executor");
            return;
        }

        let mut completed = Vec::new();
        let result = self.pending.acknowledge(count, &mut completed);
        for done in completed {
            let _ = done.send(Ok(()));
        }
        if let Err(e) = result {
            link.emit_error(e);
        }
    }

    fn on_exit(&mut self, link: &mut Link, success: bool) {
        if !link.mark_exited(success) {
            tracing::debug!(success, "ignoring repeated exit");
        }
    }

    fn on_transport_close(&mut self, link: &mut Link) {
        self.stdout.writer.end();
        self.stderr.writer.end();
        self.fail_pending();
        if link.mark_exited(false) {
            tracing::debug!("transport closed before exit");
        }
    }

    fn on_transport_error(&mut self, link: &mut Link, error: String) {
        link.emit_error(ShellError::Transport(error));
    }
}

impl Session<Initiator> {
    /// Send `data` on stdin. `done` resolves once every frame of it has been
    /// acknowledged.
    pub fn write(&mut self, data: Bytes, done: Completion) {
        if self.role.input_ended {
            let _ = done.send(Err(ShellError::InputEnded));
            return;
        }
        if self.link.closed {
            let _ = done.send(Err(ShellError::ConnectionClosed));
            return;
        }
        if data.is_empty() {
            let _ = done.send(Ok(()));
            return;
        }

        let lengths = self.link.send_data(StreamId::Stdin, data);
        let last = lengths.len().saturating_sub(1);
        let mut done = Some(done);
        for (i, len) in lengths.into_iter().enumerate() {
            let token = if i == last { done.take() } else { None };
            self.role.pending.push(len, token);
        }
    }

    /// End stdin. `done` resolves when the executor confirms the command's
    /// stdin was closed.
    pub fn end_input(&mut self, done: Completion) {
        if self.role.input_ended {
            let _ = done.send(Err(ShellError::InputEnded));
            return;
        }
        self.role.input_ended = true;
        if self.link.closed {
            let _ = done.send(Err(ShellError::ConnectionClosed));
            return;
        }

        self.link.send_frame(&Frame::end_of_stream(StreamId::Stdin));
        self.role.pending.push_eof(Some(done));
    }

    /// Tell the executor the terminal size changed.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.link.send_frame(&Frame::Size { cols, rows });
    }

    /// Ask the executor to abort the command. Only the first call sends.
    pub fn kill(&mut self) {
        if self.link.mark_aborted() {
            tracing::debug!("sending abort");
            self.link.send_frame(&Frame::Abort);
        }
    }

    /// Abort the command and close the transport.
    pub fn close(&mut self) {
        self.kill();
        self.link.close_transport();
    }

    /// An output stream's backlog has been read. Flushes its held ack.
    pub fn handle_drained(&mut self, stream: StreamId) {
        let Some(sink) = self.role.output_mut(stream) else {
            return;
        };
        if let Some(count) = sink.acks.on_drained() {
            self.link.send_ack(stream, count);
        }
    }
}
