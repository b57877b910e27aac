//! Child command adapter over `tokio::process`.
//!
//! [`ProcessHandle`] implements [`CommandHandle`] for a local child process
//! with piped stdio. Four tasks serve it:
//!
//! ```text
//!                  ┌─► stdin feeder   (writes in order, posts StdinWritten/StdinClosed)
//! ProcessHandle ───┼─► stdout pump    (gated by pause/resume, posts Output/OutputEnd)
//!                  ├─► stderr pump
//!                  └─► waiter         (kill or wait, then posts Exited after both pumps end)
//! ```
//!
//! Exit is reported only once both output pipes have reached end of file, so
//! every byte the command wrote is posted before [`ChildEvent::Exited`].
//! Terminals are not allocated: `resize` reports unsupported.

use std::process::Stdio;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::protocol::StreamId;
use crate::request::ShellRequest;
use crate::session::{ChildEvent, CommandHandle};

/// Bytes requested per output read.
const READ_BUFFER_SIZE: usize = 4096;

enum StdinOp {
    Write(Bytes),
    Close,
}

/// A spawned child process.
///
/// Exit follows end of file on both output pipes, not the process exit
/// itself. A background process that inherits stdout or stderr (for example
/// `sh -c "daemon & echo started"`) holds the pipes open, and Exit waits until
/// it closes them or is gone. Redirect such output (`daemon >/dev/null 2>&1 &`)
/// when Exit should follow the command.
#[derive(Debug)]
pub struct ProcessHandle {
    stdin: mpsc::UnboundedSender<StdinOp>,
    stdout_paused: watch::Sender<bool>,
    stderr_paused: watch::Sender<bool>,
    kill: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    /// Spawn the requested command. Everything that happens to it, including
    /// a failure to start, is posted to `events`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(request: &ShellRequest, events: mpsc::UnboundedSender<ChildEvent>) -> Self {
        let (stdin, stdin_ops) = mpsc::unbounded_channel();
        let (stdout_paused, stdout_gate) = watch::channel(false);
        let (stderr_paused, stderr_gate) = watch::channel(false);
        let (kill, kill_rx) = oneshot::channel();
        let handle = Self {
            stdin,
            stdout_paused,
            stderr_paused,
            kill: Some(kill),
        };

        let Some((program, args)) = request.command.split_first() else {
            let _ = events.send(ChildEvent::Failed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            )));
            return handle;
        };
        if request.tty {
            tracing::debug!("terminal requested, running without one");
        }

        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(program = %program, error = %e, "failed to spawn command");
                let _ = events.send(ChildEvent::Failed(e));
                return handle;
            }
        };
        tracing::debug!(program = %program, pid = ?child.id(), "spawned command");

        tokio::spawn(feed_stdin(child.stdin.take(), stdin_ops, events.clone()));
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_output(
                StreamId::Stdout,
                stdout,
                stdout_gate,
                events.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_output(
                StreamId::Stderr,
                stderr,
                stderr_gate,
                events.clone(),
            )));
        }
        tokio::spawn(wait_child(child, kill_rx, pumps, events));

        handle
    }

    fn gate(&self, stream: StreamId) -> Option<&watch::Sender<bool>> {
        match stream {
            StreamId::Stdout => Some(&self.stdout_paused),
            StreamId::Stderr => Some(&self.stderr_paused),
            StreamId::Stdin => None,
        }
    }
}

impl CommandHandle for ProcessHandle {
    fn write_stdin(&mut self, data: Bytes) {
        let _ = self.stdin.send(StdinOp::Write(data));
    }

    fn close_stdin(&mut self) {
        let _ = self.stdin.send(StdinOp::Close);
    }

    fn pause_output(&mut self, stream: StreamId) {
        if let Some(gate) = self.gate(stream) {
            gate.send_replace(true);
        }
    }

    fn resume_output(&mut self, stream: StreamId) {
        if let Some(gate) = self.gate(stream) {
            gate.send_replace(false);
        }
    }

    fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        // A paused pump would never see end of file
        self.stdout_paused.send_replace(false);
        self.stderr_paused.send_replace(false);
    }
}

/// Apply stdin operations in order. A failed write still reports completion
/// so the initiator is not left waiting on a dead pipe.
async fn feed_stdin(
    mut stdin: Option<ChildStdin>,
    mut ops: mpsc::UnboundedReceiver<StdinOp>,
    events: mpsc::UnboundedSender<ChildEvent>,
) {
    while let Some(op) = ops.recv().await {
        match op {
            StdinOp::Write(data) => {
                if let Some(pipe) = stdin.as_mut() {
                    if let Err(e) = pipe.write_all(&data).await {
                        tracing::debug!(error = %e, "stdin write failed, discarding further input");
                        stdin = None;
                    }
                }
                let _ = events.send(ChildEvent::StdinWritten(data.len()));
            }
            StdinOp::Close => {
                if let Some(mut pipe) = stdin.take() {
                    let _ = pipe.shutdown().await;
                }
                let _ = events.send(ChildEvent::StdinClosed);
            }
        }
    }
}

async fn pump_output<R>(
    stream: StreamId,
    mut pipe: R,
    mut paused: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<ChildEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        // Sender gone means the handle was dropped; keep draining
        let _ = paused.wait_for(|is_paused| !*is_paused).await;

        buf.reserve(READ_BUFFER_SIZE);
        match pipe.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let _ = events.send(ChildEvent::Output(stream, buf.split().freeze()));
            }
            Err(e) => {
                tracing::debug!(stream = %stream, error = %e, "output read failed");
                break;
            }
        }
    }
    let _ = events.send(ChildEvent::OutputEnd(stream));
}

async fn wait_child(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    pumps: Vec<JoinHandle<()>>,
    events: mpsc::UnboundedSender<ChildEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            tracing::debug!("killing command");
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "kill failed");
            }
            child.wait().await
        }
    };

    for pump in pumps {
        let _ = pump.await;
    }

    match status {
        Ok(status) => {
            tracing::debug!(code = ?status.code(), "command exited");
            let _ = events.send(ChildEvent::Exited(status.code()));
        }
        Err(e) => {
            let _ = events.send(ChildEvent::Failed(e));
        }
    }
}
