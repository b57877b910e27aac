//! Client builder and driver loop.
//!
//! The [`ShellClientBuilder`] collects the command, the terminal flag and
//! session tuning. The [`ShellClient`] it produces owns a driver task that:
//! 1. Feeds transport events into the initiator session
//! 2. Applies stdin writes, resizes and kills requested by the caller
//! 3. Flushes held output acknowledgments when the caller catches up
//!
//! Everything the session does happens on that one task, so the session
//! itself needs no locking.
//!
//! # Example
//!
//! ```no_run
//! use ws_shell::ShellClient;
//!
//! #[tokio::main]
//! async fn main() -> ws_shell::Result<()> {
//!     let mut client = ShellClient::builder("ws://127.0.0.1:2222/")
//!         .command(["echo", "hi"])
//!         .connect()
//!         .await?;
//!
//!     let mut stdout = client.take_stdout().unwrap();
//!     client.stdin().end().await?;
//!     let output = stdout.read_to_end().await;
//!     assert_eq!(&output[..], b"hi\n");
//!
//!     assert!(client.wait().await?);
//!     Ok(())
//! }
//! ```

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

use crate::config::SessionConfig;
use crate::error::{Result, ShellError};
use crate::pipe::OutputStream;
use crate::protocol::StreamId;
use crate::request::ShellRequest;
use crate::session::{Completion, Initiator, Session, SessionEvent};
use crate::transport::{websocket, Connection, TransportEvent};

/// Builder for configuring and connecting a [`ShellClient`].
#[derive(Debug, Clone)]
pub struct ShellClientBuilder {
    target: String,
    tty: bool,
    command: Vec<String>,
    config: SessionConfig,
}

impl ShellClientBuilder {
    /// Create a builder for a server at `target` (`ws://` or `wss://`).
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            tty: false,
            command: Vec::new(),
            config: SessionConfig::default(),
        }
    }

    /// Set the command to run: program followed by its arguments.
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Use the command and terminal flag of an existing request.
    pub fn request(mut self, request: ShellRequest) -> Self {
        self.tty = request.tty;
        self.command = request.command;
        self
    }

    /// Ask for a terminal.
    ///
    /// Default: false
    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Replace the whole session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the largest stdin payload per frame.
    ///
    /// Default: 16384
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set how many bytes stdout/stderr may buffer before acknowledgments
    /// are held back.
    ///
    /// Default: 16384
    pub fn output_high_water_mark(mut self, hwm: usize) -> Self {
        self.config.output_high_water_mark = hwm;
        self
    }

    /// The command request this builder describes.
    pub fn build_request(&self) -> Result<ShellRequest> {
        Ok(ShellRequest::new(self.command.iter().cloned())?.with_tty(self.tty))
    }

    /// The connection URL, with the request in its query string.
    pub fn url(&self) -> Result<Url> {
        self.build_request()?.to_url(&self.target)
    }

    /// Dial the server over WebSocket.
    ///
    /// Resolves once the connection is open. Fails if the handshake fails or
    /// the transport reports an error before opening.
    pub async fn connect(self) -> Result<ShellClient> {
        let url = self.url()?;
        tracing::debug!(url = %url, "connecting");
        let connection = websocket::connect(&url).await?;

        let mut client = self.attach(connection)?;
        client.opened().await?;
        Ok(client)
    }

    /// Run the session over an already established connection.
    ///
    /// The request itself is not sent; whoever created `connection` is
    /// responsible for getting it to the executor.
    pub fn attach(self, connection: Connection) -> Result<ShellClient> {
        self.build_request()?;
        self.config.validate()?;
        Ok(ShellClient::start(connection, self.config))
    }
}

/// Caller requests applied on the driver task.
enum Request {
    Write(Bytes, Completion),
    End(Completion),
    Resize(u16, u16),
    Kill,
    Close,
}

/// A running remote command.
///
/// Keep reading (or drop) stdout and stderr: output that is neither read nor
/// dropped is never acknowledged, and the command is paused once the window
/// fills.
pub struct ShellClient {
    requests: mpsc::UnboundedSender<Request>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    exit: Option<bool>,
    _driver: JoinHandle<()>,
}

impl ShellClient {
    /// Create a new client builder.
    pub fn builder(target: impl Into<String>) -> ShellClientBuilder {
        ShellClientBuilder::new(target)
    }

    fn start(connection: Connection, config: SessionConfig) -> Self {
        let (drained_tx, drained_rx) = mpsc::unbounded_channel();
        let (role, stdout, stderr) = Initiator::new(&config, drained_tx);
        let Connection { writer, events: transport } = connection;
        let (session, events) = Session::new(writer, config, role);

        let (requests, requests_rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(session, transport, requests_rx, drained_rx));

        Self {
            requests,
            events,
            stdout: Some(stdout),
            stderr: Some(stderr),
            exit: None,
            _driver: driver,
        }
    }

    /// Handle for writing to the command's stdin.
    pub fn stdin(&self) -> ShellStdin {
        ShellStdin {
            requests: self.requests.clone(),
        }
    }

    /// Take the command's stdout. Returns `None` after the first call.
    pub fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    /// Take the command's stderr. Returns `None` after the first call.
    pub fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    /// Report a terminal size change.
    pub fn resize(&self, cols: u16, rows: u16) {
        let _ = self.requests.send(Request::Resize(cols, rows));
    }

    /// Ask the executor to abort the command.
    pub fn kill(&self) {
        let _ = self.requests.send(Request::Kill);
    }

    /// Abort the command and close the connection.
    pub fn close(&self) {
        let _ = self.requests.send(Request::Close);
    }

    /// Receive the next session event, or `None` once the session is gone.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let event = self.events.recv().await?;
        if let SessionEvent::Exit(success) = event {
            self.exit = Some(success);
        }
        Some(event)
    }

    /// Wait until the connection is open.
    ///
    /// Fails with the first error reported before opening, or
    /// [`ShellError::ConnectionClosed`] if the session ends first.
    pub async fn opened(&mut self) -> Result<()> {
        match self.next_event().await {
            Some(SessionEvent::Open) => Ok(()),
            Some(SessionEvent::Error(e)) => Err(e),
            Some(SessionEvent::Exit(_)) | None => Err(ShellError::ConnectionClosed),
        }
    }

    /// Wait for the command to finish. Returns whether it succeeded.
    ///
    /// Errors reported meanwhile are logged and skipped; use
    /// [`next_event`](Self::next_event) to observe them.
    pub async fn wait(&mut self) -> Result<bool> {
        loop {
            if let Some(success) = self.exit {
                return Ok(success);
            }
            match self.next_event().await {
                Some(SessionEvent::Error(e)) => tracing::debug!(error = %e, "session error while waiting"),
                Some(_) => {}
                None => return Err(ShellError::ConnectionClosed),
            }
        }
    }

    /// Exit status, if the command has finished.
    #[inline]
    pub fn exit_status(&self) -> Option<bool> {
        self.exit
    }
}

/// Writer for the remote command's stdin. Cheaply cloneable.
#[derive(Clone)]
pub struct ShellStdin {
    requests: mpsc::UnboundedSender<Request>,
}

impl ShellStdin {
    /// Write `data`. Resolves once the executor has written all of it to the
    /// command.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<()> {
        let (done, result) = oneshot::channel();
        self.submit(Request::Write(data.into(), done))?;
        result.await.map_err(|_| ShellError::ConnectionClosed)?
    }

    /// End stdin. Resolves once the executor has closed the command's stdin.
    pub async fn end(&self) -> Result<()> {
        let (done, result) = oneshot::channel();
        self.submit(Request::End(done))?;
        result.await.map_err(|_| ShellError::ConnectionClosed)?
    }

    fn submit(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| ShellError::ConnectionClosed)
    }
}

/// Run the initiator session until the transport closes.
async fn drive(
    mut session: Session<Initiator>,
    mut transport: mpsc::UnboundedReceiver<TransportEvent>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut drained: mpsc::UnboundedReceiver<StreamId>,
) {
    let mut caller_present = true;
    loop {
        tokio::select! {
            event = transport.recv() => match event {
                Some(TransportEvent::Close) | None => {
                    session.handle_transport_close();
                    break;
                }
                Some(event) => session.handle_transport_event(event),
            },
            request = requests.recv(), if caller_present => match request {
                Some(request) => apply(&mut session, request),
                None => {
                    // Client and every stdin handle dropped
                    tracing::debug!("client dropped, closing session");
                    caller_present = false;
                    session.close();
                }
            },
            Some(stream) = drained.recv() => session.handle_drained(stream),
        }
    }
    tracing::debug!(exited = session.has_exited(), "client driver stopped");
}

fn apply(session: &mut Session<Initiator>, request: Request) {
    match request {
        Request::Write(data, done) => session.write(data, done),
        Request::End(done) => session.end_input(done),
        Request::Resize(cols, rows) => session.resize(cols, rows),
        Request::Kill => session.kill(),
        Request::Close => session.close(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use crate::transport::pair;

    fn builder() -> ShellClientBuilder {
        ShellClient::builder("ws://127.0.0.1:2222/").command(["cat"])
    }

    async fn next_frame(peer: &mut Connection) -> Frame {
        loop {
            match peer.events.recv().await {
                Some(TransportEvent::Message(message)) => return Frame::decode(message).unwrap(),
                Some(TransportEvent::Open) => continue,
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_builder_url() {
        let url = builder().tty(true).url().unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:2222/?tty=true&command=cat");
    }

    #[test]
    fn test_builder_configuration() {
        let builder = builder().max_message_size(1024).output_high_water_mark(10);
        assert_eq!(builder.config.max_message_size, 1024);
        assert_eq!(builder.config.output_high_water_mark, 10);
    }

    #[tokio::test]
    async fn test_attach_rejects_empty_command() {
        let (local, _peer) = pair();
        let result = ShellClient::builder("ws://localhost/").attach(local);
        assert!(matches!(result, Err(ShellError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_attach_rejects_invalid_config() {
        let (local, _peer) = pair();
        let result = builder().max_message_size(0).attach(local);
        assert!(matches!(result, Err(ShellError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_write_resolves_on_ack() {
        let (local, mut peer) = pair();
        let mut client = builder().attach(local).unwrap();
        client.opened().await.unwrap();

        let stdin = client.stdin();
        let write = tokio::spawn(async move { stdin.write(&b"hello"[..]).await });

        assert_eq!(
            next_frame(&mut peer).await,
            Frame::data(StreamId::Stdin, &b"hello"[..])
        );
        peer.writer.send_frame(&Frame::ack(StreamId::Stdin, 5));
        write.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_output_then_exit() {
        let (local, mut peer) = pair();
        let mut client = builder().attach(local).unwrap();
        let mut stdout = client.take_stdout().unwrap();
        assert!(client.take_stdout().is_none());

        peer.writer.send_frame(&Frame::data(StreamId::Stdout, &b"hi\n"[..]));
        assert_eq!(next_frame(&mut peer).await, Frame::ack(StreamId::Stdout, 3));

        peer.writer.send_frame(&Frame::end_of_stream(StreamId::Stdout));
        peer.writer.send_frame(&Frame::Exit { success: true });
        peer.writer.close();

        assert_eq!(stdout.read_to_end().await, Bytes::from_static(b"hi\n"));
        assert!(client.wait().await.unwrap());
        assert_eq!(client.exit_status(), Some(true));
    }

    #[tokio::test]
    async fn test_close_without_exit_fails_once() {
        let (local, peer) = pair();
        let mut client = builder().attach(local).unwrap();
        peer.writer.close();

        assert!(!client.wait().await.unwrap());

        let mut exits = 0;
        while let Some(event) = client.next_event().await {
            if matches!(event, SessionEvent::Exit(_)) {
                exits += 1;
            }
        }
        assert_eq!(exits, 0);
    }

    #[tokio::test]
    async fn test_pending_write_fails_on_close() {
        let (local, peer) = pair();
        let mut client = builder().attach(local).unwrap();
        client.opened().await.unwrap();

        let stdin = client.stdin();
        let write = tokio::spawn(async move { stdin.write(&b"never acked"[..]).await });
        tokio::task::yield_now().await;
        peer.writer.close();

        assert!(matches!(
            write.await.unwrap(),
            Err(ShellError::ConnectionClosed)
        ));
        assert!(matches!(
            client.stdin().write(&b"late"[..]).await,
            Err(ShellError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_kill_and_resize_reach_peer() {
        let (local, mut peer) = pair();
        let client = builder().attach(local).unwrap();

        client.resize(80, 24);
        client.kill();
        client.kill();
        client.close();

        assert_eq!(next_frame(&mut peer).await, Frame::Size { cols: 80, rows: 24 });
        assert_eq!(next_frame(&mut peer).await, Frame::Abort);
        assert!(matches!(peer.events.recv().await, Some(TransportEvent::Close)));
    }
}
