//! Server-side session driver.
//!
//! A [`ShellHandler`] runs one executor session on its own task, fed by the
//! connection's transport events and by the child command's events. The task
//! ends once Exit has been sent.
//!
//! # Example
//!
//! ```no_run
//! use tokio::net::TcpListener;
//! use ws_shell::{transport::websocket, ShellHandler};
//!
//! #[tokio::main]
//! async fn main() -> ws_shell::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:2222").await?;
//!     loop {
//!         let (stream, _) = listener.accept().await?;
//!         tokio::spawn(async move {
//!             let (connection, request) = websocket::accept(stream).await?;
//!             let mut handler = ShellHandler::builder().run(connection, &request)?;
//!             handler.wait().await
//!         });
//!     }
//! }
//! ```

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::error::{Result, ShellError};
use crate::process::ProcessHandle;
use crate::request::ShellRequest;
use crate::session::{ChildEvent, CommandHandle, Executor, Session, SessionEvent};
use crate::transport::{Connection, TransportEvent};

/// Builder for a [`ShellHandler`].
#[derive(Debug, Clone, Default)]
pub struct ShellHandlerBuilder {
    config: SessionConfig,
}

impl ShellHandlerBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the largest output payload per frame.
    ///
    /// Default: 16384
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set how many unacknowledged output bytes pause the command.
    ///
    /// Default: 65536
    pub fn high_water_mark(mut self, hwm: usize) -> Self {
        self.config.high_water_mark = hwm;
        self
    }

    /// Spawn `request` as a local process and serve it over `connection`.
    pub fn run(self, connection: Connection, request: &ShellRequest) -> Result<ShellHandler> {
        request.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tracing::debug!(command = ?request.command, tty = request.tty, "running command");
        let child = ProcessHandle::spawn(request, events_tx);
        self.spawn(connection, child, events_rx)
    }

    /// Serve an already running child over `connection`.
    ///
    /// `child_events` must carry every [`ChildEvent`] of `child`.
    pub fn spawn<C: CommandHandle>(
        self,
        connection: Connection,
        child: C,
        child_events: mpsc::UnboundedReceiver<ChildEvent>,
    ) -> Result<ShellHandler> {
        self.config.validate()?;
        let role = Executor::new(child, &self.config);
        let Connection { writer, events: transport } = connection;
        let (session, events) = Session::new(writer, self.config, role);

        let driver = tokio::spawn(drive(session, transport, child_events));
        Ok(ShellHandler {
            events,
            exit: None,
            _driver: driver,
        })
    }
}

/// A command being served to one initiator.
pub struct ShellHandler {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    exit: Option<bool>,
    _driver: JoinHandle<()>,
}

impl ShellHandler {
    /// Create a new handler builder.
    pub fn builder() -> ShellHandlerBuilder {
        ShellHandlerBuilder::new()
    }

    /// Receive the next session event, or `None` once the session is gone.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let event = self.events.recv().await?;
        if let SessionEvent::Exit(success) = event {
            self.exit = Some(success);
        }
        Some(event)
    }

    /// Wait until Exit has been sent. Returns whether the command succeeded.
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
}

/// Run the executor session until Exit has been sent.
async fn drive<C: CommandHandle>(
    mut session: Session<Executor<C>>,
    mut transport: mpsc::UnboundedReceiver<TransportEvent>,
    mut child_events: mpsc::UnboundedReceiver<ChildEvent>,
) {
    let mut transport_open = true;
    while !session.is_finished() {
        tokio::select! {
            event = transport.recv(), if transport_open => match event {
                Some(TransportEvent::Close) | None => {
                    transport_open = false;
                    session.handle_transport_close();
                }
                Some(event) => session.handle_transport_event(event),
            },
            event = child_events.recv() => match event {
                Some(event) => session.handle_child_event(event),
                None => session.handle_child_event(ChildEvent::Failed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "child event stream ended",
                ))),
            },
        }
    }
    tracing::debug!("server driver stopped");
}
