//! Remote command server.
//!
//! Accepts WebSocket connections and runs the command named in each
//! connection's query string as a local process. There is no
//! authentication: bind it to a trusted interface only.
//!
//! ```text
//! cargo run --example server -- 127.0.0.1:2222
//! ```

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;
use ws_shell::transport::websocket;
use ws_shell::{SessionEvent, ShellHandler};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:2222".to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(e) = serve(stream).await {
                tracing::warn!(peer = %peer, error = %e, "session failed");
            }
        });
    }
}

async fn serve(stream: TcpStream) -> Result<()> {
    let (connection, request) = websocket::accept(stream).await?;
    tracing::info!(command = ?request.command, tty = request.tty, "running command");

    let mut handler = ShellHandler::builder().run(connection, &request)?;
    while let Some(event) = handler.next_event().await {
        match event {
            SessionEvent::Open => {}
            SessionEvent::Error(e) => tracing::warn!(error = %e, "session error"),
            SessionEvent::Exit(success) => {
                tracing::info!(success, "command finished");
                break;
            }
        }
    }
    Ok(())
}
