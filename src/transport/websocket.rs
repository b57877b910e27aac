//! WebSocket transport.
//!
//! Each frame travels as exactly one binary WebSocket message. Text messages
//! are ignored. The socket is split: a [`writer_loop`] task owns the sink and a
//! reader task turns incoming messages into [`TransportEvent`]s.
//!
//! ```text
//! WriterHandle ─► writer_loop ─► SplitSink ─┐
//!                                           ├─ WebSocketStream
//! events ◄─────── read_loop ◄── SplitStream ┘
//! ```

use bytes::Bytes;
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async, WebSocketStream};
use url::Url;

use super::{Connection, TransportEvent};
use crate::error::{Result, ShellError};
use crate::request::ShellRequest;
use crate::writer::writer_loop;

/// Dial `url` and return the connection once the handshake completes.
///
/// The first event on the returned connection is always `Open`.
pub async fn connect(url: &Url) -> Result<Connection> {
    let (socket, _response) = connect_async(url.as_str()).await?;
    tracing::debug!(url = %url, "websocket connected");
    Ok(spawn_pumps(socket))
}

/// Complete the server side of a handshake on an accepted stream.
///
/// The command request is read from the query string of the request target.
/// A request without a command is refused with `400 Bad Request` before the
/// upgrade.
pub async fn accept<S>(stream: S) -> Result<(Connection, ShellRequest)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut request = None;
    let callback = |req: &Request, response: Response| {
        let target = req.uri().to_string();
        match ShellRequest::from_request_target(&target) {
            Ok(parsed) => {
                request = Some(parsed);
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "refusing websocket upgrade");
                let mut refusal = ErrorResponse::new(Some(e.to_string()));
                *refusal.status_mut() = StatusCode::BAD_REQUEST;
                Err(refusal)
            }
        }
    };

    let socket = accept_hdr_async(stream, callback).await?;
    let request = request
        .ok_or_else(|| ShellError::InvalidRequest("handshake carried no request".to_string()))?;
    tracing::debug!(command = ?request.command, tty = request.tty, "websocket accepted");

    Ok((spawn_pumps(socket), request))
}

/// Wire an established socket to a [`Connection`].
fn spawn_pumps<S>(socket: WebSocketStream<S>) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = socket.split();
    let (connection, outbound, events) = Connection::channel();
    let _ = events.send(TransportEvent::Open);

    tokio::spawn(async move {
        if let Err(e) = writer_loop(outbound, sink, Message::binary).await {
            tracing::debug!(error = %e, "websocket writer stopped");
        }
    });
    tokio::spawn(read_loop(stream, events));

    connection
}

async fn read_loop<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(next) = stream.next().await {
        match next {
            Ok(Message::Binary(data)) => {
                let _ = events.send(TransportEvent::Message(Bytes::from(data)));
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Text(_)) => tracing::debug!("ignoring text message"),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "websocket read failed");
                let _ = events.send(TransportEvent::Error(e.to_string()));
                break;
            }
        }
    }

    tracing::debug!("websocket closed");
    let _ = events.send(TransportEvent::Close);
}
