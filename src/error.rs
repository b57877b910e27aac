//! Error types for ws-shell.

use thiserror::Error;

/// Reasons a transport message does not decode to a frame.
///
/// Malformed frames are dropped by the sessions; they never end a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The message carried no bytes at all.
    #[error("empty message")]
    Empty,

    /// The type tag in byte 0 is not a known frame type.
    #[error("unknown message type: {0}")]
    UnknownType(u8),

    /// The stream identifier is not stdin, stdout or stderr.
    #[error("unknown stream identifier: {0}")]
    UnknownStream(u8),

    /// The body length does not match the frame type.
    #[error("{kind} frame has invalid length {len}")]
    InvalidLength {
        /// Frame type name.
        kind: &'static str,
        /// Total message length in bytes.
        len: usize,
    },
}

/// Main error type for all ws-shell operations.
#[derive(Debug, Error)]
pub enum ShellError {
    /// I/O error from the child process or a socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization error (config and request loading).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connection target is not a valid URL.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The remote side violated the flow-control protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The command request or configuration is invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Stdin was written after it had been ended.
    #[error("stdin already ended")]
    InputEnded,

    /// The transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The child command failed (spawn error or runtime error).
    #[error("command failed: {0}")]
    Command(String),

    /// The session is gone.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using ShellError.
pub type Result<T> = std::result::Result<T, ShellError>;
