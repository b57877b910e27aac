//! # ws-shell
//!
//! Run a command on a remote host over one message-oriented connection, with
//! its stdin, stdout and stderr multiplexed and flow controlled per stream.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): five frame types, one frame per transport
//!   message.
//! - **Flow control** ([`backpressure`]): cumulative acknowledgments. The
//!   executor pauses the command when the initiator falls a window behind;
//!   the initiator holds acknowledgments while the caller is not reading.
//! - **Sessions** ([`session`]): synchronous state machines for the two
//!   roles, the [`Initiator`](session::Initiator) (asks for the command) and
//!   the [`Executor`](session::Executor) (runs it).
//! - **Drivers** ([`ShellClient`], [`ShellHandler`]): one tokio task per
//!   session feeding it transport events and local I/O.
//! - **Transports** ([`transport`]): WebSocket and an in-memory pair.
//!
//! ## Example
//!
//! ```no_run
//! use ws_shell::ShellClient;
//!
//! #[tokio::main]
//! async fn main() -> ws_shell::Result<()> {
//!     let mut client = ShellClient::builder("ws://127.0.0.1:2222/")
//!         .command(["ls", "-l"])
//!         .connect()
//!         .await?;
//!
//!     let mut stdout = client.take_stdout().unwrap();
//!     while let Some(chunk) = stdout.recv().await {
//!         print!("{}", String::from_utf8_lossy(&chunk));
//!     }
//!
//!     let success = client.wait().await?;
//!     println!("exited ok: {}", success);
//!     Ok(())
//! }
//! ```

pub mod backpressure;
pub mod config;
pub mod error;
pub mod process;
pub mod protocol;
pub mod request;
pub mod session;
pub mod transport;
pub mod writer;

mod client;
mod pipe;
mod server;

pub use client::{ShellClient, ShellClientBuilder, ShellStdin};
pub use config::SessionConfig;
pub use error::{FrameError, Result, ShellError};
pub use pipe::OutputStream;
pub use request::ShellRequest;
pub use server::{ShellHandler, ShellHandlerBuilder};
pub use session::SessionEvent;
