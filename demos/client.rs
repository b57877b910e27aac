//! Remote command client.
//!
//! Runs a command on a ws-shell server, forwarding this process's stdin and
//! printing the command's stdout and stderr. Exits with status 1 if the
//! command failed.
//!
//! ```text
//! cargo run --example client -- ws://127.0.0.1:2222/ sh -c 'echo hi; cat'
//! ```
//!
//! Set `RUST_LOG=ws_shell=debug` to trace the protocol.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing_subscriber::EnvFilter;
use ws_shell::{OutputStream, ShellClient, ShellStdin};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        bail!("usage: client <ws-url> <command> [args...]");
    };
    let command: Vec<String> = args.collect();

    let mut client = ShellClient::builder(url)
        .command(command)
        .connect()
        .await
        .context("failed to start remote command")?;

    let stdout = client.take_stdout().context("stdout already taken")?;
    let stderr = client.take_stderr().context("stderr already taken")?;
    tokio::spawn(forward_input(tokio::io::stdin(), client.stdin()));
    let out = tokio::spawn(print_output(stdout, tokio::io::stdout()));
    let err = tokio::spawn(print_output(stderr, tokio::io::stderr()));

    let success = client.wait().await?;
    let _ = out.await;
    let _ = err.await;

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

/// Copy local input to the remote stdin, then end it.
async fn forward_input<R: AsyncRead + Unpin>(mut input: R, stdin: ShellStdin) {
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        match input.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if stdin.write(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read local stdin");
                break;
            }
        }
    }
    let _ = stdin.end().await;
}

async fn print_output<W: AsyncWrite + Unpin>(mut output: OutputStream, mut sink: W) {
    while let Some(chunk) = output.recv().await {
        if sink.write_all(&chunk).await.is_err() {
            break;
        }
        let _ = sink.flush().await;
    }
}
