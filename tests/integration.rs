//! Integration tests for ws-shell.
//!
//! These tests run both session roles against each other, over the in-memory
//! transport and over a real WebSocket, with mock and real child commands.

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use ws_shell::protocol::StreamId;
use ws_shell::session::{ChildEvent, CommandHandle};
use ws_shell::transport::{pair, websocket};
use ws_shell::{SessionEvent, ShellClient, ShellError, ShellHandler, ShellRequest};

/// Calls the executor made on a [`MockChild`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Write(usize),
    CloseStdin,
    Pause(StreamId),
    Resume(StreamId),
    Kill,
}

/// Child command driven by the test. Stdin writes complete immediately.
struct MockChild {
    calls: mpsc::UnboundedSender<Call>,
    events: mpsc::UnboundedSender<ChildEvent>,
}

impl CommandHandle for MockChild {
    fn write_stdin(&mut self, data: Bytes) {
        let _ = self.calls.send(Call::Write(data.len()));
        let _ = self.events.send(ChildEvent::StdinWritten(data.len()));
    }

    fn close_stdin(&mut self) {
        let _ = self.calls.send(Call::CloseStdin);
        let _ = self.events.send(ChildEvent::StdinClosed);
    }

    fn pause_output(&mut self, stream: StreamId) {
        let _ = self.calls.send(Call::Pause(stream));
    }

    fn resume_output(&mut self, stream: StreamId) {
        let _ = self.calls.send(Call::Resume(stream));
    }

    fn kill(&mut self) {
        let _ = self.calls.send(Call::Kill);
        let _ = self.events.send(ChildEvent::Exited(None));
    }
}

struct MockSetup {
    client: ShellClient,
    handler: ShellHandler,
    calls: mpsc::UnboundedReceiver<Call>,
    child: mpsc::UnboundedSender<ChildEvent>,
}

fn mock_session(output_high_water_mark: usize) -> MockSetup {
    let (local, remote) = pair();
    let (calls_tx, calls) = mpsc::unbounded_channel();
    let (child, child_rx) = mpsc::unbounded_channel();

    let mock = MockChild {
        calls: calls_tx,
        events: child.clone(),
    };
    let handler = ShellHandler::builder().spawn(remote, mock, child_rx).unwrap();
    let client = ShellClient::builder("ws://localhost/")
        .command(["mock"])
        .output_high_water_mark(output_high_water_mark)
        .attach(local)
        .unwrap();

    MockSetup {
        client,
        handler,
        calls,
        child,
    }
}

fn real_session(command: &[&str]) -> (ShellClient, ShellHandler) {
    let request = ShellRequest::new(command.iter().copied()).unwrap();
    let (local, remote) = pair();
    let handler = ShellHandler::builder().run(remote, &request).unwrap();
    let client = ShellClient::builder("ws://localhost/")
        .request(request)
        .attach(local)
        .unwrap();
    (client, handler)
}

/// Large writes are split at the frame limit and acknowledged per frame.
#[tokio::test]
async fn test_large_write_split_and_acked() {
    let mut setup = mock_session(16 * 1024);
    setup.client.opened().await.unwrap();

    let stdin = setup.client.stdin();
    stdin.write(vec![b'x'; 20_000]).await.unwrap();

    assert_eq!(setup.calls.recv().await, Some(Call::Write(16_384)));
    assert_eq!(setup.calls.recv().await, Some(Call::Write(3_616)));

    stdin.end().await.unwrap();
    assert_eq!(setup.calls.recv().await, Some(Call::CloseStdin));
    assert!(matches!(
        stdin.write(&b"late"[..]).await,
        Err(ShellError::InputEnded)
    ));

    setup.child.send(ChildEvent::Exited(Some(0))).unwrap();
    assert!(setup.client.wait().await.unwrap());
    assert!(setup.handler.wait().await.unwrap());
}

/// A reader that stops reading pauses the command; catching up resumes it.
#[tokio::test]
async fn test_slow_reader_pauses_and_resumes_command() {
    let mut setup = mock_session(16 * 1024);
    let mut stdout = setup.client.take_stdout().unwrap();

    for _ in 0..5 {
        setup
            .child
            .send(ChildEvent::Output(
                StreamId::Stdout,
                Bytes::from(vec![b'o'; 16_384]),
            ))
            .unwrap();
    }
    assert_eq!(setup.calls.recv().await, Some(Call::Pause(StreamId::Stdout)));

    let mut received = 0;
    while received < 5 * 16_384 {
        received += stdout.recv().await.unwrap().len();
    }
    assert_eq!(setup.calls.recv().await, Some(Call::Resume(StreamId::Stdout)));

    setup.child.send(ChildEvent::OutputEnd(StreamId::Stdout)).unwrap();
    setup.child.send(ChildEvent::Exited(Some(0))).unwrap();
    assert!(stdout.recv().await.is_none());
    assert!(setup.client.wait().await.unwrap());

    // Exactly one pause and one resume
    drop(setup.handler);
    while let Ok(call) = setup.calls.try_recv() {
        assert!(!matches!(call, Call::Pause(_) | Call::Resume(_)));
    }
}

/// Kill from the initiator reaches the command, and the failure exit comes back.
#[tokio::test]
async fn test_kill_reaches_command() {
    let mut setup = mock_session(16 * 1024);
    setup.client.kill();

    assert_eq!(setup.calls.recv().await, Some(Call::Kill));
    assert!(!setup.client.wait().await.unwrap());
}

/// `echo hi` yields exactly "hi\n", then the end of stdout, then a clean exit.
#[cfg(unix)]
#[tokio::test]
async fn test_echo_end_to_end() {
    let (mut client, mut handler) = real_session(&["echo", "hi"]);
    let mut stdout = client.take_stdout().unwrap();
    let mut stderr = client.take_stderr().unwrap();

    assert_eq!(stdout.read_to_end().await, Bytes::from_static(b"hi\n"));
    assert!(stderr.read_to_end().await.is_empty());
    assert!(client.wait().await.unwrap());
    assert!(handler.wait().await.unwrap());
}

/// Stdin is delivered to the command and end of input closes it.
#[cfg(unix)]
#[tokio::test]
async fn test_cat_round_trip() {
    let (mut client, _handler) = real_session(&["cat"]);
    let mut stdout = client.take_stdout().unwrap();
    let stdin = client.stdin();

    stdin.write(&b"hello "[..]).await.unwrap();
    stdin.write(&b"world"[..]).await.unwrap();
    stdin.end().await.unwrap();

    assert_eq!(stdout.read_to_end().await, Bytes::from_static(b"hello world"));
    assert!(client.wait().await.unwrap());
}

/// Output larger than the window still arrives complete and in order.
#[cfg(unix)]
#[tokio::test]
async fn test_large_output_with_backpressure() {
    let (mut client, _handler) = real_session(&["sh", "-c", "head -c 300000 /dev/zero"]);
    let mut stdout = client.take_stdout().unwrap();

    let output = stdout.read_to_end().await;
    assert_eq!(output.len(), 300_000);
    assert!(output.iter().all(|&b| b == 0));
    assert!(client.wait().await.unwrap());
}

/// A nonzero exit status is reported as failure.
#[cfg(unix)]
#[tokio::test]
async fn test_failing_command() {
    let (mut client, _handler) = real_session(&["sh", "-c", "echo oops >&2; exit 2"]);
    let mut stderr = client.take_stderr().unwrap();

    assert_eq!(stderr.read_to_end().await, Bytes::from_static(b"oops\n"));
    assert!(!client.wait().await.unwrap());
}

/// A command that cannot be spawned surfaces an error and a failed exit.
#[tokio::test]
async fn test_spawn_failure() {
    let (mut client, mut handler) = real_session(&["definitely-not-a-real-command-7f3a"]);

    let mut saw_error = false;
    while let Some(event) = handler.next_event().await {
        match event {
            SessionEvent::Error(ShellError::Command(_)) => saw_error = true,
            SessionEvent::Exit(success) => {
                assert!(!success);
                break;
            }
            _ => {}
        }
    }
    assert!(saw_error);
    assert!(!client.wait().await.unwrap());
}

/// Aborting a long-running command ends the session with failure.
#[cfg(unix)]
#[tokio::test]
async fn test_abort_long_running_command() {
    let (mut client, mut handler) = real_session(&["sleep", "30"]);
    client.opened().await.unwrap();
    client.kill();

    assert!(!client.wait().await.unwrap());
    assert!(!handler.wait().await.unwrap());
}

/// The initiator sees exactly one exit when the transport drops without one.
#[tokio::test]
async fn test_transport_close_without_exit() {
    let (local, remote) = pair();
    let mut client = ShellClient::builder("ws://localhost/")
        .command(["anything"])
        .attach(local)
        .unwrap();
    remote.writer.close();

    let mut exits = Vec::new();
    while let Some(event) = client.next_event().await {
        if let SessionEvent::Exit(success) = event {
            exits.push(success);
        }
    }
    assert_eq!(exits, vec![false]);
}

/// Full stack over a real WebSocket connection.
#[cfg(unix)]
#[tokio::test]
async fn test_websocket_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (connection, request) = websocket::accept(stream).await.unwrap();
        let mut handler = ShellHandler::builder().run(connection, &request).unwrap();
        handler.wait().await
    });

    let mut client = ShellClient::builder(format!("ws://{}/", addr))
        .command(["sh", "-c", "read line; echo got $line"])
        .connect()
        .await
        .unwrap();
    let mut stdout = client.take_stdout().unwrap();

    client.stdin().write(&b"ping\n"[..]).await.unwrap();
    assert_eq!(stdout.read_to_end().await, Bytes::from_static(b"got ping\n"));
    assert!(client.wait().await.unwrap());
    assert!(server.await.unwrap().unwrap());
}
