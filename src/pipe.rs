//! Caller-facing output pipes.
//!
//! The initiator session pushes stdout/stderr chunks into an [`OutputWriter`]
//! and the caller reads them from the paired [`OutputStream`]. A push is
//! *accepted* while the buffer stays below the high-water mark. Once a push
//! is not accepted the pipe is backlogged, and when the caller has read the
//! buffer empty again the stream id is sent on the `drained` channel so the
//! session can flush its held acknowledgment.
//!
//! ```text
//! Session ── push ──► [ chunks ] ── recv ──► caller
//!    ▲                                 │
//!    └──────── drained(StreamId) ◄─────┘  (after a backlog empties)
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, Notify};

use crate::protocol::StreamId;

#[derive(Debug, Default)]
struct State {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    backlogged: bool,
    ended: bool,
    reader_gone: bool,
}

#[derive(Debug)]
struct Shared {
    stream: StreamId,
    high_water_mark: usize,
    state: Mutex<State>,
    readable: Notify,
    drained: mpsc::UnboundedSender<StreamId>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a connected writer/stream pair for `stream`.
pub(crate) fn output_pipe(
    stream: StreamId,
    high_water_mark: usize,
    drained: mpsc::UnboundedSender<StreamId>,
) -> (OutputWriter, OutputStream) {
    let shared = Arc::new(Shared {
        stream,
        high_water_mark,
        state: Mutex::new(State::default()),
        readable: Notify::new(),
        drained,
    });
    (
        OutputWriter {
            shared: shared.clone(),
        },
        OutputStream { shared },
    )
}

/// Session side of an output pipe.
#[derive(Debug)]
pub(crate) struct OutputWriter {
    shared: Arc<Shared>,
}

impl OutputWriter {
    /// Buffer `data` for the reader.
    ///
    /// Returns `true` if the buffer is still below the high-water mark. Data
    /// pushed after [`end`](Self::end), or after the reader went away, is
    /// discarded and reported as accepted.
    pub(crate) fn push(&self, data: Bytes) -> bool {
        let accepted = {
            let mut state = self.shared.lock();
            if state.ended || state.reader_gone {
                tracing::debug!(stream = %self.shared.stream, len = data.len(), "discarding output");
                return true;
            }
            state.buffered += data.len();
            state.chunks.push_back(data);
            let accepted = state.buffered < self.shared.high_water_mark;
            if !accepted {
                state.backlogged = true;
            }
            accepted
        };
        self.shared.readable.notify_one();
        accepted
    }

    /// Mark the end of the stream. Buffered chunks stay readable.
    pub(crate) fn end(&self) {
        {
            let mut state = self.shared.lock();
            if state.ended {
                return;
            }
            state.ended = true;
        }
        self.shared.readable.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn is_ended(&self) -> bool {
        self.shared.lock().ended
    }
}

/// The command's stdout or stderr, as seen by the caller.
#[derive(Debug)]
pub struct OutputStream {
    shared: Arc<Shared>,
}

impl OutputStream {
    /// Which stream this is.
    #[inline]
    pub fn stream(&self) -> StreamId {
        self.shared.stream
    }

    /// Receive the next chunk, or `None` once the stream has ended and every
    /// chunk has been read.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            if let Some(next) = self.try_recv() {
                return next;
            }
            self.shared.readable.notified().await;
        }
    }

    /// Read every remaining chunk into one buffer.
    pub async fn read_to_end(&mut self) -> Bytes {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.recv().await {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }

    /// Bytes buffered and not yet received.
    pub fn buffered(&self) -> usize {
        self.shared.lock().buffered
    }

    /// `Some(Some(chunk))` for data, `Some(None)` at the end, `None` when
    /// nothing is available yet.
    fn try_recv(&mut self) -> Option<Option<Bytes>> {
        let mut state = self.shared.lock();
        match state.chunks.pop_front() {
            Some(chunk) => {
                state.buffered -= chunk.len();
                if state.buffered == 0 && state.backlogged {
                    state.backlogged = false;
                    let _ = self.shared.drained.send(self.shared.stream);
                }
                Some(Some(chunk))
            }
            None if state.ended => Some(None),
            None => None,
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.reader_gone = true;
        state.chunks.clear();
        state.buffered = 0;
        if std::mem::take(&mut state.backlogged) {
            // Release whatever acknowledgment the session is holding
            let _ = self.shared.drained.send(self.shared.stream);
        }
    }
}
