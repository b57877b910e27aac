//! Wire format constants.
//!
//! Every transport message carries exactly one frame:
//! ```text
//! ┌──────┬───────────────────────────────────────────────┐
//! │ Type │ Body                                          │
//! │1 byte│ depends on type                               │
//! ├──────┼───────────────────────────────────────────────┤
//! │ DATA │ stream (1) │ payload (0..N), empty = end      │
//! │ ACK  │ stream (1) │ count (uint32 BE)                │
//! │ SIZE │ columns (uint16 BE) │ rows (uint16 BE)        │
//! │ ABORT│ (none)                                        │
//! │ EXIT │ status (1), 0 = success                       │
//! └──────┴───────────────────────────────────────────────┘
//! ```

use crate::error::FrameError;

/// Maximum payload carried by a single DATA frame (16 KB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Unacknowledged output bytes after which the executor pauses a source (64 KB).
pub const HIGH_WATER_MARK: usize = 64 * 1024;

/// Message type tags (byte 0).
pub mod message_type {
    /// Stream payload, or end-of-stream when empty.
    pub const DATA: u8 = 0;
    /// Cumulative acknowledgment of consumed bytes.
    pub const ACK: u8 = 1;
    /// Terminal size change.
    pub const SIZE: u8 = 3;
    /// Request to abort the command.
    pub const ABORT: u8 = 4;
    /// Command exit status.
    pub const EXIT: u8 = 5;
}

/// Total message lengths for the fixed-size frame types.
pub(crate) const ACK_LEN: usize = 6;
pub(crate) const SIZE_LEN: usize = 5;
pub(crate) const ABORT_LEN: usize = 1;
pub(crate) const EXIT_LEN: usize = 2;

/// Length of the DATA header (type + stream).
pub(crate) const DATA_HEADER_LEN: usize = 2;

/// One of the three byte streams multiplexed on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    /// Initiator to executor.
    Stdin = 0,
    /// Executor to initiator.
    Stdout = 1,
    /// Executor to initiator.
    Stderr = 2,
}

impl StreamId {
    /// Wire value of this stream.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Output streams flow from the executor to the initiator.
    #[inline]
    pub fn is_output(self) -> bool {
        !matches!(self, StreamId::Stdin)
    }
}

impl TryFrom<u8> for StreamId {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StreamId::Stdin),
            1 => Ok(StreamId::Stdout),
            2 => Ok(StreamId::Stderr),
            other => Err(FrameError::UnknownStream(other)),
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StreamId::Stdin => "stdin",
            StreamId::Stdout => "stdout",
            StreamId::Stderr => "stderr",
        })
    }
}
