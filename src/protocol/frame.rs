//! Frame enum with encode/decode.
//!
//! Payloads use `bytes::Bytes`, so decoding a DATA frame from a `Bytes`
//! message and splitting large writes into frames never copies the payload.
//!
//! # Example
//!
//! ```
//! use ws_shell::protocol::{Frame, StreamId};
//! use bytes::Bytes;
//!
//! let frame = Frame::ack(StreamId::Stdout, 42);
//! let bytes = frame.encode();
//! assert_eq!(&bytes[..], &[1, 1, 0, 0, 0, 42]);
//! assert_eq!(Frame::decode(bytes).unwrap(), frame);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    message_type, StreamId, ABORT_LEN, ACK_LEN, DATA_HEADER_LEN, EXIT_LEN, SIZE_LEN,
};
use crate::error::FrameError;

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Stream bytes. An empty payload marks the end of the stream.
    Data {
        /// Stream the payload belongs to.
        stream: StreamId,
        /// Payload bytes (may be empty).
        payload: Bytes,
    },
    /// The sender has consumed `count` more bytes of `stream`.
    Ack {
        /// Stream being acknowledged.
        stream: StreamId,
        /// Bytes consumed since the previous ack. Zero confirms end of stdin.
        count: u32,
    },
    /// Terminal size change.
    Size {
        /// Columns.
        cols: u16,
        /// Rows.
        rows: u16,
    },
    /// Request to abort the command.
    Abort,
    /// The command finished.
    Exit {
        /// Whether the command exited with status 0.
        success: bool,
    },
}

impl Frame {
    /// Create a data frame.
    pub fn data(stream: StreamId, payload: impl Into<Bytes>) -> Self {
        Frame::Data {
            stream,
            payload: payload.into(),
        }
    }

    /// Create the empty data frame that ends `stream`.
    pub fn end_of_stream(stream: StreamId) -> Self {
        Frame::Data {
            stream,
            payload: Bytes::new(),
        }
    }

    /// Create an ack frame.
    pub fn ack(stream: StreamId, count: u32) -> Self {
        Frame::Ack { stream, count }
    }

    /// Check if this is an end-of-stream marker.
    #[inline]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Frame::Data { payload, .. } if payload.is_empty())
    }

    /// Frame type name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "DATA",
            Frame::Ack { .. } => "ACK",
            Frame::Size { .. } => "SIZE",
            Frame::Abort => "ABORT",
            Frame::Exit { .. } => "EXIT",
        }
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Frame::Data { payload, .. } => DATA_HEADER_LEN + payload.len(),
            Frame::Ack { .. } => ACK_LEN,
            Frame::Size { .. } => SIZE_LEN,
            Frame::Abort => ABORT_LEN,
            Frame::Exit { .. } => EXIT_LEN,
        }
    }

    /// Encode the frame into one transport message.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        match self {
            Frame::Data { stream, payload } => {
                buf.put_u8(message_type::DATA);
                buf.put_u8(stream.as_byte());
                buf.put_slice(payload);
            }
            Frame::Ack { stream, count } => {
                buf.put_u8(message_type::ACK);
                buf.put_u8(stream.as_byte());
                buf.put_u32(*count);
            }
            Frame::Size { cols, rows } => {
                buf.put_u8(message_type::SIZE);
                buf.put_u16(*cols);
                buf.put_u16(*rows);
            }
            Frame::Abort => buf.put_u8(message_type::ABORT),
            Frame::Exit { success } => {
                buf.put_u8(message_type::EXIT);
                buf.put_u8(if *success { 0 } else { 1 });
            }
        }
        buf.freeze()
    }

    /// Decode one transport message.
    ///
    /// DATA payloads are sliced out of `message` without copying.
    pub fn decode(message: impl Into<Bytes>) -> Result<Self, FrameError> {
        let message: Bytes = message.into();
        let len = message.len();
        let Some(&tag) = message.first() else {
            return Err(FrameError::Empty);
        };

        match tag {
            message_type::DATA => {
                if len < DATA_HEADER_LEN {
                    return Err(FrameError::InvalidLength { kind: "DATA", len });
                }
                Ok(Frame::Data {
                    stream: StreamId::try_from(message[1])?,
                    payload: message.slice(DATA_HEADER_LEN..),
                })
            }
            message_type::ACK => {
                if len != ACK_LEN {
                    return Err(FrameError::InvalidLength { kind: "ACK", len });
                }
                Ok(Frame::Ack {
                    stream: StreamId::try_from(message[1])?,
                    count: u32::from_be_bytes([message[2], message[3], message[4], message[5]]),
                })
            }
            message_type::SIZE => {
                if len != SIZE_LEN {
                    return Err(FrameError::InvalidLength { kind: "SIZE", len });
                }
                Ok(Frame::Size {
                    cols: u16::from_be_bytes([message[1], message[2]]),
                    rows: u16::from_be_bytes([message[3], message[4]]),
                })
            }
            message_type::ABORT => {
                if len != ABORT_LEN {
                    return Err(FrameError::InvalidLength { kind: "ABORT", len });
                }
                Ok(Frame::Abort)
            }
            message_type::EXIT => {
                if len != EXIT_LEN {
                    return Err(FrameError::InvalidLength { kind: "EXIT", len });
                }
                Ok(Frame::Exit {
                    success: message[1] == 0,
                })
            }
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// Split `data` into DATA frames of at most `max_payload` bytes each.
///
/// Frames share `data`'s allocation. An empty buffer yields no frames, since
/// an empty DATA frame would end the stream.
///
/// # Example
///
/// ```
/// use ws_shell::protocol::{data_frames, StreamId, MAX_MESSAGE_SIZE};
/// use bytes::Bytes;
///
/// let data = Bytes::from(vec![7u8; 20_000]);
/// let sizes: Vec<usize> = data_frames(StreamId::Stdin, data, MAX_MESSAGE_SIZE)
///     .map(|frame| frame.encoded_len() - 2)
///     .collect();
/// assert_eq!(sizes, vec![16_384, 3_616]);
/// ```
pub fn data_frames(
    stream: StreamId,
    data: Bytes,
    max_payload: usize,
) -> impl Iterator<Item = Frame> {
    let max_payload = max_payload.max(1);
    let mut rest = data;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let take = rest.len().min(max_payload);
        Some(Frame::Data {
            stream,
            payload: rest.split_to(take),
        })
    })
}
