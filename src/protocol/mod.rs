//! Protocol module - wire format and frame types.
//!
//! This module implements the binary protocol spoken over the transport:
//! - One frame per transport message, type tag in byte 0
//! - Frame enum with encode/decode
//! - Splitting of large writes into bounded DATA frames

mod frame;
mod wire_format;

pub use frame::{data_frames, Frame};
pub use wire_format::{message_type, StreamId, HIGH_WATER_MARK, MAX_MESSAGE_SIZE};
