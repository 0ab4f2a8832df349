//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the framing codec:
//! - 4-byte length prefix plus 5-byte header (kind, call id)
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors and the call body layout

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, CallBody, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_length, encode_length, validate_length, FrameKind, Header, DEFAULT_MAX_FRAME_SIZE,
    EVENT_CALL_ID, HEADER_SIZE, LENGTH_PREFIX_SIZE,
};
