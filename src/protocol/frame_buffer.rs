//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForLength`: Need the 4-byte length prefix
//! - `WaitingForPayload`: Length parsed, need N payload bytes
//!
//! The state doubles as the read request handed to a
//! [`Transport`](crate::transport::Transport): [`FrameBuffer::wanted`] is the
//! number of bytes still missing before the next step can complete, so a
//! connection only ever has one outstanding `read(n)`.
//!
//! # Example
//!
//! ```
//! use wirecall::protocol::{build_frame, FrameBuffer, FrameKind};
//!
//! let bytes = build_frame(FrameKind::Event, 0, b"tick");
//! let mut buffer = FrameBuffer::new();
//!
//! assert_eq!(buffer.wanted(), 4);
//! assert!(buffer.push(&bytes[..6]).unwrap().is_empty());
//! assert_eq!(buffer.wanted(), 7);
//!
//! let frames = buffer.push(&bytes[6..]).unwrap();
//! assert_eq!(frames[0].body(), b"tick");
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{decode_length, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use super::Frame;
use crate::error::{Result, WirecallError};

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the length prefix.
    WaitingForLength,
    /// Length parsed, waiting for payload bytes.
    WaitingForPayload { length: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// Bytes that arrive beyond the end of the current frame are kept for the
/// next one, so a transport may hand over more than was requested.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload length.
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default maximum frame size.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames, in order.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for zero-length, undersized or oversized
    /// frames and for unknown frame kinds. The buffer is unusable after an
    /// error until [`clear`](Self::clear) is called.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        match self.push_partial(data) {
            (frames, None) => Ok(frames),
            (_, Some(e)) => Err(e),
        }
    }

    /// Like [`push`](Self::push), but keeps the frames that were complete
    /// before a framing error. They are returned in order, together with the
    /// error that stopped decoding.
    pub fn push_partial(&mut self, data: &[u8]) -> (Vec<Frame>, Option<WirecallError>) {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match self.try_extract_one() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return (frames, None),
                Err(e) => return (frames, Some(e)),
            }
        }
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    if self.buffer.len() < LENGTH_PREFIX_SIZE {
                        return Ok(None);
                    }
                    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
                    prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_SIZE]);
                    let length = decode_length(prefix, self.max_frame_size)?;

                    self.buffer.advance(LENGTH_PREFIX_SIZE);
                    self.state = State::WaitingForPayload { length };
                }
                State::WaitingForPayload { length } => {
                    let length = length as usize;
                    if self.buffer.len() < length {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(length).freeze();
                    self.state = State::WaitingForLength;
                    return Frame::decode(payload).map(Some);
                }
            }
        }
    }

    /// Number of bytes still missing before the current step completes.
    ///
    /// Always at least 1 after [`push`](Self::push) returns, since every
    /// complete frame has already been extracted.
    pub fn wanted(&self) -> usize {
        let target = match self.state {
            State::WaitingForLength => LENGTH_PREFIX_SIZE,
            State::WaitingForPayload { length } => length as usize,
        };
        target.saturating_sub(self.buffer.len()).max(1)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
