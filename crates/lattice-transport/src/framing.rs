//! Length-prefixed framing codec.
//!
//! Wire format: `[2-byte unsigned big-endian length][payload bytes]`. The
//! codec carries no business state; it only manages the byte buffers needed
//! to reassemble frames across read boundaries.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// Maximum size of an encoded frame, length prefix included.
pub const MAX_FRAME_SIZE: usize = 8192;

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Maximum payload bytes a single frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - LENGTH_PREFIX_SIZE;

fn max_payload(max_frame_size: usize) -> usize {
    max_frame_size
        .saturating_sub(LENGTH_PREFIX_SIZE)
        .min(u16::MAX as usize)
}

/// Encodes a payload into a single frame using the default frame limit.
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    encode_with_limit(payload, MAX_FRAME_SIZE)
}

/// Encodes a payload into a single frame, rejecting payloads that would
/// exceed `max_frame_size` with the prefix included.
pub fn encode_with_limit(payload: &[u8], max_frame_size: usize) -> Result<Bytes> {
    let max = max_payload(max_frame_size);
    if payload.len() > max {
        return Err(TransportError::FrameTooLarge {
            length: payload.len(),
            max,
        });
    }
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame.freeze())
}

/// Incremental frame decoder.
///
/// Raw reads are appended with [`extend`](Self::extend); complete payloads
/// are drained with [`next_frame`](Self::next_frame). Partial frames stay
/// buffered until the rest of their bytes arrive; a partial frame is never
/// yielded. A declared length above the configured maximum fails with
/// [`TransportError::FrameTooLarge`] and discards nothing; the caller is
/// expected to close the connection.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Creates a decoder with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Creates a decoder with an explicit frame limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Appends raw bytes read from the wire.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes currently buffered, partial frames included.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete payload, or `None` until one is available.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buffer.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let length = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
        let max = max_payload(self.max_frame_size);
        if length > max {
            return Err(TransportError::FrameTooLarge { length, max });
        }
        if self.buffer.len() < LENGTH_PREFIX_SIZE + length {
            return Ok(None);
        }
        self.buffer.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(self.buffer.split_to(length).freeze()))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
