//! Fixed-width little-endian reader/writer shared by every wire format.

use ghostnet_core::{GhostTypeId, SimTick};
use thiserror::Error;

/// Errors produced while reading or writing wire data.
///
/// Every variant is recoverable: callers drop the offending message and keep
/// the tick loop running.
#[derive(Debug, Error)]
pub enum WireError {
    /// Fewer bytes were available than the layout requires.
    #[error("truncated read: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },
    /// A snapshot record named a ghost type that is not registered.
    #[error("unknown ghost type {0:?}")]
    UnknownGhostType(GhostTypeId),
    /// The frame kind byte does not name a known message.
    #[error("unknown message kind {0}")]
    UnknownMessageKind(u8),
    /// A decoded field failed validation.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
    /// A delta record referenced a baseline this side does not hold.
    #[error("missing baseline at tick {0}")]
    MissingBaseline(SimTick),
    /// A frame length exceeded the protocol maximum.
    #[error("frame of {0} bytes exceeds maximum")]
    FrameTooLarge(usize),
    /// Trailing bytes after a fixed-size payload.
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
    /// postcard payload failed to (de)serialize.
    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Result alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Append-only little-endian writer.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write a `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write an `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discard everything written after the first `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Borrow the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer, returning its buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> WireResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(WireError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> WireResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a `u32`.
    pub fn read_u32(&mut self) -> WireResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Read an `i32`.
    pub fn read_i32(&mut self) -> WireResult<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    /// Consume the rest of the buffer.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Fail if any bytes remain.
    pub fn finish(&self) -> WireResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }

    fn read_array<const N: usize>(&mut self) -> WireResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }
}
