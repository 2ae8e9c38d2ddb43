// Copyright 2026 the Cartridge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The cartridge byte buffer.
//!
//! [`CartBuffer`] is the single byte sequence an [`Encoder`](crate::encoder::Encoder) writes or a
//! [`Decoder`](crate::decoder::Decoder) reads. It carries exactly one cursor. Sequential reads and
//! writes advance it; the `peek_*`/`poke_*` family works at an absolute offset and leaves it
//! untouched, which is what backpatching placeholders relies on.
//!
//! All multi-byte values are little-endian.

use alloc::vec::Vec;
use core::fmt;

/// A low-level failure while reading or patching a [`CartBuffer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormatError {
    /// Fewer bytes remained than a field required.
    TruncatedInput {
        /// Offset at which the read started.
        offset: usize,
        /// Number of bytes the read needed.
        needed: usize,
    },
    /// A string field did not hold valid UTF-8.
    InvalidUtf8 {
        /// Offset of the string content.
        offset: usize,
    },
    /// A seek or positional write fell outside the written bytes.
    OutOfBounds,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedInput { offset, needed } => {
                write!(f, "truncated input: needed {needed} bytes at offset {offset}")
            }
            Self::InvalidUtf8 { offset } => write!(f, "invalid UTF-8 at offset {offset}"),
            Self::OutOfBounds => write!(f, "out of bounds"),
        }
    }
}

impl core::error::Error for FormatError {}

/// A cartridge byte buffer with a single read/write cursor.
///
/// Buffers are either growable (created with [`CartBuffer::new`]) or read-only (wrapping existing
/// bytes with [`CartBuffer::read_only`]). Only growable buffers can be bound to an encoder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CartBuffer {
    bytes: Vec<u8>,
    cursor: usize,
    growable: bool,
}

impl CartBuffer {
    /// Creates an empty growable buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            cursor: 0,
            growable: true,
        }
    }

    /// Creates an empty growable buffer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            cursor: 0,
            growable: true,
        }
    }

    /// Wraps existing bytes in a read-only buffer positioned at offset `0`.
    #[must_use]
    pub fn read_only(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            cursor: 0,
            growable: false,
        }
    }

    /// Returns `true` if sequential writes may extend this buffer.
    #[must_use]
    pub fn is_growable(&self) -> bool {
        self.growable
    }

    /// Returns the cursor offset.
    #[must_use]
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Returns the number of bytes held by the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the number of bytes between the cursor and the end of the buffer.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.cursor)
    }

    /// Returns the buffer contents.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the buffer and returns its bytes.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    /// Moves the cursor to the absolute offset `pos`.
    pub fn seek(&mut self, pos: usize) -> Result<(), FormatError> {
        if pos > self.bytes.len() {
            return Err(FormatError::OutOfBounds);
        }
        self.cursor = pos;
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&[u8], FormatError> {
        let offset = self.cursor;
        let end = offset
            .checked_add(len)
            .ok_or(FormatError::TruncatedInput {
                offset,
                needed: len,
            })?;
        let slice = self
            .bytes
            .get(offset..end)
            .ok_or(FormatError::TruncatedInput {
                offset,
                needed: len,
            })?;
        self.cursor = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a `u8`.
    pub fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32_le(&mut self) -> Result<u32, FormatError> {
        self.take_array().map(u32::from_le_bytes)
    }

    /// Reads a little-endian `i32`.
    pub fn read_i32_le(&mut self) -> Result<i32, FormatError> {
        self.take_array().map(i32::from_le_bytes)
    }

    /// Reads a little-endian IEEE-754 `f64`.
    pub fn read_f64_le(&mut self) -> Result<f64, FormatError> {
        self.take_array().map(f64::from_le_bytes)
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8], FormatError> {
        self.take(len)
    }

    /// Reads `len` bytes and validates UTF-8.
    pub fn read_str(&mut self, len: usize) -> Result<&str, FormatError> {
        let offset = self.cursor;
        let b = self.take(len)?;
        core::str::from_utf8(b).map_err(|_| FormatError::InvalidUtf8 { offset })
    }

    /// Writes `b` at the cursor, overwriting existing bytes and extending the buffer as needed.
    pub(crate) fn write_bytes(&mut self, b: &[u8]) {
        let end = self.cursor + b.len();
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[self.cursor..end].copy_from_slice(b);
        self.cursor = end;
    }

    pub(crate) fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    pub(crate) fn write_u32_le(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub(crate) fn write_i32_le(&mut self, v: i32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub(crate) fn write_f64_le(&mut self, v: f64) {
        self.write_bytes(&v.to_le_bytes());
    }

    /// Reads `len` bytes at the absolute offset `at` without moving the cursor.
    pub fn peek_bytes(&self, at: usize, len: usize) -> Result<&[u8], FormatError> {
        let end = at.checked_add(len).ok_or(FormatError::OutOfBounds)?;
        self.bytes.get(at..end).ok_or(FormatError::TruncatedInput {
            offset: at,
            needed: len,
        })
    }

    /// Reads a `u8` at the absolute offset `at` without moving the cursor.
    pub fn peek_u8(&self, at: usize) -> Result<u8, FormatError> {
        Ok(self.peek_bytes(at, 1)?[0])
    }

    /// Reads a little-endian `u32` at the absolute offset `at` without moving the cursor.
    pub fn peek_u32_le(&self, at: usize) -> Result<u32, FormatError> {
        let b = self.peek_bytes(at, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Overwrites already-written bytes at the absolute offset `at`.
    ///
    /// The cursor is saved and restored around the write, so this never disturbs sequential
    /// writing. Patching past the end of the buffer is an error.
    pub(crate) fn poke_bytes(&mut self, at: usize, b: &[u8]) -> Result<(), FormatError> {
        let end = at.checked_add(b.len()).ok_or(FormatError::OutOfBounds)?;
        if end > self.bytes.len() {
            return Err(FormatError::OutOfBounds);
        }
        let saved = self.cursor;
        self.cursor = at;
        self.write_bytes(b);
        self.cursor = saved;
        Ok(())
    }

    pub(crate) fn poke_u8(&mut self, at: usize, v: u8) -> Result<(), FormatError> {
        self.poke_bytes(at, &[v])
    }

    pub(crate) fn poke_u32_le(&mut self, at: usize, v: u32) -> Result<(), FormatError> {
        self.poke_bytes(at, &v.to_le_bytes())
    }
}

impl From<Vec<u8>> for CartBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::read_only(bytes)
    }
}
