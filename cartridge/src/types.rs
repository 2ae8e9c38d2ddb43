// Copyright 2026 the Cartridge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The closed set of wire types and the runtime values they carry.
//!
//! Every [`TypeKind`] fixes a wire width, a validity predicate ([`TypeKind::is_valid`]) and a
//! default value. Encoding and decoding are exact inverses for every value the predicate accepts.
//!
//! Wire encodings:
//! - `i32`/`u32`: 4 bytes, little-endian.
//! - `f64`: 8 bytes, little-endian IEEE-754 bits.
//! - `u8`: 1 byte.
//! - `bytes`/`string`: `u32` little-endian byte length, then the raw content (UTF-8 for strings).

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::format::{CartBuffer, FormatError};

/// A primitive wire type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TypeKind {
    /// A signed 32-bit integer.
    I32,
    /// An unsigned 32-bit integer.
    U32,
    /// A 64-bit float.
    #[cfg_attr(feature = "serde", serde(alias = "number"))]
    F64,
    /// An unsigned byte.
    #[cfg_attr(feature = "serde", serde(alias = "bool"))]
    U8,
    /// A length-prefixed byte string.
    Bytes,
    /// A length-prefixed UTF-8 string.
    String,
}

impl TypeKind {
    /// Every wire type, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::I32,
        Self::U32,
        Self::F64,
        Self::U8,
        Self::Bytes,
        Self::String,
    ];

    /// Returns the document spelling of this type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::F64 => "f64",
            Self::U8 => "u8",
            Self::Bytes => "bytes",
            Self::String => "string",
        }
    }

    /// Returns the encoded width for fixed-width types, or `None` for length-prefixed ones.
    #[must_use]
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            Self::I32 | Self::U32 => Some(4),
            Self::F64 => Some(8),
            Self::U8 => Some(1),
            Self::Bytes | Self::String => None,
        }
    }

    /// Returns `true` for the numeric types.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::I32 | Self::U32 | Self::F64 | Self::U8)
    }

    /// Returns the largest value of an unsigned integer type.
    ///
    /// Only unsigned integer types can hold chunk lengths and counters.
    #[must_use]
    pub const fn unsigned_max(self) -> Option<u64> {
        match self {
            Self::U8 => Some(u8::MAX as u64),
            Self::U32 => Some(u32::MAX as u64),
            _ => None,
        }
    }

    /// Returns the default value of this type: zero, or the empty string/bytes.
    #[must_use]
    pub fn default_value(self) -> Value {
        match self {
            Self::I32 => Value::I32(0),
            Self::U32 => Value::U32(0),
            Self::F64 => Value::F64(0.0),
            Self::U8 => Value::U8(0),
            Self::Bytes => Value::Bytes(Vec::new()),
            Self::String => Value::String(String::new()),
        }
    }

    /// Returns `true` if `value` can be encoded as this type without loss.
    #[must_use]
    pub fn is_valid(self, value: &Value) -> bool {
        self.coerce(value).is_some()
    }

    /// Converts `value` into this type's canonical [`Value`] variant.
    ///
    /// Numeric types accept any numeric value representable in the type (so `U8(7)` is a valid
    /// `i32` and `F64(2.0)` a valid `u32`, but `F64(2.5)` and `I32(-1)` are not valid `u32`s).
    /// `bytes` also accepts a string, taking its UTF-8 bytes. Returns `None` when the value is not
    /// valid for this type.
    #[must_use]
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match self {
            Self::I32 => integer_of(value)
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::I32),
            Self::U32 => integer_of(value)
                .and_then(|v| u32::try_from(v).ok())
                .map(Value::U32),
            Self::U8 => integer_of(value)
                .and_then(|v| u8::try_from(v).ok())
                .map(Value::U8),
            Self::F64 => match *value {
                Value::I32(v) => Some(Value::F64(f64::from(v))),
                Value::U32(v) => Some(Value::F64(f64::from(v))),
                Value::U8(v) => Some(Value::F64(f64::from(v))),
                Value::F64(v) => Some(Value::F64(v)),
                Value::Bytes(_) | Value::String(_) => None,
            },
            Self::Bytes => match value {
                Value::Bytes(b) => Some(Value::Bytes(b.clone())),
                Value::String(s) => Some(Value::Bytes(s.as_bytes().to_vec())),
                _ => None,
            },
            Self::String => match value {
                Value::String(s) => Some(Value::String(s.clone())),
                _ => None,
            },
        }
    }

    /// Encodes `value` as this type at the cursor of `out`.
    ///
    /// The value is validated (and its length checked) before anything is written, so a failed
    /// call leaves `out` untouched.
    pub fn encode(self, value: &Value, out: &mut CartBuffer) -> Result<(), ValueError> {
        let value = self
            .coerce(value)
            .ok_or(ValueError::Mismatch { expected: self })?;
        match value {
            Value::I32(v) => out.write_i32_le(v),
            Value::U32(v) => out.write_u32_le(v),
            Value::F64(v) => out.write_f64_le(v),
            Value::U8(v) => out.write_u8(v),
            Value::Bytes(b) => write_prefixed(out, &b)?,
            Value::String(s) => write_prefixed(out, s.as_bytes())?,
        }
        Ok(())
    }

    /// Decodes a value of this type at the cursor of `src`.
    pub fn decode(self, src: &mut CartBuffer) -> Result<Value, FormatError> {
        Ok(match self {
            Self::I32 => Value::I32(src.read_i32_le()?),
            Self::U32 => Value::U32(src.read_u32_le()?),
            Self::F64 => Value::F64(src.read_f64_le()?),
            Self::U8 => Value::U8(src.read_u8()?),
            Self::Bytes => {
                let len = read_len(src)?;
                Value::Bytes(src.read_bytes(len)?.to_vec())
            }
            Self::String => {
                let len = read_len(src)?;
                Value::String(String::from(src.read_str(len)?))
            }
        })
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encoding a single value failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueError {
    /// The value is not valid for the expected type.
    Mismatch {
        /// Expected type.
        expected: TypeKind,
    },
    /// A string or byte payload does not fit the `u32` length prefix.
    TooLong {
        /// Payload length in bytes.
        len: usize,
    },
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mismatch { expected } => write!(f, "expected a value of type {expected}"),
            Self::TooLong { len } => write!(f, "payload of {len} bytes exceeds the u32 length prefix"),
        }
    }
}

impl core::error::Error for ValueError {}

fn integer_of(value: &Value) -> Option<i64> {
    match *value {
        Value::I32(v) => Some(i64::from(v)),
        Value::U32(v) => Some(i64::from(v)),
        Value::U8(v) => Some(i64::from(v)),
        Value::F64(v) => float_to_integer(v),
        Value::Bytes(_) | Value::String(_) => None,
    }
}

#[allow(
    clippy::cast_possible_truncation,
    reason = "range and integrality are checked before the cast"
)]
fn float_to_integer(v: f64) -> Option<i64> {
    // Every i32/u32 lies well inside this range, where f64 represents integers exactly.
    const LIMIT: f64 = 9_007_199_254_740_992.0;
    if v.is_finite() && v % 1.0 == 0.0 && v.abs() <= LIMIT {
        Some(v as i64)
    } else {
        None
    }
}

fn write_prefixed(out: &mut CartBuffer, payload: &[u8]) -> Result<(), ValueError> {
    let len = u32::try_from(payload.len()).map_err(|_| ValueError::TooLong { len: payload.len() })?;
    out.write_u32_le(len);
    out.write_bytes(payload);
    Ok(())
}

fn read_len(src: &mut CartBuffer) -> Result<usize, FormatError> {
    let len = src.read_u32_le()?;
    usize::try_from(len).map_err(|_| FormatError::OutOfBounds)
}

/// A runtime value: an instruction argument, a decoded argument or a header constant.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A signed 32-bit integer.
    I32(i32),
    /// An unsigned 32-bit integer.
    U32(u32),
    /// A 64-bit float.
    F64(f64),
    /// An unsigned byte.
    U8(u8),
    /// A byte string.
    Bytes(Vec<u8>),
    /// A UTF-8 string.
    String(String),
}

impl Value {
    /// Returns the wire type this value naturally encodes as.
    #[must_use]
    pub fn kind(&self) -> TypeKind {
        match self {
            Self::I32(_) => TypeKind::I32,
            Self::U32(_) => TypeKind::U32,
            Self::F64(_) => TypeKind::F64,
            Self::U8(_) => TypeKind::U8,
            Self::Bytes(_) => TypeKind::Bytes,
            Self::String(_) => TypeKind::String,
        }
    }

    /// Returns this value as an integer, if it is an integer or an integral float.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        integer_of(self)
    }

    /// Returns this value as a float, if it is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match TypeKind::F64.coerce(self)? {
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the string content of a [`Value::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Formats the value the way disassembly prints arguments.
///
/// Integers print in decimal; floats use the shortest round-trip form (`5` for `5.0`); strings are
/// quoted and escaped; bytes print as `<hex>`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => {
                f.write_str("<")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                f.write_str(">")
            }
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Self::U8(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::U8(u8::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(String::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}
