// Copyright 2026 the Cartridge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cartridge encoder.
//!
//! An encode session is `set_target` → `emit*`/`alloc` → `finalize`:
//!
//! 1. [`Encoder::set_target`] writes the fixed header, zeroes every counter and reserves one
//!    placeholder per chunk, remembering its absolute offset.
//! 2. [`Encoder::emit`] type-checks the arguments, then writes the opcode byte and the arguments in
//!    declared order. Nothing is written unless every argument is valid.
//! 3. [`Encoder::finalize`] patches each placeholder with the number of bytes written after the
//!    last placeholder and hands the buffer back, rewound to where the header starts.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::format::{CartBuffer, FormatError};
use crate::spec::{FormatSpec, Instruction};
use crate::types::{TypeKind, Value, ValueError};

/// Encoding failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncodeError {
    /// The buffer passed to `set_target` cannot be written to.
    NoBuffer,
    /// No buffer is bound.
    NotBound,
    /// No instruction has this name or mnemonic.
    UnknownInstruction {
        /// The requested name.
        name: String,
    },
    /// No instruction has this opcode.
    UnknownOpcode {
        /// The requested opcode.
        opcode: u8,
    },
    /// No counter has this name.
    UnknownCounter {
        /// The requested name.
        name: String,
    },
    /// Wrong number of arguments.
    ArityMismatch {
        /// Instruction mnemonic.
        instruction: String,
        /// Declared argument count.
        expected: usize,
        /// Supplied argument count.
        actual: usize,
    },
    /// An argument failed its type's validity predicate.
    InvalidArgument {
        /// Instruction mnemonic.
        instruction: String,
        /// Argument name.
        name: String,
        /// Declared type.
        expected: TypeKind,
    },
    /// A string or byte argument does not fit the `u32` length prefix.
    LengthOverflow {
        /// Argument name.
        name: String,
        /// Payload length in bytes.
        len: usize,
    },
    /// A chunk grew past what its length field can hold.
    ChunkOverflow {
        /// Chunk name.
        chunk: String,
        /// Chunk body length in bytes.
        len: usize,
    },
    /// A counter is already at the maximum of its type.
    CounterOverflow {
        /// Counter name.
        name: String,
    },
    /// A positional write failed.
    Format(FormatError),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBuffer => write!(f, "cartridge encoding requires a growable buffer"),
            Self::NotBound => write!(f, "no cartridge buffer is bound"),
            Self::UnknownInstruction { name } => write!(f, "unknown instruction '{name}'"),
            Self::UnknownOpcode { opcode } => write!(f, "unknown opcode {opcode:#04x}"),
            Self::UnknownCounter { name } => write!(f, "unknown counter '{name}'"),
            Self::ArityMismatch {
                instruction,
                expected,
                actual,
            } => write!(
                f,
                "arity mismatch for {instruction}: expected {expected}, got {actual}"
            ),
            Self::InvalidArgument {
                instruction,
                name,
                expected,
            } => write!(
                f,
                "argument '{name}' of {instruction}: expected type of {expected}"
            ),
            Self::LengthOverflow { name, len } => {
                write!(f, "argument '{name}' is {len} bytes, longer than a u32 prefix allows")
            }
            Self::ChunkOverflow { chunk, len } => {
                write!(f, "chunk '{chunk}' is {len} bytes, too long for its length field")
            }
            Self::CounterOverflow { name } => write!(f, "counter '{name}' overflowed"),
            Self::Format(e) => write!(f, "encode error: {e}"),
        }
    }
}

impl core::error::Error for EncodeError {}

impl From<FormatError> for EncodeError {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}

#[derive(Copy, Clone, Debug)]
struct Placeholder {
    chunk: usize,
    offset: usize,
}

/// Writes cartridges described by a [`FormatSpec`].
#[derive(Debug)]
pub struct Encoder<'a> {
    spec: &'a FormatSpec,
    target: Option<CartBuffer>,
    start: usize,
    body_start: usize,
    counter_offsets: Vec<usize>,
    placeholders: Vec<Placeholder>,
    scratch: Vec<Value>,
}

impl<'a> Encoder<'a> {
    /// Creates an unbound encoder for `spec`.
    #[must_use]
    pub fn new(spec: &'a FormatSpec) -> Self {
        Self {
            spec,
            target: None,
            start: 0,
            body_start: 0,
            counter_offsets: Vec::with_capacity(spec.counters().len()),
            placeholders: Vec::with_capacity(spec.chunks().len()),
            scratch: Vec::new(),
        }
    }

    /// Returns the specification this encoder writes.
    #[must_use]
    pub fn spec(&self) -> &'a FormatSpec {
        self.spec
    }

    /// Returns `true` while a buffer is bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.target.is_some()
    }

    /// Returns the cursor of the bound buffer.
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        self.target.as_ref().map(CartBuffer::position)
    }

    /// Binds `buffer` and writes the header, counters and chunk placeholders at its cursor.
    ///
    /// Returns the previously bound buffer, unfinalized, if there was one. Fails with
    /// [`EncodeError::NoBuffer`] if `buffer` is read-only.
    pub fn set_target(&mut self, mut buffer: CartBuffer) -> Result<Option<CartBuffer>, EncodeError> {
        if !buffer.is_growable() {
            return Err(EncodeError::NoBuffer);
        }
        let start = buffer.position();

        for field in self.spec.header() {
            field
                .kind
                .encode(&field.value, &mut buffer)
                .map_err(|e| value_error(e, "header", &field.name))?;
        }

        self.counter_offsets.clear();
        for counter in self.spec.counters() {
            self.counter_offsets.push(buffer.position());
            write_zero(&mut buffer, counter.kind);
        }

        self.placeholders.clear();
        for (chunk, field) in self.spec.chunks().iter().enumerate() {
            let offset = buffer.position();
            write_zero(&mut buffer, field.kind);
            self.placeholders.push(Placeholder { chunk, offset });
        }
        self.start = start;
        self.body_start = buffer.position();

        tracing::debug!(
            start,
            header_len = buffer.position() - start,
            chunks = self.placeholders.len(),
            "bound cartridge encoder"
        );
        Ok(self.target.replace(buffer))
    }

    /// Emits the instruction called `name` (its declared name or its mnemonic).
    pub fn emit(&mut self, name: &str, args: &[Value]) -> Result<(), EncodeError> {
        if self.target.is_none() {
            return Err(EncodeError::NotBound);
        }
        let spec = self.spec;
        let instr = spec
            .instruction(name)
            .ok_or_else(|| EncodeError::UnknownInstruction {
                name: String::from(name),
            })?;
        self.emit_instruction(instr, args)
    }

    /// Emits the instruction with the given opcode.
    pub fn emit_opcode(&mut self, opcode: u8, args: &[Value]) -> Result<(), EncodeError> {
        if self.target.is_none() {
            return Err(EncodeError::NotBound);
        }
        let spec = self.spec;
        let instr = spec
            .instruction_by_opcode(opcode)
            .ok_or(EncodeError::UnknownOpcode { opcode })?;
        self.emit_instruction(instr, args)
    }

    fn emit_instruction(&mut self, instr: &Instruction, args: &[Value]) -> Result<(), EncodeError> {
        let buffer = self.target.as_mut().ok_or(EncodeError::NotBound)?;
        if args.len() != instr.args.len() {
            return Err(EncodeError::ArityMismatch {
                instruction: instr.mnemonic.clone(),
                expected: instr.args.len(),
                actual: args.len(),
            });
        }

        // Validate everything up front so a rejected emit leaves no partial instruction behind.
        self.scratch.clear();
        for (arg, field) in args.iter().zip(&instr.args) {
            let value = field
                .kind
                .coerce(arg)
                .ok_or_else(|| EncodeError::InvalidArgument {
                    instruction: instr.mnemonic.clone(),
                    name: field.name.clone(),
                    expected: field.kind,
                })?;
            let payload_len = match &value {
                Value::Bytes(b) => b.len(),
                Value::String(s) => s.len(),
                _ => 0,
            };
            if u32::try_from(payload_len).is_err() {
                return Err(EncodeError::LengthOverflow {
                    name: field.name.clone(),
                    len: payload_len,
                });
            }
            self.scratch.push(value);
        }

        buffer.write_u8(instr.opcode);
        for (value, field) in self.scratch.iter().zip(&instr.args) {
            field
                .kind
                .encode(value, buffer)
                .map_err(|e| value_error(e, &instr.mnemonic, &field.name))?;
        }
        tracing::trace!(opcode = instr.opcode, mnemonic = %instr.mnemonic, "emitted instruction");
        Ok(())
    }

    /// Returns the current value of the counter called `name` and increments it in place.
    ///
    /// This is how a producer hands out sequential ids (for example local variable slots) whose
    /// total is recorded in the header.
    pub fn alloc(&mut self, name: &str) -> Result<u64, EncodeError> {
        let buffer = self.target.as_mut().ok_or(EncodeError::NotBound)?;
        let ix = self
            .spec
            .counter_index(name)
            .ok_or_else(|| EncodeError::UnknownCounter {
                name: String::from(name),
            })?;
        let kind = self.spec.counters()[ix].kind;
        let offset = self.counter_offsets[ix];

        let current = match kind {
            TypeKind::U8 => u64::from(buffer.peek_u8(offset)?),
            _ => u64::from(buffer.peek_u32_le(offset)?),
        };
        let next = current + 1;
        if kind.unsigned_max().is_none_or(|max| next > max) {
            return Err(EncodeError::CounterOverflow {
                name: String::from(name),
            });
        }
        poke_unsigned(buffer, kind, offset, next)?;
        Ok(current)
    }

    /// Patches every chunk placeholder with its body length, then unbinds and returns the buffer.
    ///
    /// A chunk's body is everything written after the last placeholder, so every chunk of a
    /// session records the same length. The returned buffer's cursor is at the start of the
    /// header, ready to be handed to a [`Decoder`](crate::decoder::Decoder). Calling `finalize`
    /// again without a new [`Encoder::set_target`] fails with [`EncodeError::NotBound`].
    pub fn finalize(&mut self) -> Result<CartBuffer, EncodeError> {
        let end = self
            .target
            .as_ref()
            .ok_or(EncodeError::NotBound)?
            .position();

        let mut patches: Vec<(usize, TypeKind, u64)> = Vec::with_capacity(self.placeholders.len());
        for p in &self.placeholders {
            let field = &self.spec.chunks()[p.chunk];
            let len = end.saturating_sub(self.body_start);
            let fits = u64::try_from(len)
                .ok()
                .filter(|&len| field.kind.unsigned_max().is_some_and(|max| len <= max));
            let Some(len) = fits else {
                return Err(EncodeError::ChunkOverflow {
                    chunk: field.name.clone(),
                    len,
                });
            };
            patches.push((p.offset, field.kind, len));
        }

        let Some(mut buffer) = self.target.take() else {
            return Err(EncodeError::NotBound);
        };
        for (offset, kind, len) in patches {
            poke_unsigned(&mut buffer, kind, offset, len)?;
        }
        buffer.seek(self.start)?;
        self.placeholders.clear();
        self.counter_offsets.clear();

        tracing::debug!(len = buffer.len(), "finalized cartridge");
        Ok(buffer)
    }
}

fn write_zero(buffer: &mut CartBuffer, kind: TypeKind) {
    match kind {
        TypeKind::U8 => buffer.write_u8(0),
        _ => buffer.write_u32_le(0),
    }
}

/// Positional write of a chunk length or counter; `v` has been range-checked against `kind`.
fn poke_unsigned(
    buffer: &mut CartBuffer,
    kind: TypeKind,
    offset: usize,
    v: u64,
) -> Result<(), EncodeError> {
    match kind {
        TypeKind::U8 => {
            let v = u8::try_from(v).map_err(|_| FormatError::OutOfBounds)?;
            buffer.poke_u8(offset, v)?;
        }
        _ => {
            let v = u32::try_from(v).map_err(|_| FormatError::OutOfBounds)?;
            buffer.poke_u32_le(offset, v)?;
        }
    }
    Ok(())
}

fn value_error(e: ValueError, instruction: &str, name: &str) -> EncodeError {
    match e {
        ValueError::Mismatch { expected } => EncodeError::InvalidArgument {
            instruction: String::from(instruction),
            name: String::from(name),
            expected,
        },
        ValueError::TooLong { len } => EncodeError::LengthOverflow {
            name: String::from(name),
            len,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;
    use crate::spec::{FormatDocument, InstructionDef};
    use alloc::vec;

    fn spec() -> FormatSpec {
        FormatSpec::load(
            FormatDocument::new()
                .header("magic", TypeKind::U32, 0xC0DE_u32)
                .counter("refs", TypeKind::U32)
                .chunk("code", TypeKind::U32)
                .instruction(InstructionDef::new("push const").arg("value", TypeKind::F64))
                .instruction(InstructionDef::new("add"))
                .instruction(
                    InstructionDef::new("store")
                        .arg("slot", TypeKind::U32)
                        .arg("name", TypeKind::String),
                ),
        )
        .unwrap()
    }

    #[test]
    fn header_counters_and_placeholders_are_written_on_bind() {
        let spec = spec();
        let mut enc = Encoder::new(&spec);
        assert!(enc.set_target(CartBuffer::new()).unwrap().is_none());
        assert_eq!(enc.position(), Some(12));
        let buf = enc.finalize().unwrap();
        assert_eq!(
            buf.as_slice(),
            &[0xDE, 0xC0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn emit_writes_opcode_then_args_and_finalize_patches_length() {
        let spec = spec();
        let mut enc = Encoder::new(&spec);
        enc.set_target(CartBuffer::new()).unwrap();
        enc.emit("push const", &[Value::F64(5.0)]).unwrap();
        enc.emit("ADD", &[]).unwrap();
        let buf = enc.finalize().unwrap();

        let bytes = buf.as_slice();
        assert_eq!(bytes.len(), 12 + 9 + 1);
        assert_eq!(bytes[12], 0);
        assert_eq!(&bytes[13..21], &5.0_f64.to_le_bytes());
        assert_eq!(bytes[21], 1);
        // 10 bytes of instructions follow the placeholder.
        assert_eq!(buf.peek_u32_le(8).unwrap(), 10);
    }

    #[test]
    fn invalid_argument_writes_nothing() {
        let spec = spec();
        let mut enc = Encoder::new(&spec);
        enc.set_target(CartBuffer::new()).unwrap();
        let before = enc.position();

        let err = enc
            .emit("store", &[Value::U32(1), Value::U32(2)])
            .unwrap_err();
        assert_eq!(
            err,
            EncodeError::InvalidArgument {
                instruction: "STORE".into(),
                name: "name".into(),
                expected: TypeKind::String,
            }
        );
        assert_eq!(enc.position(), before);

        let err = enc.emit("push const", &[Value::from("5")]).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidArgument { .. }));
        assert_eq!(enc.position(), before);
    }

    #[test]
    fn arity_and_name_errors() {
        let spec = spec();
        let mut enc = Encoder::new(&spec);
        enc.set_target(CartBuffer::new()).unwrap();
        assert_eq!(
            enc.emit("add", &[Value::U8(1)]),
            Err(EncodeError::ArityMismatch {
                instruction: "ADD".into(),
                expected: 0,
                actual: 1,
            })
        );
        assert_eq!(
            enc.emit("mul", &[]),
            Err(EncodeError::UnknownInstruction { name: "mul".into() })
        );
        assert_eq!(
            enc.emit_opcode(9, &[]),
            Err(EncodeError::UnknownOpcode { opcode: 9 })
        );
        enc.emit_opcode(1, &[]).unwrap();
    }

    #[test]
    fn unbound_and_read_only_buffers() {
        let spec = spec();
        let mut enc = Encoder::new(&spec);
        assert_eq!(enc.emit("add", &[]), Err(EncodeError::NotBound));
        assert_eq!(enc.alloc("refs"), Err(EncodeError::NotBound));
        assert!(matches!(enc.finalize(), Err(EncodeError::NotBound)));
        assert_eq!(
            enc.set_target(CartBuffer::read_only(vec![])),
            Err(EncodeError::NoBuffer)
        );
        assert!(!enc.is_bound());
    }

    #[test]
    fn finalize_twice_is_not_bound() {
        let spec = spec();
        let mut enc = Encoder::new(&spec);
        enc.set_target(CartBuffer::new()).unwrap();
        enc.finalize().unwrap();
        assert!(matches!(enc.finalize(), Err(EncodeError::NotBound)));
        assert_eq!(enc.emit("add", &[]), Err(EncodeError::NotBound));
    }

    #[test]
    fn alloc_increments_the_counter_in_place() {
        let spec = spec();
        let mut enc = Encoder::new(&spec);
        enc.set_target(CartBuffer::new()).unwrap();
        assert_eq!(enc.alloc("refs").unwrap(), 0);
        enc.emit("add", &[]).unwrap();
        assert_eq!(enc.alloc("refs").unwrap(), 1);
        assert_eq!(enc.alloc("refs").unwrap(), 2);
        assert_eq!(
            enc.alloc("locals"),
            Err(EncodeError::UnknownCounter {
                name: "locals".into()
            })
        );
        let buf = enc.finalize().unwrap();
        assert_eq!(buf.peek_u32_le(4).unwrap(), 3);
    }

    #[test]
    fn u8_counter_overflows() {
        let spec = FormatSpec::load(FormatDocument::new().counter("ids", TypeKind::U8)).unwrap();
        let mut enc = Encoder::new(&spec);
        enc.set_target(CartBuffer::new()).unwrap();
        for i in 0..255 {
            assert_eq!(enc.alloc("ids").unwrap(), i);
        }
        assert_eq!(
            enc.alloc("ids"),
            Err(EncodeError::CounterOverflow { name: "ids".into() })
        );
    }

    #[test]
    fn u8_chunk_overflow_is_reported_and_buffer_stays_bound() {
        let spec = FormatSpec::load(
            FormatDocument::new()
                .chunk("code", TypeKind::U8)
                .instruction(InstructionDef::new("blob").arg("data", TypeKind::Bytes)),
        )
        .unwrap();
        let mut enc = Encoder::new(&spec);
        enc.set_target(CartBuffer::new()).unwrap();
        enc.emit("blob", &[Value::Bytes(vec![0; 300])]).unwrap();
        assert_eq!(
            enc.finalize(),
            Err(EncodeError::ChunkOverflow {
                chunk: "code".into(),
                len: 305,
            })
        );
        assert!(enc.is_bound());
    }

    #[test]
    fn set_target_appends_after_existing_cursor() {
        let spec = spec();
        let mut enc = Encoder::new(&spec);
        let mut first = CartBuffer::new();
        first.write_bytes(b"xy");
        enc.set_target(first).unwrap();
        enc.emit("add", &[]).unwrap();
        let buf = enc.finalize().unwrap();
        assert_eq!(buf.position(), 2);
        assert_eq!(&buf.as_slice()[..2], b"xy");
        assert_eq!(buf.peek_u32_le(2).unwrap(), 0xC0DE);
        assert_eq!(buf.peek_u32_le(10).unwrap(), 1);
    }

    #[test]
    fn finalized_buffer_decodes_without_rewinding() {
        let spec = FormatSpec::load(
            FormatDocument::new()
                .header("magic", TypeKind::U32, 7_u32)
                .instruction(InstructionDef::new("nop")),
        )
        .unwrap();
        let mut enc = Encoder::new(&spec);
        enc.set_target(CartBuffer::new()).unwrap();
        enc.emit("nop", &[]).unwrap();
        let buf = enc.finalize().unwrap();
        assert_eq!(buf.position(), 0);

        let mut dec = Decoder::new(&spec);
        dec.set_target(buf).unwrap();
        assert_eq!(dec.header().unwrap().field("magic"), Some(&Value::U32(7)));
        assert_eq!(dec.decode_one().unwrap().instruction.name, "nop");
        assert!(dec.is_finished());
    }

    #[test]
    fn every_chunk_counts_the_bytes_after_the_placeholders() {
        let spec = FormatSpec::load(
            FormatDocument::new()
                .chunk("code", TypeKind::U32)
                .chunk("data", TypeKind::U8)
                .instruction(InstructionDef::new("nop")),
        )
        .unwrap();
        let mut enc = Encoder::new(&spec);
        enc.set_target(CartBuffer::new()).unwrap();
        for _ in 0..3 {
            enc.emit("nop", &[]).unwrap();
        }
        let buf = enc.finalize().unwrap();
        assert_eq!(buf.len(), 5 + 3);
        assert_eq!(buf.peek_u32_le(0).unwrap(), 3);
        assert_eq!(buf.peek_u8(4).unwrap(), 3);

        let mut dec = Decoder::new(&spec);
        dec.set_target(buf).unwrap();
        let header = dec.header().unwrap();
        assert_eq!(header.chunk_len("code"), Some(3));
        assert_eq!(header.chunk_len("data"), Some(3));
        assert_eq!(header.body_start, 5);
    }

    #[test]
    fn rebinding_returns_the_unfinished_buffer() {
        let spec = spec();
        let mut enc = Encoder::new(&spec);
        enc.set_target(CartBuffer::new()).unwrap();
        enc.emit("add", &[]).unwrap();
        let prev = enc.set_target(CartBuffer::new()).unwrap().unwrap();
        assert_eq!(prev.len(), 13);
    }
}
