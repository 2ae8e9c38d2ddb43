// Copyright 2026 the Cartridge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cartridge decoder.
//!
//! [`Decoder::set_target`] validates the header of a bound buffer and reports counters and chunk
//! lengths through a [`HeaderInfo`]. After that, each [`Decoder::step`] decodes exactly one
//! instruction and hands its arguments to the handler installed for its opcode (opcodes without a
//! handler are decoded and skipped). The decoder never loops by itself:
//!
//! ```
//! # use cartridge::decoder::Decoder;
//! # use cartridge::encoder::Encoder;
//! # use cartridge::format::CartBuffer;
//! # use cartridge::spec::{FormatDocument, FormatSpec, InstructionDef};
//! # use cartridge::types::{TypeKind, Value};
//! let spec = FormatSpec::load(
//!     FormatDocument::new().instruction(InstructionDef::new("push").arg("v", TypeKind::I32)),
//! )?;
//! let mut enc = Encoder::new(&spec);
//! enc.set_target(CartBuffer::new())?;
//! enc.emit("push", &[Value::I32(7)])?;
//! let buffer = enc.finalize()?;
//!
//! let mut sum = 0;
//! let mut dec = Decoder::new(&spec);
//! dec.on_instruction("push", |args: &[Value]| sum += args[0].as_i64().unwrap_or(0))?;
//! dec.set_target(buffer)?;
//! while !dec.is_finished() {
//!     dec.step()?;
//! }
//! drop(dec);
//! assert_eq!(sum, 7);
//! # Ok::<(), Box<dyn core::error::Error>>(())
//! ```

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::format::{CartBuffer, FormatError};
use crate::spec::{Field, FormatSpec, Instruction};
use crate::types::{TypeKind, Value};

/// Decoding failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// No buffer is bound, or the bound buffer failed header validation.
    NotBound,
    /// A header field did not match its fixed value, or the header was truncated.
    CorruptHeader {
        /// Name of the first field that failed.
        field: String,
    },
    /// The opcode byte is not assigned to any instruction.
    UnknownOpcode {
        /// The offending byte.
        opcode: u8,
    },
    /// No instruction has this name or mnemonic.
    UnknownInstruction {
        /// The requested name.
        name: String,
    },
    /// An instruction's arguments could not be read.
    Format(FormatError),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotBound => write!(f, "no valid cartridge buffer is bound"),
            Self::CorruptHeader { field } => write!(f, "corrupt header field '{field}'"),
            Self::UnknownOpcode { opcode } => write!(f, "unknown opcode {opcode:#04x}"),
            Self::UnknownInstruction { name } => write!(f, "unknown instruction '{name}'"),
            Self::Format(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl core::error::Error for DecodeError {}

impl From<FormatError> for DecodeError {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}

/// A named unsigned metadata slot read from the header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    /// Counter or chunk name.
    pub name: String,
    /// Stored value.
    pub value: u64,
}

/// Header metadata read by [`Decoder::set_target`].
#[derive(Clone, Debug, PartialEq)]
pub struct HeaderInfo {
    /// Offset of the first header byte.
    pub start: usize,
    /// Offset of the first instruction.
    pub body_start: usize,
    /// Header fields as read (each equal to its fixed value).
    pub fields: Vec<(String, Value)>,
    /// Counter values.
    pub counters: Vec<Slot>,
    /// Chunk body lengths.
    pub chunks: Vec<Slot>,
}

impl HeaderInfo {
    /// Returns the value of the header field called `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Returns the value of the counter called `name`.
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<u64> {
        find_slot(&self.counters, name)
    }

    /// Returns the body length of the chunk called `name`.
    #[must_use]
    pub fn chunk_len(&self, name: &str) -> Option<u64> {
        find_slot(&self.chunks, name)
    }
}

fn find_slot(slots: &[Slot], name: &str) -> Option<u64> {
    slots.iter().find(|s| s.name == name).map(|s| s.value)
}

/// One decoded instruction, as returned by [`Decoder::decode_one`].
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedInstruction<'a> {
    /// Offset of the opcode byte.
    pub offset: usize,
    /// The opcode byte.
    pub opcode: u8,
    /// The instruction this opcode is assigned to.
    pub instruction: &'a Instruction,
    /// Arguments in declared order.
    pub args: Vec<Value>,
}

type Handler<'a> = Box<dyn FnMut(&[Value]) + 'a>;
type HeaderHandler<'a> = Box<dyn FnMut(&HeaderInfo) + 'a>;

/// Reads cartridges described by a [`FormatSpec`] and dispatches instructions to handlers.
pub struct Decoder<'a> {
    spec: &'a FormatSpec,
    readers: Vec<Option<&'a Instruction>>,
    handlers: Vec<Option<Handler<'a>>>,
    header_handler: Option<HeaderHandler<'a>>,
    target: Option<CartBuffer>,
    header: Option<HeaderInfo>,
    args: Vec<Value>,
}

impl fmt::Debug for Decoder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("opcode_count", &self.readers.len())
            .field(
                "handlers",
                &self.handlers.iter().filter(|h| h.is_some()).count(),
            )
            .field("position", &self.position())
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl<'a> Decoder<'a> {
    /// Creates an unbound decoder for `spec` with no handlers installed.
    #[must_use]
    pub fn new(spec: &'a FormatSpec) -> Self {
        let count = spec.opcode_count();
        let mut readers = alloc::vec![None; count];
        for instr in spec.instructions() {
            readers[usize::from(instr.opcode)] = Some(instr);
        }
        let mut handlers = Vec::with_capacity(count);
        handlers.resize_with(count, || None);
        Self {
            spec,
            readers,
            handlers,
            header_handler: None,
            target: None,
            header: None,
            args: Vec::new(),
        }
    }

    /// Returns the specification this decoder reads.
    #[must_use]
    pub fn spec(&self) -> &'a FormatSpec {
        self.spec
    }

    /// Installs the handler invoked with the header metadata on every successful `set_target`.
    pub fn on_header(&mut self, handler: impl FnMut(&HeaderInfo) + 'a) {
        self.header_handler = Some(Box::new(handler));
    }

    /// Installs the handler for the instruction called `name` (its declared name or mnemonic).
    pub fn on_instruction(
        &mut self,
        name: &str,
        handler: impl FnMut(&[Value]) + 'a,
    ) -> Result<(), DecodeError> {
        let opcode = self
            .spec
            .instruction(name)
            .ok_or_else(|| DecodeError::UnknownInstruction {
                name: String::from(name),
            })?
            .opcode;
        self.install(opcode, Box::new(handler));
        Ok(())
    }

    /// Installs the handler for `opcode`.
    pub fn on_opcode(
        &mut self,
        opcode: u8,
        handler: impl FnMut(&[Value]) + 'a,
    ) -> Result<(), DecodeError> {
        if self.reader(opcode).is_none() {
            return Err(DecodeError::UnknownOpcode { opcode });
        }
        self.install(opcode, Box::new(handler));
        Ok(())
    }

    /// Removes the handler for `opcode`; its instructions are then decoded and skipped.
    pub fn clear_handler(&mut self, opcode: u8) {
        if let Some(slot) = self.handlers.get_mut(usize::from(opcode)) {
            *slot = None;
        }
    }

    /// Installs a handler for an opcode known to be assigned.
    pub(crate) fn install(&mut self, opcode: u8, handler: Handler<'a>) {
        if let Some(slot) = self.handlers.get_mut(usize::from(opcode)) {
            *slot = Some(handler);
        }
    }

    fn reader(&self, opcode: u8) -> Option<&'a Instruction> {
        self.readers.get(usize::from(opcode)).copied().flatten()
    }

    /// Binds `buffer` and validates the header at its cursor.
    ///
    /// Any previously bound buffer is dropped; use [`Decoder::take_target`] first to keep it. On a
    /// header mismatch the cursor is reset to where the header started and the buffer stays held
    /// (recoverable with `take_target`) but [`Decoder::step`] reports [`DecodeError::NotBound`].
    pub fn set_target(&mut self, mut buffer: CartBuffer) -> Result<(), DecodeError> {
        self.header = None;
        let start = buffer.position();
        let parsed = read_header(self.spec, &mut buffer, start);
        if parsed.is_err() {
            // `start` came from the buffer itself, so seeking back cannot fail.
            let _ = buffer.seek(start);
        }
        self.target = Some(buffer);
        let info = parsed?;

        tracing::debug!(
            start,
            body_start = info.body_start,
            counters = info.counters.len(),
            chunks = info.chunks.len(),
            "validated cartridge header"
        );
        if let Some(handler) = self.header_handler.as_mut() {
            handler(&info);
        }
        self.header = Some(info);
        Ok(())
    }

    /// Returns the metadata of the bound buffer's header.
    #[must_use]
    pub fn header(&self) -> Option<&HeaderInfo> {
        self.header.as_ref()
    }

    /// Returns the cursor of the bound buffer.
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        self.target.as_ref().map(CartBuffer::position)
    }

    /// Returns `true` when there is nothing left to step through.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match (&self.target, &self.header) {
            (Some(buffer), Some(_)) => buffer.remaining() == 0,
            _ => true,
        }
    }

    /// Unbinds and returns the buffer.
    pub fn take_target(&mut self) -> Option<CartBuffer> {
        self.header = None;
        self.target.take()
    }

    /// Decodes one instruction and invokes its handler, if one is installed.
    ///
    /// A failed step consumes nothing: the cursor stays on the offending opcode byte.
    pub fn step(&mut self) -> Result<(), DecodeError> {
        let instr = self.read_instruction()?;
        if let Some(Some(handler)) = self.handlers.get_mut(usize::from(instr.opcode)) {
            handler(&self.args);
        }
        Ok(())
    }

    /// Decodes one instruction without dispatching it.
    pub fn decode_one(&mut self) -> Result<DecodedInstruction<'a>, DecodeError> {
        let offset = self.position().ok_or(DecodeError::NotBound)?;
        let instruction = self.read_instruction()?;
        Ok(DecodedInstruction {
            offset,
            opcode: instruction.opcode,
            instruction,
            args: core::mem::take(&mut self.args),
        })
    }

    /// Reads the instruction at the cursor into `self.args`.
    fn read_instruction(&mut self) -> Result<&'a Instruction, DecodeError> {
        if self.header.is_none() {
            return Err(DecodeError::NotBound);
        }
        let readers = &self.readers;
        let args = &mut self.args;
        let buffer = self.target.as_mut().ok_or(DecodeError::NotBound)?;
        let offset = buffer.position();

        let result = read_one(readers, args, buffer);

        match result {
            Ok(instr) => {
                tracing::trace!(
                    offset,
                    opcode = instr.opcode,
                    mnemonic = %instr.mnemonic,
                    "decoded instruction"
                );
                Ok(instr)
            }
            Err(e) => {
                let _ = buffer.seek(offset);
                Err(e)
            }
        }
    }
}

fn read_one<'a>(
    readers: &[Option<&'a Instruction>],
    args: &mut Vec<Value>,
    buffer: &mut CartBuffer,
) -> Result<&'a Instruction, DecodeError> {
    let opcode = buffer.read_u8()?;
    let instr = readers
        .get(usize::from(opcode))
        .copied()
        .flatten()
        .ok_or(DecodeError::UnknownOpcode { opcode })?;
    args.clear();
    for field in &instr.args {
        args.push(field.kind.decode(buffer)?);
    }
    Ok(instr)
}

/// Header constants compare bitwise for `f64`, so NaN and signed zeros match exactly.
fn same_constant(decoded: &Value, expected: &Value) -> bool {
    match (decoded, expected) {
        (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
        _ => decoded == expected,
    }
}

fn read_header(
    spec: &FormatSpec,
    buffer: &mut CartBuffer,
    start: usize,
) -> Result<HeaderInfo, DecodeError> {
    let corrupt = |name: &str| DecodeError::CorruptHeader {
        field: String::from(name),
    };

    let mut fields = Vec::with_capacity(spec.header().len());
    for field in spec.header() {
        let value = field
            .kind
            .decode(buffer)
            .map_err(|_| corrupt(&field.name))?;
        if !same_constant(&value, &field.value) {
            tracing::debug!(field = %field.name, "header field mismatch");
            return Err(corrupt(&field.name));
        }
        fields.push((field.name.clone(), value));
    }

    let mut read_slots = |defs: &[Field]| -> Result<Vec<Slot>, DecodeError> {
        defs.iter()
            .map(|def| {
                let value = match def.kind {
                    TypeKind::U8 => buffer.read_u8().map(u64::from),
                    _ => buffer.read_u32_le().map(u64::from),
                }
                .map_err(|_| corrupt(&def.name))?;
                Ok(Slot {
                    name: def.name.clone(),
                    value,
                })
            })
            .collect()
    };
    let counters = read_slots(spec.counters())?;
    let chunks = read_slots(spec.chunks())?;

    Ok(HeaderInfo {
        start,
        body_start: buffer.position(),
        fields,
        counters,
        chunks,
    })
}
