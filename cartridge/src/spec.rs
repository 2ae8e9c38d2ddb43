// Copyright 2026 the Cartridge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Format specifications.
//!
//! A [`FormatDocument`] is the declarative description of a cartridge format: fixed header fields,
//! counters, chunks, common arguments and the instruction set. Loading a document with
//! [`FormatSpec::load`] merges common arguments into every instruction, assigns opcodes and
//! validates the result. Only a validated [`FormatSpec`] can parametrize an encoder or decoder, so
//! one specification always yields both halves of the codec.
//!
//! Opcode assignment: instructions with an explicit `code` claim it first; the remaining
//! instructions are numbered sequentially from `0` in declaration order, skipping claimed values.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::{HashMap, HashSet};

use crate::types::{TypeKind, Value};

/// A literal header value as written in a format document.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Literal {
    /// An integer literal.
    Int(i64),
    /// A floating-point literal.
    Float(f64),
    /// A string literal.
    Str(String),
    /// A byte-array literal.
    Bytes(Vec<u8>),
}

impl Literal {
    /// Converts this literal into a value of type `kind`, if it is representable.
    #[must_use]
    pub fn to_value(&self, kind: TypeKind) -> Option<Value> {
        match self {
            Self::Int(v) => match kind {
                TypeKind::I32 => i32::try_from(*v).ok().map(Value::I32),
                TypeKind::U32 => u32::try_from(*v).ok().map(Value::U32),
                TypeKind::U8 => u8::try_from(*v).ok().map(Value::U8),
                TypeKind::F64 => exact_float(*v).map(Value::F64),
                TypeKind::Bytes | TypeKind::String => None,
            },
            Self::Float(v) => kind.coerce(&Value::F64(*v)),
            Self::Str(s) => kind.coerce(&Value::String(s.clone())),
            Self::Bytes(b) => kind.coerce(&Value::Bytes(b.clone())),
        }
    }
}

#[allow(
    clippy::cast_precision_loss,
    reason = "magnitude is checked against the exactly representable range"
)]
fn exact_float(v: i64) -> Option<f64> {
    const LIMIT: u64 = 1 << 53;
    (v.unsigned_abs() <= LIMIT).then_some(v as f64)
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Literal {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Self::Str(String::from(v))
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// A named, typed field: an argument, a counter or a chunk length.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Wire type.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: TypeKind,
}

impl FieldDef {
    /// Creates a field definition.
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A header field with its fixed value.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct HeaderFieldDef {
    /// Field name.
    pub name: String,
    /// Wire type.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: TypeKind,
    /// The constant written at encode time and expected at decode time.
    pub value: Literal,
}

/// An instruction definition.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct InstructionDef {
    /// Instruction name (words separated by spaces or underscores).
    pub name: String,
    /// Explicit opcode; sequentially assigned when absent.
    #[cfg_attr(feature = "serde", serde(default))]
    pub code: Option<u32>,
    /// Human-readable description.
    #[cfg_attr(feature = "serde", serde(default, rename = "desc"))]
    pub doc: Option<String>,
    /// Instruction-specific arguments, in wire order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub args: Vec<FieldDef>,
}

impl InstructionDef {
    /// Creates an instruction with no arguments and a sequentially assigned opcode.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: None,
            doc: None,
            args: Vec::new(),
        }
    }

    /// Sets an explicit opcode.
    #[must_use]
    pub fn code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, kind: TypeKind) -> Self {
        self.args.push(FieldDef::new(name, kind));
        self
    }
}

/// The declarative description of a cartridge format.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct FormatDocument {
    /// Fixed header fields, in wire order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub header: Vec<HeaderFieldDef>,
    /// Zero-initialized counters written after the header.
    #[cfg_attr(feature = "serde", serde(default))]
    pub counters: Vec<FieldDef>,
    /// Chunks whose lengths are backpatched at finalize time.
    #[cfg_attr(feature = "serde", serde(default))]
    pub chunks: Vec<FieldDef>,
    /// Arguments appended to every instruction.
    #[cfg_attr(feature = "serde", serde(default))]
    pub common_args: Vec<FieldDef>,
    /// The instruction set.
    #[cfg_attr(feature = "serde", serde(default))]
    pub instructions: Vec<InstructionDef>,
}

impl FormatDocument {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fixed header field.
    #[must_use]
    pub fn header(
        mut self,
        name: impl Into<String>,
        kind: TypeKind,
        value: impl Into<Literal>,
    ) -> Self {
        self.header.push(HeaderFieldDef {
            name: name.into(),
            kind,
            value: value.into(),
        });
        self
    }

    /// Appends a counter.
    #[must_use]
    pub fn counter(mut self, name: impl Into<String>, kind: TypeKind) -> Self {
        self.counters.push(FieldDef::new(name, kind));
        self
    }

    /// Appends a chunk.
    #[must_use]
    pub fn chunk(mut self, name: impl Into<String>, kind: TypeKind) -> Self {
        self.chunks.push(FieldDef::new(name, kind));
        self
    }

    /// Appends a common argument.
    #[must_use]
    pub fn common_arg(mut self, name: impl Into<String>, kind: TypeKind) -> Self {
        self.common_args.push(FieldDef::new(name, kind));
        self
    }

    /// Appends an instruction.
    #[must_use]
    pub fn instruction(mut self, instr: InstructionDef) -> Self {
        self.instructions.push(instr);
        self
    }
}

/// A format document failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpecError {
    /// Two instructions share an opcode.
    DuplicateOpcode {
        /// The contested opcode.
        opcode: u32,
        /// The instruction that claimed it first.
        first: String,
        /// The instruction that collided with it.
        second: String,
    },
    /// Two instructions, counters or chunks share a name (or instruction mnemonic).
    DuplicateName {
        /// The repeated name.
        name: String,
    },
    /// An instruction declares two arguments with the same name.
    DuplicateArg {
        /// Instruction name.
        instruction: String,
        /// The repeated argument name.
        arg: String,
    },
    /// A name is not a valid identifier.
    InvalidIdentifier {
        /// The offending name.
        name: String,
    },
    /// A header field's value is not valid for its declared type.
    InvalidHeaderValue {
        /// Header field name.
        field: String,
        /// Declared type.
        kind: TypeKind,
    },
    /// A counter or chunk is declared with a non-unsigned-integer type.
    InvalidFieldType {
        /// Counter or chunk name.
        field: String,
        /// Declared type.
        kind: TypeKind,
    },
    /// An opcode does not fit the one-byte opcode field.
    OpcodeOutOfRange {
        /// Instruction name.
        instruction: String,
        /// The explicit or assigned opcode.
        opcode: u32,
    },
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateOpcode {
                opcode,
                first,
                second,
            } => write!(
                f,
                "duplicate opcode {opcode:#04x}: '{first}' and '{second}'"
            ),
            Self::DuplicateName { name } => write!(f, "duplicate name '{name}'"),
            Self::DuplicateArg { instruction, arg } => {
                write!(f, "duplicate argument '{arg}' in instruction '{instruction}'")
            }
            Self::InvalidIdentifier { name } => write!(f, "invalid identifier '{name}'"),
            Self::InvalidHeaderValue { field, kind } => {
                write!(f, "header field '{field}' has a value that is not a valid {kind}")
            }
            Self::InvalidFieldType { field, kind } => write!(
                f,
                "field '{field}' must be an unsigned integer type, got {kind}"
            ),
            Self::OpcodeOutOfRange {
                instruction,
                opcode,
            } => write!(
                f,
                "opcode {opcode} of instruction '{instruction}' does not fit in a byte"
            ),
        }
    }
}

impl core::error::Error for SpecError {}

/// A validated named field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Wire type.
    pub kind: TypeKind,
}

/// A validated header field.
#[derive(Clone, Debug, PartialEq)]
pub struct HeaderField {
    /// Field name.
    pub name: String,
    /// Wire type.
    pub kind: TypeKind,
    /// Expected constant, already normalized to `kind`.
    pub value: Value,
}

/// A validated instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// Instruction name as declared.
    pub name: String,
    /// Upper snake case display name (`push const` → `PUSH_CONST`).
    pub mnemonic: String,
    /// Effective opcode.
    pub opcode: u8,
    /// Arguments in wire order, common arguments last.
    pub args: Vec<Field>,
    /// Human-readable description.
    pub doc: Option<String>,
}

/// A validated, immutable format specification.
#[derive(Clone, Debug)]
pub struct FormatSpec {
    header: Vec<HeaderField>,
    counters: Vec<Field>,
    chunks: Vec<Field>,
    instructions: Vec<Instruction>,
    by_opcode: Vec<Option<usize>>,
    by_name: HashMap<String, usize>,
}

impl FormatSpec {
    /// Validates `doc` and builds the specification it describes.
    pub fn load(doc: FormatDocument) -> Result<Self, SpecError> {
        let opcodes = check(&doc)?;

        let header = doc
            .header
            .into_iter()
            .map(|h| {
                let value = h.value.to_value(h.kind).ok_or_else(|| {
                    SpecError::InvalidHeaderValue {
                        field: h.name.clone(),
                        kind: h.kind,
                    }
                })?;
                Ok(HeaderField {
                    name: h.name,
                    kind: h.kind,
                    value,
                })
            })
            .collect::<Result<Vec<_>, SpecError>>()?;

        let to_field = |f: FieldDef| Field {
            name: f.name,
            kind: f.kind,
        };
        let counters: Vec<Field> = doc.counters.into_iter().map(to_field).collect();
        let chunks: Vec<Field> = doc.chunks.into_iter().map(to_field).collect();

        let mut instructions = Vec::with_capacity(doc.instructions.len());
        for (def, opcode) in doc.instructions.into_iter().zip(opcodes) {
            let display = mnemonic(&def.name);
            let args = def
                .args
                .into_iter()
                .chain(doc.common_args.iter().cloned())
                .map(to_field)
                .collect();
            instructions.push(Instruction {
                name: def.name,
                mnemonic: display,
                opcode,
                args,
                doc: def.doc,
            });
        }

        let opcode_count = instructions
            .iter()
            .map(|i| usize::from(i.opcode) + 1)
            .max()
            .unwrap_or(0);
        let mut by_opcode = alloc::vec![None; opcode_count];
        let mut by_name = HashMap::with_capacity(instructions.len() * 2);
        for (ix, instr) in instructions.iter().enumerate() {
            by_opcode[usize::from(instr.opcode)] = Some(ix);
            by_name.insert(instr.name.clone(), ix);
            by_name.insert(instr.mnemonic.clone(), ix);
        }

        tracing::debug!(
            instructions = instructions.len(),
            opcode_count,
            chunks = chunks.len(),
            counters = counters.len(),
            "loaded format specification"
        );

        Ok(Self {
            header,
            counters,
            chunks,
            instructions,
            by_opcode,
            by_name,
        })
    }

    /// Checks `doc` without building a specification.
    pub fn validate(doc: &FormatDocument) -> Result<(), SpecError> {
        check(doc).map(|_| ())?;
        for h in &doc.header {
            if h.value.to_value(h.kind).is_none() {
                return Err(SpecError::InvalidHeaderValue {
                    field: h.name.clone(),
                    kind: h.kind,
                });
            }
        }
        Ok(())
    }

    /// Returns the header fields in wire order.
    #[must_use]
    pub fn header(&self) -> &[HeaderField] {
        &self.header
    }

    /// Returns the counters in wire order.
    #[must_use]
    pub fn counters(&self) -> &[Field] {
        &self.counters
    }

    /// Returns the chunks in wire order.
    #[must_use]
    pub fn chunks(&self) -> &[Field] {
        &self.chunks
    }

    /// Returns the instructions in declaration order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Returns one past the largest assigned opcode.
    ///
    /// Valid opcodes lie in `0..opcode_count()`; values in that range that no instruction claims
    /// are still unknown.
    #[must_use]
    pub fn opcode_count(&self) -> usize {
        self.by_opcode.len()
    }

    /// Looks up an instruction by name or mnemonic.
    #[must_use]
    pub fn instruction(&self, name: &str) -> Option<&Instruction> {
        self.by_name.get(name).map(|&ix| &self.instructions[ix])
    }

    /// Looks up an instruction by opcode.
    #[must_use]
    pub fn instruction_by_opcode(&self, opcode: u8) -> Option<&Instruction> {
        let ix = (*self.by_opcode.get(usize::from(opcode))?)?;
        Some(&self.instructions[ix])
    }

    /// Returns the index of the counter called `name`.
    #[must_use]
    pub fn counter_index(&self, name: &str) -> Option<usize> {
        self.counters.iter().position(|c| c.name == name)
    }
}

/// Returns the upper snake case mnemonic of an instruction name.
#[must_use]
pub fn mnemonic(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for word in name.split([' ', '_']).filter(|w| !w.is_empty()) {
        if !out.is_empty() {
            out.push('_');
        }
        out.extend(word.chars().map(|c| c.to_ascii_uppercase()));
    }
    out
}

/// Returns `true` if `name` is a valid identifier.
///
/// Identifiers start with an ASCII letter or `_`, continue with ASCII alphanumerics or `_`, and
/// may separate words with single spaces.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    !name.ends_with(' ')
        && !name.contains("  ")
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
}

fn check_identifier(name: &str) -> Result<(), SpecError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(SpecError::InvalidIdentifier {
            name: String::from(name),
        })
    }
}

/// Validates names and returns the effective opcode of every instruction.
fn check(doc: &FormatDocument) -> Result<Vec<u8>, SpecError> {
    for h in &doc.header {
        check_identifier(&h.name)?;
    }

    let mut slot_names: Vec<&str> = Vec::new();
    for f in doc.counters.iter().chain(&doc.chunks) {
        check_identifier(&f.name)?;
        if f.kind.unsigned_max().is_none() {
            return Err(SpecError::InvalidFieldType {
                field: f.name.clone(),
                kind: f.kind,
            });
        }
        if slot_names.contains(&f.name.as_str()) {
            return Err(SpecError::DuplicateName {
                name: f.name.clone(),
            });
        }
        slot_names.push(&f.name);
    }

    let mut mnemonics: HashSet<String> = HashSet::with_capacity(doc.instructions.len());
    for instr in &doc.instructions {
        check_identifier(&instr.name)?;
        if !mnemonics.insert(mnemonic(&instr.name)) {
            return Err(SpecError::DuplicateName {
                name: instr.name.clone(),
            });
        }
        let mut arg_names: Vec<&str> = Vec::new();
        for arg in instr.args.iter().chain(&doc.common_args) {
            check_identifier(&arg.name)?;
            if arg_names.contains(&arg.name.as_str()) {
                return Err(SpecError::DuplicateArg {
                    instruction: instr.name.clone(),
                    arg: arg.name.clone(),
                });
            }
            arg_names.push(&arg.name);
        }
    }

    assign_opcodes(&doc.instructions)
}

fn assign_opcodes(instructions: &[InstructionDef]) -> Result<Vec<u8>, SpecError> {
    let mut owner: [Option<usize>; 256] = [None; 256];
    let mut out: Vec<Option<u8>> = alloc::vec![None; instructions.len()];

    for (ix, instr) in instructions.iter().enumerate() {
        let Some(code) = instr.code else {
            continue;
        };
        let opcode = u8::try_from(code).map_err(|_| SpecError::OpcodeOutOfRange {
            instruction: instr.name.clone(),
            opcode: code,
        })?;
        if let Some(prev) = owner[usize::from(opcode)] {
            return Err(SpecError::DuplicateOpcode {
                opcode: code,
                first: instructions[prev].name.clone(),
                second: instr.name.clone(),
            });
        }
        owner[usize::from(opcode)] = Some(ix);
        out[ix] = Some(opcode);
    }

    let mut next: usize = 0;
    for (ix, instr) in instructions.iter().enumerate() {
        if out[ix].is_some() {
            continue;
        }
        while next < owner.len() && owner[next].is_some() {
            next += 1;
        }
        let opcode = u8::try_from(next).map_err(|_| SpecError::OpcodeOutOfRange {
            instruction: instr.name.clone(),
            opcode: u32::try_from(next).unwrap_or(u32::MAX),
        })?;
        owner[next] = Some(ix);
        out[ix] = Some(opcode);
    }

    Ok(out.into_iter().flatten().collect())
}
