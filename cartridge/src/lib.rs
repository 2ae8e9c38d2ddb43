// Copyright 2026 the Cartridge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `cartridge`: a schema-driven encoder, decoder and disassembler for bytecode containers.
//!
//! A cartridge is a byte buffer laid out as
//! `[header fields][counters][chunk lengths][instruction]*`, where every instruction is a one-byte
//! opcode followed by its typed arguments. The layout is described once by a
//! [`FormatDocument`](spec::FormatDocument); loading it yields a [`FormatSpec`](spec::FormatSpec)
//! that parametrizes all three codec components, so producer and consumer cannot drift apart.
//!
//! ## Example
//!
//! ```
//! use cartridge::disasm::disassemble_bytes;
//! use cartridge::encoder::Encoder;
//! use cartridge::format::CartBuffer;
//! use cartridge::spec::{FormatDocument, FormatSpec, InstructionDef};
//! use cartridge::types::{TypeKind, Value};
//!
//! let spec = FormatSpec::load(
//!     FormatDocument::new()
//!         .header("magic", TypeKind::U32, 0xCA7_u32)
//!         .header("title", TypeKind::String, "demo")
//!         .chunk("code", TypeKind::U32)
//!         .instruction(InstructionDef::new("push const").arg("value", TypeKind::F64))
//!         .instruction(InstructionDef::new("add")),
//! )?;
//!
//! let mut enc = Encoder::new(&spec);
//! enc.set_target(CartBuffer::new())?;
//! enc.emit("push const", &[Value::F64(5.0)])?;
//! enc.emit("add", &[])?;
//! let bytes = enc.finalize()?.into_vec();
//!
//! let text = disassemble_bytes(&spec, &bytes)?;
//! assert_eq!(text, "[demo, code=10]\nPUSH_CONST  5\nADD\n");
//! # Ok::<(), Box<dyn core::error::Error>>(())
//! ```
//!
//! ## Features
//!
//! - `serde`: derive `Deserialize` for the format document types, so formats can be kept in JSON.

#![no_std]

extern crate alloc;

pub mod decoder;
pub mod disasm;
pub mod encoder;
pub mod format;
pub mod spec;
pub mod types;
