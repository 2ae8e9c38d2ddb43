// Copyright 2026 the Cartridge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Disassembler for cartridges.
//!
//! A [`Disassembler`] is a [`Decoder`] with a header handler and one handler per instruction
//! installed, each appending a line to a shared trace. The text format is:
//!
//! ```text
//! [<title>, <counter>=<n>, ..., <chunk>=<len>, ...]
//! MNEMONIC  arg  arg
//! ```
//!
//! The title is the first string-typed header field, or `cartridge` when there is none. Arguments
//! are printed with [`Value`]'s `Display`, separated by two spaces.

#![allow(clippy::module_name_repetitions, reason = "public API module")]

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use core::cell::RefCell;
use core::fmt::{self, Write as _};

use crate::decoder::{DecodeError, Decoder, HeaderInfo};
use crate::format::CartBuffer;
use crate::spec::{FormatSpec, Instruction};
use crate::types::Value;

/// Produces the text trace of a cartridge.
pub struct Disassembler<'a> {
    decoder: Decoder<'a>,
    out: Rc<RefCell<String>>,
}

impl fmt::Debug for Disassembler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disassembler")
            .field("decoder", &self.decoder)
            .finish_non_exhaustive()
    }
}

impl<'a> Disassembler<'a> {
    /// Creates a disassembler for `spec`.
    #[must_use]
    pub fn new(spec: &'a FormatSpec) -> Self {
        let out = Rc::new(RefCell::new(String::new()));
        let mut decoder = Decoder::new(spec);

        let title = spec
            .header()
            .iter()
            .find_map(|h| h.value.as_str())
            .unwrap_or("cartridge");
        let sink = Rc::clone(&out);
        decoder.on_header(move |info: &HeaderInfo| {
            let mut out = sink.borrow_mut();
            // Writing into a `String` cannot fail.
            let _ = write_header(&mut out, title, info);
        });

        for instr in spec.instructions() {
            let sink = Rc::clone(&out);
            decoder.install(
                instr.opcode,
                Box::new(move |args: &[Value]| {
                    let mut out = sink.borrow_mut();
                    let _ = write_instruction(&mut out, instr, args);
                }),
            );
        }

        Self { decoder, out }
    }

    /// Disassembles `buffer` from its cursor to the end.
    pub fn disassemble(&mut self, buffer: CartBuffer) -> Result<String, DecodeError> {
        self.out.borrow_mut().clear();
        let result = self.drain(buffer);
        self.decoder.take_target();
        let text = core::mem::take(&mut *self.out.borrow_mut());
        result.map(|()| text)
    }

    fn drain(&mut self, buffer: CartBuffer) -> Result<(), DecodeError> {
        self.decoder.set_target(buffer)?;
        while !self.decoder.is_finished() {
            self.decoder.step()?;
        }
        Ok(())
    }
}

fn write_header(out: &mut String, title: &str, info: &HeaderInfo) -> fmt::Result {
    write!(out, "[{title}")?;
    for slot in info.counters.iter().chain(&info.chunks) {
        write!(out, ", {}={}", slot.name, slot.value)?;
    }
    out.push_str("]\n");
    Ok(())
}

fn write_instruction(out: &mut String, instr: &Instruction, args: &[Value]) -> fmt::Result {
    out.push_str(&instr.mnemonic);
    for arg in args {
        write!(out, "  {arg}")?;
    }
    out.push('\n');
    Ok(())
}

/// Disassembles `buffer` with a one-shot [`Disassembler`].
pub fn disassemble(spec: &FormatSpec, buffer: CartBuffer) -> Result<String, DecodeError> {
    Disassembler::new(spec).disassemble(buffer)
}

/// Disassembles a byte slice with a one-shot [`Disassembler`].
pub fn disassemble_bytes(spec: &FormatSpec, bytes: &[u8]) -> Result<String, DecodeError> {
    disassemble(spec, CartBuffer::read_only(bytes))
}
