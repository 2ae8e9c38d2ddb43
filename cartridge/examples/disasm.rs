// Copyright 2026 the Cartridge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Disassembler example.
//!
//! Run with:
//! `cargo run -p cartridge --example disasm`

use cartridge::disasm::disassemble;
use cartridge::encoder::Encoder;
use cartridge::format::CartBuffer;
use cartridge::spec::{FormatDocument, FormatSpec, InstructionDef};
use cartridge::types::{TypeKind, Value};

fn main() {
    let spec = FormatSpec::load(
        FormatDocument::new()
            .header("magic number", TypeKind::U32, 0x13CA_7500_u32)
            .header("cart title", TypeKind::String, "disasm demo")
            .counter("refs", TypeKind::U32)
            .chunk("code", TypeKind::U32)
            .instruction(
                InstructionDef::new("push const")
                    .doc("push a numeric constant onto the stack")
                    .arg("value", TypeKind::F64),
            )
            .instruction(InstructionDef::new("get local").arg("ref", TypeKind::U32))
            .instruction(InstructionDef::new("set local").arg("ref", TypeKind::U32))
            .instruction(InstructionDef::new("add"))
            .instruction(InstructionDef::new("return").code(0x20)),
    )
    .unwrap();

    // let x = 2; return x + 3
    let mut enc = Encoder::new(&spec);
    enc.set_target(CartBuffer::new()).unwrap();
    let x = Value::from(u32::try_from(enc.alloc("refs").unwrap()).unwrap());
    enc.emit("push const", &[Value::F64(2.0)]).unwrap();
    enc.emit("set local", &[x.clone()]).unwrap();
    enc.emit("get local", &[x]).unwrap();
    enc.emit("push const", &[Value::F64(3.0)]).unwrap();
    enc.emit("add", &[]).unwrap();
    enc.emit("return", &[]).unwrap();
    let buffer = enc.finalize().unwrap();

    print!("{}", disassemble(&spec, buffer).unwrap());
}
