// Copyright 2026 the Cartridge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![allow(missing_docs, reason = "integration test crate")]

use std::cell::RefCell;
use std::rc::Rc;

use cartridge::decoder::{DecodeError, Decoder};
use cartridge::disasm::{Disassembler, disassemble_bytes};
use cartridge::encoder::{EncodeError, Encoder};
use cartridge::format::CartBuffer;
use cartridge::spec::{FormatDocument, FormatSpec, SpecError};
use cartridge::types::{TypeKind, Value};

const HIR_V1: &str = include_str!("../../formats/hir_v1.json");

fn load_json(json: &str) -> FormatSpec {
    let doc: FormatDocument = serde_json::from_str(json).unwrap();
    FormatSpec::load(doc).unwrap()
}

fn hir() -> FormatSpec {
    load_json(HIR_V1)
}

fn encode(spec: &FormatSpec, f: impl FnOnce(&mut Encoder<'_>)) -> Vec<u8> {
    let mut enc = Encoder::new(spec);
    enc.set_target(CartBuffer::new()).unwrap();
    f(&mut enc);
    enc.finalize().unwrap().into_vec()
}

#[test]
fn golden_minimal_cartridge_bytes_hir_v1() {
    let spec = hir();
    let bytes = encode(&spec, |enc| {
        let slot = enc.alloc("refs").unwrap();
        enc.emit("push const", &[Value::F64(5.0)]).unwrap();
        enc.emit("set local", &[Value::from(u32::try_from(slot).unwrap())])
            .unwrap();
        enc.emit("return", &[]).unwrap();
    });

    // This test is intentionally strict: it locks in the layout of a minimal cartridge as a
    // regression signal for format changes.
    let expected: &[u8] = &[
        // magic number
        0x00, 0x75, 0xCA, 0x13, //
        // cart title: "HIR V1"
        0x06, 0x00, 0x00, 0x00, 0x48, 0x49, 0x52, 0x20, 0x56, 0x31, //
        // refs
        0x01, 0x00, 0x00, 0x00, //
        // code length
        0x0F, 0x00, 0x00, 0x00, //
        // PUSH_CONST 5
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x14, 0x40, //
        // SET_LOCAL 0
        0x06, 0x00, 0x00, 0x00, 0x00, //
        // RETURN
        0x20,
    ];
    assert_eq!(bytes, expected);
}

#[test]
fn hir_v1_opcode_table() {
    let spec = hir();
    assert_eq!(spec.opcode_count(), 33);
    let ret = spec.instruction("RETURN").unwrap();
    assert_eq!(ret.opcode, 32);
    assert_eq!(spec.instruction("embed").unwrap().opcode, 20);
    assert!(spec.instruction_by_opcode(21).is_none());
    let push_bool = spec.instruction("push bool").unwrap();
    assert_eq!(push_bool.args[0].kind, TypeKind::U8);
}

#[test]
fn every_type_round_trips_through_the_codec() {
    let spec = hir();
    let program: Vec<(&str, Vec<Value>)> = vec![
        ("push const", vec![Value::F64(-2.5)]),
        ("push bool", vec![Value::U8(1)]),
        ("push string", vec![Value::from("héllo")]),
        ("push string", vec![Value::from("")]),
        ("get local", vec![Value::U32(u32::MAX)]),
        ("jump", vec![Value::I32(-17)]),
        ("jump false", vec![Value::I32(i32::MAX)]),
        ("call", vec![Value::U8(255)]),
        ("embed", vec![Value::Bytes(vec![0, 1, 2, 0xFF])]),
        ("embed", vec![Value::Bytes(vec![])]),
        ("return", vec![]),
    ];
    let bytes = encode(&spec, |enc| {
        for (name, args) in &program {
            enc.emit(name, args).unwrap();
        }
    });

    let mut dec = Decoder::new(&spec);
    dec.set_target(CartBuffer::read_only(bytes)).unwrap();
    for (name, args) in &program {
        let decoded = dec.decode_one().unwrap();
        assert_eq!(decoded.instruction.name, *name);
        assert_eq!(&decoded.args, args, "{name}");
    }
    assert!(dec.is_finished());
}

#[test]
fn arguments_are_coerced_to_their_declared_type() {
    let spec = hir();
    let bytes = encode(&spec, |enc| {
        enc.emit("push const", &[Value::I32(3)]).unwrap();
        enc.emit("push bool", &[Value::from(true)]).unwrap();
        enc.emit("get local", &[Value::F64(4.0)]).unwrap();
        enc.emit("embed", &[Value::from("ab")]).unwrap();
    });
    let text = disassemble_bytes(&spec, &bytes).unwrap();
    let lines: Vec<&str> = text.lines().skip(1).collect();
    assert_eq!(
        lines,
        ["PUSH_CONST  3", "PUSH_BOOL  1", "GET_LOCAL  4", "EMBED  <6162>"]
    );
}

#[test]
fn invalid_arguments_are_rejected_atomically() {
    let spec = hir();
    let mut enc = Encoder::new(&spec);
    enc.set_target(CartBuffer::new()).unwrap();
    enc.emit("push undefined", &[]).unwrap();
    let before = enc.position();

    for (name, arg) in [
        ("get local", Value::I32(-1)),
        ("get local", Value::F64(0.5)),
        ("call", Value::U32(256)),
        ("push const", Value::from("five")),
        ("push string", Value::U8(0)),
    ] {
        let err = enc.emit(name, &[arg]).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidArgument { .. }), "{err}");
        assert_eq!(enc.position(), before);
    }

    let err = enc.emit("get global", &[Value::I32(1)]).unwrap_err();
    assert_eq!(err.to_string(), "argument 'name' of GET_GLOBAL: expected type of string");
}

#[test]
fn header_fidelity_and_single_byte_corruption() {
    let spec = hir();
    let bytes = encode(&spec, |enc| enc.emit("pop", &[]).unwrap());

    let mut dec = Decoder::new(&spec);
    dec.set_target(CartBuffer::read_only(bytes.clone())).unwrap();
    let header = dec.header().unwrap();
    assert_eq!(header.field("magic number"), Some(&Value::U32(0x13CA_7500)));
    assert_eq!(header.field("cart title"), Some(&Value::from("HIR V1")));

    // magic number and cart title
    for ix in 0..14 {
        let mut corrupt = bytes.clone();
        corrupt[ix] = corrupt[ix].wrapping_add(1);
        let mut dec = Decoder::new(&spec);
        let err = dec.set_target(CartBuffer::read_only(corrupt)).unwrap_err();
        let expected = if ix < 4 { "magic number" } else { "cart title" };
        assert_eq!(
            err,
            DecodeError::CorruptHeader {
                field: expected.to_string()
            },
            "byte {ix}"
        );
        assert_eq!(dec.position(), Some(0));
    }
}

#[test]
fn duplicate_opcodes_name_both_instructions() {
    let json = r#"{
        "instructions": [
            { "name": "load", "code": 3, "args": [] },
            { "name": "store", "args": [] },
            { "name": "swap", "code": 3, "args": [] }
        ]
    }"#;
    let doc: FormatDocument = serde_json::from_str(json).unwrap();
    let err = FormatSpec::validate(&doc).unwrap_err();
    assert_eq!(
        err,
        SpecError::DuplicateOpcode {
            opcode: 3,
            first: "load".to_string(),
            second: "swap".to_string(),
        }
    );
    assert!(FormatSpec::load(doc).is_err());
}

#[test]
fn chunk_length_equals_bytes_written_after_the_placeholder() {
    let spec = hir();
    for n in [0_usize, 1, 7, 300] {
        let bytes = encode(&spec, |enc| {
            for _ in 0..n {
                enc.emit("pop", &[]).unwrap();
            }
        });
        let mut dec = Decoder::new(&spec);
        dec.set_target(CartBuffer::read_only(bytes.clone())).unwrap();
        let header = dec.header().unwrap();
        assert_eq!(header.chunk_len("code"), Some(u64::try_from(n).unwrap()));
        assert_eq!(header.body_start + n, bytes.len());
    }
}

#[test]
fn instruction_order_is_preserved_with_common_args() {
    let json = r#"{
        "header": [{ "name": "magic", "type": "u8", "value": 7 }],
        "commonArgs": [{ "name": "line", "type": "u32" }],
        "instructions": [
            { "name": "a", "args": [{ "name": "x", "type": "i32" }, { "name": "y", "type": "i32" }] },
            { "name": "b", "args": [{ "name": "s", "type": "string" }] }
        ]
    }"#;
    let spec = load_json(json);
    let bytes = encode(&spec, |enc| {
        enc.emit("a", &[Value::I32(1), Value::I32(2), Value::U32(10)])
            .unwrap();
        enc.emit("b", &[Value::from("x"), Value::U32(11)]).unwrap();
        enc.emit("a", &[Value::I32(3), Value::I32(4), Value::U32(12)])
            .unwrap();
    });

    let calls: Rc<RefCell<Vec<String>>> = Rc::default();
    let mut dec = Decoder::new(&spec);
    for name in ["a", "b"] {
        let calls = Rc::clone(&calls);
        dec.on_instruction(name, move |args: &[Value]| {
            let args: Vec<String> = args.iter().map(ToString::to_string).collect();
            calls
                .borrow_mut()
                .push(format!("{name}({})", args.join(",")));
        })
        .unwrap();
    }
    dec.set_target(CartBuffer::read_only(bytes)).unwrap();
    while !dec.is_finished() {
        dec.step().unwrap();
    }
    assert_eq!(
        *calls.borrow(),
        ["a(1,2,10)", "b(\"x\",11)", "a(3,4,12)"]
    );
}

#[test]
fn unknown_opcodes_are_rejected() {
    let spec = hir();
    let bytes = encode(&spec, |enc| enc.emit("add", &[]).unwrap());
    let body = bytes.len() - 1;

    let count = u8::try_from(spec.opcode_count()).unwrap();
    for bad in [count, 21, 0xFF] {
        let mut corrupt = bytes.clone();
        corrupt[body] = bad;
        let mut dec = Decoder::new(&spec);
        dec.set_target(CartBuffer::read_only(corrupt)).unwrap();
        assert_eq!(dec.step(), Err(DecodeError::UnknownOpcode { opcode: bad }));
    }
}

#[test]
fn disassembly_of_push_const_then_add() {
    let spec = hir();
    let bytes = encode(&spec, |enc| {
        enc.emit("push const", &[Value::F64(5.0)]).unwrap();
        enc.emit("add", &[]).unwrap();
    });
    assert_eq!(
        disassemble_bytes(&spec, &bytes).unwrap(),
        "[HIR V1, refs=0, code=10]\nPUSH_CONST  5\nADD\n"
    );
}

#[test]
fn disassembly_reports_counters_and_all_argument_types() {
    let spec = hir();
    let bytes = encode(&spec, |enc| {
        let a = enc.alloc("refs").unwrap();
        let b = enc.alloc("refs").unwrap();
        enc.emit("push string", &[Value::from("hi\n")]).unwrap();
        enc.emit("set local", &[Value::from(u32::try_from(a).unwrap())])
            .unwrap();
        enc.emit("get local", &[Value::from(u32::try_from(b).unwrap())])
            .unwrap();
        enc.emit("jump false", &[Value::I32(-6)]).unwrap();
        enc.emit("push const", &[Value::F64(0.25)]).unwrap();
        enc.emit("embed", &[Value::Bytes(vec![0xDE, 0xAD])]).unwrap();
    });

    let mut dis = Disassembler::new(&spec);
    let text = dis.disassemble(CartBuffer::read_only(bytes)).unwrap();
    let expected = "\
[HIR V1, refs=2, code=39]
PUSH_STRING  \"hi\\n\"
SET_LOCAL  0
GET_LOCAL  1
JUMP_FALSE  -6
PUSH_CONST  0.25
EMBED  <dead>
";
    assert_eq!(text, expected);
}

#[test]
fn type_aliases_in_documents() {
    let json = r#"{
        "instructions": [
            { "name": "flag", "args": [{ "name": "on", "type": "bool" }] },
            { "name": "num", "args": [{ "name": "v", "type": "number" }] }
        ]
    }"#;
    let spec = load_json(json);
    assert_eq!(spec.instruction("flag").unwrap().args[0].kind, TypeKind::U8);
    assert_eq!(spec.instruction("num").unwrap().args[0].kind, TypeKind::F64);
}
