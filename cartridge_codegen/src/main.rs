// Copyright 2026 the Cartridge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![doc = "Code generator for typed cartridge front ends.\n\n\
          Reads a format document (JSON), validates it, and renders a Rust module with an opcode \
          enum and one typed `emit_*` method per instruction. This is a std-only build tool crate."]

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use cartridge::spec::{FormatDocument, FormatSpec, Instruction};
use cartridge::types::TypeKind;
use tracing_subscriber::EnvFilter;

const DEFAULT_FORMAT: &str = "formats/hir_v1.json";

const RUST_KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "do", "dyn",
    "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl", "in", "let",
    "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref", "return",
    "static", "struct", "trait", "true", "try", "type", "typeof", "unsafe", "unsized", "use",
    "virtual", "where", "while", "yield",
];

fn load(path: &Path) -> Result<FormatSpec> {
    let json = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let doc: FormatDocument =
        serde_json::from_str(&json).with_context(|| format!("parse {}", path.display()))?;
    FormatSpec::load(doc).with_context(|| format!("validate {}", path.display()))
}

fn words(name: &str) -> impl Iterator<Item = &str> {
    name.split([' ', '_']).filter(|w| !w.is_empty())
}

/// `push const` → `PushConst`.
fn camel_upper(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for word in words(name) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars.map(|c| c.to_ascii_lowercase()));
        }
    }
    if out.starts_with('_') || out.is_empty() {
        out.insert(0, 'X');
    }
    out
}

/// `push const` → `push_const`.
fn snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for word in words(name) {
        if !out.is_empty() {
            out.push('_');
        }
        out.extend(word.chars().map(|c| c.to_ascii_lowercase()));
    }
    out
}

/// A snake case binding that is a legal Rust identifier.
fn binding(name: &str) -> String {
    let ident = snake(name);
    match ident.as_str() {
        "self" | "Self" | "super" | "crate" => format!("{ident}_"),
        "" | "_" => "arg".to_string(),
        kw if RUST_KEYWORDS.contains(&kw) => format!("r#{ident}"),
        _ => ident,
    }
}

fn rust_type(kind: TypeKind) -> &'static str {
    match kind {
        TypeKind::I32 => "i32",
        TypeKind::U32 => "u32",
        TypeKind::F64 => "f64",
        TypeKind::U8 => "u8",
        TypeKind::Bytes => "&[u8]",
        TypeKind::String => "&str",
    }
}

fn sentence(text: &str) -> String {
    let text = text.trim().trim_end_matches('.');
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => format!("{}{}.", first.to_uppercase(), chars.as_str()),
        None => String::new(),
    }
}

fn write_doc(out: &mut String, indent: &str, doc: &str) -> Result<()> {
    for line in doc.lines() {
        if line.is_empty() {
            writeln!(out, "{indent}///")?;
        } else {
            writeln!(out, "{indent}/// {line}")?;
        }
    }
    Ok(())
}

fn emit_signature(instr: &Instruction) -> String {
    let mut sig = format!("fn emit_{}(&mut self", snake(&instr.name));
    for arg in &instr.args {
        sig.push_str(&format!(", {}: {}", binding(&arg.name), rust_type(arg.kind)));
    }
    sig.push_str(") -> Result<(), EncodeError>");
    sig
}

fn check_names(spec: &FormatSpec) -> Result<()> {
    let mut variants: Vec<(String, &str)> = spec
        .instructions()
        .iter()
        .map(|i| (camel_upper(&i.name), i.name.as_str()))
        .collect();
    variants.sort();
    for w in variants.windows(2) {
        if w[0].0 == w[1].0 {
            bail!(
                "instructions '{}' and '{}' both render as `{}`",
                w[0].1,
                w[1].1,
                w[0].0
            );
        }
    }
    for instr in spec.instructions() {
        let mut args: Vec<String> = instr.args.iter().map(|a| binding(&a.name)).collect();
        args.sort();
        if let Some(w) = args.windows(2).find(|w| w[0] == w[1]) {
            bail!(
                "arguments of instruction '{}' collide as `{}`",
                instr.name,
                w[0]
            );
        }
    }
    Ok(())
}

fn generate(spec: &FormatSpec, src: &Path) -> Result<String> {
    check_names(spec)?;

    let title = spec
        .header()
        .iter()
        .find_map(|h| h.value.as_str())
        .unwrap_or("cartridge");
    let mut instrs: Vec<&Instruction> = spec.instructions().iter().collect();
    instrs.sort_by_key(|i| i.opcode);

    let mut out = String::new();
    writeln!(
        out,
        "// Generated by cartridge_codegen from {}. Do not edit.",
        src.display()
    )?;
    out.push('\n');
    out.push_str("use cartridge::encoder::{EncodeError, Encoder};\n");
    out.push_str("use cartridge::types::Value;\n");
    out.push('\n');

    writeln!(out, "/// Opcodes of the `{title}` format.")?;
    out.push_str("#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]\n");
    out.push_str("#[repr(u8)]\n");
    out.push_str("pub enum Opcode {\n");
    for instr in &instrs {
        if let Some(doc) = instr.doc.as_deref() {
            write_doc(&mut out, "    ", &sentence(doc))?;
        }
        writeln!(out, "    {} = {},", camel_upper(&instr.name), instr.opcode)?;
    }
    out.push_str("}\n\n");

    out.push_str("impl Opcode {\n");
    out.push_str("    /// One past the largest opcode.\n");
    writeln!(out, "    pub const COUNT: usize = {};", spec.opcode_count())?;
    out.push('\n');
    out.push_str("    /// Returns the opcode with byte value `b`.\n");
    out.push_str("    #[must_use]\n");
    out.push_str("    pub fn from_u8(b: u8) -> Option<Self> {\n");
    out.push_str("        match b {\n");
    for instr in &instrs {
        writeln!(
            out,
            "            {} => Some(Self::{}),",
            instr.opcode,
            camel_upper(&instr.name)
        )?;
    }
    out.push_str("            _ => None,\n");
    out.push_str("        }\n");
    out.push_str("    }\n\n");
    out.push_str("    /// Returns the disassembly mnemonic.\n");
    out.push_str("    #[must_use]\n");
    out.push_str("    pub fn mnemonic(self) -> &'static str {\n");
    out.push_str("        match self {\n");
    for instr in &instrs {
        writeln!(
            out,
            "            Self::{} => \"{}\",",
            camel_upper(&instr.name),
            instr.mnemonic
        )?;
    }
    out.push_str("        }\n");
    out.push_str("    }\n");
    out.push_str("}\n\n");

    writeln!(out, "/// Typed emitters for the `{title}` format.")?;
    out.push_str("pub trait Emit {\n");
    for instr in &instrs {
        match instr.doc.as_deref() {
            Some(doc) => write_doc(
                &mut out,
                "    ",
                &format!("Emits an instruction to {}.", doc.trim().trim_end_matches('.')),
            )?,
            None => writeln!(out, "    /// Emits `{}`.", instr.mnemonic)?,
        }
        writeln!(out, "    {};", emit_signature(instr))?;
    }
    out.push_str("}\n\n");

    out.push_str("impl Emit for Encoder<'_> {\n");
    for (ix, instr) in instrs.iter().enumerate() {
        if ix > 0 {
            out.push('\n');
        }
        writeln!(out, "    {} {{", emit_signature(instr))?;
        let values: Vec<String> = instr
            .args
            .iter()
            .map(|a| format!("Value::from({})", binding(&a.name)))
            .collect();
        writeln!(
            out,
            "        self.emit_opcode(Opcode::{} as u8, &[{}])",
            camel_upper(&instr.name),
            values.join(", ")
        )?;
        out.push_str("    }\n");
    }
    out.push_str("}\n");

    Ok(out)
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let spec_path: PathBuf = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FORMAT));
    let out_path: Option<PathBuf> = args.next().map(PathBuf::from);
    if args.next().is_some() {
        bail!("usage: cartridge_codegen [format.json] [out.rs]");
    }

    let spec = load(&spec_path)?;
    tracing::debug!(
        instructions = spec.instructions().len(),
        opcode_count = spec.opcode_count(),
        "loaded {}",
        spec_path.display()
    );
    let rendered = generate(&spec, &spec_path)?;

    match out_path {
        Some(out_path) => {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::write(&out_path, rendered.as_bytes())
                .with_context(|| format!("write {}", out_path.display()))?;
            tracing::info!("wrote {}", out_path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
