//! The disassembler: structural inverse of the assembler's instruction encoding.
//!
//! Decoding never fails. Any byte span that does not form a complete, known
//! instruction falls back to a single-byte `%DAT` directive, which guarantees two
//! things at once: arbitrary foreign bytes disassemble without error, and
//! re-assembling the output reproduces the input byte-for-byte. A second pass
//! coalesces fallback bytes into string and pad directives where the assembler
//! would have produced the same bytes from those directives.

use std::collections::HashSet;
use std::convert::TryInto;

use crate::common::{isa, Opcode, OperandType, Register};

/// Heuristic toggles. The defaults preserve the byte-exact roundtrip property.
#[derive(Clone, Debug)]
pub struct DisassemblerOptions {
    /// Merge runs of printable-ASCII data bytes into `%DAT "string"`.
    pub detect_strings: bool,
    /// Merge runs of zero bytes into `HLT` + `%PAD`.
    pub detect_pads: bool,
    /// Render literals as floats when their bit pattern is a plausible double.
    pub detect_floats: bool,
    /// Render literals with the top bit set as negative decimals.
    pub detect_signed: bool,
    /// Decode the redundant `0xFF 0x00` encoding of base-set opcodes as
    /// instructions. The assembler never emits that form, so enabling this
    /// sacrifices the roundtrip guarantee for those spans.
    pub allow_fully_qualified_base_opcodes: bool,
}
impl Default for DisassemblerOptions {
    fn default() -> DisassemblerOptions {
        DisassemblerOptions {
            detect_strings: true,
            detect_pads: true,
            detect_floats: true,
            detect_signed: true,
            allow_fully_qualified_base_opcodes: false,
        }
    }
}

enum Operand {
    Text(String),
    /// An address operand, labeled or rewritten once all unit starts are known.
    Address(u64),
}

enum Unit {
    Instruction { mnemonic: &'static str, operands: Vec<Operand>, len: usize },
    Data(u8),
}

/// Disassembles a program image into re-assemblable source text.
pub fn disassemble(program: &[u8], options: &DisassemblerOptions) -> String {
    // first pass: greedy decode, one unit per instruction or fallback byte
    let mut units: Vec<(u64, Unit)> = vec![];
    let mut i = 0;
    while i < program.len() {
        match decode_instruction(program, i, options) {
            Some((unit, len)) => {
                units.push((i as u64, unit));
                i += len;
            }
            None => {
                units.push((i as u64, Unit::Data(program[i])));
                i += 1;
            }
        }
    }

    let starts: HashSet<u64> = units.iter().map(|&(offset, _)| offset).collect();
    // only references that land on a unit start become labels
    let labeled: HashSet<u64> = units.iter()
        .flat_map(|(_, unit)| match unit {
            Unit::Instruction { operands, .. } => operands.iter().filter_map(|op| match op {
                Operand::Address(a) if starts.contains(a) => Some(*a),
                _ => None,
            }).collect(),
            Unit::Data(_) => vec![],
        })
        .collect();

    // second pass: render, coalescing data/pad runs that no label interrupts
    let mut lines: Vec<String> = vec![];
    let mut index = 0;
    while index < units.len() {
        let (offset, unit) = &units[index];
        if labeled.contains(offset) {
            lines.push(format!(":{}", label_name(*offset)));
        }

        match unit {
            Unit::Data(byte) => {
                if options.detect_strings && is_string_byte(*byte) {
                    let run = run_length(&units, index, &labeled, |unit| match unit {
                        Unit::Data(b) => is_string_byte(*b),
                        _ => false,
                    });
                    if run >= 2 {
                        let bytes: Vec<u8> = units[index..index + run].iter().map(|(_, unit)| match unit {
                            Unit::Data(b) => *b,
                            _ => 0,
                        }).collect();
                        lines.push(format!("%DAT \"{}\"", escape_string(&bytes)));
                        index += run;
                        continue;
                    }
                }
                lines.push(format!("%DAT {}", byte));
                index += 1;
            }
            Unit::Instruction { mnemonic, operands, len } => {
                if options.detect_pads && *mnemonic == "HLT" && *len == 1 {
                    let run = run_length(&units, index, &labeled, |unit| {
                        matches!(unit, Unit::Instruction { mnemonic: "HLT", len: 1, .. })
                    });
                    if run >= 2 {
                        lines.push("HLT".to_owned());
                        lines.push(format!("%PAD {}", run - 1));
                        index += run;
                        continue;
                    }
                }
                lines.push(render_instruction(mnemonic, operands, &starts));
                index += 1;
            }
        }
    }

    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Length of the run of consecutive units starting at `index` that satisfy
/// `matches` and are byte-adjacent, stopping before any labeled offset.
fn run_length(units: &[(u64, Unit)], index: usize, labeled: &HashSet<u64>,
              matches: impl Fn(&Unit) -> bool) -> usize {
    let mut run = 1;
    let mut expected = units[index].0 + unit_len(&units[index].1) as u64;
    for (offset, unit) in &units[index + 1..] {
        if *offset != expected || labeled.contains(offset) || !matches(unit) {
            break;
        }
        run += 1;
        expected = offset + unit_len(unit) as u64;
    }
    run
}

fn unit_len(unit: &Unit) -> usize {
    match unit {
        Unit::Instruction { len, .. } => *len,
        Unit::Data(_) => 1,
    }
}

fn label_name(offset: u64) -> String {
    format!("ADDR_{:X}", offset)
}

fn render_instruction(mnemonic: &str, operands: &[Operand], starts: &HashSet<u64>) -> String {
    let mut line = mnemonic.to_owned();
    let mut unaligned = false;
    for (i, operand) in operands.iter().enumerate() {
        line.push_str(if i == 0 { " " } else { ", " });
        match operand {
            Operand::Text(text) => line.push_str(text),
            Operand::Address(a) if starts.contains(a) => {
                line.push(':');
                line.push_str(&label_name(*a));
            }
            Operand::Address(a) => {
                line.push_str(&format!("{:#X}", a));
                unaligned = true;
            }
        }
    }
    if unaligned {
        line.push_str("  ; address does not point to the start of an instruction");
    }
    line
}

/// Decodes one instruction at `i`, or `None` for the single-byte data fallback.
fn decode_instruction(program: &[u8], i: usize, options: &DisassemblerOptions) -> Option<(Unit, usize)> {
    let first = program[i];
    let (extension_set, code, header_len) = if first == Opcode::FULLY_QUALIFIED_MARKER {
        let ext = *program.get(i + 1)?;
        let code = *program.get(i + 2)?;
        if ext == 0 && !options.allow_fully_qualified_base_opcodes {
            // the assembler never emits this redundant form; decoding it as an
            // instruction would change the bytes on reassembly
            return None;
        }
        (ext, code, 3)
    } else {
        (0, first, 1)
    };
    let info = isa::lookup_opcode(Opcode::new(extension_set, code))?;

    let mut pos = i + header_len;
    let mut operands = Vec::with_capacity(info.operands.len());
    for &operand_type in info.operands {
        match operand_type {
            OperandType::Register => {
                let register = decode_register(program, &mut pos)?;
                operands.push(Operand::Text(register.name().to_owned()));
            }
            OperandType::Pointer => {
                let register = decode_register(program, &mut pos)?;
                operands.push(Operand::Text(format!("*{}", register.name())));
            }
            OperandType::Address => {
                operands.push(Operand::Address(decode_u64(program, &mut pos)?));
            }
            OperandType::Literal => {
                let value = decode_u64(program, &mut pos)?;
                operands.push(Operand::Text(render_literal(value, options)));
            }
        }
    }
    Some((Unit::Instruction { mnemonic: info.mnemonic, operands, len: pos - i }, pos - i))
}

fn decode_register(program: &[u8], pos: &mut usize) -> Option<Register> {
    use num_traits::FromPrimitive;
    let byte = *program.get(*pos)?;
    *pos += 1;
    Register::from_u8(byte)
}

fn decode_u64(program: &[u8], pos: &mut usize) -> Option<u64> {
    let bytes: [u8; 8] = program.get(*pos..*pos + 8)?.try_into().ok()?;
    *pos += 8;
    Some(u64::from_le_bytes(bytes))
}

/// Renders an 8-byte literal. Every branch encodes the exact same 64-bit pattern
/// when re-assembled, so the choice only affects readability.
fn render_literal(value: u64, options: &DisassemblerOptions) -> String {
    if options.detect_floats {
        let float = f64::from_bits(value);
        if float.is_finite() && float != 0.0 && float.abs() >= 1e-12 && float.abs() < 1e15 {
            let text = format!("{:?}", float);
            // exponent renderings would not parse back as float literals
            if text.contains('.') && !text.contains('e') && !text.contains('E') {
                return text;
            }
        }
    }
    if options.detect_signed && value >> 63 == 1 {
        return (value as i64).to_string();
    }
    value.to_string()
}

fn is_string_byte(byte: u8) -> bool {
    (0x20..=0x7E).contains(&byte)
}

fn escape_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            _ => out.push(byte as char),
        }
    }
    out
}
