//! The static instruction-set tables.
//!
//! These map `(mnemonic, operand-type signature)` pairs to opcodes for the assembler
//! and opcodes back to canonical mnemonics for the disassembler. Mnemonic lookup is
//! ASCII-case-insensitive. Synonym mnemonics (e.g. `JZO` for `JEQ`) share the same
//! `InstructionInfo`, so the reverse direction always yields the canonical spelling.

use std::collections::HashMap;

use super::{Opcode, OperandType};

const R: OperandType = OperandType::Register;
const L: OperandType = OperandType::Literal;
const A: OperandType = OperandType::Address;
const P: OperandType = OperandType::Pointer;

/// Everything the toolchain knows about one instruction encoding.
#[derive(Debug)]
pub struct InstructionInfo {
    pub opcode: Opcode,
    /// Canonical (uppercase) mnemonic used by the disassembler.
    pub mnemonic: &'static str,
    pub operands: &'static [OperandType],
    /// Indices of operands the instruction writes to.
    pub writes: &'static [u8],
    /// Whether an address/pointer operand is dereferenced as a data source
    /// (as opposed to being a jump/call target).
    pub reads_memory: bool,
    /// For data moves: the width in bits the moved value is truncated to.
    pub move_width: Option<u8>,
}

fn push(v: &mut Vec<InstructionInfo>, ext: u8, code: u8, mnemonic: &'static str,
        operands: &'static [OperandType], writes: &'static [u8], reads_memory: bool, move_width: Option<u8>) {
    v.push(InstructionInfo { opcode: Opcode::new(ext, code), mnemonic, operands, writes, reads_memory, move_width });
}

/// `MN reg, {reg|lit|adr|ptr}` at four consecutive codes.
fn src_family(v: &mut Vec<InstructionInfo>, ext: u8, base: u8, mnemonic: &'static str, writes: &'static [u8], move_width: Option<u8>) {
    push(v, ext, base, mnemonic, &[R, R], writes, false, move_width);
    push(v, ext, base + 1, mnemonic, &[R, L], writes, false, move_width);
    push(v, ext, base + 2, mnemonic, &[R, A], writes, true, move_width);
    push(v, ext, base + 3, mnemonic, &[R, P], writes, true, move_width);
}

/// `MN reg, reg, {reg|lit|adr|ptr}` at four consecutive codes (DVR-style).
fn src3_family(v: &mut Vec<InstructionInfo>, ext: u8, base: u8, mnemonic: &'static str) {
    push(v, ext, base, mnemonic, &[R, R, R], &[0, 1], false, None);
    push(v, ext, base + 1, mnemonic, &[R, R, L], &[0, 1], false, None);
    push(v, ext, base + 2, mnemonic, &[R, R, A], &[0, 1], true, None);
    push(v, ext, base + 3, mnemonic, &[R, R, P], &[0, 1], true, None);
}

/// `MN {adr|ptr}` jump-target pair (target is not a memory read).
fn jump_pair(v: &mut Vec<InstructionInfo>, ext: u8, base: u8, mnemonic: &'static str) {
    push(v, ext, base, mnemonic, &[A], &[], false, None);
    push(v, ext, base + 1, mnemonic, &[P], &[], false, None);
}

/// `MN {adr|ptr}` where the operand points at data (e.g. a NUL-terminated path).
fn mem_pair(v: &mut Vec<InstructionInfo>, ext: u8, base: u8, mnemonic: &'static str, writes: &'static [u8]) {
    push(v, ext, base, mnemonic, &[A], writes, true, None);
    push(v, ext, base + 1, mnemonic, &[P], writes, true, None);
}

/// `MN {reg|lit|adr|ptr}` single-value source at four consecutive codes.
fn value_family(v: &mut Vec<InstructionInfo>, ext: u8, base: u8, mnemonic: &'static str) {
    push(v, ext, base, mnemonic, &[R], &[], false, None);
    push(v, ext, base + 1, mnemonic, &[L], &[], false, None);
    push(v, ext, base + 2, mnemonic, &[A], &[], true, None);
    push(v, ext, base + 3, mnemonic, &[P], &[], true, None);
}

/// Eight-shape data move family: `reg,{reg|lit|adr|ptr}`, `adr,{reg|lit}`, `ptr,{reg|lit}`.
fn move_family(v: &mut Vec<InstructionInfo>, ext: u8, base: u8, mnemonic: &'static str, bits: u8) {
    let w = Some(bits);
    push(v, ext, base, mnemonic, &[R, R], &[0], false, w);
    push(v, ext, base + 1, mnemonic, &[R, L], &[0], false, w);
    push(v, ext, base + 2, mnemonic, &[R, A], &[0], true, w);
    push(v, ext, base + 3, mnemonic, &[R, P], &[0], true, w);
    push(v, ext, base + 4, mnemonic, &[A, R], &[0], false, w);
    push(v, ext, base + 5, mnemonic, &[A, L], &[0], false, w);
    push(v, ext, base + 6, mnemonic, &[P, R], &[0], false, w);
    push(v, ext, base + 7, mnemonic, &[P, L], &[0], false, w);
}

/// `MN reg, {adr|ptr}` where the address is a data pointer (FEX/FSZ style).
fn reg_path_pair(v: &mut Vec<InstructionInfo>, ext: u8, base: u8, mnemonic: &'static str) {
    push(v, ext, base, mnemonic, &[R, A], &[0], true, None);
    push(v, ext, base + 1, mnemonic, &[R, P], &[0], true, None);
}

fn build_instructions() -> Vec<InstructionInfo> {
    let mut v = Vec::with_capacity(256);

    // ------------------------------ base set 0x00 ------------------------------
    push(&mut v, 0x00, 0x00, "HLT", &[], &[], false, None);
    push(&mut v, 0x00, 0x01, "NOP", &[], &[], false, None);
    jump_pair(&mut v, 0x00, 0x02, "JMP");
    jump_pair(&mut v, 0x00, 0x04, "JEQ");
    jump_pair(&mut v, 0x00, 0x06, "JNE");
    jump_pair(&mut v, 0x00, 0x08, "JLT");
    jump_pair(&mut v, 0x00, 0x0A, "JLE");
    jump_pair(&mut v, 0x00, 0x0C, "JGT");
    jump_pair(&mut v, 0x00, 0x0E, "JGE");

    src_family(&mut v, 0x00, 0x10, "ADD", &[0], None);
    push(&mut v, 0x00, 0x14, "ICR", &[R], &[0], false, None);
    src_family(&mut v, 0x00, 0x20, "SUB", &[0], None);
    push(&mut v, 0x00, 0x24, "DCR", &[R], &[0], false, None);
    src_family(&mut v, 0x00, 0x30, "MUL", &[0], None);
    src_family(&mut v, 0x00, 0x40, "DIV", &[0], None);
    src3_family(&mut v, 0x00, 0x44, "DVR");
    src_family(&mut v, 0x00, 0x48, "REM", &[0], None);
    src_family(&mut v, 0x00, 0x50, "SHL", &[0], None);
    src_family(&mut v, 0x00, 0x54, "SHR", &[0], None);

    src_family(&mut v, 0x00, 0x60, "AND", &[0], None);
    src_family(&mut v, 0x00, 0x64, "ORR", &[0], None);
    src_family(&mut v, 0x00, 0x68, "XOR", &[0], None);
    push(&mut v, 0x00, 0x6C, "NOT", &[R], &[0], false, None);
    push(&mut v, 0x00, 0x6D, "RNG", &[R], &[0], false, None);

    src_family(&mut v, 0x00, 0x70, "TST", &[], None);
    src_family(&mut v, 0x00, 0x74, "CMP", &[], None);

    move_family(&mut v, 0x00, 0x80, "MVB", 8);
    move_family(&mut v, 0x00, 0x88, "MVW", 16);
    move_family(&mut v, 0x00, 0x90, "MVD", 32);
    move_family(&mut v, 0x00, 0x98, "MVQ", 64);

    value_family(&mut v, 0x00, 0xA0, "PSH");
    push(&mut v, 0x00, 0xA4, "POP", &[R], &[0], false, None);

    push(&mut v, 0x00, 0xB0, "CAL", &[A], &[], false, None);
    push(&mut v, 0x00, 0xB1, "CAL", &[P], &[], false, None);
    push(&mut v, 0x00, 0xB2, "CAL", &[A, R], &[], false, None);
    push(&mut v, 0x00, 0xB3, "CAL", &[A, L], &[], false, None);
    push(&mut v, 0x00, 0xB4, "CAL", &[A, A], &[], true, None);
    push(&mut v, 0x00, 0xB5, "CAL", &[A, P], &[], true, None);
    push(&mut v, 0x00, 0xB6, "CAL", &[P, R], &[], false, None);
    push(&mut v, 0x00, 0xB7, "CAL", &[P, L], &[], false, None);
    push(&mut v, 0x00, 0xB8, "CAL", &[P, A], &[], true, None);
    push(&mut v, 0x00, 0xB9, "CAL", &[P, P], &[], true, None);
    push(&mut v, 0x00, 0xBA, "RET", &[], &[], false, None);
    push(&mut v, 0x00, 0xBB, "RET", &[R], &[], false, None);
    push(&mut v, 0x00, 0xBC, "RET", &[L], &[], false, None);
    push(&mut v, 0x00, 0xBD, "RET", &[A], &[], true, None);
    push(&mut v, 0x00, 0xBE, "RET", &[P], &[], true, None);

    value_family(&mut v, 0x00, 0xC0, "WCN");
    value_family(&mut v, 0x00, 0xC4, "WCB");
    value_family(&mut v, 0x00, 0xC8, "WCX");
    value_family(&mut v, 0x00, 0xCC, "WCC");
    value_family(&mut v, 0x00, 0xD0, "WFN");
    value_family(&mut v, 0x00, 0xD4, "WFB");
    value_family(&mut v, 0x00, 0xD8, "WFX");
    value_family(&mut v, 0x00, 0xDC, "WFC");

    mem_pair(&mut v, 0x00, 0xE0, "OFL", &[]);
    push(&mut v, 0x00, 0xE2, "CFL", &[], &[], false, None);
    mem_pair(&mut v, 0x00, 0xE3, "DFL", &[]);
    reg_path_pair(&mut v, 0x00, 0xE5, "FEX");
    reg_path_pair(&mut v, 0x00, 0xE7, "FSZ");

    push(&mut v, 0x00, 0xF0, "RCC", &[R], &[0], false, None);
    push(&mut v, 0x00, 0xF1, "RFC", &[R], &[0], false, None);

    // ------------------------------ signed set 0x01 ------------------------------
    jump_pair(&mut v, 0x01, 0x00, "SIGN_JLT");
    jump_pair(&mut v, 0x01, 0x02, "SIGN_JLE");
    jump_pair(&mut v, 0x01, 0x04, "SIGN_JGT");
    jump_pair(&mut v, 0x01, 0x06, "SIGN_JGE");
    jump_pair(&mut v, 0x01, 0x08, "SIGN_JSI");
    jump_pair(&mut v, 0x01, 0x0A, "SIGN_JNS");
    jump_pair(&mut v, 0x01, 0x0C, "SIGN_JOV");
    jump_pair(&mut v, 0x01, 0x0E, "SIGN_JNO");

    src_family(&mut v, 0x01, 0x10, "SIGN_DIV", &[0], None);
    src3_family(&mut v, 0x01, 0x14, "SIGN_DVR");
    src_family(&mut v, 0x01, 0x18, "SIGN_REM", &[0], None);
    src_family(&mut v, 0x01, 0x20, "SIGN_SHR", &[0], None);

    src_family(&mut v, 0x01, 0x30, "SIGN_MVB", &[0], Some(8));
    src_family(&mut v, 0x01, 0x34, "SIGN_MVW", &[0], Some(16));
    src_family(&mut v, 0x01, 0x38, "SIGN_MVD", &[0], Some(32));

    value_family(&mut v, 0x01, 0x40, "SIGN_WCN");
    value_family(&mut v, 0x01, 0x44, "SIGN_WCB");
    value_family(&mut v, 0x01, 0x48, "SIGN_WFN");
    value_family(&mut v, 0x01, 0x4C, "SIGN_WFB");

    push(&mut v, 0x01, 0x50, "SIGN_EXB", &[R], &[0], false, None);
    push(&mut v, 0x01, 0x51, "SIGN_EXW", &[R], &[0], false, None);
    push(&mut v, 0x01, 0x52, "SIGN_EXD", &[R], &[0], false, None);
    push(&mut v, 0x01, 0x60, "SIGN_NEG", &[R], &[0], false, None);

    // ------------------------------ float set 0x02 ------------------------------
    src_family(&mut v, 0x02, 0x00, "FLPT_ADD", &[0], None);
    src_family(&mut v, 0x02, 0x10, "FLPT_SUB", &[0], None);
    src_family(&mut v, 0x02, 0x20, "FLPT_MUL", &[0], None);
    src_family(&mut v, 0x02, 0x30, "FLPT_DIV", &[0], None);
    src3_family(&mut v, 0x02, 0x34, "FLPT_DVR");
    src_family(&mut v, 0x02, 0x38, "FLPT_REM", &[0], None);

    push(&mut v, 0x02, 0x40, "FLPT_SIN", &[R], &[0], false, None);
    push(&mut v, 0x02, 0x41, "FLPT_ASN", &[R], &[0], false, None);
    push(&mut v, 0x02, 0x42, "FLPT_COS", &[R], &[0], false, None);
    push(&mut v, 0x02, 0x43, "FLPT_ACS", &[R], &[0], false, None);
    push(&mut v, 0x02, 0x44, "FLPT_TAN", &[R], &[0], false, None);
    push(&mut v, 0x02, 0x45, "FLPT_ATN", &[R], &[0], false, None);
    src_family(&mut v, 0x02, 0x46, "FLPT_PTN", &[0], None);

    src_family(&mut v, 0x02, 0x50, "FLPT_POW", &[0], None);
    src_family(&mut v, 0x02, 0x60, "FLPT_LOG", &[0], None);

    value_family(&mut v, 0x02, 0x70, "FLPT_WCN");
    value_family(&mut v, 0x02, 0x74, "FLPT_WFN");

    push(&mut v, 0x02, 0x80, "FLPT_EXH", &[R], &[0], false, None);
    push(&mut v, 0x02, 0x81, "FLPT_EXS", &[R], &[0], false, None);
    push(&mut v, 0x02, 0x82, "FLPT_SHS", &[R], &[0], false, None);
    push(&mut v, 0x02, 0x83, "FLPT_SHH", &[R], &[0], false, None);
    push(&mut v, 0x02, 0x90, "FLPT_NEG", &[R], &[0], false, None);
    push(&mut v, 0x02, 0xA0, "FLPT_UTF", &[R], &[0], false, None);
    push(&mut v, 0x02, 0xA1, "FLPT_STF", &[R], &[0], false, None);
    push(&mut v, 0x02, 0xB0, "FLPT_FTS", &[R], &[0], false, None);
    push(&mut v, 0x02, 0xB1, "FLPT_FCS", &[R], &[0], false, None);
    push(&mut v, 0x02, 0xB2, "FLPT_FFS", &[R], &[0], false, None);
    push(&mut v, 0x02, 0xB3, "FLPT_FNS", &[R], &[0], false, None);
    src_family(&mut v, 0x02, 0xC0, "FLPT_CMP", &[], None);

    // --------------------------- extended base set 0x03 ---------------------------
    push(&mut v, 0x03, 0x00, "EXTD_BSW", &[R], &[0], false, None);
    push(&mut v, 0x03, 0x01, "EXTD_QPF", &[R], &[0], false, None);
    push(&mut v, 0x03, 0x02, "EXTD_QPV", &[R], &[0], false, None);
    push(&mut v, 0x03, 0x03, "EXTD_HLT", &[R], &[], false, None);
    push(&mut v, 0x03, 0x04, "EXTD_HLT", &[L], &[], false, None);

    // -------------------------- external assembly set 0x04 --------------------------
    mem_pair(&mut v, 0x04, 0x00, "ASMX_LDA", &[]);
    mem_pair(&mut v, 0x04, 0x02, "ASMX_LDF", &[]);
    push(&mut v, 0x04, 0x04, "ASMX_CLA", &[], &[], false, None);
    push(&mut v, 0x04, 0x05, "ASMX_CLF", &[], &[], false, None);
    reg_path_pair(&mut v, 0x04, 0x06, "ASMX_AEX");
    reg_path_pair(&mut v, 0x04, 0x08, "ASMX_FEX");
    push(&mut v, 0x04, 0x10, "ASMX_CAL", &[], &[], false, None);
    push(&mut v, 0x04, 0x11, "ASMX_CAL", &[R], &[], false, None);
    push(&mut v, 0x04, 0x12, "ASMX_CAL", &[L], &[], false, None);
    push(&mut v, 0x04, 0x13, "ASMX_CAL", &[A], &[], true, None);
    push(&mut v, 0x04, 0x14, "ASMX_CAL", &[P], &[], true, None);

    // ------------------------------- heap set 0x05 -------------------------------
    src_family(&mut v, 0x05, 0x00, "HEAP_ALC", &[0], None);
    src_family(&mut v, 0x05, 0x04, "HEAP_TRY", &[0], None);
    src_family(&mut v, 0x05, 0x08, "HEAP_REA", &[0], None);
    src_family(&mut v, 0x05, 0x0C, "HEAP_TRE", &[0], None);
    push(&mut v, 0x05, 0x10, "HEAP_FRE", &[R], &[], false, None);

    // ---------------------------- filesystem set 0x06 ----------------------------
    mem_pair(&mut v, 0x06, 0x00, "FSYS_CWD", &[]);
    mem_pair(&mut v, 0x06, 0x02, "FSYS_GWD", &[0]);
    mem_pair(&mut v, 0x06, 0x04, "FSYS_CDR", &[]);
    mem_pair(&mut v, 0x06, 0x06, "FSYS_DDR", &[]);
    mem_pair(&mut v, 0x06, 0x08, "FSYS_DDE", &[]);
    reg_path_pair(&mut v, 0x06, 0x0A, "FSYS_DEX");
    push(&mut v, 0x06, 0x10, "FSYS_CPY", &[A, A], &[], true, None);
    push(&mut v, 0x06, 0x11, "FSYS_CPY", &[A, P], &[], true, None);
    push(&mut v, 0x06, 0x12, "FSYS_CPY", &[P, A], &[], true, None);
    push(&mut v, 0x06, 0x13, "FSYS_CPY", &[P, P], &[], true, None);
    push(&mut v, 0x06, 0x14, "FSYS_MOV", &[A, A], &[], true, None);
    push(&mut v, 0x06, 0x15, "FSYS_MOV", &[A, P], &[], true, None);
    push(&mut v, 0x06, 0x16, "FSYS_MOV", &[P, A], &[], true, None);
    push(&mut v, 0x06, 0x17, "FSYS_MOV", &[P, P], &[], true, None);
    push(&mut v, 0x06, 0x20, "FSYS_BDL", &[], &[], false, None);
    mem_pair(&mut v, 0x06, 0x21, "FSYS_GNF", &[0]);
    mem_pair(&mut v, 0x06, 0x23, "FSYS_GND", &[0]);

    // ----------------------------- terminal set 0x07 -----------------------------
    push(&mut v, 0x07, 0x00, "TERM_CLS", &[], &[], false, None);
    push(&mut v, 0x07, 0x01, "TERM_AEE", &[], &[], false, None);
    push(&mut v, 0x07, 0x02, "TERM_AED", &[], &[], false, None);
    push(&mut v, 0x07, 0x03, "TERM_SCY", &[R], &[], false, None);
    push(&mut v, 0x07, 0x04, "TERM_SCY", &[L], &[], false, None);
    push(&mut v, 0x07, 0x05, "TERM_SCX", &[R], &[], false, None);
    push(&mut v, 0x07, 0x06, "TERM_SCX", &[L], &[], false, None);
    push(&mut v, 0x07, 0x07, "TERM_GCY", &[R], &[0], false, None);
    push(&mut v, 0x07, 0x08, "TERM_GCX", &[R], &[0], false, None);
    push(&mut v, 0x07, 0x09, "TERM_GSY", &[R], &[0], false, None);
    push(&mut v, 0x07, 0x0A, "TERM_GSX", &[R], &[0], false, None);
    push(&mut v, 0x07, 0x0B, "TERM_BEP", &[], &[], false, None);
    push(&mut v, 0x07, 0x0C, "TERM_SFC", &[R], &[], false, None);
    push(&mut v, 0x07, 0x0D, "TERM_SFC", &[L], &[], false, None);
    push(&mut v, 0x07, 0x0E, "TERM_SBC", &[R], &[], false, None);
    push(&mut v, 0x07, 0x0F, "TERM_SBC", &[L], &[], false, None);
    push(&mut v, 0x07, 0x10, "TERM_RSC", &[], &[], false, None);

    v
}

/// Alternate mnemonics accepted by the assembler: `(synonym, canonical)`.
/// These never appear in disassembly.
pub const SYNONYMS: &[(&str, &str)] = &[
    ("JZO", "JEQ"),
    ("JNZ", "JNE"),
    ("JCA", "JLT"),
    ("JNC", "JGE"),
];

lazy_static! {
    static ref INSTRUCTIONS: Vec<InstructionInfo> = build_instructions();

    /// Uppercase mnemonic -> all signatures carrying that mnemonic (synonyms included).
    static ref BY_MNEMONIC: HashMap<String, Vec<&'static InstructionInfo>> = {
        let mut m: HashMap<String, Vec<&'static InstructionInfo>> = HashMap::new();
        let instructions: &'static Vec<InstructionInfo> = &INSTRUCTIONS;
        for info in instructions.iter() {
            m.entry(info.mnemonic.to_owned()).or_default().push(info);
        }
        for &(synonym, canonical) in SYNONYMS {
            let infos = m.get(canonical).expect("synonym target must exist").clone();
            assert!(m.insert(synonym.to_owned(), infos).is_none());
        }
        m
    };

    /// Opcode -> canonical instruction. First distinct value wins, though the
    /// forward table as constructed never maps two entries to one opcode.
    static ref BY_OPCODE: HashMap<Opcode, &'static InstructionInfo> = {
        let mut m = HashMap::new();
        let instructions: &'static Vec<InstructionInfo> = &INSTRUCTIONS;
        for info in instructions.iter() {
            m.entry(info.opcode).or_insert(info);
        }
        m
    };
}

/// Looks up an instruction by mnemonic (case-insensitive) and exact operand signature.
pub fn lookup(mnemonic: &str, operands: &[OperandType]) -> Option<&'static InstructionInfo> {
    BY_MNEMONIC.get(&mnemonic.to_ascii_uppercase())?
        .iter().copied().find(|info| info.operands == operands)
}

/// Whether any signature exists for the given mnemonic (case-insensitive).
/// Used to distinguish "unknown mnemonic" from "wrong operands" in diagnostics.
pub fn mnemonic_exists(mnemonic: &str) -> bool {
    BY_MNEMONIC.contains_key(&mnemonic.to_ascii_uppercase())
}

/// All signatures registered for a mnemonic, for operand-mismatch diagnostics.
pub fn signatures_of(mnemonic: &str) -> &'static [&'static InstructionInfo] {
    match BY_MNEMONIC.get(&mnemonic.to_ascii_uppercase()) {
        Some(infos) => infos,
        None => &[],
    }
}

/// Reverse lookup: the canonical instruction for an opcode, if one exists.
pub fn lookup_opcode(opcode: Opcode) -> Option<&'static InstructionInfo> {
    BY_OPCODE.get(&opcode).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_duplicate_signatures() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for info in INSTRUCTIONS.iter() {
            assert!(seen.insert((info.mnemonic, info.operands)), "duplicate {} {:?}", info.mnemonic, info.operands);
        }
    }

    #[test]
    fn test_no_duplicate_opcodes() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for info in INSTRUCTIONS.iter() {
            assert!(seen.insert(info.opcode), "duplicate opcode {}", info.opcode);
        }
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(lookup("HLT", &[]).unwrap().opcode, Opcode::new(0x00, 0x00));
        assert_eq!(lookup("ADD", &[R, R]).unwrap().opcode, Opcode::new(0x00, 0x10));
        assert_eq!(lookup("MVQ", &[R, L]).unwrap().opcode, Opcode::new(0x00, 0x99));
        assert_eq!(lookup("DCR", &[R]).unwrap().opcode, Opcode::new(0x00, 0x24));
        assert_eq!(lookup("JNE", &[A]).unwrap().opcode, Opcode::new(0x00, 0x06));
        assert_eq!(lookup("SIGN_DIV", &[R, L]).unwrap().opcode, Opcode::new(0x01, 0x11));
        assert_eq!(lookup("FLPT_ADD", &[R, R]).unwrap().opcode, Opcode::new(0x02, 0x00));
        assert_eq!(lookup("HEAP_FRE", &[R]).unwrap().opcode, Opcode::new(0x05, 0x10));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        assert_eq!(lookup("mvq", &[R, L]).unwrap().opcode, Opcode::new(0x00, 0x99));
        assert_eq!(lookup("Mvq", &[R, L]).unwrap().opcode, Opcode::new(0x00, 0x99));
        assert!(lookup("MVQ", &[L, L]).is_none());
        assert!(lookup("NOSUCH", &[]).is_none());
        assert!(mnemonic_exists("hlt"));
        assert!(!mnemonic_exists("nosuch"));
    }

    #[test]
    fn test_synonyms_resolve_to_canonical() {
        let jzo = lookup("JZO", &[A]).unwrap();
        let jeq = lookup("JEQ", &[A]).unwrap();
        assert_eq!(jzo.opcode, jeq.opcode);
        // reverse direction only ever sees the canonical name
        assert_eq!(lookup_opcode(jzo.opcode).unwrap().mnemonic, "JEQ");
        assert_eq!(lookup_opcode(lookup("JNC", &[P]).unwrap().opcode).unwrap().mnemonic, "JGE");
    }

    #[test]
    fn test_move_metadata() {
        assert_eq!(lookup("MVB", &[R, L]).unwrap().move_width, Some(8));
        assert_eq!(lookup("MVW", &[A, L]).unwrap().move_width, Some(16));
        assert_eq!(lookup("MVD", &[R, R]).unwrap().move_width, Some(32));
        assert_eq!(lookup("MVQ", &[P, R]).unwrap().move_width, Some(64));
        assert_eq!(lookup("ADD", &[R, R]).unwrap().move_width, None);
        assert!(lookup("DVR", &[R, R, L]).unwrap().writes == &[0, 1]);
        assert!(lookup("CMP", &[R, R]).unwrap().writes.is_empty());
        assert!(lookup("ADD", &[R, A]).unwrap().reads_memory);
        assert!(!lookup("JMP", &[A]).unwrap().reads_memory);
    }
}
