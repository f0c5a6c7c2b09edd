use super::*;
use crate::dis::{disassemble, DisassemblerOptions};

fn reassemble(program: &[u8]) -> Vec<u8> {
    let text = disassemble(program, &DisassemblerOptions::default());
    asm(&text).program
}

#[test]
fn test_roundtrip_simple_program() {
    let program = asm("\
        MVQ rg0, 5\n\
        ADD rg0, 3\n\
        HLT\n").program;
    assert_eq!(reassemble(&program), program);
}

#[test]
fn test_roundtrip_with_labels_and_jumps() {
    let program = asm("\
        MVQ rg0, 3\n\
        :LOOP\n\
        DCR rg0\n\
        JNE :LOOP\n\
        CAL :FUNC, 7\n\
        HLT\n\
        :FUNC\n\
        RET rfp\n").program;
    let text = disassemble(&program, &DisassemblerOptions::default());
    // the backward jump target is reconstructed as a synthetic label
    assert!(text.contains(":ADDR_A"), "{}", text);
    assert_eq!(asm(&text).program, program);
}

#[test]
fn test_roundtrip_extension_sets() {
    let program = asm("\
        MVQ rg0, 2.5\n\
        FLPT_ADD rg0, 0.5\n\
        SIGN_NEG rg1\n\
        HEAP_ALC rg2, 64\n\
        EXTD_HLT 3\n").program;
    assert_eq!(reassemble(&program), program);
}

#[test]
fn test_string_data_roundtrip() {
    let program = asm("%DAT \"AB\"\n").program;
    assert_eq!(program, b"AB");
    let text = disassemble(&program, &DisassemblerOptions::default());
    assert_eq!(text, "%DAT \"AB\"\n");
    assert_eq!(asm(&text).program, program);
}

#[test]
fn test_pad_roundtrip() {
    let program = asm("%PAD 5\n").program;
    assert_eq!(program, vec![0; 5]);
    let text = disassemble(&program, &DisassemblerOptions::default());
    assert_eq!(text, "HLT\n%PAD 4\n");
    assert_eq!(asm(&text).program, program);
}

#[test]
fn test_foreign_bytes_roundtrip() {
    // a blob the assembler never produced: text, an unassigned opcode, zeros,
    // and a redundant fully-qualified base encoding
    let mut blob = b"Hello".to_vec();
    blob.extend_from_slice(&[0xF5, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x01]);
    assert_eq!(reassemble(&blob), blob);
}

#[test]
fn test_second_cycle_stabilizes() {
    let program = asm("\
        MVQ rg0, 1000\n\
        WCN rg0\n\
        %DAT \"xy\"\n\
        HLT\n").program;
    let first = reassemble(&program);
    let second = reassemble(&first);
    assert_eq!(first, second);
    assert_eq!(first, program);
}

#[test]
fn test_disassembled_program_still_runs() {
    let source = "\
        MVQ rg0, 5\n\
        :LOOP\n\
        DCR rg0\n\
        JNE :LOOP\n\
        MVQ rg1, 7\n\
        HLT\n";
    let program = asm(source).program;
    let text = disassemble(&program, &DisassemblerOptions::default());
    let rebuilt = asm(&text);

    let mut proc = Processor::new(MEMORY, rebuilt.entry_point, false);
    proc.load_program(&rebuilt.program).unwrap();
    proc.run_until_halt().unwrap();
    assert_eq!(proc.read_register(Register::Rg0), 0);
    assert_eq!(proc.read_register(Register::Rg1), 7);
}
