use super::*;
use crate::asm::{assemble_file, AssembleOptions};
use crate::asm::diagnostics::{codes, Severity};
use crate::common::features;

use std::fs;
use std::path::PathBuf;

/// A scratch directory for tests that exercise file imports.
fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("assembly64_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_exact_encoding() {
    let assembled = asm("\
        MVQ rg0, 5\n\
        ADD rg0, 3\n\
        HLT\n");
    let mut expected = vec![0x99, 0x06];
    expected.extend_from_slice(&5u64.to_le_bytes());
    expected.extend_from_slice(&[0x11, 0x06]);
    expected.extend_from_slice(&3u64.to_le_bytes());
    expected.push(0x00);
    assert_eq!(assembled.program, expected);
    assert_eq!(assembled.program.len(), 21);
    assert_eq!(assembled.entry_point, 0);
    assert_eq!(assembled.used_features, 0);
}

#[test]
fn test_entry_label() {
    let assembled = asm("\
        :DATA\n\
        %DAT 99\n\
        :ENTRY\n\
        HLT\n");
    assert_eq!(assembled.entry_point, 1);
}

#[test]
fn test_used_feature_accumulation() {
    let assembled = asm("\
        MVQ rg0, 1.0\n\
        FLPT_ADD rg0, 1.0\n\
        HEAP_ALC rg1, 8\n\
        HEAP_FRE rg1\n\
        HLT\n");
    assert_eq!(assembled.used_features,
        features::EXTENSION_FLOAT | features::EXTENSION_HEAP);

    let options = AssembleOptions { v1_call_stack: true, ..Default::default() };
    let assembled = assemble_string("HLT\n", options).unwrap();
    assert_eq!(assembled.used_features, features::V1_CALL_STACK);
}

#[test]
fn test_debug_info_contents() {
    let assembled = asm("\
        MVQ rg0, 5\n\
        :LOOP\n\
        DCR rg0\n\
        JNE :LOOP\n\
        HLT\n");
    let info = &assembled.debug_info;
    assert_eq!(info.program_length, assembled.program.len() as u64);
    assert_eq!(info.assembled_instructions[0], (0, "MVQ rg0, 5".to_owned()));
    assert_eq!(info.address_labels.get(&10), Some(&vec!["LOOP".to_owned()]));
    // the text form survives a parse cycle
    let text = info.generate();
    assert_eq!(&crate::asm::debug_info::DebugInfo::parse(&text).unwrap(), info);
}

#[test]
fn test_analyzer_diagnostics_surface() {
    let assembled = asm("\
        MVQ rg0, 5\n\
        HLT\n\
        NOP\n");
    assert!(assembled.diagnostics.iter().any(|d|
        d.code == codes::UNREACHABLE_INSTRUCTION && d.severity == Severity::Warning));

    // suggestions can be disabled by code
    let assembled = asm("ADD rg0, 1\nHLT\n");
    assert!(assembled.diagnostics.iter().any(|d| d.code == codes::PREFER_INCREMENT_FORM));
    let mut options = AssembleOptions::default();
    options.disabled_codes.set(Severity::Suggestion, codes::PREFER_INCREMENT_FORM, true);
    let assembled = assemble_string("ADD rg0, 1\nHLT\n", options).unwrap();
    assert!(assembled.diagnostics.iter().all(|d| d.code != codes::PREFER_INCREMENT_FORM));
}

#[test]
fn test_import_splices_in_place() {
    let dir = scratch_dir("import_splice");
    fs::write(dir.join("lib.asm"), "MVQ rg1, 2\n").unwrap();
    fs::write(dir.join("main.asm"), "MVQ rg0, 1\n%IMP \"lib.asm\"\nHLT\n").unwrap();

    let assembled = assemble_file(dir.join("main.asm"), Default::default()).unwrap();
    let expected = asm("MVQ rg0, 1\nMVQ rg1, 2\nHLT\n");
    assert_eq!(assembled.program, expected.program);
    assert_eq!(assembled.debug_info.resolved_imports.len(), 1);
    assert_eq!(assembled.debug_info.resolved_imports[0].0, "lib.asm");

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_imported_labels_resolve() {
    let dir = scratch_dir("import_labels");
    fs::write(dir.join("lib.asm"), ":FUNC\nRET 9\n").unwrap();
    fs::write(dir.join("main.asm"), "CAL :FUNC\nHLT\n%IMP \"lib.asm\"\n").unwrap();

    let assembled = assemble_file(dir.join("main.asm"), Default::default()).unwrap();
    let mut proc = Processor::new(MEMORY, assembled.entry_point, false);
    proc.load_program(&assembled.program).unwrap();
    proc.run_until_halt().unwrap();
    assert_eq!(proc.read_register(Register::Rrv), 9);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_asm_once_guards_double_import() {
    let dir = scratch_dir("asm_once");
    fs::write(dir.join("lib.asm"), "%ASM_ONCE\nMVQ rg1, 2\n").unwrap();
    fs::write(dir.join("main.asm"), "%IMP \"lib.asm\"\n%IMP \"lib.asm\"\nHLT\n").unwrap();

    let assembled = assemble_file(dir.join("main.asm"), Default::default()).unwrap();
    let expected = asm("MVQ rg1, 2\nHLT\n");
    assert_eq!(assembled.program, expected.program);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_repeat_with_import() {
    // re-importing inside a %REPEAT body must splice fresh lines each iteration
    let dir = scratch_dir("repeat_import");
    fs::write(dir.join("lib.asm"), "NOP\n").unwrap();
    fs::write(dir.join("main.asm"), "%REPEAT 3\n%IMP \"lib.asm\"\n%ENDREPEAT\nHLT\n").unwrap();

    let assembled = assemble_file(dir.join("main.asm"), Default::default()).unwrap();
    assert_eq!(assembled.program, vec![0x01, 0x01, 0x01, 0x00]);

    fs::remove_dir_all(&dir).unwrap();
}
