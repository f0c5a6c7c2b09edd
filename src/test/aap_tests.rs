use super::*;
use crate::common::aap::{AapError, AapFile};
use crate::common::features;

#[test]
fn test_assemble_to_container_and_run() {
    let assembled = asm("\
        :DATA\n\
        %DAT 99\n\
        :ENTRY\n\
        MVB rg0, :DATA\n\
        FLPT_UTF rg1\n\
        HLT\n");
    let aap = assembled.to_aap(false);
    assert_eq!(aap.entry_point, 1);
    assert_eq!(aap.features, features::EXTENSION_FLOAT);

    let bytes = aap.to_bytes();
    let loaded = AapFile::from_bytes(&bytes, features::INTERPRETER_SUPPORTED).unwrap();
    let mut proc = Processor::new(MEMORY, loaded.entry_point, false);
    proc.load_program(&loaded.program).unwrap();
    proc.run_until_halt().unwrap();
    assert_eq!(proc.read_register(Register::Rg0), 99);
}

#[test]
fn test_compressed_container_roundtrip() {
    let assembled = asm("%REPEAT 100\nNOP\n%ENDREPEAT\nHLT\n");
    let bytes = assembled.to_aap(true).to_bytes();
    let loaded = AapFile::from_bytes(&bytes, features::INTERPRETER_SUPPORTED).unwrap();
    assert_eq!(loaded.program, assembled.program);
    assert_ne!(loaded.features & features::GZIP_COMPRESSED, 0);
}

#[test]
fn test_incompatible_features_fail_before_load() {
    // a program demanding a feature this interpreter lacks must be rejected at
    // container-parse time, before any processor sees its bytes
    let assembled = asm("MVQ rg0, 5\nHLT\n");
    let mut aap = assembled.to_aap(false);
    aap.features |= features::POINTER_DISPLACEMENT;
    match AapFile::from_bytes(&aap.to_bytes(), features::INTERPRETER_SUPPORTED) {
        Err(AapError::Incompatible(bits)) => assert_eq!(bits, features::POINTER_DISPLACEMENT),
        other => panic!("expected an incompatibility failure, got {:?}", other),
    }
}

#[test]
fn test_v1_raw_body_loads_directly() {
    // the header-less v1 format is just the program bytes with entry point 0
    let assembled = asm("MVQ rg0, 1\nHLT\n");
    let mut proc = Processor::new(MEMORY, 0, true);
    proc.load_program(&assembled.program).unwrap();
    proc.run_until_halt().unwrap();
    assert_eq!(proc.read_register(Register::Rg0), 1);
}
