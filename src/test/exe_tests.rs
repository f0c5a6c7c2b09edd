use super::*;
use crate::common::{features, status_flags};
use crate::exec::io::FileSystem;
use crate::exec::RuntimeError;

#[test]
fn test_add_program() {
    let proc = execute("\
        MVQ rg0, 5\n\
        ADD rg0, 3\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0), 8);
    assert_eq!(flags(&proc) & (status_flags::ZERO | status_flags::CARRY), 0);
    // rpo rests one past the halt opcode
    assert_eq!(proc.read_register(Register::Rpo), 21);
}

#[test]
fn test_countdown_loop() {
    let proc = execute("\
        MVQ rg0, 3\n\
        :LOOP\n\
        DCR rg0\n\
        JNE :LOOP\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0), 0);
    assert_ne!(flags(&proc) & status_flags::ZERO, 0);
}

#[test]
fn test_add_flag_laws() {
    // unsigned wrap: carry + zero, no overflow
    let proc = execute("\
        MVQ rg0, 18446744073709551615\n\
        ADD rg0, 1\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0), 0);
    let f = flags(&proc);
    assert_ne!(f & status_flags::CARRY, 0);
    assert_ne!(f & status_flags::ZERO, 0);
    assert_eq!(f & status_flags::OVERFLOW, 0);

    // signed wrap: overflow + sign, no carry
    let proc = execute("\
        MVQ rg0, 9223372036854775807\n\
        ADD rg0, 1\n\
        HLT\n");
    let f = flags(&proc);
    assert_ne!(f & status_flags::OVERFLOW, 0);
    assert_ne!(f & status_flags::SIGN, 0);
    assert_eq!(f & status_flags::CARRY, 0);
}

#[test]
fn test_sub_borrow() {
    let proc = execute("\
        MVQ rg0, 5\n\
        SUB rg0, 10\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0), 5u64.wrapping_sub(10));
    let f = flags(&proc);
    assert_ne!(f & status_flags::CARRY, 0);
    assert_ne!(f & status_flags::SIGN, 0);
    assert_eq!(f & status_flags::OVERFLOW, 0);
}

#[test]
fn test_mul_carry_heuristic() {
    // the product wraps to zero, which reads as "less than initial"
    let proc = execute("\
        MVQ rg0, 2\n\
        MUL rg0, 0x8000000000000000\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0), 0);
    let f = flags(&proc);
    assert_ne!(f & status_flags::CARRY, 0);
    assert_ne!(f & status_flags::ZERO, 0);
    assert_eq!(f & status_flags::OVERFLOW, 0);
}

#[test]
fn test_divide() {
    let proc = execute("\
        MVQ rg0, 17\n\
        MVQ rg2, 17\n\
        DVR rg0, rg1, 5\n\
        REM rg2, 5\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0), 3);
    assert_eq!(proc.read_register(Register::Rg1), 2);
    assert_eq!(proc.read_register(Register::Rg2), 2);
}

#[test]
fn test_divide_by_zero_faults() {
    let assembled = asm("\
        MVQ rg0, 1\n\
        DIV rg0, 0\n\
        HLT\n");
    let mut proc = Processor::new(MEMORY, assembled.entry_point, false);
    proc.load_program(&assembled.program).unwrap();
    assert!(matches!(proc.run_until_halt(), Err(RuntimeError::DivideByZero)));
}

#[test]
fn test_signed_division() {
    let proc = execute("\
        MVQ rg0, -17\n\
        SIGN_DVR rg0, rg1, 5\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0) as i64, -3);
    assert_eq!(proc.read_register(Register::Rg1) as i64, -2);
}

#[test]
fn test_shifts() {
    // shifting out a nonzero high bit sets carry; count >= 64 forces zero
    let proc = execute("\
        MVQ rg0, 0x8000000000000001\n\
        SHL rg0, 1\n\
        MVQ rg1, 1\n\
        SHL rg1, 64\n\
        MVQ rg2, 5\n\
        SHR rg2, 1\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0), 2);
    assert_eq!(proc.read_register(Register::Rg1), 0);
    assert_eq!(proc.read_register(Register::Rg2), 2);
    // the last SHR discarded a 1 bit
    assert_ne!(flags(&proc) & status_flags::CARRY, 0);
}

#[test]
fn test_signed_shift_right() {
    // the discarded bits are compared against the sign-extension pattern, not
    // against zero: -8 ends in 000, so shifting out 00 from a negative value
    // loses information and sets carry
    let proc = execute("\
        MVQ rg0, -8\n\
        SIGN_SHR rg0, 2\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0) as i64, -2);
    assert_ne!(flags(&proc) & status_flags::CARRY, 0);

    // -5 ends in 011: both discarded bits match the sign pattern, carry stays clear
    let proc = execute("\
        MVQ rg0, -5\n\
        SIGN_SHR rg0, 2\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0) as i64, -2);
    assert_eq!(flags(&proc) & status_flags::CARRY, 0);

    let proc = execute("\
        MVQ rg0, 5\n\
        SIGN_SHR rg0, 1\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0), 2);
    assert_ne!(flags(&proc) & status_flags::CARRY, 0);
}

#[test]
fn test_unsigned_and_signed_comparison_jumps() {
    let proc = execute("\
        MVQ rg0, 3\n\
        CMP rg0, 5\n\
        JLT :BELOW\n\
        HLT\n\
        :BELOW\n\
        MVQ rg1, 1\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg1), 1);

    // -5 compares below 5 signed, but far above it unsigned
    let proc = execute("\
        MVQ rg0, -5\n\
        CMP rg0, 5\n\
        JLT :UNSIGNED\n\
        SIGN_JLT :SIGNED\n\
        HLT\n\
        :UNSIGNED\n\
        MVQ rg1, 1\n\
        HLT\n\
        :SIGNED\n\
        MVQ rg2, 1\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg1), 0);
    assert_eq!(proc.read_register(Register::Rg2), 1);
}

#[test]
fn test_push_pop() {
    let proc = execute("\
        PSH 7\n\
        PSH 8\n\
        POP rg0\n\
        POP rg1\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0), 8);
    assert_eq!(proc.read_register(Register::Rg1), 7);
    assert_eq!(proc.read_register(Register::Rso), MEMORY as u64);
}

#[test]
fn test_call_and_return() {
    let proc = execute("\
        CAL :FUNC, 7\n\
        HLT\n\
        :FUNC\n\
        ADD rfp, 1\n\
        RET rfp\n");
    assert_eq!(proc.read_register(Register::Rrv), 8);
    // the frame unwinds completely
    assert_eq!(proc.read_register(Register::Rso), MEMORY as u64);
    assert_eq!(proc.read_register(Register::Rsb), MEMORY as u64);
}

#[test]
fn test_nested_calls() {
    let proc = execute("\
        CAL :OUTER\n\
        HLT\n\
        :OUTER\n\
        CAL :INNER, 20\n\
        ADD rrv, 1\n\
        RET rrv\n\
        :INNER\n\
        ADD rfp, 100\n\
        RET rfp\n");
    assert_eq!(proc.read_register(Register::Rrv), 121);
    assert_eq!(proc.read_register(Register::Rso), MEMORY as u64);
}

#[test]
fn test_v1_call_stack_frames() {
    // the same program balances under the legacy 24-byte frame convention
    let assembled = asm("\
        CAL :FUNC, 7\n\
        HLT\n\
        :FUNC\n\
        RET rfp\n");
    let mut proc = Processor::new(MEMORY, assembled.entry_point, true);
    proc.load_program(&assembled.program).unwrap();
    proc.run_until_halt().unwrap();
    assert_eq!(proc.read_register(Register::Rrv), 7);
    assert_eq!(proc.read_register(Register::Rso), MEMORY as u64);
    assert_eq!(proc.read_register(Register::Rsb), MEMORY as u64);
}

#[test]
fn test_memory_moves() {
    let assembled = asm("\
        MVQ :BUF, 0x1122334455667788\n\
        MVB rg0, :BUF\n\
        MVW rg1, :BUF\n\
        MVD rg2, :BUF\n\
        MVQ rg3, :BUF\n\
        HLT\n\
        :BUF\n\
        %PAD 8\n");
    let mut proc = Processor::new(MEMORY, assembled.entry_point, false);
    proc.load_program(&assembled.program).unwrap();
    proc.run_until_halt().unwrap();
    assert_eq!(proc.read_register(Register::Rg0), 0x88);
    assert_eq!(proc.read_register(Register::Rg1), 0x7788);
    assert_eq!(proc.read_register(Register::Rg2), 0x55667788);
    assert_eq!(proc.read_register(Register::Rg3), 0x1122334455667788);

    let buf = label_offset(&assembled, "BUF") as usize;
    assert_eq!(&proc.memory()[buf..buf + 8], &0x1122334455667788u64.to_le_bytes());
}

#[test]
fn test_sign_extending_moves() {
    let proc = execute("\
        SIGN_MVB rg0, 255\n\
        SIGN_MVW rg1, 0x8000\n\
        MVB rg2, 255\n\
        SIGN_NEG rg2\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0), u64::MAX);
    assert_eq!(proc.read_register(Register::Rg1) as i64, -32768);
    assert_eq!(proc.read_register(Register::Rg2) as i64, -255);
}

#[test]
fn test_float_arithmetic() {
    let proc = execute("\
        MVQ rg0, 2.5\n\
        FLPT_ADD rg0, 0.5\n\
        MVQ rg1, 2.0\n\
        FLPT_POW rg1, 10.0\n\
        FLPT_FTS rg1\n\
        HLT\n");
    assert_eq!(f64::from_bits(proc.read_register(Register::Rg0)), 3.0);
    assert_eq!(proc.read_register(Register::Rg1), 1024);
}

#[test]
fn test_float_conversions_and_compare() {
    let proc = execute("\
        MVQ rg0, 7\n\
        FLPT_UTF rg0\n\
        MVQ rg1, 2.5\n\
        FLPT_CMP rg1, 3.5\n\
        JLT :LOWER\n\
        HLT\n\
        :LOWER\n\
        MVQ rg2, 1\n\
        HLT\n");
    assert_eq!(f64::from_bits(proc.read_register(Register::Rg0)), 7.0);
    assert_eq!(proc.read_register(Register::Rg2), 1);
}

#[test]
fn test_extended_base_set() {
    let proc = execute("\
        MVQ rg0, 0x0102030405060708\n\
        EXTD_BSW rg0\n\
        EXTD_QPF rg1\n\
        EXTD_QPV rg2\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg0), 0x0807060504030201);
    assert_eq!(proc.read_register(Register::Rg1), features::INTERPRETER_SUPPORTED);
    // major in the high half, minor alone in the low half
    let (major, minor, _) = crate::common::LANGUAGE_VERSION;
    assert_eq!(proc.read_register(Register::Rg2), ((major as u64) << 32) | minor as u64);
    assert_eq!(proc.read_register(Register::Rg2) as u32, minor);
}

#[test]
fn test_extd_hlt_exit_code() {
    let proc = execute("EXTD_HLT 42\n");
    assert_eq!(proc.exit_code(), 42);
}

#[test]
fn test_console_writes() {
    let (mut proc, console, _) = start("\
        MVQ rg0, 42\n\
        WCN rg0\n\
        WCC 10\n\
        MVQ rg1, 255\n\
        WCX rg1\n\
        SIGN_WCN -5\n\
        MVQ rg2, 2.5\n\
        FLPT_WCN rg2\n\
        HLT\n", "", MemoryFileSystem::new());
    proc.run_until_halt().unwrap();
    assert_eq!(console.borrow().output_string(), "42\nFF-52.5");
}

#[test]
fn test_raw_byte_writes_preserve_utf8() {
    // é written as two separate raw bytes must come out as one character
    let (mut proc, console, _) = start("\
        WCC 0xC3\n\
        WCC 0xA9\n\
        HLT\n", "", MemoryFileSystem::new());
    proc.run_until_halt().unwrap();
    assert_eq!(console.borrow().output_string(), "é");
}

#[test]
fn test_console_read_with_echo() {
    // TERM_AEE turns on auto-echo; each RCC echoes the raw byte it consumed
    let (mut proc, console, _) = start("\
        TERM_AEE\n\
        RCC rg0\n\
        RCC rg1\n\
        RCC rg2\n\
        HLT\n", "aé", MemoryFileSystem::new());
    proc.run_until_halt().unwrap();
    assert_eq!(proc.read_register(Register::Rg0), b'a' as u64);
    // the two UTF-8 bytes of é arrive over consecutive reads
    assert_eq!(proc.read_register(Register::Rg1), 0xC3);
    assert_eq!(proc.read_register(Register::Rg2), 0xA9);
    assert_eq!(console.borrow().output_string(), "aé");
}

#[test]
fn test_file_write_and_read_back() {
    let (mut proc, _, fs) = start("\
        OFL :FILE\n\
        WFC 72\n\
        WFC 105\n\
        CFL\n\
        HLT\n\
        :FILE\n\
        %DAT \"out.txt\\0\"\n", "", MemoryFileSystem::new());
    proc.run_until_halt().unwrap();
    assert_eq!(fs.borrow().file_content("out.txt").unwrap(), b"Hi");

    let (mut proc, _, _) = start("\
        OFL :FILE\n\
        RFC rg0\n\
        RFC rg1\n\
        CFL\n\
        HLT\n\
        :FILE\n\
        %DAT \"in.txt\\0\"\n", "", MemoryFileSystem::new().with_file("in.txt", b"AB"));
    proc.run_until_halt().unwrap();
    assert_eq!(proc.read_register(Register::Rg0), b'A' as u64);
    assert_eq!(proc.read_register(Register::Rg1), b'B' as u64);
    assert_ne!(flags(&proc) & status_flags::FILE_END, 0);
}

#[test]
fn test_file_protocol_violations() {
    // second OFL while a file is open
    let (mut proc, _, _) = start("\
        OFL :FILE\n\
        OFL :FILE\n\
        HLT\n\
        :FILE\n\
        %DAT \"f.txt\\0\"\n", "", MemoryFileSystem::new());
    assert!(matches!(proc.run_until_halt(), Err(RuntimeError::FileOperation(_))));

    // reading past the end of a freshly-created empty file
    let (mut proc, _, _) = start("\
        OFL :FILE\n\
        RFC rg0\n\
        HLT\n\
        :FILE\n\
        %DAT \"f.txt\\0\"\n", "", MemoryFileSystem::new());
    assert!(matches!(proc.run_until_halt(), Err(RuntimeError::FileOperation(_))));

    // writing with no file open
    let (mut proc, _, _) = start("WFC 65\nHLT\n", "", MemoryFileSystem::new());
    assert!(matches!(proc.run_until_halt(), Err(RuntimeError::FileOperation(_))));
}

#[test]
fn test_file_queries() {
    let (mut proc, _, _) = start("\
        FEX rg0, :FILE\n\
        FSZ rg1, :FILE\n\
        DFL :FILE\n\
        FEX rg2, :FILE\n\
        HLT\n\
        :FILE\n\
        %DAT \"data.bin\\0\"\n", "", MemoryFileSystem::new().with_file("data.bin", b"12345"));
    proc.run_until_halt().unwrap();
    assert_eq!(proc.read_register(Register::Rg0), 1);
    assert_eq!(proc.read_register(Register::Rg1), 5);
    assert_eq!(proc.read_register(Register::Rg2), 0);
}

#[test]
fn test_heap_allocation() {
    let proc = execute("\
        HEAP_ALC rg0, 16\n\
        HEAP_ALC rg1, 16\n\
        HEAP_FRE rg0\n\
        HEAP_ALC rg2, 8\n\
        HEAP_TRY rg3, 1000000\n\
        HLT\n");
    // the freed first block is reused first-fit
    assert_eq!(proc.read_register(Register::Rg2), proc.read_register(Register::Rg0));
    assert_ne!(proc.read_register(Register::Rg1), proc.read_register(Register::Rg0));
    // an impossible TRY reports failure instead of faulting
    assert_eq!(proc.read_register(Register::Rg3), u64::MAX);
}

#[test]
fn test_heap_realloc_preserves_contents() {
    let proc = execute("\
        HEAP_ALC rg0, 4\n\
        MVB *rg0, 0xAB\n\
        HEAP_ALC rg1, 4\n\
        HEAP_REA rg0, 64\n\
        MVB rg2, *rg0\n\
        HLT\n");
    assert_eq!(proc.read_register(Register::Rg2), 0xAB);
}

#[test]
fn test_heap_invalid_block_faults() {
    let assembled = asm("\
        MVQ rg0, 12345\n\
        HEAP_FRE rg0\n\
        HLT\n");
    let mut proc = Processor::new(MEMORY, assembled.entry_point, false);
    proc.load_program(&assembled.program).unwrap();
    assert!(matches!(proc.run_until_halt(), Err(RuntimeError::InvalidHeapBlock { address: 12345 })));
}

#[test]
fn test_filesystem_directories() {
    let assembled = asm("\
        FSYS_CDR :DIR\n\
        FSYS_DEX rg0, :DIR\n\
        FSYS_CWD :DIR\n\
        FSYS_GWD :BUF\n\
        HLT\n\
        :DIR\n\
        %DAT \"sub\\0\"\n\
        :BUF\n\
        %PAD 16\n");
    let fs = Rc::new(RefCell::new(MemoryFileSystem::new()));
    let mut proc = Processor::with_io(MEMORY, assembled.entry_point, false,
        Box::new(MemoryConsole::new("")), Box::new(fs.clone()));
    proc.load_program(&assembled.program).unwrap();
    proc.run_until_halt().unwrap();

    assert_eq!(proc.read_register(Register::Rg0), 1);
    assert_eq!(fs.borrow().working_dir(), "sub");
    let buf = label_offset(&assembled, "BUF") as usize;
    assert_eq!(&proc.memory()[buf..buf + 4], b"sub\0");
}

#[test]
fn test_directory_listing() {
    let assembled = asm("\
        FSYS_BDL\n\
        FSYS_GNF :BUF\n\
        FSYS_GNF :BUF2\n\
        FSYS_GNF :BUF3\n\
        HLT\n\
        :BUF\n\
        %PAD 8\n\
        :BUF2\n\
        %PAD 8\n\
        :BUF3\n\
        %PAD 8\n");
    let fs = MemoryFileSystem::new().with_file("a.txt", b"").with_file("b.txt", b"");
    let mut proc = Processor::with_io(MEMORY, assembled.entry_point, false,
        Box::new(MemoryConsole::new("")), Box::new(Rc::new(RefCell::new(fs))));
    proc.load_program(&assembled.program).unwrap();
    proc.run_until_halt().unwrap();

    let read_name = |label: &str| {
        let at = label_offset(&assembled, label) as usize;
        let bytes = &proc.memory()[at..at + 8];
        let len = bytes.iter().position(|&b| b == 0).unwrap();
        String::from_utf8_lossy(&bytes[..len]).into_owned()
    };
    assert_eq!(read_name("BUF"), "a.txt");
    assert_eq!(read_name("BUF2"), "b.txt");
    // an exhausted listing yields the empty string
    assert_eq!(read_name("BUF3"), "");
}

#[test]
fn test_terminal_control() {
    let (mut proc, console, _) = start("\
        TERM_CLS\n\
        TERM_BEP\n\
        TERM_SCX 10\n\
        TERM_SCY 5\n\
        TERM_GCX rg0\n\
        TERM_GSX rg1\n\
        TERM_SFC 9\n\
        HLT\n", "", MemoryFileSystem::new());
    proc.run_until_halt().unwrap();
    assert_eq!(proc.read_register(Register::Rg0), 10);
    assert_eq!(proc.read_register(Register::Rg1), 80);
    let console = console.borrow();
    assert_eq!(console.clears, 1);
    assert_eq!(console.beeps, 1);
    assert_eq!(console.cursor_y, 5);
    assert_eq!(console.foreground, Some(9));
}

#[test]
fn test_invalid_opcode_faults() {
    let mut proc = Processor::new(MEMORY, 0, false);
    proc.load_program(&[0xF5]).unwrap();
    assert!(matches!(proc.step(),
        Err(RuntimeError::InvalidOpcode { offset: 0, extension_set: 0, code: 0xF5 })));

    // the external-assembly set is never executable in this interpreter
    let mut proc = Processor::new(MEMORY, 0, false);
    proc.load_program(&[0xFF, 0x04, 0x00]).unwrap();
    assert!(matches!(proc.step(),
        Err(RuntimeError::InvalidOpcode { extension_set: 0x04, .. })));
}

#[test]
fn test_out_of_bounds_memory_faults() {
    // jump far past the end of memory, then try to execute there
    let mut proc = Processor::new(64, 0, false);
    let mut program = vec![0x02];
    program.extend_from_slice(&1000u64.to_le_bytes());
    proc.load_program(&program).unwrap();
    proc.step().unwrap();
    assert!(matches!(proc.step(), Err(RuntimeError::MemOutOfBounds { address: 1000 })));
}

#[test]
fn test_single_stepping() {
    let assembled = asm("MVQ rg0, 5\nADD rg0, 3\nHLT\n");
    let mut proc = Processor::new(MEMORY, assembled.entry_point, false);
    proc.load_program(&assembled.program).unwrap();
    assert!(!proc.step().unwrap());
    assert_eq!(proc.read_register(Register::Rg0), 5);
    assert!(!proc.step().unwrap());
    assert_eq!(proc.read_register(Register::Rg0), 8);
    assert!(proc.step().unwrap());
}
