use std::cell::RefCell;
use std::rc::Rc;

use crate::asm::{assemble_string, Assembled};
use crate::common::Register;
use crate::exec::io::{MemoryConsole, MemoryFileSystem};
use crate::exec::Processor;

const MEMORY: usize = 2048;

fn asm(source: &str) -> Assembled {
    assemble_string(source, Default::default()).unwrap()
}

/// Assembles and runs a program to completion against fresh in-memory I/O.
fn execute(source: &str) -> Processor {
    let (mut proc, _, _) = start(source, "", MemoryFileSystem::new());
    proc.run_until_halt().unwrap();
    proc
}

/// Assembles and loads a program wired to inspectable in-memory I/O doubles.
/// The caller drives execution (and can keep probing the console/filesystem).
fn start(source: &str, input: &str, filesystem: MemoryFileSystem)
    -> (Processor, Rc<RefCell<MemoryConsole>>, Rc<RefCell<MemoryFileSystem>>) {
    let assembled = asm(source);
    let console = Rc::new(RefCell::new(MemoryConsole::new(input)));
    let filesystem = Rc::new(RefCell::new(filesystem));
    let mut proc = Processor::with_io(MEMORY, assembled.entry_point, false,
        Box::new(console.clone()), Box::new(filesystem.clone()));
    proc.load_program(&assembled.program).unwrap();
    (proc, console, filesystem)
}

fn flags(proc: &Processor) -> u64 {
    proc.read_register(Register::Rsf)
}

/// The program offset a label was bound to, via the assembler's debug info.
fn label_offset(assembled: &Assembled, name: &str) -> u64 {
    *assembled.debug_info.address_labels.iter()
        .find(|(_, names)| names.iter().any(|n| n == name))
        .unwrap().0
}

mod asm_tests;
mod exe_tests;
mod dis_tests;
mod aap_tests;
