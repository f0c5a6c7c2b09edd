#![forbid(unsafe_code)]

//! `assembly64` is a complete toolchain for the AssEmbly architecture: a small 64-bit
//! register machine with a base instruction set and several optional extension sets
//! (signed arithmetic, floating point, heap allocation, filesystem, terminal control).
//! This crate contains the assembler, the disassembler, and the processor emulator,
//! along with the `.aap` executable container they share (library code only, no cli).
//!
//! # Example of Usage
//!
//! ```
//! # use assembly64::*;
//! // an example program just to show the assemble/execute process
//! let prog = "\
//! MVQ rg0, 5
//! ADD rg0, 3
//! HLT
//! ";
//!
//! // assemble the source into raw program bytes
//! let assembled = match asm::assemble_string(prog, Default::default()) {
//!     Ok(a) => a,
//!     Err(e) => panic!("{}", e), // assemble errors (above program has no errors)
//! };
//!
//! // create a processor, load the program, and run it to completion
//! let mut proc = exec::Processor::new(2048, assembled.entry_point, false);
//! proc.load_program(&assembled.program).unwrap();
//! proc.run_until_halt().unwrap();
//! assert_eq!(proc.read_register(common::Register::Rg0), 8);
//! ```

#[macro_use] extern crate num_derive;
#[macro_use] extern crate lazy_static;

pub mod common;
pub mod asm;
pub mod dis;
pub mod exec;

#[cfg(test)]
mod test;
