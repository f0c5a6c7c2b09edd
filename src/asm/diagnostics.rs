//! The advisory analyzer: non-fatal diagnostics emitted alongside assembly.
//!
//! Nothing in here can abort assembly; diagnostics accumulate into a list that is
//! returned to the caller, which decides how (or whether) to present them.

use std::collections::HashSet;

use crate::common::isa;
use crate::common::OperandType;

use super::FilePosition;

/// Severity of a non-fatal diagnostic. Each severity has its own disable-by-code set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Severity {
    /// A likely mistake, reported but never fatal.
    NonFatalError,
    Warning,
    Suggestion,
}

/// A single diagnostic record.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: u32,
    pub message: String,
    pub position: FilePosition,
}

/// Everything the analyzer is told about one assembled instruction.
pub struct InstructionContext<'a> {
    pub bytes: &'a [u8],
    pub mnemonic: &'a str,
    pub operands: &'a [String],
    pub operand_types: &'a [OperandType],
    pub position: &'a FilePosition,
    pub is_labelled: bool,
    pub is_entry: bool,
    pub raw_text: &'a str,
    pub import_depth: usize,
}

/// Diagnostic codes currently produced. `%MESSAGE` always uses code 0.
pub mod codes {
    /// Warning: a literal is truncated by a sized move.
    pub const TRUNCATED_LITERAL: u32 = 1;
    /// Non-fatal error: division by a literal zero always faults at runtime.
    pub const LITERAL_DIVIDE_BY_ZERO: u32 = 2;
    /// Warning: instruction is unreachable (follows an unconditional transfer, no label).
    pub const UNREACHABLE_INSTRUCTION: u32 = 3;
    /// Suggestion: `ADD reg, 1` / `SUB reg, 1` have dedicated single-byte-shorter forms.
    pub const PREFER_INCREMENT_FORM: u32 = 4;
    /// Warning: `%DAT` numeric value does not fit in one byte.
    pub const DAT_VALUE_TRUNCATED: u32 = 5;
}

/// Stateful advisory pass over the assembled instruction stream.
///
/// State is only used for cross-instruction rules (currently just unreachable-code
/// detection); everything else is computed from the context alone.
#[derive(Default)]
pub struct Analyzer {
    prev_was_unconditional_transfer: bool,
}
impl Analyzer {
    pub fn new() -> Analyzer {
        Default::default()
    }

    /// Analyzes one instruction and returns its diagnostics (before disable filtering).
    pub fn analyze_instruction(&mut self, ctx: &InstructionContext) -> Vec<Diagnostic> {
        let mut out = vec![];
        let mnemonic = ctx.mnemonic.to_ascii_uppercase();

        if self.prev_was_unconditional_transfer && !ctx.is_labelled && !ctx.is_entry {
            out.push(Diagnostic {
                severity: Severity::Warning,
                code: codes::UNREACHABLE_INSTRUCTION,
                message: "this instruction is unreachable: it follows an unconditional jump or halt and has no label".into(),
                position: ctx.position.clone(),
            });
        }
        self.prev_was_unconditional_transfer = matches!(&*mnemonic, "HLT" | "JMP" | "RET" | "EXTD_HLT");

        if let Some(info) = isa::lookup(&mnemonic, ctx.operand_types) {
            if let (Some(width), Some(value)) = (info.move_width, literal_value(ctx, 1)) {
                if width < 64 && value >> width != 0 {
                    out.push(Diagnostic {
                        severity: Severity::Warning,
                        code: codes::TRUNCATED_LITERAL,
                        message: format!("literal {} is truncated to {} bits by {}", value, width, info.mnemonic),
                        position: ctx.position.clone(),
                    });
                }
            }
        }

        if matches!(&*mnemonic, "DIV" | "REM" | "DVR" | "SIGN_DIV" | "SIGN_REM" | "SIGN_DVR" | "FLPT_DIV" | "FLPT_REM" | "FLPT_DVR") {
            let divisor_index = ctx.operands.len().saturating_sub(1);
            if literal_value(ctx, divisor_index) == Some(0) {
                out.push(Diagnostic {
                    severity: Severity::NonFatalError,
                    code: codes::LITERAL_DIVIDE_BY_ZERO,
                    message: "division by a literal zero will always fault at runtime".into(),
                    position: ctx.position.clone(),
                });
            }
        }

        if matches!(&*mnemonic, "ADD" | "SUB") && literal_value(ctx, 1) == Some(1) {
            let shorter = if mnemonic == "ADD" { "ICR" } else { "DCR" };
            out.push(Diagnostic {
                severity: Severity::Suggestion,
                code: codes::PREFER_INCREMENT_FORM,
                message: format!("{} {}, 1 can be written as {} {}", mnemonic, ctx.operands[0], shorter, ctx.operands[0]),
                position: ctx.position.clone(),
            });
        }

        out
    }

    /// A label definition makes the next instruction reachable again.
    pub fn note_label(&mut self) {
        self.prev_was_unconditional_transfer = false;
    }
}

/// The numeric value of operand `index` if it is a plain numeric literal.
fn literal_value(ctx: &InstructionContext, index: usize) -> Option<u64> {
    if ctx.operand_types.get(index) != Some(&OperandType::Literal) { return None; }
    let token = &ctx.operands[index];
    if token.starts_with('"') || token.starts_with(':') { return None; }
    super::operands::parse_literal(token, false).ok().map(|lit| lit.value)
}

/// Per-severity sets of disabled diagnostic codes, mutable mid-assembly via `%ANALYZER`.
#[derive(Clone, Default, Debug)]
pub struct DisabledCodes {
    pub non_fatal_errors: HashSet<u32>,
    pub warnings: HashSet<u32>,
    pub suggestions: HashSet<u32>,
}
impl DisabledCodes {
    pub fn is_disabled(&self, severity: Severity, code: u32) -> bool {
        match severity {
            Severity::NonFatalError => self.non_fatal_errors.contains(&code),
            Severity::Warning => self.warnings.contains(&code),
            Severity::Suggestion => self.suggestions.contains(&code),
        }
    }
    pub fn set(&mut self, severity: Severity, code: u32, disabled: bool) {
        let set = match severity {
            Severity::NonFatalError => &mut self.non_fatal_errors,
            Severity::Warning => &mut self.warnings,
            Severity::Suggestion => &mut self.suggestions,
        };
        if disabled { set.insert(code); } else { set.remove(&code); }
    }
}
