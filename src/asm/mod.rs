//! The AssEmbly assembler: source text in, flat program bytes out.
//!
//! Assembly is a single pass over a dynamic line list. Directives that expand
//! into more source (`%IMP`, multi-line macro invocations) splice lines into the
//! list just past the cursor; `%REPEAT` rewinds the cursor over lines already in
//! the list. Forward label references are recorded and backpatched once the full
//! program has been emitted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::common::{features, isa, OperandType, Register};
use crate::common::aap::AapFile;

pub mod operands;
pub mod diagnostics;
pub mod debug_info;

use diagnostics::{Analyzer, Diagnostic, DisabledCodes, InstructionContext, Severity};
use debug_info::DebugInfo;
use operands::{determine_operand_type, is_valid_name, parse_line, parse_literal, LineError};

/// A location in assembly source: file display name plus 1-based line number.
#[derive(Clone, Debug)]
pub struct FilePosition {
    pub file: Rc<str>,
    pub line: usize,
}
impl fmt::Display for FilePosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {} of {}", self.line, self.file)
    }
}

/// Broad classification of a fatal assembly error.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AsmErrorKind {
    /// The line itself could not be tokenized.
    Syntax,
    /// An operand was malformed or did not match any form of the mnemonic.
    Operand,
    /// The mnemonic or directive does not exist.
    Opcode,
    /// An invalid, duplicate, undefined, or self-referential label.
    LabelName,
    /// An invalid, missing, or unterminated macro.
    MacroName,
    /// An invalid or undefined assembler variable.
    VariableName,
    /// A file could not be imported or read.
    Import,
    /// A block directive (`%ENDMACRO`, `%ENDREPEAT`) was missing or unmatched.
    EndingDirective,
    /// `%STOP` was reached.
    Stopped,
}

/// Where a fatal error was raised, with enough context to render a caret.
#[derive(Debug)]
pub struct ErrorPosition {
    pub position: FilePosition,
    /// The line text as it was being parsed (after macro/variable substitution).
    pub source_text: String,
    /// Byte column of the offending character within `source_text`, if known.
    pub column: Option<usize>,
}

/// A fatal assembly error. Rendering includes the source line, an optional caret,
/// and the chain of imports leading to the offending file.
#[derive(Debug)]
pub struct AsmError {
    pub kind: AsmErrorKind,
    pub message: String,
    pub position: Option<ErrorPosition>,
    /// Innermost first: the `%IMP` locations active when the error was raised.
    pub import_chain: Vec<FilePosition>,
}
impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "error: {}", self.message)?;
        if let Some(pos) = &self.position {
            write!(f, "\n  in {}", pos.position)?;
            if !pos.source_text.trim().is_empty() {
                write!(f, "\n    {}", pos.source_text.trim_end())?;
                if let Some(col) = pos.column {
                    write!(f, "\n    {}^", " ".repeat(col))?;
                }
            }
        }
        for link in &self.import_chain {
            write!(f, "\n  imported from {}", link)?;
        }
        Ok(())
    }
}
impl std::error::Error for AsmError {}

/// Caller-facing assembly configuration.
#[derive(Clone, Default, Debug)]
pub struct AssembleOptions {
    /// Diagnostic codes suppressed from the start (also the `%ANALYZER ... r` baseline).
    pub disabled_codes: DisabledCodes,
    /// Target the legacy 24-byte `CAL` frame layout instead of the 16-byte one.
    pub v1_call_stack: bool,
}

/// The output of a successful assembly.
#[derive(Debug)]
pub struct Assembled {
    pub program: Vec<u8>,
    pub entry_point: u64,
    /// AAP feature bits required by the emitted instructions.
    pub used_features: u64,
    /// Non-fatal diagnostics, in emission order, already filtered by disabled codes.
    pub diagnostics: Vec<Diagnostic>,
    pub debug_info: DebugInfo,
}
impl Assembled {
    /// Wraps the program in an AAP container, optionally gzip-compressing the body.
    pub fn to_aap(&self, compress: bool) -> AapFile {
        let mut feature_mask = self.used_features;
        if compress { feature_mask |= features::GZIP_COMPRESSED; }
        AapFile::new(feature_mask, self.entry_point, self.program.clone())
    }
}

/// Assembles a complete program from a single in-memory string.
/// `%IMP` and `%IBF` paths resolve relative to the process working directory.
pub fn assemble_string(source: &str, options: AssembleOptions) -> Result<Assembled, AsmError> {
    Assembler::new(source, Rc::from("base file"), None, options).run()
}

/// Assembles a complete program from a file on disk.
/// `%IMP` and `%IBF` paths resolve relative to the importing file's directory.
pub fn assemble_file(path: impl AsRef<Path>, options: AssembleOptions) -> Result<Assembled, AsmError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|e| AsmError {
        kind: AsmErrorKind::Import,
        message: format!("cannot read \"{}\": {}", path.display(), e),
        position: None,
        import_chain: vec![],
    })?;
    let display: Rc<str> = Rc::from(&*path.to_string_lossy());
    let mut assembler = Assembler::new(&source, display, path.parent().map(Path::to_owned), options);
    assembler.base_path_key = fs::canonicalize(path).ok()
        .map(|p| p.to_string_lossy().to_ascii_lowercase());
    assembler.run()
}

// ---------------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq)]
enum LineKind {
    Normal,
    /// Synthetic line marking the end of an import's spliced region.
    ImportEnd,
}

#[derive(Clone)]
struct SourceLine {
    text: String,
    position: FilePosition,
    kind: LineKind,
}

/// Where a label points: a resolved program offset, or another label to chase.
enum LabelTarget {
    Address(u64),
    Alias(String),
}

/// A forward reference awaiting backpatch: 8 bytes at `offset` get the label's address.
struct LabelRef {
    name: String,
    offset: usize,
    position: FilePosition,
    source_text: String,
}

struct ImportFrame {
    /// Lowercased canonical path, used for circular-import detection.
    path_key: String,
    /// Directory the imported file lives in, for resolving its own relative paths.
    dir: Option<PathBuf>,
    /// Index of the first spliced line; the region is deleted when the import ends.
    splice_start: usize,
    /// Program length when the import was entered, for the `%ASM_ONCE` no-bytes check.
    bytes_at_entry: usize,
    /// Location of the `%IMP` line, for error chains.
    invoked_at: FilePosition,
}

struct RepeatFrame {
    /// Index of the `%REPEAT` line itself; replay resumes at the line after it.
    return_cursor: usize,
    remaining: u64,
    position: FilePosition,
}

struct Assembler {
    lines: Vec<SourceLine>,
    cursor: usize,
    /// Set when the current line was replaced in place and the cursor must not advance.
    skip_increment: bool,

    program: Vec<u8>,
    used_features: u64,
    options: AssembleOptions,

    labels: HashMap<String, LabelTarget>,
    overridden_labels: HashSet<String>,
    /// Labels bound since the last byte emission (for the analyzer and `%LABEL_OVERRIDE`).
    labels_since_emit: Vec<String>,
    label_refs: Vec<LabelRef>,

    single_macros: HashMap<String, String>,
    multi_macros: HashMap<String, Vec<String>>,
    collecting_macro: Option<(String, Vec<String>, FilePosition)>,
    variables: HashMap<String, u64>,

    repeat_stack: Vec<RepeatFrame>,
    import_stack: Vec<ImportFrame>,
    /// Canonical paths of files whose `%ASM_ONCE` has been armed.
    asm_once_files: HashSet<String>,
    base_dir: Option<PathBuf>,
    base_path_key: Option<String>,

    analyzer: Analyzer,
    disabled_codes: DisabledCodes,
    diagnostics: Vec<Diagnostic>,
    debug_instructions: Vec<(u64, String)>,
    resolved_imports: Vec<(String, String)>,
}

impl Assembler {
    fn new(source: &str, display: Rc<str>, base_dir: Option<PathBuf>, options: AssembleOptions) -> Assembler {
        let lines = source.lines().enumerate().map(|(i, text)| SourceLine {
            text: text.to_owned(),
            position: FilePosition { file: display.clone(), line: i + 1 },
            kind: LineKind::Normal,
        }).collect();
        Assembler {
            lines,
            cursor: 0,
            skip_increment: false,
            program: vec![],
            used_features: if options.v1_call_stack { features::V1_CALL_STACK } else { 0 },
            disabled_codes: options.disabled_codes.clone(),
            options,
            labels: HashMap::new(),
            overridden_labels: HashSet::new(),
            labels_since_emit: vec![],
            label_refs: vec![],
            single_macros: HashMap::new(),
            multi_macros: HashMap::new(),
            collecting_macro: None,
            variables: HashMap::new(),
            repeat_stack: vec![],
            import_stack: vec![],
            asm_once_files: HashSet::new(),
            base_dir,
            base_path_key: None,
            analyzer: Analyzer::new(),
            diagnostics: vec![],
            debug_instructions: vec![],
            resolved_imports: vec![],
        }
    }

    fn run(mut self) -> Result<Assembled, AsmError> {
        while self.cursor < self.lines.len() {
            self.step()?;
            if self.skip_increment { self.skip_increment = false; } else { self.cursor += 1; }
        }

        if let Some((name, _, position)) = self.collecting_macro.take() {
            return Err(AsmError {
                kind: AsmErrorKind::EndingDirective,
                message: format!("macro \"{}\" has no matching %ENDMACRO", name),
                position: Some(ErrorPosition { position, source_text: String::new(), column: None }),
                import_chain: vec![],
            });
        }
        if let Some(frame) = self.repeat_stack.pop() {
            return Err(AsmError {
                kind: AsmErrorKind::EndingDirective,
                message: "%REPEAT has no matching %ENDREPEAT".into(),
                position: Some(ErrorPosition { position: frame.position, source_text: String::new(), column: None }),
                import_chain: vec![],
            });
        }

        self.backpatch()?;
        let entry_point = match self.labels.contains_key("ENTRY") {
            true => self.resolve_label("ENTRY").map_err(|message| AsmError {
                kind: AsmErrorKind::LabelName, message, position: None, import_chain: vec![],
            })?,
            false => 0,
        };

        let mut address_labels: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        for name in self.labels.keys() {
            // aliases to labels that were never defined are only fatal if referenced
            if let Ok(addr) = self.resolve_label(name) {
                address_labels.entry(addr).or_default().push(name.clone());
            }
        }
        for names in address_labels.values_mut() { names.sort(); }

        let debug_info = DebugInfo {
            program_length: self.program.len() as u64,
            assembled_instructions: self.debug_instructions,
            address_labels,
            resolved_imports: self.resolved_imports,
        };
        Ok(Assembled {
            program: self.program,
            entry_point,
            used_features: self.used_features,
            diagnostics: self.diagnostics,
            debug_info,
        })
    }

    // ------------------------------- per-line dispatch -------------------------------

    fn step(&mut self) -> Result<(), AsmError> {
        let line = self.lines[self.cursor].clone();
        if line.kind == LineKind::ImportEnd {
            return self.finish_import();
        }

        // multi-line macro bodies are captured verbatim, without substitution
        if let Some((name, mut body, position)) = self.collecting_macro.take() {
            let first = first_token(&line.text);
            if first.eq_ignore_ascii_case("%ENDMACRO") {
                self.multi_macros.insert(name, body);
            } else if first.eq_ignore_ascii_case("%MACRO") {
                return Err(self.err_at(&line, &line.text, AsmErrorKind::MacroName,
                    "macro definitions cannot be nested".into(), None));
            } else {
                body.push(line.text.clone());
                self.collecting_macro = Some((name, body, position));
            }
            return Ok(());
        }

        // macro management sees the raw line so macro names are never expanded away
        let first = first_token(&line.text);
        if first.eq_ignore_ascii_case("%MACRO") {
            return self.define_macro(&line);
        }
        let text = if first.eq_ignore_ascii_case("%DELMACRO") {
            line.text.clone()
        } else {
            self.substitute(&line.text)
        };
        if text.contains('\n') {
            // a substituted multi-line macro body: splice its lines over this one
            // and reprocess from the first of them
            let expanded: Vec<SourceLine> = text.lines().map(|text| SourceLine {
                text: text.to_owned(),
                position: line.position.clone(),
                kind: LineKind::Normal,
            }).collect();
            self.lines.splice(self.cursor..self.cursor + 1, expanded);
            self.skip_increment = true;
            return Ok(());
        }
        let tokens = parse_line(&text).map_err(|e| self.line_err(&line, &text, e))?;
        if tokens.is_empty() { return Ok(()); }

        if let Some(label) = tokens[0].strip_prefix(':') {
            return self.define_label(label, &tokens, &line, &text);
        }
        if tokens[0].starts_with('%') {
            return self.directive(&tokens, &line, &text);
        }
        self.instruction(&tokens, &line, &text)
    }

    // ---------------------------------- labels ----------------------------------

    fn define_label(&mut self, label: &str, tokens: &[String], line: &SourceLine, text: &str) -> Result<(), AsmError> {
        if tokens.len() > 1 {
            return Err(self.err_at(line, text, AsmErrorKind::Syntax,
                "a label definition cannot share a line with anything else".into(), None));
        }
        if label.starts_with('&') || !is_valid_name(label) {
            return Err(self.err_at(line, text, AsmErrorKind::LabelName,
                format!("\"{}\" is not a valid label name", label), None));
        }
        if self.labels.contains_key(label) {
            return Err(self.err_at(line, text, AsmErrorKind::LabelName,
                format!("label \"{}\" is already defined", label), None));
        }
        self.labels.insert(label.to_owned(), LabelTarget::Address(self.program.len() as u64));
        self.labels_since_emit.push(label.to_owned());
        self.analyzer.note_label();
        Ok(())
    }

    fn resolve_label(&self, name: &str) -> Result<u64, String> {
        let mut seen = HashSet::new();
        let mut current = name;
        loop {
            if !seen.insert(current) {
                return Err(format!("label \"{}\" is part of a circular alias chain", name));
            }
            match self.labels.get(current) {
                None => return Err(format!("label \"{}\" is not defined", current)),
                Some(LabelTarget::Address(addr)) => return Ok(*addr),
                Some(LabelTarget::Alias(target)) => current = target,
            }
        }
    }

    fn backpatch(&mut self) -> Result<(), AsmError> {
        for LabelRef { name, offset, position, source_text } in std::mem::take(&mut self.label_refs) {
            let addr = self.resolve_label(&name).map_err(|message| AsmError {
                kind: AsmErrorKind::LabelName,
                message,
                position: Some(ErrorPosition { position, source_text, column: None }),
                import_chain: vec![],
            })?;
            self.program[offset..offset + 8].copy_from_slice(&addr.to_le_bytes());
        }
        Ok(())
    }

    // -------------------------------- instructions --------------------------------

    fn instruction(&mut self, tokens: &[String], line: &SourceLine, text: &str) -> Result<(), AsmError> {
        let mnemonic = &tokens[0];
        let ops = &tokens[1..];
        let mut types = Vec::with_capacity(ops.len());
        for op in ops {
            types.push(determine_operand_type(op).map_err(|e| self.line_err(line, text, e))?);
        }

        let info = match isa::lookup(mnemonic, &types) {
            Some(info) => info,
            None if isa::mnemonic_exists(mnemonic) => {
                let valid: Vec<String> = isa::signatures_of(mnemonic).iter()
                    .map(|i| format_signature(i.mnemonic, i.operands)).collect();
                return Err(self.err_at(line, text, AsmErrorKind::Operand, format!(
                    "{} does not accept ({}); valid forms are: {}",
                    mnemonic.to_ascii_uppercase(),
                    types.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
                    valid.join("; ")), None));
            }
            None => {
                return Err(self.err_at(line, text, AsmErrorKind::Opcode,
                    format!("\"{}\" is not a recognized mnemonic or directive", mnemonic), None));
            }
        };

        let start = self.program.len();
        info.opcode.encode_into(&mut self.program);
        self.used_features |= features::for_extension_set(info.opcode.extension_set);

        for (op, &ty) in ops.iter().zip(&types) {
            match ty {
                OperandType::Register => {
                    let reg = self.register_operand(op, line, text)?;
                    self.program.push(reg as u8);
                }
                OperandType::Pointer => {
                    let reg = self.register_operand(&op[1..], line, text)?;
                    self.program.push(reg as u8);
                }
                OperandType::Address => {
                    self.label_reference(&op[1..], line, text);
                }
                OperandType::Literal => {
                    if let Some(name) = op.strip_prefix(":&") {
                        self.label_reference(name, line, text);
                    } else {
                        let lit = parse_literal(op, false).map_err(|e| self.line_err(line, text, e))?;
                        self.program.extend_from_slice(&lit.bytes);
                    }
                }
            }
        }

        self.debug_instructions.push((start as u64, text.trim().to_owned()));
        let is_labelled = !self.labels_since_emit.is_empty();
        let is_entry = self.labels_since_emit.iter().any(|l| l == "ENTRY");
        let ctx = InstructionContext {
            bytes: &self.program[start..],
            mnemonic,
            operands: ops,
            operand_types: &types,
            position: &line.position,
            is_labelled,
            is_entry,
            raw_text: text,
            import_depth: self.import_stack.len(),
        };
        let raised = self.analyzer.analyze_instruction(&ctx);
        self.push_diagnostics(raised);
        self.labels_since_emit.clear();
        Ok(())
    }

    fn register_operand(&self, token: &str, line: &SourceLine, text: &str) -> Result<Register, AsmError> {
        Register::from_name(token).ok_or_else(|| self.err_at(line, text, AsmErrorKind::Operand,
            format!("\"{}\" is not a register name", token), None))
    }

    /// Emits an 8-byte placeholder and queues it for backpatching.
    fn label_reference(&mut self, name: &str, line: &SourceLine, text: &str) {
        self.label_refs.push(LabelRef {
            name: name.to_owned(),
            offset: self.program.len(),
            position: line.position.clone(),
            source_text: text.to_owned(),
        });
        self.program.extend_from_slice(&[0; 8]);
    }

    // --------------------------------- directives ---------------------------------

    fn directive(&mut self, tokens: &[String], line: &SourceLine, text: &str) -> Result<(), AsmError> {
        match &*tokens[0].to_ascii_uppercase() {
            "%DAT" => {
                let op = self.expect_operands(tokens, 1, line, text)?;
                let lit = parse_literal(&op[0], true).map_err(|e| self.line_err(line, text, e))?;
                if op[0].starts_with('"') {
                    self.program.extend_from_slice(&lit.bytes);
                } else {
                    if lit.value > u8::MAX as u64 {
                        self.push_diagnostics(vec![Diagnostic {
                            severity: Severity::Warning,
                            code: diagnostics::codes::DAT_VALUE_TRUNCATED,
                            message: format!("%DAT value {} does not fit in one byte and is truncated", lit.value),
                            position: line.position.clone(),
                        }]);
                    }
                    self.program.push(lit.value as u8);
                }
                self.labels_since_emit.clear();
            }
            "%PAD" => {
                let op = self.expect_operands(tokens, 1, line, text)?;
                let lit = parse_literal(&op[0], false).map_err(|e| self.line_err(line, text, e))?;
                self.program.resize(self.program.len() + lit.value as usize, 0);
                self.labels_since_emit.clear();
            }
            "%NUM" => {
                let op = self.expect_operands(tokens, 1, line, text)?;
                if let Some(name) = op[0].strip_prefix(":&").or_else(|| op[0].strip_prefix(':')) {
                    self.label_reference(name, line, text);
                } else {
                    let lit = parse_literal(&op[0], false).map_err(|e| self.line_err(line, text, e))?;
                    self.program.extend_from_slice(&lit.value.to_le_bytes());
                }
                self.labels_since_emit.clear();
            }
            "%IBF" => {
                let op = self.expect_operands(tokens, 1, line, text)?;
                let path = self.string_operand(&op[0], line, text)?;
                let resolved = self.resolve_path(&path);
                let bytes = fs::read(&resolved).map_err(|e| self.err_at(line, text, AsmErrorKind::Import,
                    format!("cannot insert binary file \"{}\": {}", path, e), None))?;
                self.program.extend_from_slice(&bytes);
                self.labels_since_emit.clear();
            }
            "%IMP" => {
                let op = self.expect_operands(tokens, 1, line, text)?;
                let path = self.string_operand(&op[0], line, text)?;
                self.import(&path, line, text)?;
            }
            "%ENDMACRO" => {
                return Err(self.err_at(line, text, AsmErrorKind::EndingDirective,
                    "%ENDMACRO without a matching %MACRO".into(), None));
            }
            "%DELMACRO" => {
                let op = self.expect_operands(tokens, 1, line, text)?;
                let removed = self.single_macros.remove(&op[0]).is_some()
                    | self.multi_macros.remove(&op[0]).is_some();
                if !removed {
                    return Err(self.err_at(line, text, AsmErrorKind::MacroName,
                        format!("macro \"{}\" is not defined", op[0]), None));
                }
            }
            "%DEFINE" => {
                let op = self.expect_operands(tokens, 2, line, text)?;
                if !is_valid_name(&op[0]) {
                    return Err(self.err_at(line, text, AsmErrorKind::VariableName,
                        format!("\"{}\" is not a valid variable name", op[0]), None));
                }
                let lit = parse_literal(&op[1], false).map_err(|e| self.line_err(line, text, e))?;
                self.variables.insert(op[0].clone(), lit.value);
            }
            "%UNDEFINE" => {
                let op = self.expect_operands(tokens, 1, line, text)?;
                if self.variables.remove(&op[0]).is_none() {
                    return Err(self.err_at(line, text, AsmErrorKind::VariableName,
                        format!("variable \"{}\" is not defined", op[0]), None));
                }
            }
            "%LABEL_OVERRIDE" => {
                let op = self.expect_operands(tokens, 1, line, text)?;
                self.label_override(&op[0], line, text)?;
            }
            "%ANALYZER" => {
                let op = self.expect_operands(tokens, 3, line, text)?;
                self.analyzer_directive(&op[0], &op[1], &op[2], line, text)?;
            }
            "%MESSAGE" => {
                let severity = match tokens.get(1) {
                    Some(tok) => self.severity_operand(tok, line, text)?,
                    None => return Err(self.err_at(line, text, AsmErrorKind::Operand,
                        "%MESSAGE requires a severity operand".into(), None)),
                };
                let message = match tokens.get(2) {
                    Some(tok) => self.string_operand(tok, line, text)?,
                    None => String::new(),
                };
                self.push_diagnostics(vec![Diagnostic {
                    severity, code: 0, message, position: line.position.clone(),
                }]);
            }
            "%STOP" => {
                let message = match tokens.get(1) {
                    Some(tok) => format!("assembly stopped: {}", self.string_operand(tok, line, text)?),
                    None => "assembly stopped".to_owned(),
                };
                return Err(self.err_at(line, text, AsmErrorKind::Stopped, message, None));
            }
            "%DEBUG" => {
                self.push_diagnostics(vec![Diagnostic {
                    severity: Severity::Suggestion,
                    code: 0,
                    message: format!("assembler state: {} bytes emitted, {} labels defined, {} macros, {} variables",
                        self.program.len(), self.labels.len(),
                        self.single_macros.len() + self.multi_macros.len(), self.variables.len()),
                    position: line.position.clone(),
                }]);
            }
            "%REPEAT" => {
                let op = self.expect_operands(tokens, 1, line, text)?;
                let lit = parse_literal(&op[0], false).map_err(|e| self.line_err(line, text, e))?;
                if lit.value == 0 {
                    return Err(self.err_at(line, text, AsmErrorKind::Operand,
                        "%REPEAT count must be at least 1".into(), None));
                }
                self.repeat_stack.push(RepeatFrame {
                    return_cursor: self.cursor,
                    remaining: lit.value - 1,
                    position: line.position.clone(),
                });
            }
            "%ENDREPEAT" => {
                match self.repeat_stack.last_mut() {
                    None => return Err(self.err_at(line, text, AsmErrorKind::EndingDirective,
                        "%ENDREPEAT without a matching %REPEAT".into(), None)),
                    Some(frame) if frame.remaining == 0 => { self.repeat_stack.pop(); }
                    Some(frame) => {
                        frame.remaining -= 1;
                        self.cursor = frame.return_cursor;
                    }
                }
            }
            "%ASM_ONCE" => self.asm_once(),
            other => {
                return Err(self.err_at(line, text, AsmErrorKind::Opcode,
                    format!("\"{}\" is not a recognized assembler directive", other), None));
            }
        }
        Ok(())
    }

    fn expect_operands<'a>(&self, tokens: &'a [String], count: usize, line: &SourceLine, text: &str) -> Result<&'a [String], AsmError> {
        if tokens.len() - 1 != count {
            return Err(self.err_at(line, text, AsmErrorKind::Operand, format!(
                "{} requires exactly {} operand{}, got {}",
                tokens[0].to_ascii_uppercase(), count, if count == 1 { "" } else { "s" }, tokens.len() - 1), None));
        }
        Ok(&tokens[1..])
    }

    fn string_operand(&self, token: &str, line: &SourceLine, text: &str) -> Result<String, AsmError> {
        if !token.starts_with('"') {
            return Err(self.err_at(line, text, AsmErrorKind::Operand,
                "expected a quoted string operand".into(), None));
        }
        let lit = parse_literal(token, true).map_err(|e| self.line_err(line, text, e))?;
        Ok(String::from_utf8_lossy(&lit.bytes).into_owned())
    }

    fn severity_operand(&self, token: &str, line: &SourceLine, text: &str) -> Result<Severity, AsmError> {
        match &*token.to_ascii_lowercase() {
            "error" => Ok(Severity::NonFatalError),
            "warning" => Ok(Severity::Warning),
            "suggestion" => Ok(Severity::Suggestion),
            _ => Err(self.err_at(line, text, AsmErrorKind::Operand,
                format!("\"{}\" is not a severity (error, warning, or suggestion)", token), None)),
        }
    }

    fn label_override(&mut self, token: &str, line: &SourceLine, text: &str) -> Result<(), AsmError> {
        let target = if let Some(name) = token.strip_prefix(":&").or_else(|| token.strip_prefix(':')) {
            if !is_valid_name(name) {
                return Err(self.err_at(line, text, AsmErrorKind::LabelName,
                    format!("\"{}\" is not a valid label name", name), None));
            }
            LabelTarget::Alias(name.to_owned())
        } else {
            let lit = parse_literal(token, false).map_err(|e| self.line_err(line, text, e))?;
            LabelTarget::Address(lit.value)
        };

        let here = self.program.len() as u64;
        let retarget: Vec<String> = self.labels.iter()
            .filter(|(name, value)| {
                matches!(value, LabelTarget::Address(a) if *a == here) && !self.overridden_labels.contains(*name)
            })
            .map(|(name, _)| name.clone())
            .collect();
        if let (LabelTarget::Alias(alias), true) = (&target, !retarget.is_empty()) {
            if retarget.iter().any(|name| name == alias) {
                return Err(self.err_at(line, text, AsmErrorKind::LabelName,
                    format!("label \"{}\" cannot be overridden to itself", alias), None));
            }
        }
        for name in retarget {
            let value = match &target {
                LabelTarget::Address(a) => LabelTarget::Address(*a),
                LabelTarget::Alias(alias) => LabelTarget::Alias(alias.clone()),
            };
            self.labels.insert(name.clone(), value);
            self.overridden_labels.insert(name);
        }
        Ok(())
    }

    fn analyzer_directive(&mut self, severity: &str, code: &str, state: &str, line: &SourceLine, text: &str) -> Result<(), AsmError> {
        let severity = self.severity_operand(severity, line, text)?;
        let code: u32 = code.parse().map_err(|_| self.err_at(line, text, AsmErrorKind::Operand,
            format!("\"{}\" is not a diagnostic code", code), None))?;
        match &*state.to_ascii_lowercase() {
            "0" => self.disabled_codes.set(severity, code, true),
            "1" => self.disabled_codes.set(severity, code, false),
            "r" => self.disabled_codes.set(severity, code,
                self.options.disabled_codes.is_disabled(severity, code)),
            _ => return Err(self.err_at(line, text, AsmErrorKind::Operand,
                format!("\"{}\" is not an analyzer state (0, 1, or r)", state), None)),
        }
        Ok(())
    }

    // ----------------------------------- macros -----------------------------------

    fn define_macro(&mut self, line: &SourceLine) -> Result<(), AsmError> {
        let rest = line.text.trim_start();
        let rest = rest[first_token(rest).len()..].trim_start();
        if rest.is_empty() {
            return Err(self.err_at(line, &line.text, AsmErrorKind::MacroName,
                "%MACRO requires a macro name".into(), None));
        }
        match rest.find(',') {
            Some(comma) => {
                // single-line: everything after the comma is the raw replacement text
                let name = rest[..comma].trim();
                if !is_valid_name(name) {
                    return Err(self.err_at(line, &line.text, AsmErrorKind::MacroName,
                        format!("\"{}\" is not a valid macro name", name), None));
                }
                let replacement = rest[comma + 1..].trim_start().to_owned();
                self.single_macros.insert(name.to_owned(), replacement);
            }
            None => {
                let name = rest.trim();
                if !is_valid_name(name) {
                    return Err(self.err_at(line, &line.text, AsmErrorKind::MacroName,
                        format!("\"{}\" is not a valid macro name", name), None));
                }
                self.collecting_macro = Some((name.to_owned(), vec![], line.position.clone()));
            }
        }
        Ok(())
    }

    /// Expands macros and `@variable` references, longest name first. A multi-line
    /// macro body keeps its newlines; the caller splices the result back into the
    /// line list.
    fn substitute(&self, text: &str) -> String {
        if self.single_macros.is_empty() && self.multi_macros.is_empty() && self.variables.is_empty() {
            return text.to_owned();
        }
        let mut patterns: Vec<(String, String)> = self.single_macros.iter()
            .map(|(name, replacement)| (name.clone(), replacement.clone()))
            .collect();
        patterns.extend(self.multi_macros.iter()
            .map(|(name, body)| (name.clone(), body.join("\n"))));
        patterns.extend(self.variables.iter()
            .map(|(name, value)| (format!("@{}", name), value.to_string())));
        patterns.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        let mut out = text.to_owned();
        for (pattern, replacement) in &patterns {
            if out.contains(&**pattern) {
                out = replace_token(&out, pattern, replacement);
            }
        }
        out
    }

    // ----------------------------------- imports -----------------------------------

    fn current_dir(&self) -> Option<PathBuf> {
        match self.import_stack.last() {
            Some(frame) => frame.dir.clone(),
            None => self.base_dir.clone(),
        }
    }

    fn resolve_path(&self, operand: &str) -> PathBuf {
        let path = Path::new(operand);
        if path.is_absolute() {
            return path.to_owned();
        }
        match self.current_dir() {
            Some(dir) => dir.join(path),
            None => path.to_owned(),
        }
    }

    fn import(&mut self, path: &str, line: &SourceLine, text: &str) -> Result<(), AsmError> {
        let resolved = self.resolve_path(path);
        let canonical = fs::canonicalize(&resolved).map_err(|e| self.err_at(line, text,
            AsmErrorKind::Import, format!("cannot import \"{}\": {}", path, e), None))?;
        let path_key = canonical.to_string_lossy().to_ascii_lowercase();

        let on_stack = self.import_stack.iter().any(|f| f.path_key == path_key)
            || self.base_path_key.as_deref() == Some(&*path_key);
        if on_stack && !self.asm_once_files.contains(&path_key) {
            return Err(self.err_at(line, text, AsmErrorKind::Import,
                format!("circular import of \"{}\"", path), None));
        }

        let source = fs::read_to_string(&canonical).map_err(|e| self.err_at(line, text,
            AsmErrorKind::Import, format!("cannot import \"{}\": {}", path, e), None))?;
        let display: Rc<str> = Rc::from(path);
        let mut spliced: Vec<SourceLine> = source.lines().enumerate().map(|(i, text)| SourceLine {
            text: text.to_owned(),
            position: FilePosition { file: display.clone(), line: i + 1 },
            kind: LineKind::Normal,
        }).collect();
        spliced.push(SourceLine {
            text: String::new(),
            position: FilePosition { file: display, line: source.lines().count() + 1 },
            kind: LineKind::ImportEnd,
        });

        let splice_start = self.cursor + 1;
        self.lines.splice(splice_start..splice_start, spliced);
        self.import_stack.push(ImportFrame {
            path_key,
            dir: canonical.parent().map(Path::to_owned),
            splice_start,
            bytes_at_entry: self.program.len(),
            invoked_at: line.position.clone(),
        });
        self.resolved_imports.push((path.to_owned(), canonical.to_string_lossy().into_owned()));
        Ok(())
    }

    /// Pops the finished import and deletes its spliced region, so that a `%REPEAT`
    /// replay over the `%IMP` line re-imports rather than re-executing stale lines.
    fn finish_import(&mut self) -> Result<(), AsmError> {
        let frame = match self.import_stack.pop() {
            Some(frame) => frame,
            None => return Ok(()),
        };
        if let Some(repeat) = self.repeat_stack.iter().find(|r| r.return_cursor >= frame.splice_start) {
            return Err(AsmError {
                kind: AsmErrorKind::EndingDirective,
                message: "%REPEAT is not closed within the imported file".into(),
                position: Some(ErrorPosition {
                    position: repeat.position.clone(),
                    source_text: String::new(),
                    column: None,
                }),
                import_chain: self.import_chain(),
            });
        }
        self.lines.drain(frame.splice_start..=self.cursor);
        self.cursor = frame.splice_start - 1;
        Ok(())
    }

    fn asm_once(&mut self) {
        let (path_key, bytes_at_entry) = match self.import_stack.last() {
            Some(frame) => (frame.path_key.clone(), frame.bytes_at_entry),
            // the base file cannot be re-entered, so the directive is a no-op there
            None => return,
        };
        if self.asm_once_files.contains(&path_key) {
            // re-entry into an already-armed file: skip to the end of this import
            for i in self.cursor + 1..self.lines.len() {
                if self.lines[i].kind == LineKind::ImportEnd {
                    self.cursor = i - 1;
                    break;
                }
            }
        } else if bytes_at_entry == self.program.len() {
            // no bytes emitted yet: the whole file is guarded
            self.asm_once_files.insert(path_key);
        }
    }

    // --------------------------------- error helpers ---------------------------------

    fn import_chain(&self) -> Vec<FilePosition> {
        self.import_stack.iter().rev().map(|f| f.invoked_at.clone()).collect()
    }

    fn err_at(&self, line: &SourceLine, text: &str, kind: AsmErrorKind, message: String, column: Option<usize>) -> AsmError {
        AsmError {
            kind,
            message,
            position: Some(ErrorPosition {
                position: line.position.clone(),
                source_text: text.to_owned(),
                column,
            }),
            import_chain: self.import_chain(),
        }
    }

    fn line_err(&self, line: &SourceLine, text: &str, e: LineError) -> AsmError {
        self.err_at(line, text, e.kind, e.message, e.column)
    }

    fn push_diagnostics(&mut self, raised: Vec<Diagnostic>) {
        for diag in raised {
            if !self.disabled_codes.is_disabled(diag.severity, diag.code) {
                self.diagnostics.push(diag);
            }
        }
    }
}

/// Replaces whole-token occurrences of `pattern` only: occurrences flanked by
/// name characters (letters, digits, underscore) are left alone, so a macro named
/// `N` cannot rewrite the middle of `NOP`.
fn replace_token(text: &str, pattern: &str, replacement: &str) -> String {
    let bytes = text.as_bytes();
    let is_name_byte = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while let Some(found) = text[i..].find(pattern) {
        let start = i + found;
        let end = start + pattern.len();
        let before_ok = start == 0 || !is_name_byte(bytes[start - 1]);
        let after_ok = end == text.len() || !is_name_byte(bytes[end]);
        if before_ok && after_ok {
            out.push_str(&text[i..start]);
            out.push_str(replacement);
        } else {
            out.push_str(&text[i..end]);
        }
        i = end;
    }
    out.push_str(&text[i..]);
    out
}

/// First whitespace/comma/comment-delimited token of a line (empty for blank lines).
fn first_token(line: &str) -> &str {
    let trimmed = line.trim_start();
    let end = trimmed.find(|c: char| c.is_whitespace() || c == ',' || c == ';').unwrap_or(trimmed.len());
    &trimmed[..end]
}

fn format_signature(mnemonic: &str, operands: &[OperandType]) -> String {
    if operands.is_empty() {
        return mnemonic.to_owned();
    }
    let ops: Vec<String> = operands.iter().map(ToString::to_string).collect();
    format!("{} {}", mnemonic, ops.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;

    fn assemble(source: &str) -> Assembled {
        assemble_string(source, Default::default()).unwrap()
    }
    fn assemble_err(source: &str) -> AsmError {
        assemble_string(source, Default::default()).unwrap_err()
    }

    #[test]
    fn test_assemble_basic_bytes() {
        let out = assemble("MVQ rg0, 5\nHLT");
        let mut expected = vec![0x99, Register::Rg0 as u8];
        expected.extend_from_slice(&5u64.to_le_bytes());
        expected.push(0x00);
        assert_eq!(out.program, expected);
        assert_eq!(out.entry_point, 0);
        assert_eq!(out.used_features, 0);
    }

    #[test]
    fn test_fully_qualified_opcode_bytes() {
        let out = assemble("SIGN_NEG rg3");
        assert_eq!(out.program, vec![0xFF, 0x01, 0x60, Register::Rg3 as u8]);
        assert_eq!(out.used_features, features::EXTENSION_SIGNED);
    }

    #[test]
    fn test_entry_and_forward_labels() {
        let out = assemble("JMP :END\n:ENTRY\nNOP\n:END\nHLT");
        // JMP adr = 9 bytes, NOP at 9, HLT at 10
        assert_eq!(out.entry_point, 9);
        assert_eq!(out.program[0], 0x02);
        assert_eq!(u64::from_le_bytes(out.program[1..9].try_into().unwrap()), 10);
        assert_eq!(out.debug_info.address_labels[&9], vec!["ENTRY".to_owned()]);
    }

    #[test]
    fn test_label_literal_operand() {
        let out = assemble(":DATA\n%DAT 7\nMVQ rg0, :&DATA\nHLT");
        assert_eq!(u64::from_le_bytes(out.program[3..11].try_into().unwrap()), 0);
        assert_eq!(out.program[1], 0x99);
    }

    #[test]
    fn test_duplicate_and_undefined_labels() {
        assert_eq!(assemble_err(":A\n:A\nHLT").kind, AsmErrorKind::LabelName);
        assert_eq!(assemble_err("JMP :NOWHERE").kind, AsmErrorKind::LabelName);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(assemble_err("BOGUS rg0").kind, AsmErrorKind::Opcode);
        assert_eq!(assemble_err("MVQ 5, 5").kind, AsmErrorKind::Operand);
        assert_eq!(assemble_err("MVQ rg0,").kind, AsmErrorKind::Syntax);
        assert_eq!(assemble_err("%NOSUCH 1").kind, AsmErrorKind::Opcode);
        assert_eq!(assemble_err("%STOP").kind, AsmErrorKind::Stopped);
    }

    #[test]
    fn test_data_directives() {
        let out = assemble("%DAT \"AB\"\n%DAT 0x41\n%PAD 3\n%NUM 513");
        let mut expected = b"AB".to_vec();
        expected.push(0x41);
        expected.extend_from_slice(&[0, 0, 0]);
        expected.extend_from_slice(&513u64.to_le_bytes());
        assert_eq!(out.program, expected);
    }

    #[test]
    fn test_dat_truncation_warning() {
        let out = assemble("%DAT 300");
        assert_eq!(out.program, vec![300u64 as u8]);
        assert!(out.diagnostics.iter().any(|d| d.code == diagnostics::codes::DAT_VALUE_TRUNCATED));
    }

    #[test]
    fn test_single_line_macro() {
        let out = assemble("%MACRO INIT, MVQ rg0, 9\nINIT\nHLT");
        assert_eq!(out.program[0], 0x99);
        assert_eq!(u64::from_le_bytes(out.program[2..10].try_into().unwrap()), 9);
    }

    #[test]
    fn test_multi_line_macro() {
        let out = assemble("%MACRO TWO\nNOP\nNOP\n%ENDMACRO\nTWO\nHLT");
        assert_eq!(out.program, vec![0x01, 0x01, 0x00]);
    }

    #[test]
    fn test_multi_line_macro_as_operand() {
        // a multi-line macro name substitutes anywhere in a line, not only when
        // it is the whole line
        let out = assemble("%MACRO FIVE\n5\n%ENDMACRO\nMVQ rg0, FIVE\nHLT");
        assert_eq!(out.program[0], 0x99);
        assert_eq!(u64::from_le_bytes(out.program[2..10].try_into().unwrap()), 5);
    }

    #[test]
    fn test_multi_line_macro_body_splices_mid_line() {
        // the first body line completes the invoking line; the rest follow it
        let out = assemble("%MACRO TAIL\nrg1, 7\nHLT\n%ENDMACRO\nMVQ TAIL");
        assert_eq!(out.program[0], 0x99);
        assert_eq!(out.program[1], Register::Rg1 as u8);
        assert_eq!(u64::from_le_bytes(out.program[2..10].try_into().unwrap()), 7);
        assert_eq!(out.program[10], 0x00);
    }

    #[test]
    fn test_unterminated_macro() {
        assert_eq!(assemble_err("%MACRO X\nNOP").kind, AsmErrorKind::EndingDirective);
        assert_eq!(assemble_err("%ENDMACRO").kind, AsmErrorKind::EndingDirective);
    }

    #[test]
    fn test_delmacro() {
        // after deletion the name is an unknown mnemonic again
        assert_eq!(assemble_err("%MACRO N, NOP\n%DELMACRO N\nN").kind, AsmErrorKind::Opcode);
        assert_eq!(assemble_err("%DELMACRO NOTHING").kind, AsmErrorKind::MacroName);
    }

    #[test]
    fn test_macro_name_boundaries() {
        // a one-letter macro must not rewrite the inside of other tokens
        let out = assemble("%MACRO N, %DAT 1\nNOP\nN\nHLT");
        assert_eq!(out.program, vec![0x01, 1, 0x00]);
    }

    #[test]
    fn test_variables() {
        let out = assemble("%DEFINE SIZE, 64\nMVQ rg0, @SIZE\nHLT");
        assert_eq!(u64::from_le_bytes(out.program[2..10].try_into().unwrap()), 64);
        assert_eq!(assemble_err("%UNDEFINE NOPE").kind, AsmErrorKind::VariableName);
        assert_eq!(assemble_err("%DEFINE 9bad, 1").kind, AsmErrorKind::VariableName);
    }

    #[test]
    fn test_repeat() {
        let out = assemble("%REPEAT 3\nNOP\n%ENDREPEAT\nHLT");
        assert_eq!(out.program, vec![0x01, 0x01, 0x01, 0x00]);
        assert_eq!(assemble_err("%REPEAT 0\nNOP\n%ENDREPEAT").kind, AsmErrorKind::Operand);
        assert_eq!(assemble_err("%ENDREPEAT").kind, AsmErrorKind::EndingDirective);
        assert_eq!(assemble_err("%REPEAT 2\nNOP").kind, AsmErrorKind::EndingDirective);
    }

    #[test]
    fn test_nested_repeat() {
        let out = assemble("%REPEAT 2\n%REPEAT 2\nNOP\n%ENDREPEAT\n%DAT 0xEE\n%ENDREPEAT");
        assert_eq!(out.program, vec![0x01, 0x01, 0xEE, 0x01, 0x01, 0xEE]);
    }

    #[test]
    fn test_label_override_to_value() {
        let out = assemble(":IO_PORT\n%LABEL_OVERRIDE 0xFF00\nMVQ rg0, :&IO_PORT\nHLT");
        assert_eq!(u64::from_le_bytes(out.program[2..10].try_into().unwrap()), 0xFF00);
    }

    #[test]
    fn test_label_override_alias() {
        let out = assemble(":ALIAS\n%LABEL_OVERRIDE :REAL\nNOP\n:REAL\nHLT\nJMP :ALIAS");
        // ALIAS resolves to REAL's address (1)
        assert_eq!(u64::from_le_bytes(out.program[3..11].try_into().unwrap()), 1);
    }

    #[test]
    fn test_label_override_self_reference() {
        assert_eq!(assemble_err(":X\n%LABEL_OVERRIDE :X\nHLT").kind, AsmErrorKind::LabelName);
    }

    #[test]
    fn test_analyzer_toggle() {
        let noisy = assemble("HLT\nNOP");
        assert!(noisy.diagnostics.iter().any(|d| d.code == diagnostics::codes::UNREACHABLE_INSTRUCTION));
        let quiet = assemble("%ANALYZER warning, 3, 0\nHLT\nNOP");
        assert!(quiet.diagnostics.iter().all(|d| d.code != diagnostics::codes::UNREACHABLE_INSTRUCTION));
    }

    #[test]
    fn test_message_directive() {
        let out = assemble("%MESSAGE warning, \"check this\"\nHLT");
        assert!(out.diagnostics.iter().any(|d| d.code == 0 && d.message == "check this"));
    }

    #[test]
    fn test_error_display_includes_position() {
        let err = assemble_err("NOP\nBOGUS");
        let rendered = err.to_string();
        assert!(rendered.contains("line 2"), "{}", rendered);
        assert!(rendered.contains("BOGUS"), "{}", rendered);
    }

    #[test]
    fn test_v1_call_stack_feature_bit() {
        let options = AssembleOptions { v1_call_stack: true, ..Default::default() };
        let out = assemble_string("HLT", options).unwrap();
        assert_eq!(out.used_features, features::V1_CALL_STACK);
    }

    #[test]
    fn test_to_aap() {
        let out = assemble(":ENTRY\nHLT");
        let aap = out.to_aap(false);
        assert_eq!(aap.program, out.program);
        assert_eq!(aap.entry_point, 0);
        let compressed = out.to_aap(true);
        assert_ne!(compressed.features & features::GZIP_COMPRESSED, 0);
    }
}
