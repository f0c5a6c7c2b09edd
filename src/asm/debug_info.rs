//! The textual debug information format emitted alongside an assembled program.
//!
//! This maps program offsets back to source lines and label names so the
//! interpreter (or a person with a hex dump) can make sense of a fault address.
//! The format is deliberately plain text: three `===SECTION===` blocks after a
//! short header, one record per line.

use std::collections::BTreeMap;
use std::fmt;

use crate::common::LANGUAGE_VERSION;

const FILE_HEADER: &str = "AssEmbly Debug Information File";
const SECTION_INSTRUCTIONS: &str = "===ASSEMBLED INSTRUCTIONS===";
const SECTION_LABELS: &str = "===ADDRESS LABELS===";
const SECTION_IMPORTS: &str = "===RESOLVED IMPORTS===";

/// Debug information for one assembled program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugInfo {
    /// Total length of the assembled program in bytes.
    pub program_length: u64,
    /// `(offset, source text)` for every emitted instruction, in emission order.
    pub assembled_instructions: Vec<(u64, String)>,
    /// Label names bound to each program offset, sorted by name per offset.
    pub address_labels: BTreeMap<u64, Vec<String>>,
    /// `(path as written, resolved path)` for every `%IMP`, in expansion order.
    pub resolved_imports: Vec<(String, String)>,
}
impl DebugInfo {
    /// Renders the text form of this debug info.
    pub fn generate(&self) -> String {
        let mut out = String::new();
        out.push_str(FILE_HEADER);
        out.push('\n');
        out.push_str(&format!("Version: {}.{}.{}\n", LANGUAGE_VERSION.0, LANGUAGE_VERSION.1, LANGUAGE_VERSION.2));
        out.push_str(&format!("Program length: {} bytes\n", self.program_length));

        out.push('\n');
        out.push_str(SECTION_INSTRUCTIONS);
        out.push('\n');
        for (offset, text) in &self.assembled_instructions {
            out.push_str(&format!("{:016X} @ {}\n", offset, text));
        }

        out.push('\n');
        out.push_str(SECTION_LABELS);
        out.push('\n');
        for (offset, names) in &self.address_labels {
            let names: Vec<String> = names.iter().map(|n| format!(":{}", n)).collect();
            out.push_str(&format!("{:016X} @ {}\n", offset, names.join(",")));
        }

        out.push('\n');
        out.push_str(SECTION_IMPORTS);
        out.push('\n');
        for (written, resolved) in &self.resolved_imports {
            out.push_str(&format!("\"{}\" -> \"{}\"\n", written, resolved));
        }

        out
    }

    /// Parses the text form back into structured debug info.
    pub fn parse(text: &str) -> Result<DebugInfo, DebugInfoError> {
        let mut lines = text.lines();
        if lines.next().map(str::trim) != Some(FILE_HEADER) {
            return Err(DebugInfoError::new("missing debug information file header"));
        }

        let mut info = DebugInfo::default();
        let mut section: Option<&str> = None;
        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() { continue; }
            match trimmed {
                SECTION_INSTRUCTIONS | SECTION_LABELS | SECTION_IMPORTS => {
                    section = Some(trimmed);
                    continue;
                }
                _ => (),
            }
            match section {
                None => {
                    if let Some(len) = trimmed.strip_prefix("Program length: ") {
                        let len = len.strip_suffix(" bytes").unwrap_or(len);
                        info.program_length = len.parse()
                            .map_err(|_| DebugInfoError::new("malformed program length"))?;
                    }
                    // the version line (and anything else in the header) is informational
                }
                Some(SECTION_INSTRUCTIONS) => {
                    let (offset, text) = split_record(trimmed)?;
                    info.assembled_instructions.push((offset, text.to_owned()));
                }
                Some(SECTION_LABELS) => {
                    let (offset, names) = split_record(trimmed)?;
                    let names: Result<Vec<String>, DebugInfoError> = names.split(',').map(|n| {
                        n.strip_prefix(':').map(str::to_owned)
                            .ok_or_else(|| DebugInfoError::new("label name missing leading colon"))
                    }).collect();
                    info.address_labels.insert(offset, names?);
                }
                Some(_) => {
                    let mut parts = trimmed.splitn(2, " -> ");
                    let written = parts.next().unwrap_or("");
                    let resolved = parts.next()
                        .ok_or_else(|| DebugInfoError::new("malformed resolved import record"))?;
                    info.resolved_imports.push((unquote(written)?.to_owned(), unquote(resolved)?.to_owned()));
                }
            }
        }
        Ok(info)
    }
}

/// Splits a `OFFSETHEX @ payload` record.
fn split_record(line: &str) -> Result<(u64, &str), DebugInfoError> {
    let mut parts = line.splitn(2, " @ ");
    let offset = parts.next().unwrap_or("");
    let payload = parts.next().ok_or_else(|| DebugInfoError::new("record is missing the @ separator"))?;
    let offset = u64::from_str_radix(offset, 16)
        .map_err(|_| DebugInfoError::new("record has a malformed hex offset"))?;
    Ok((offset, payload))
}

fn unquote(s: &str) -> Result<&str, DebugInfoError> {
    s.strip_prefix('"').and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| DebugInfoError::new("import path is missing surrounding quotes"))
}

/// Error parsing a debug information file.
#[derive(Debug)]
pub struct DebugInfoError {
    pub message: String,
}
impl DebugInfoError {
    fn new(message: &str) -> DebugInfoError {
        DebugInfoError { message: message.to_owned() }
    }
}
impl fmt::Display for DebugInfoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid debug information file: {}", self.message)
    }
}
impl std::error::Error for DebugInfoError {}
