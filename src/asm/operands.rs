//! Line tokenization, operand classification, and literal encoding.
//!
//! Errors produced here carry a byte column within the line so the assembler can
//! render a caret pointer under the offending character.

use crate::common::OperandType;

use super::AsmErrorKind;

/// An error raised while parsing a single line, before position context is known.
#[derive(Debug)]
pub struct LineError {
    pub kind: AsmErrorKind,
    pub message: String,
    /// Byte index of the offending character within the line, if meaningful.
    pub column: Option<usize>,
}
impl LineError {
    fn new(kind: AsmErrorKind, message: String, column: Option<usize>) -> LineError {
        LineError { kind, message, column }
    }
    fn syntax(message: String, column: usize) -> LineError {
        LineError::new(AsmErrorKind::Syntax, message, Some(column))
    }
    fn operand(message: String) -> LineError {
        LineError::new(AsmErrorKind::Operand, message, None)
    }
}

/// Splits a source line into mnemonic + operand tokens.
///
/// Operands are separated by commas; whitespace around separators is ignored but
/// whitespace *inside* an unquoted operand is a syntax error. A `;` outside of a
/// quoted string starts a comment. String operands keep their surrounding quotes
/// (and raw escape sequences) for later classification. Returns an empty vector
/// for blank/comment-only lines.
pub fn parse_line(line: &str) -> Result<Vec<String>, LineError> {
    let bytes: Vec<(usize, char)> = line.char_indices().collect();
    let mut i = 0;
    let mut tokens: Vec<String> = vec![];

    // skip leading whitespace
    while i < bytes.len() && bytes[i].1.is_whitespace() { i += 1; }
    if i >= bytes.len() || bytes[i].1 == ';' { return Ok(tokens); }
    if bytes[i].1 == ',' {
        return Err(LineError::syntax("expected a mnemonic before the first comma".into(), bytes[i].0));
    }

    // mnemonic: runs to whitespace, comma, comment, or end of line
    let mn_start = i;
    while i < bytes.len() && !bytes[i].1.is_whitespace() && bytes[i].1 != ',' && bytes[i].1 != ';' { i += 1; }
    tokens.push(bytes[mn_start..i].iter().map(|&(_, c)| c).collect());

    loop {
        // each pass consumes one separator (or end of line) and one operand
        while i < bytes.len() && bytes[i].1.is_whitespace() { i += 1; }
        if i >= bytes.len() || bytes[i].1 == ';' { return Ok(tokens); }
        if tokens.len() > 1 {
            if bytes[i].1 != ',' {
                return Err(LineError::syntax("expected a comma between operands".into(), bytes[i].0));
            }
            i += 1;
            while i < bytes.len() && bytes[i].1.is_whitespace() { i += 1; }
        } else if bytes[i].1 == ',' {
            // comma directly after the mnemonic
            i += 1;
            while i < bytes.len() && bytes[i].1.is_whitespace() { i += 1; }
        }
        if i >= bytes.len() || bytes[i].1 == ';' || bytes[i].1 == ',' {
            let col = if i < bytes.len() { bytes[i].0 } else { line.len() };
            return Err(LineError::syntax("expected an operand".into(), col));
        }

        if bytes[i].1 == '"' {
            // quoted string operand: consume through the matching unescaped quote
            let start = i;
            i += 1;
            let mut escaped = false;
            let mut closed = false;
            while i < bytes.len() {
                let c = bytes[i].1;
                i += 1;
                if escaped { escaped = false; }
                else if c == '\\' { escaped = true; }
                else if c == '"' { closed = true; break; }
            }
            if !closed {
                return Err(LineError::syntax("string operand is missing a closing quote".into(), bytes[start].0));
            }
            // nothing but a separator or comment may follow a closing quote
            if i < bytes.len() && !bytes[i].1.is_whitespace() && bytes[i].1 != ',' && bytes[i].1 != ';' {
                return Err(LineError::syntax("unexpected characters after closing quote".into(), bytes[i].0));
            }
            tokens.push(bytes[start..i].iter().map(|&(_, c)| c).collect());
        } else {
            let start = i;
            let mut end = i; // exclusive index of last non-ws char consumed
            while i < bytes.len() && bytes[i].1 != ',' && bytes[i].1 != ';' {
                let c = bytes[i].1;
                if c == '"' {
                    return Err(LineError::syntax("quote may only start an operand".into(), bytes[i].0));
                }
                if !c.is_whitespace() {
                    if end != i && end != start {
                        // non-whitespace resumed after interior whitespace
                        return Err(LineError::syntax("operand contains embedded whitespace".into(), bytes[i].0));
                    }
                    i += 1;
                    end = i;
                } else {
                    i += 1;
                }
            }
            tokens.push(bytes[start..end].iter().map(|&(_, c)| c).collect());
        }
    }
}

#[test]
fn test_parse_line() {
    assert_eq!(parse_line("").unwrap(), Vec::<String>::new());
    assert_eq!(parse_line("   ; comment only").unwrap(), Vec::<String>::new());
    assert_eq!(parse_line("HLT").unwrap(), vec!["HLT"]);
    assert_eq!(parse_line("  MVQ rg0, 5 ; init").unwrap(), vec!["MVQ", "rg0", "5"]);
    assert_eq!(parse_line("ADD rg0,rg1").unwrap(), vec!["ADD", "rg0", "rg1"]);
    assert_eq!(parse_line("DVR rg0, rg1 , rg2").unwrap(), vec!["DVR", "rg0", "rg1", "rg2"]);
    assert_eq!(parse_line("%DAT \"a, b; c\"").unwrap(), vec!["%DAT", "\"a, b; c\""]);
    assert_eq!(parse_line(r#"%DAT "say \"hi\"""#).unwrap(), vec!["%DAT", r#""say \"hi\"""#]);
    assert_eq!(parse_line(":LABEL").unwrap(), vec![":LABEL"]);

    assert!(parse_line(" , MVQ rg0").is_err());
    assert!(parse_line("MVQ rg0,").is_err());
    assert!(parse_line("MVQ rg0,, 5").is_err());
    assert!(parse_line("MVQ rg0 5").is_err());
    assert!(parse_line("%DAT \"unterminated").is_err());
    assert!(parse_line("%DAT \"closed\"x").is_err());
    assert!(parse_line("MVQ rg\"0, 5").is_err());
}

/// Whether `name` is a valid label/macro/variable name: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        None => return false,
        Some('_') | Some('a'..='z') | Some('A'..='Z') => (),
        Some(_) => return false,
    }
    chars.all(|c| matches!(c, '_' | 'a'..='z' | 'A'..='Z' | '0'..='9'))
}

#[test]
fn test_valid_name() {
    assert!(is_valid_name("foo"));
    assert!(is_valid_name("_foo9"));
    assert!(is_valid_name("ENTRY"));
    assert!(!is_valid_name(""));
    assert!(!is_valid_name("9foo"));
    assert!(!is_valid_name("fo-o"));
    assert!(!is_valid_name("fo o"));
}

/// Classifies an operand token by its lexical shape alone.
pub fn determine_operand_type(token: &str) -> Result<OperandType, LineError> {
    let mut chars = token.chars();
    match chars.next() {
        None => Err(LineError::operand("empty operand".into())),
        Some(':') => {
            let name = token[1..].strip_prefix('&');
            let is_literal = name.is_some();
            let name = name.unwrap_or(&token[1..]);
            if !is_valid_name(name) {
                return Err(LineError::new(AsmErrorKind::LabelName,
                    format!("\"{}\" is not a valid label name", name), None));
            }
            Ok(if is_literal { OperandType::Literal } else { OperandType::Address })
        }
        Some('0'..='9') | Some('-') | Some('.') => Ok(OperandType::Literal),
        Some('"') => Ok(OperandType::Literal),
        Some('*') => Ok(OperandType::Pointer),
        Some(_) => {
            if crate::common::Register::from_name(token).is_some() {
                Ok(OperandType::Register)
            } else {
                Err(LineError::operand(format!("\"{}\" is not a register, literal, address, or pointer", token)))
            }
        }
    }
}

#[test]
fn test_determine_operand_type() {
    assert_eq!(determine_operand_type("rg0").unwrap(), OperandType::Register);
    assert_eq!(determine_operand_type("RSF").unwrap(), OperandType::Register);
    assert_eq!(determine_operand_type("17").unwrap(), OperandType::Literal);
    assert_eq!(determine_operand_type("-4").unwrap(), OperandType::Literal);
    assert_eq!(determine_operand_type(".5").unwrap(), OperandType::Literal);
    assert_eq!(determine_operand_type("0xFF").unwrap(), OperandType::Literal);
    assert_eq!(determine_operand_type("\"hi\"").unwrap(), OperandType::Literal);
    assert_eq!(determine_operand_type(":LOOP").unwrap(), OperandType::Address);
    assert_eq!(determine_operand_type(":&LOOP").unwrap(), OperandType::Literal);
    assert_eq!(determine_operand_type("*rg3").unwrap(), OperandType::Pointer);
    assert!(determine_operand_type("bogus").is_err());
    assert!(determine_operand_type(":9bad").is_err());
    assert!(determine_operand_type(":&-x").is_err());
}

/// A literal decoded to its binary form.
pub struct ParsedLiteral {
    /// Encoded bytes: 8 little-endian bytes for numerics, UTF-8 bytes for strings.
    pub bytes: Vec<u8>,
    /// The numeric value (bit pattern for floats), or the character count for strings.
    pub value: u64,
}

/// Decodes a numeric or (if `allow_string`) string literal token.
///
/// Numeric literals accept `0x`/`0b` prefixes, `_` digit separators, one optional
/// leading `-`, and at most one `.` (which selects IEEE-754 double encoding).
pub fn parse_literal(token: &str, allow_string: bool) -> Result<ParsedLiteral, LineError> {
    if token.starts_with('"') {
        if !allow_string {
            return Err(LineError::operand("a string literal is not allowed here".into()));
        }
        let decoded = decode_string_literal(token)?;
        let chars = decoded.chars().count() as u64;
        return Ok(ParsedLiteral { bytes: decoded.into_bytes(), value: chars });
    }

    let cleaned: String = token.chars().filter(|&c| c != '_').collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, &*cleaned),
    };

    if digits.contains('.') {
        if digits.matches('.').count() > 1 {
            return Err(LineError::operand(format!("\"{}\" has more than one decimal point", token)));
        }
        let parsed: f64 = match digits.parse() {
            Ok(f) => f,
            Err(_) => return Err(LineError::operand(format!("\"{}\" is not a valid numeric literal", token))),
        };
        let value = (if negative { -parsed } else { parsed }).to_bits();
        return Ok(ParsedLiteral { bytes: value.to_le_bytes().to_vec(), value });
    }

    let (radix, body) = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        (16, hex)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        (2, bin)
    } else {
        (10, digits)
    };
    if body.is_empty() {
        return Err(LineError::operand(format!("\"{}\" is not a valid numeric literal", token)));
    }
    let magnitude = match u128::from_str_radix(body, radix) {
        Ok(m) => m,
        Err(_) => return Err(LineError::operand(format!("\"{}\" is not a valid numeric literal", token))),
    };

    let value = if negative {
        if magnitude > (i64::MIN as i128).unsigned_abs() {
            return Err(LineError::operand(format!(
                "\"{}\" is out of range: numeric literals must be between -9223372036854775808 and 18446744073709551615", token)));
        }
        (magnitude as u64).wrapping_neg()
    } else {
        if magnitude > u64::MAX as u128 {
            return Err(LineError::operand(format!(
                "\"{}\" is out of range: numeric literals must be between -9223372036854775808 and 18446744073709551615", token)));
        }
        magnitude as u64
    };
    Ok(ParsedLiteral { bytes: value.to_le_bytes().to_vec(), value })
}

/// Decodes the escape sequences of a quoted string token (quotes included).
fn decode_string_literal(token: &str) -> Result<String, LineError> {
    let inner = token.strip_prefix('"').and_then(|t| t.strip_suffix('"'))
        .ok_or_else(|| LineError::operand("malformed string literal".into()))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' { out.push(c); continue; }
        match chars.next() {
            None => return Err(LineError::operand("string literal ends with a bare backslash".into())),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('0') => out.push('\0'),
            Some('a') => out.push('\u{07}'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0C}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\u{0B}'),
            Some('u') => out.push(decode_codepoint_escape(&mut chars, 4)?),
            Some('U') => out.push(decode_codepoint_escape(&mut chars, 8)?),
            Some(other) => return Err(LineError::operand(format!("unrecognized escape sequence \\{}", other))),
        }
    }
    Ok(out)
}

fn decode_codepoint_escape(chars: &mut std::str::Chars, digits: u32) -> Result<char, LineError> {
    let mut value: u32 = 0;
    for _ in 0..digits {
        let d = chars.next().and_then(|c| c.to_digit(16))
            .ok_or_else(|| LineError::operand(format!("\\u escape requires exactly {} hex digits", digits)))?;
        value = value * 16 + d;
    }
    match char::from_u32(value) {
        Some(c) => Ok(c),
        // from_u32 rejects surrogates and out-of-range values
        None => Err(LineError::operand(format!("U+{:04X} is not a valid unicode scalar value", value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_literal() {
        assert_eq!(parse_literal("5", false).unwrap().value, 5);
        assert_eq!(parse_literal("5", false).unwrap().bytes, 5u64.to_le_bytes());
        assert_eq!(parse_literal("0x10", false).unwrap().value, 16);
        assert_eq!(parse_literal("0b1010", false).unwrap().value, 10);
        assert_eq!(parse_literal("1_000_000", false).unwrap().value, 1000000);
        assert_eq!(parse_literal("-1", false).unwrap().value, u64::MAX);
        assert_eq!(parse_literal("-9223372036854775808", false).unwrap().value, 1u64 << 63);
        assert_eq!(parse_literal("18446744073709551615", false).unwrap().value, u64::MAX);
        assert_eq!(parse_literal("0xFFFF_FFFF_FFFF_FFFF", false).unwrap().value, u64::MAX);

        assert!(parse_literal("18446744073709551616", false).is_err());
        assert!(parse_literal("-9223372036854775809", false).is_err());
        assert!(parse_literal("0x", false).is_err());
        assert!(parse_literal("12abc", false).is_err());
        assert!(parse_literal("1.2.3", false).is_err());
    }

    #[test]
    fn test_parse_float_literal() {
        assert_eq!(parse_literal("2.5", false).unwrap().value, 2.5f64.to_bits());
        assert_eq!(parse_literal("-0.5", false).unwrap().value, (-0.5f64).to_bits());
        assert_eq!(parse_literal(".25", false).unwrap().value, 0.25f64.to_bits());
        assert_eq!(parse_literal("2.5", false).unwrap().bytes, 2.5f64.to_bits().to_le_bytes());
    }

    #[test]
    fn test_parse_string_literal() {
        let lit = parse_literal("\"AB\"", true).unwrap();
        assert_eq!(lit.bytes, b"AB");
        assert_eq!(lit.value, 2);

        let lit = parse_literal(r#""a\nb\0\t\"""#, true).unwrap();
        assert_eq!(lit.bytes, b"a\nb\0\t\"");
        assert_eq!(lit.value, 6);

        // value counts characters, not bytes
        let lit = parse_literal("\"\\u00E9\"", true).unwrap();
        assert_eq!(lit.bytes, "é".as_bytes());
        assert_eq!(lit.value, 1);

        let lit = parse_literal("\"\\U0001F600\"", true).unwrap();
        assert_eq!(lit.bytes, "\u{1F600}".as_bytes());
        assert_eq!(lit.value, 1);

        assert!(parse_literal("\"x\"", false).is_err());
        assert!(parse_literal("\"\\uD800\"", true).is_err()); // surrogate
        assert!(parse_literal("\"\\u12\"", true).is_err()); // short escape
        assert!(parse_literal("\"\\q\"", true).is_err());
    }
}
