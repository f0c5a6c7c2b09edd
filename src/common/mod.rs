//! Everything that is shared by `asm`, `dis`, and `exec`.

use std::fmt;

pub mod isa;
pub mod aap;

/// Language version encoded into every AAP header (major, minor, build).
pub const LANGUAGE_VERSION: (u32, u32, u32) = (1, 0, 0);

/// An instruction opcode: an extension set number plus a code within that set.
///
/// Set `0x00` is the mandatory base set and is encoded as a single byte.
/// Any other set uses the fully-qualified 3-byte form `0xFF, extension_set, code`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Opcode {
    pub extension_set: u8,
    pub code: u8,
}
impl Opcode {
    pub const fn new(extension_set: u8, code: u8) -> Opcode {
        Opcode { extension_set, code }
    }
    /// Marker byte introducing the fully-qualified 3-byte encoding.
    pub const FULLY_QUALIFIED_MARKER: u8 = 0xFF;

    /// Appends the encoded form of this opcode to `out` (1 byte, or 3 when
    /// fully qualified).
    pub fn encode_into(self, out: &mut Vec<u8>) {
        if self.extension_set == 0 {
            out.push(self.code);
        } else {
            out.push(Self::FULLY_QUALIFIED_MARKER);
            out.push(self.extension_set);
            out.push(self.code);
        }
    }
}
impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#04x}:{:#04x}", self.extension_set, self.code)
    }
}

/// The sixteen processor registers.
///
/// `Rpo` is the program offset and is read-only from program code; the rest are
/// freely writable. `Rso`/`Rsb` delimit the current stack frame, `Rsf` holds the
/// status flags, `Rrv` receives subroutine return values, and `Rfp` receives the
/// fast-pass parameter of a two-operand `CAL`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive)]
#[repr(u8)]
pub enum Register {
    Rpo = 0x00,
    Rso = 0x01,
    Rsb = 0x02,
    Rsf = 0x03,
    Rrv = 0x04,
    Rfp = 0x05,
    Rg0 = 0x06,
    Rg1 = 0x07,
    Rg2 = 0x08,
    Rg3 = 0x09,
    Rg4 = 0x0A,
    Rg5 = 0x0B,
    Rg6 = 0x0C,
    Rg7 = 0x0D,
    Rg8 = 0x0E,
    Rg9 = 0x0F,
}
impl Register {
    pub const COUNT: usize = 16;

    /// The lowercase source-form name of this register.
    pub fn name(self) -> &'static str {
        match self {
            Register::Rpo => "rpo",
            Register::Rso => "rso",
            Register::Rsb => "rsb",
            Register::Rsf => "rsf",
            Register::Rrv => "rrv",
            Register::Rfp => "rfp",
            Register::Rg0 => "rg0",
            Register::Rg1 => "rg1",
            Register::Rg2 => "rg2",
            Register::Rg3 => "rg3",
            Register::Rg4 => "rg4",
            Register::Rg5 => "rg5",
            Register::Rg6 => "rg6",
            Register::Rg7 => "rg7",
            Register::Rg8 => "rg8",
            Register::Rg9 => "rg9",
        }
    }
    /// Parses a source-form register name (ASCII case-insensitive).
    pub fn from_name(name: &str) -> Option<Register> {
        Some(match &*name.to_ascii_lowercase() {
            "rpo" => Register::Rpo,
            "rso" => Register::Rso,
            "rsb" => Register::Rsb,
            "rsf" => Register::Rsf,
            "rrv" => Register::Rrv,
            "rfp" => Register::Rfp,
            "rg0" => Register::Rg0,
            "rg1" => Register::Rg1,
            "rg2" => Register::Rg2,
            "rg3" => Register::Rg3,
            "rg4" => Register::Rg4,
            "rg5" => Register::Rg5,
            "rg6" => Register::Rg6,
            "rg7" => Register::Rg7,
            "rg8" => Register::Rg8,
            "rg9" => Register::Rg9,
            _ => return None,
        })
    }
}
impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[test]
fn test_register_names() {
    use num_traits::FromPrimitive;
    for i in 0..16u8 {
        let r = Register::from_u8(i).unwrap();
        assert_eq!(r as u8, i);
        assert_eq!(Register::from_name(r.name()), Some(r));
        assert_eq!(Register::from_name(&r.name().to_ascii_uppercase()), Some(r));
    }
    assert_eq!(Register::from_name("rg10"), None);
    assert_eq!(Register::from_name(""), None);
    assert_eq!(Register::from_name("rax"), None);
}

/// Bit positions within the `rsf` status register.
///
/// `Sign` and `Overflow` are only updated by instructions gated behind the signed
/// extension-aware flag laws; `AutoEcho` controls whether `RCC` echoes input bytes.
pub mod status_flags {
    pub const ZERO: u64      = 0b000001;
    pub const CARRY: u64     = 0b000010;
    pub const FILE_END: u64  = 0b000100;
    pub const SIGN: u64      = 0b001000;
    pub const OVERFLOW: u64  = 0b010000;
    pub const AUTO_ECHO: u64 = 0b100000;
}

/// The type of a single instruction operand.
///
/// Determined purely from the lexical shape of the source token, and determining
/// both the opcode table lookup and the encoded width: a register or pointer is a
/// single register-index byte, a literal or address is 8 little-endian bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum OperandType {
    Register,
    Literal,
    Address,
    Pointer,
}
impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            OperandType::Register => "register",
            OperandType::Literal => "literal",
            OperandType::Address => "address",
            OperandType::Pointer => "pointer",
        };
        write!(f, "{}", name)
    }
}

/// AAP feature-flag bits.
///
/// The assembler ors in bits as extension-set opcodes are emitted; the loader
/// rejects any file whose mask contains a bit the running interpreter does not
/// support.
pub mod features {
    pub const V1_CALL_STACK: u64        = 1 << 0;
    pub const EXTENSION_SIGNED: u64     = 1 << 1;
    pub const EXTENSION_FLOAT: u64      = 1 << 2;
    pub const EXTENSION_EXTD: u64       = 1 << 3;
    pub const GZIP_COMPRESSED: u64      = 1 << 4;
    pub const EXTENSION_ASMX: u64       = 1 << 5;
    pub const EXTENSION_HEAP: u64       = 1 << 6;
    pub const EXTENSION_FSYS: u64       = 1 << 7;
    pub const EXTENSION_TERM: u64       = 1 << 8;
    pub const POINTER_DISPLACEMENT: u64 = 1 << 9;

    /// Every bit this build of the interpreter can honor.
    /// Notably absent: external assembly loading and displacement pointers.
    pub const INTERPRETER_SUPPORTED: u64 = V1_CALL_STACK | EXTENSION_SIGNED | EXTENSION_FLOAT
        | EXTENSION_EXTD | GZIP_COMPRESSED | EXTENSION_HEAP | EXTENSION_FSYS | EXTENSION_TERM;

    /// The feature bit implied by emitting an opcode of the given extension set.
    pub fn for_extension_set(extension_set: u8) -> u64 {
        match extension_set {
            0x01 => EXTENSION_SIGNED,
            0x02 => EXTENSION_FLOAT,
            0x03 => EXTENSION_EXTD,
            0x04 => EXTENSION_ASMX,
            0x05 => EXTENSION_HEAP,
            0x06 => EXTENSION_FSYS,
            0x07 => EXTENSION_TERM,
            _ => 0,
        }
    }
}
