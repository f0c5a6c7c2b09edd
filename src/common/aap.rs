//! The `.aap` executable container: a fixed 36-byte header followed by the raw
//! (optionally gzip-compressed) program bytes.

use std::fmt;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::{features, LANGUAGE_VERSION};

/// The 8-byte magic at the start of every AAP file.
pub const MAGIC: &[u8; 8] = b"AssEmbly";

/// Total size of the fixed header preceding the program body.
pub const HEADER_SIZE: usize = 36;

/// The kinds of errors that can occur reading or writing an AAP file.
#[derive(Debug)]
pub enum AapError {
    /// The file was shorter than the fixed header.
    TooShort,
    /// The leading magic bytes were not `AssEmbly`.
    BadMagic,
    /// The feature mask contains bits the given interpreter build does not support.
    /// Carries the offending (unsupported) bits.
    Incompatible(u64),
    /// The body was marked gzip-compressed but failed to decompress.
    BadCompression,
}
impl fmt::Display for AapError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AapError::TooShort => write!(f, "AAP file is shorter than the {}-byte header", HEADER_SIZE),
            AapError::BadMagic => write!(f, "AAP file does not start with the AssEmbly magic"),
            AapError::Incompatible(bits) => write!(f, "AAP file requires unsupported features (mask {:#x})", bits),
            AapError::BadCompression => write!(f, "AAP program body failed to decompress"),
        }
    }
}
impl std::error::Error for AapError {}

/// A parsed AAP executable.
///
/// `program` always holds the decompressed body; compression is a property of the
/// serialized form only (the `GZIP_COMPRESSED` feature bit).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AapFile {
    pub major_version: u32,
    pub minor_version: u32,
    pub build_version: u32,
    pub features: u64,
    pub entry_point: u64,
    pub program: Vec<u8>,
}
impl AapFile {
    /// Wraps raw program bytes in a container stamped with the current language version.
    pub fn new(features: u64, entry_point: u64, program: Vec<u8>) -> AapFile {
        AapFile {
            major_version: LANGUAGE_VERSION.0,
            minor_version: LANGUAGE_VERSION.1,
            build_version: LANGUAGE_VERSION.2,
            features, entry_point, program,
        }
    }

    /// Serializes to the on-disk byte format.
    /// The body is gzip-compressed iff the `GZIP_COMPRESSED` feature bit is set.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.program.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.major_version.to_le_bytes());
        out.extend_from_slice(&self.minor_version.to_le_bytes());
        out.extend_from_slice(&self.build_version.to_le_bytes());
        out.extend_from_slice(&self.features.to_le_bytes());
        out.extend_from_slice(&self.entry_point.to_le_bytes());
        if self.features & features::GZIP_COMPRESSED != 0 {
            let mut enc = GzEncoder::new(out, Compression::default());
            enc.write_all(&self.program).unwrap(); // writing to a Vec cannot fail
            out = enc.finish().unwrap();
        } else {
            out.extend_from_slice(&self.program);
        }
        out
    }

    /// Parses the on-disk byte format.
    ///
    /// `supported_features` is the feature mask of the interpreter that intends to
    /// run this program; any feature bit outside of it fails with `Incompatible`
    /// before the body is even examined, so no partially-loaded state can escape.
    pub fn from_bytes(bytes: &[u8], supported_features: u64) -> Result<AapFile, AapError> {
        if bytes.len() < HEADER_SIZE { return Err(AapError::TooShort); }
        if &bytes[..8] != MAGIC { return Err(AapError::BadMagic); }

        let mut word32 = [0u8; 4];
        let mut word64 = [0u8; 8];
        word32.copy_from_slice(&bytes[8..12]);
        let major_version = u32::from_le_bytes(word32);
        word32.copy_from_slice(&bytes[12..16]);
        let minor_version = u32::from_le_bytes(word32);
        word32.copy_from_slice(&bytes[16..20]);
        let build_version = u32::from_le_bytes(word32);
        word64.copy_from_slice(&bytes[20..28]);
        let features = u64::from_le_bytes(word64);
        word64.copy_from_slice(&bytes[28..36]);
        let entry_point = u64::from_le_bytes(word64);

        let unsupported = features & !supported_features;
        if unsupported != 0 { return Err(AapError::Incompatible(unsupported)); }

        let body = &bytes[HEADER_SIZE..];
        let program = if features & features::GZIP_COMPRESSED != 0 {
            let mut program = vec![];
            match GzDecoder::new(body).read_to_end(&mut program) {
                Ok(_) => program,
                Err(_) => return Err(AapError::BadCompression),
            }
        } else {
            body.to_vec()
        };

        Ok(AapFile { major_version, minor_version, build_version, features, entry_point, program })
    }
}

#[test]
fn test_aap_roundtrip() {
    let file = AapFile::new(features::EXTENSION_SIGNED, 12, vec![0x99, 0x06, 5, 0, 0, 0, 0, 0, 0, 0, 0x00]);
    let bytes = file.to_bytes();
    assert_eq!(bytes.len(), HEADER_SIZE + file.program.len());
    assert_eq!(&bytes[..8], MAGIC);
    let back = AapFile::from_bytes(&bytes, features::INTERPRETER_SUPPORTED).unwrap();
    assert_eq!(back, file);
}

#[test]
fn test_aap_gzip_roundtrip() {
    let program: Vec<u8> = (0..200u8).cycle().take(5000).collect();
    let file = AapFile::new(features::GZIP_COMPRESSED, 0, program);
    let bytes = file.to_bytes();
    assert!(bytes.len() < HEADER_SIZE + file.program.len()); // repetitive data should shrink
    let back = AapFile::from_bytes(&bytes, features::INTERPRETER_SUPPORTED).unwrap();
    assert_eq!(back, file);
}

#[test]
fn test_aap_rejects() {
    assert!(matches!(AapFile::from_bytes(&[0; 10], u64::MAX), Err(AapError::TooShort)));

    let mut bytes = AapFile::new(0, 0, vec![]).to_bytes();
    bytes[0] = b'a';
    assert!(matches!(AapFile::from_bytes(&bytes, u64::MAX), Err(AapError::BadMagic)));

    let file = AapFile::new(features::EXTENSION_ASMX | features::EXTENSION_HEAP, 0, vec![1, 2, 3]);
    match AapFile::from_bytes(&file.to_bytes(), features::INTERPRETER_SUPPORTED) {
        Err(AapError::Incompatible(bits)) => assert_eq!(bits, features::EXTENSION_ASMX),
        x => panic!("{:?}", x),
    }
}
