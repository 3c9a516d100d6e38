//! File signature: the first 12 bytes of every supported database.

use std::fmt;
use std::io::Read;

use serde::Serialize;

use crate::error::KdbError;

/// Number of bytes occupied by the signature.
pub const SIGNATURE_LEN: usize = 12;

/// Three little-endian `u32` fields identifying a database format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileSignature {
    magic: u32,
    sub_magic: u32,
    version: u32,
}

impl FileSignature {
    pub fn new(magic: u32, sub_magic: u32, version: u32) -> Self {
        Self {
            magic,
            sub_magic,
            version,
        }
    }

    pub fn from_bytes(bytes: &[u8; SIGNATURE_LEN]) -> Self {
        let field = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self::new(field(0), field(4), field(8))
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut buf = [0u8; SIGNATURE_LEN];
        buf[..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sub_magic.to_le_bytes());
        buf[8..].copy_from_slice(&self.version.to_le_bytes());
        buf
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn sub_magic(&self) -> u32 {
        self.sub_magic
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// High 16 bits of the version; a newer major version cannot be read.
    pub fn major(&self) -> u16 {
        (self.version >> 16) as u16
    }

    /// Low 16 bits of the version; informational only.
    pub fn minor(&self) -> u16 {
        (self.version & 0xFFFF) as u16
    }
}

impl fmt::Display for FileSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#010x} {:#010x} {}.{}",
            self.magic,
            self.sub_magic,
            self.major(),
            self.minor()
        )
    }
}

/// Read the signature from the current position of `reader`.
///
/// # Errors
///
/// Returns [`KdbError::TruncatedInput`] if fewer than 12 bytes are available.
pub fn read_signature<R: Read + ?Sized>(reader: &mut R) -> Result<FileSignature, KdbError> {
    let mut buf = [0u8; SIGNATURE_LEN];
    reader.read_exact(&mut buf)?;
    Ok(FileSignature::from_bytes(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_little_endian_fields() {
        let bytes = [
            0x03, 0xD9, 0xA2, 0x9A, 0x67, 0xFB, 0x4B, 0xB5, 0x01, 0x00, 0x03, 0x00,
        ];
        let sig = read_signature(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(sig.magic(), 0x9AA2D903);
        assert_eq!(sig.sub_magic(), 0xB54BFB67);
        assert_eq!(sig.version(), 0x0003_0001);
        assert_eq!(sig.major(), 3);
        assert_eq!(sig.minor(), 1);
    }

    #[test]
    fn advances_cursor_by_twelve() {
        let mut data = FileSignature::new(1, 2, 3).to_bytes().to_vec();
        data.extend_from_slice(b"rest");
        let mut cursor = Cursor::new(data);

        read_signature(&mut cursor).unwrap();
        assert_eq!(cursor.position(), SIGNATURE_LEN as u64);
    }

    #[test]
    fn short_input_is_truncated() {
        let mut cursor = Cursor::new(vec![0u8; 11]);
        assert!(matches!(read_signature(&mut cursor), Err(KdbError::TruncatedInput)));
    }

    #[test]
    fn empty_input_is_truncated() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(matches!(read_signature(&mut cursor), Err(KdbError::TruncatedInput)));
    }

    #[test]
    fn display_shows_version_halves() {
        let sig = FileSignature::new(0x9AA2D903, 0xB54BFB67, 0x0003_0001);
        assert_eq!(sig.to_string(), "0x9aa2d903 0xb54bfb67 3.1");
    }
}
