use std::fmt;
use std::io;

/// Errors raised while identifying, unlocking or decrypting a database.
#[derive(Debug)]
pub enum KdbError {
    /// The signature does not belong to any supported database format.
    UnknownSignature,
    /// The file is a recognised KeePass variant this crate cannot read.
    UnsupportedFormat(String),
    /// The input ended before a fixed-size field could be read.
    TruncatedInput,
    /// A key, seed, IV or nonce has the wrong length.
    InvalidKeyMaterial(&'static str),
    /// Ciphertext length is not a multiple of the cipher block size.
    InvalidCiphertextLength(usize),
    /// The trailing padding count exceeds the plaintext length.
    InvalidPadding,
    /// Neither a password nor a key file was supplied.
    MissingCredentials,
    /// The chosen format does not accept a credential component.
    UnsupportedCredential(&'static str),
    /// The format's own integrity check failed after decryption.
    InvalidCredentials,
    /// A header field is missing or malformed.
    MalformedHeader(String),
    /// Key derivation was cancelled between rounds.
    Cancelled,
    Io(io::Error),
}

impl fmt::Display for KdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KdbError::UnknownSignature => write!(f, "unknown file signature"),
            KdbError::UnsupportedFormat(reason) => write!(f, "unsupported format: {reason}"),
            KdbError::TruncatedInput => write!(f, "input is truncated"),
            KdbError::InvalidKeyMaterial(what) => write!(f, "invalid key material: {what}"),
            KdbError::InvalidCiphertextLength(len) => {
                write!(f, "ciphertext length {len} is not a multiple of the block size")
            }
            KdbError::InvalidPadding => write!(f, "invalid padding"),
            KdbError::MissingCredentials => write!(f, "a password or a key file is required"),
            KdbError::UnsupportedCredential(what) => write!(f, "unsupported credential: {what}"),
            KdbError::InvalidCredentials => write!(f, "invalid credentials or corrupted file"),
            KdbError::MalformedHeader(what) => write!(f, "malformed header: {what}"),
            KdbError::Cancelled => write!(f, "key derivation cancelled"),
            KdbError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for KdbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KdbError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for KdbError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            KdbError::TruncatedInput
        } else {
            KdbError::Io(e)
        }
    }
}
