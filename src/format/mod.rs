//! Format identification and the readers for each supported variant.
//!
//! A [`FileSignature`] is matched against an ordered rule table; the first
//! matching rule decides which reader parses the rest of the file.

use std::fmt;
use std::io::Read;

use serde::Serialize;
use tracing::debug;

use crate::credentials::Credentials;
use crate::crypto::{CryptoSuite, ProtectedStream};
use crate::error::KdbError;
use crate::signature::FileSignature;

pub mod kdb;
pub mod kdbx;

/// Magic shared by every KeePass database.
pub const KEEPASS_MAGIC: u32 = 0x9AA2_D903;
/// Sub-magic of KeePass 2.x (KDBX) databases.
pub const KDBX_SUB_MAGIC: u32 = 0xB54B_FB67;
/// Sub-magic of KeePass 2.x pre-release databases.
pub const PRE2_SUB_MAGIC: u32 = 0xB54B_FB66;
/// Sub-magic of KeePass 1.x (KDB) databases.
pub const KDB_SUB_MAGIC: u32 = 0xB54B_FB65;
/// Newest KDBX major version that can be read.
pub const KDBX_MAX_MAJOR: u16 = 3;

/// A database variant with a reader in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Format {
    /// KeePass 2.x, up to major version 3.
    Kdbx,
    /// KeePass 1.x.
    Kdb,
}

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Format::Kdbx => "KDBX",
            Format::Kdb => "KDB",
        }
    }

    /// Parse the rest of the file and decrypt its payload.
    pub fn open_reader(
        self,
        signature: FileSignature,
        reader: &mut dyn Read,
        ctx: &ReadContext<'_>,
    ) -> Result<Box<dyn DatabaseReader>, KdbError> {
        match self {
            Format::Kdbx => Ok(Box::new(kdbx::KdbxReader::open(signature, reader, ctx)?)),
            Format::Kdb => Ok(Box::new(kdb::KdbReader::open(signature, reader, ctx)?)),
        }
    }

    /// Parse only the plaintext header.
    pub fn read_header(
        self,
        signature: FileSignature,
        reader: &mut dyn Read,
    ) -> Result<HeaderInfo, KdbError> {
        match self {
            Format::Kdbx => Ok(kdbx::KdbxHeader::read(signature, reader)?.info()),
            Format::Kdb => Ok(kdb::KdbHeader::read(signature, reader)?.info()),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a matching [`Rule`] resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Reader(Format),
    Unsupported(&'static str),
    Unknown,
}

/// One row of the dispatch table. `None` fields match any value.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    magic: u32,
    sub_magic: Option<u32>,
    max_major: Option<u16>,
    outcome: Outcome,
}

impl Rule {
    pub const fn new(
        magic: u32,
        sub_magic: Option<u32>,
        max_major: Option<u16>,
        outcome: Outcome,
    ) -> Self {
        Self {
            magic,
            sub_magic,
            max_major,
            outcome,
        }
    }

    pub fn matches(&self, sig: &FileSignature) -> bool {
        sig.magic() == self.magic
            && self.sub_magic.is_none_or(|sub| sig.sub_magic() == sub)
            && self.max_major.is_none_or(|max| sig.major() <= max)
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }
}

/// Known signatures, evaluated top-down.
pub const RULES: &[Rule] = &[
    Rule::new(
        KEEPASS_MAGIC,
        Some(KDBX_SUB_MAGIC),
        Some(KDBX_MAX_MAJOR),
        Outcome::Reader(Format::Kdbx),
    ),
    Rule::new(
        KEEPASS_MAGIC,
        Some(PRE2_SUB_MAGIC),
        None,
        Outcome::Unsupported("pre-2.x variant A"),
    ),
    Rule::new(
        KEEPASS_MAGIC,
        Some(KDB_SUB_MAGIC),
        None,
        Outcome::Reader(Format::Kdb),
    ),
    Rule::new(KEEPASS_MAGIC, None, None, Outcome::Unknown),
];

/// Select the reader for `sig` using [`RULES`].
///
/// # Errors
///
/// Returns [`KdbError::UnsupportedFormat`] or [`KdbError::UnknownSignature`].
pub fn dispatch(sig: &FileSignature) -> Result<Format, KdbError> {
    dispatch_with(RULES, sig)
}

/// Select the reader for `sig` using a caller-supplied rule table.
pub fn dispatch_with(rules: &[Rule], sig: &FileSignature) -> Result<Format, KdbError> {
    let outcome = rules.iter().find(|rule| rule.matches(sig)).map(Rule::outcome);
    debug!(signature = %sig, ?outcome, "dispatching signature");

    match outcome {
        Some(Outcome::Reader(format)) => Ok(format),
        Some(Outcome::Unsupported(reason)) => Err(KdbError::UnsupportedFormat(reason.to_string())),
        Some(Outcome::Unknown) | None => Err(KdbError::UnknownSignature),
    }
}

/// Dependencies a reader needs to unlock its payload.
pub struct ReadContext<'a> {
    pub credentials: &'a Credentials,
    pub suite: &'a dyn CryptoSuite,
    /// Run the format's own integrity check after decryption.
    pub verify: bool,
}

/// An unlocked database, positioned at the cipher boundary.
pub trait DatabaseReader {
    fn format(&self) -> Format;

    fn header(&self) -> &HeaderInfo;

    /// Decrypted bytes following the format's plaintext prefix.
    fn payload(&self) -> &[u8];

    /// Whether the format's integrity check ran and passed.
    fn verified(&self) -> bool;

    /// Hand out the keystream protecting inner values, once.
    fn take_inner_stream(&mut self) -> Result<Option<ProtectedStream>, KdbError> {
        Ok(None)
    }
}

/// Plaintext header fields, readable without credentials.
#[derive(Debug, Clone, Serialize)]
pub struct HeaderInfo {
    pub format: Format,
    pub signature: FileSignature,
    pub cipher: &'static str,
    pub transform_rounds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_stream: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<u32>,
}

impl fmt::Display for HeaderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "format:           {}", self.format)?;
        writeln!(
            f,
            "version:          {}.{}",
            self.signature.major(),
            self.signature.minor()
        )?;
        writeln!(f, "cipher:           {}", self.cipher)?;
        write!(f, "transform rounds: {}", self.transform_rounds)?;
        if let Some(compressed) = self.compressed {
            write!(f, "\ncompressed:       {compressed}")?;
        }
        if let Some(stream) = self.inner_stream {
            write!(f, "\ninner stream:     {stream}")?;
        }
        if let Some(groups) = self.groups {
            write!(f, "\ngroups:           {groups}")?;
        }
        if let Some(entries) = self.entries {
            write!(f, "\nentries:          {entries}")?;
        }
        Ok(())
    }
}

pub(crate) fn read_u32(data: &[u8], field: &str) -> Result<u32, KdbError> {
    let bytes: [u8; 4] = data
        .try_into()
        .map_err(|_| KdbError::MalformedHeader(format!("{field} must be 4 bytes")))?;
    Ok(u32::from_le_bytes(bytes))
}

pub(crate) fn read_u64(data: &[u8], field: &str) -> Result<u64, KdbError> {
    let bytes: [u8; 8] = data
        .try_into()
        .map_err(|_| KdbError::MalformedHeader(format!("{field} must be 8 bytes")))?;
    Ok(u64::from_le_bytes(bytes))
}
