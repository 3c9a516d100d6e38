//! Credentials and the composite secret built from them.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::warn;
use zeroize::Zeroizing;

use crate::crypto::{KEY_LEN, sha256};
use crate::error::KdbError;

/// An optional password and an optional key file.
#[derive(Clone, Default)]
pub struct Credentials {
    password: Option<Zeroizing<Vec<u8>>>,
    key_file: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.is_some())
            .field("key_file", &self.key_file.is_some())
            .finish()
    }
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials holding only a password.
    pub fn from_password(password: impl AsRef<[u8]>) -> Self {
        Self::new().with_password(password)
    }

    pub fn with_password(mut self, password: impl AsRef<[u8]>) -> Self {
        self.password = Some(Zeroizing::new(password.as_ref().to_vec()));
        self
    }

    /// Attach key-file contents already in memory.
    pub fn with_key_file(mut self, contents: impl AsRef<[u8]>) -> Self {
        self.key_file = Some(Zeroizing::new(contents.as_ref().to_vec()));
        self
    }

    /// Read a key file from disk and attach it.
    pub fn with_key_file_path(self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = Zeroizing::new(
            fs::read(path).with_context(|| format!("failed to read key file {}", path.display()))?,
        );
        Ok(self.with_key_file(&contents[..]))
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn has_key_file(&self) -> bool {
        self.key_file.is_some()
    }

    /// Hash of the password followed by the key-file key, whichever are present.
    ///
    /// # Errors
    ///
    /// Returns [`KdbError::MissingCredentials`] if neither component is set.
    pub fn composite(&self) -> Result<CompositeSecret, KdbError> {
        if self.password.is_none() && self.key_file.is_none() {
            return Err(KdbError::MissingCredentials);
        }

        let mut buf = Zeroizing::new(Vec::with_capacity(2 * KEY_LEN));
        if let Some(password) = &self.password {
            buf.extend_from_slice(&sha256(password));
        }
        if let Some(contents) = &self.key_file {
            buf.extend_from_slice(&key_file_key(contents)[..]);
        }
        Ok(CompositeSecret(buf))
    }
}

/// Concatenated component hashes. Lives only for one derivation.
pub struct CompositeSecret(Zeroizing<Vec<u8>>);

impl CompositeSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The composite re-hashed to a single 32-byte block.
    pub fn digest(&self) -> Zeroizing<[u8; KEY_LEN]> {
        Zeroizing::new(sha256(&self.0))
    }
}

/// An XML key file is parsed first; otherwise 32 raw bytes are used as-is,
/// 64 hex digits are decoded, and anything else is hashed.
fn key_file_key(contents: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    if let Some(key) = xml_key_file_key(contents) {
        return key;
    }

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    if contents.len() == KEY_LEN {
        key.copy_from_slice(contents);
    } else if contents.len() == 2 * KEY_LEN && hex::decode_to_slice(contents, &mut key[..]).is_ok() {
        // hex key file
    } else {
        *key = sha256(contents);
    }
    key
}

const XML_VERSION_PATH: [&[u8]; 3] = [b"KeyFile", b"Meta", b"Version"];
const XML_DATA_PATH: [&[u8]; 3] = [b"KeyFile", b"Key", b"Data"];

/// Key from a KeePass XML key file: base64 in format 1.0, grouped hex with a
/// truncated SHA-256 check in format 2.0.
fn xml_key_file_key(contents: &[u8]) -> Option<Zeroizing<[u8; KEY_LEN]>> {
    let text = std::str::from_utf8(contents).ok()?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut version = None;
    let mut data: Option<Zeroizing<String>> = None;
    let mut hash = None;

    loop {
        match reader.read_event().ok()? {
            Event::Start(e) => {
                path.push(e.name().as_ref().to_vec());
                if at(&path, &XML_DATA_PATH) {
                    hash = e
                        .try_get_attribute("Hash")
                        .ok()
                        .flatten()
                        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned());
                }
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(t) => {
                let value = std::str::from_utf8(&t).ok()?;
                if at(&path, &XML_VERSION_PATH) {
                    version = Some(value.to_owned());
                } else if at(&path, &XML_DATA_PATH) {
                    data = Some(Zeroizing::new(value.to_owned()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let data = data?;
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    if version.as_deref().is_some_and(|v| v.trim().starts_with("2.")) {
        let digits = Zeroizing::new(data.chars().filter(|c| !c.is_whitespace()).collect::<String>());
        hex::decode_to_slice(digits.as_bytes(), &mut key[..]).ok()?;
        if let Some(expected) = hash {
            let actual = hex::encode(&sha256(&key[..])[..4]);
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                warn!("XML key file hash does not match its data");
                return None;
            }
        }
    } else {
        let raw = Zeroizing::new(STANDARD.decode(data.trim()).ok()?);
        if raw.len() != KEY_LEN {
            return None;
        }
        key.copy_from_slice(&raw);
    }
    Some(key)
}

fn at(path: &[Vec<u8>], target: &[&[u8]]) -> bool {
    path.len() == target.len() && path.iter().zip(target).all(|(a, b)| a.as_slice() == *b)
}
