//! Scoped unlocking: open, identify, decrypt, hand to the caller, close.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::credentials::Credentials;
use crate::crypto::{CancelToken, CryptoSuite, StandardSuite};
use crate::format::{DatabaseReader, Format, HeaderInfo, ReadContext, dispatch};
use crate::signature::read_signature;
use crate::storage::Storage;

/// Session configuration: which crypto suite readers get and whether the
/// format's integrity check runs.
#[derive(Debug, Clone)]
pub struct Unlocker<S = StandardSuite> {
    suite: S,
    verify: bool,
}

impl Default for Unlocker {
    fn default() -> Self {
        Self {
            suite: StandardSuite::new(),
            verify: true,
        }
    }
}

impl Unlocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort key derivation once `token` is cancelled.
    pub fn with_cancel(token: CancelToken) -> Self {
        Self {
            suite: StandardSuite::with_cancel(token),
            verify: true,
        }
    }
}

impl<S: CryptoSuite> Unlocker<S> {
    /// Replace the crypto suite handed to format readers.
    pub fn with_suite<T: CryptoSuite>(self, suite: T) -> Unlocker<T> {
        Unlocker {
            suite,
            verify: self.verify,
        }
    }

    /// Turn the format's own integrity check on or off.
    ///
    /// With verification off a wrong password may surface as
    /// [`KdbError::InvalidPadding`](crate::KdbError::InvalidPadding) or as
    /// garbage plaintext.
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Unlock the database at `path` and run `body` on it.
    ///
    /// The file is closed before this returns, whatever the outcome.
    pub fn open<P, T, F>(&self, path: P, credentials: &Credentials, body: F) -> Result<T>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut dyn DatabaseReader) -> Result<T>,
    {
        let storage = Storage::new(path.as_ref());
        let stream = storage.open()?;
        self.open_stream(stream, credentials, body)
            .with_context(|| format!("failed to unlock {}", storage.path().display()))
    }

    /// Unlock a database read from `stream` and run `body` on it.
    ///
    /// `stream` is owned by the session and dropped exactly once: after
    /// `body` returns, or as soon as identification or decryption fails.
    pub fn open_stream<R, T, F>(&self, mut stream: R, credentials: &Credentials, body: F) -> Result<T>
    where
        R: Read,
        F: FnOnce(&mut dyn DatabaseReader) -> Result<T>,
    {
        let signature = read_signature(&mut stream)?;
        let format = dispatch(&signature)?;
        info!(%format, %signature, "opening database");

        let ctx = ReadContext {
            credentials,
            suite: &self.suite,
            verify: self.verify,
        };
        let mut reader = format.open_reader(signature, &mut stream, &ctx)?;

        let result = body(reader.as_mut());
        drop(stream);
        debug!(ok = result.is_ok(), "database stream released");
        result
    }
}

/// Unlock the database at `path` with default settings and run `body` on it.
pub fn open<P, T, F>(path: P, credentials: &Credentials, body: F) -> Result<T>
where
    P: AsRef<Path>,
    F: FnOnce(&mut dyn DatabaseReader) -> Result<T>,
{
    Unlocker::new().open(path, credentials, body)
}

/// Unlock a database read from `stream` with default settings.
pub fn open_stream<R, T, F>(stream: R, credentials: &Credentials, body: F) -> Result<T>
where
    R: Read,
    F: FnOnce(&mut dyn DatabaseReader) -> Result<T>,
{
    Unlocker::new().open_stream(stream, credentials, body)
}

/// Identify the format of the database at `path` without unlocking it.
pub fn identify(path: impl AsRef<Path>) -> Result<Format> {
    let mut stream = Storage::new(path.as_ref()).open()?;
    let signature = read_signature(&mut stream).context("failed to read file signature")?;
    Ok(dispatch(&signature)?)
}

/// Read the plaintext header of the database at `path`.
pub fn inspect(path: impl AsRef<Path>) -> Result<HeaderInfo> {
    let stream = Storage::new(path.as_ref()).open()?;
    inspect_stream(stream)
}

/// Read the plaintext header from `stream`.
pub fn inspect_stream<R: Read>(mut stream: R) -> Result<HeaderInfo> {
    let signature = read_signature(&mut stream).context("failed to read file signature")?;
    let format = dispatch(&signature)?;
    Ok(format.read_header(signature, &mut stream)?)
}
