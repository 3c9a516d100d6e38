//! Cryptographic primitives used to unlock a database.
//!
//! Provides key stretching, AES-CBC and Salsa20 decryption, and the
//! [`CryptoSuite`] seam through which format readers reach them.

pub mod cipher;
pub mod kdf;

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::KdbError;

pub use cipher::{ProtectedStream, decrypt_cbc, decrypt_stream, remove_padding, xor};
pub use kdf::{CancelToken, DerivedKey, derive_key, derive_key_with_cancel};

/// Length of a derived key and of every SHA-256 digest (32 bytes).
pub const KEY_LEN: usize = 32;
/// AES block length (16 bytes).
pub const BLOCK_LEN: usize = 16;
/// AES-CBC initialization vector length (16 bytes).
pub const IV_LEN: usize = 16;
/// Salsa20 key length (32 bytes).
pub const STREAM_KEY_LEN: usize = 32;
/// Salsa20 nonce length (8 bytes).
pub const STREAM_NONCE_LEN: usize = 8;

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; KEY_LEN] {
    Sha256::digest(data).into()
}

/// SHA-256 digest of the concatenation of `parts`.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Key derivation and cipher operations handed to format readers.
///
/// Every method defaults to the crate's own primitive; implementors override
/// only what they need to change or observe.
pub trait CryptoSuite {
    fn derive_key(&self, composite: &[u8], seed: &[u8], rounds: u64) -> Result<DerivedKey, KdbError> {
        kdf::derive_key(composite, seed, rounds)
    }

    fn decrypt_cbc(
        &self,
        ciphertext: &[u8],
        key: &[u8],
        iv: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KdbError> {
        cipher::decrypt_cbc(ciphertext, key, iv)
    }

    fn protected_stream(&self, key: &[u8]) -> Result<ProtectedStream, KdbError> {
        ProtectedStream::new(key)
    }
}

/// The default suite: AES-KDF, AES-256-CBC and Salsa20, optionally cancellable.
#[derive(Debug, Clone, Default)]
pub struct StandardSuite {
    cancel: Option<CancelToken>,
}

impl StandardSuite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `token` between derivation rounds.
    pub fn with_cancel(token: CancelToken) -> Self {
        Self {
            cancel: Some(token),
        }
    }
}

impl CryptoSuite for StandardSuite {
    fn derive_key(&self, composite: &[u8], seed: &[u8], rounds: u64) -> Result<DerivedKey, KdbError> {
        match &self.cancel {
            Some(token) => kdf::derive_key_with_cancel(composite, seed, rounds, token),
            None => kdf::derive_key(composite, seed, rounds),
        }
    }
}
