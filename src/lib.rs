//! Identify and unlock KeePass database files.
//!
//! A database is identified from its 12-byte signature, its key is derived
//! from the supplied [`Credentials`], and its payload is decrypted up to the
//! cipher boundary. Parsing the decrypted payload is left to the caller.
//!
//! ```no_run
//! use kdbcrypt::Credentials;
//!
//! let credentials = Credentials::from_password("correct horse");
//! let payload = kdbcrypt::open("vault.kdbx", &credentials, |db| Ok(db.payload().to_vec()))?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod credentials;
pub mod crypto;
mod error;
pub mod format;
mod session;
pub mod signature;
mod storage;

pub use crate::credentials::{CompositeSecret, Credentials};
pub use crate::crypto::{
    CancelToken, CryptoSuite, DerivedKey, ProtectedStream, StandardSuite, decrypt_cbc,
    decrypt_stream, derive_key, derive_key_with_cancel, remove_padding, xor,
};
pub use crate::error::KdbError;
pub use crate::format::{DatabaseReader, Format, HeaderInfo, dispatch, dispatch_with};
pub use crate::session::{Unlocker, identify, inspect, inspect_stream, open, open_stream};
pub use crate::signature::{FileSignature, read_signature};
pub use crate::storage::Storage;
