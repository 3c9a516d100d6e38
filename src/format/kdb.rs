//! KeePass 1.x (KDB).
//!
//! Fixed 124-byte header:
//! ```text
//! SIG1 (4) | SIG2 (4) | FLAGS (4) | VERSION (4) | FINAL_SEED (16) | IV (16)
//! | GROUPS (4) | ENTRIES (4) | CONTENTS_HASH (32) | TRANSFORM_SEED (32) | ROUNDS (4)
//! ```
//! The signature reader has already consumed the first three fields, so
//! `FLAGS` arrives as the signature's version.

use std::io::Read;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{DatabaseReader, Format, HeaderInfo, ReadContext, read_u32};
use crate::crypto::{IV_LEN, KEY_LEN, remove_padding, sha256, sha256_concat};
use crate::error::KdbError;
use crate::signature::{FileSignature, SIGNATURE_LEN};

/// Total header length including the signature.
pub const HEADER_LEN: usize = 124;

const FLAG_RIJNDAEL: u32 = 2;
const FLAG_TWOFISH: u32 = 8;

const VERSION_MASK: u32 = 0xFFFF_FF00;
const VERSION_3: u32 = 0x0003_0000;

const FINAL_SEED_LEN: usize = 16;

/// Parsed plaintext header of a KDB file.
#[derive(Debug)]
pub struct KdbHeader {
    signature: FileSignature,
    version: u32,
    final_seed: [u8; FINAL_SEED_LEN],
    encryption_iv: [u8; IV_LEN],
    groups: u32,
    entries: u32,
    contents_hash: [u8; KEY_LEN],
    transform_seed: [u8; KEY_LEN],
    transform_rounds: u32,
}

impl KdbHeader {
    /// Read the header fields that follow the signature.
    ///
    /// # Errors
    ///
    /// Returns [`KdbError::TruncatedInput`] if fewer than 112 bytes remain.
    pub fn read(signature: FileSignature, reader: &mut dyn Read) -> Result<Self, KdbError> {
        let mut buf = [0u8; HEADER_LEN - SIGNATURE_LEN];
        reader.read_exact(&mut buf)?;

        let mut offset = 0;
        let version = read_u32(&buf[offset..offset + 4], "version")?;
        offset += 4;

        let final_seed = fixed(&buf[offset..offset + FINAL_SEED_LEN]);
        offset += FINAL_SEED_LEN;

        let encryption_iv = fixed(&buf[offset..offset + IV_LEN]);
        offset += IV_LEN;

        let groups = read_u32(&buf[offset..offset + 4], "group count")?;
        offset += 4;

        let entries = read_u32(&buf[offset..offset + 4], "entry count")?;
        offset += 4;

        let contents_hash = fixed(&buf[offset..offset + KEY_LEN]);
        offset += KEY_LEN;

        let transform_seed = fixed(&buf[offset..offset + KEY_LEN]);
        offset += KEY_LEN;

        let transform_rounds = read_u32(&buf[offset..offset + 4], "transform rounds")?;

        Ok(Self {
            signature,
            version,
            final_seed,
            encryption_iv,
            groups,
            entries,
            contents_hash,
            transform_seed,
            transform_rounds,
        })
    }

    /// Cipher flags, stored where newer formats keep their version.
    pub fn flags(&self) -> u32 {
        self.signature.version()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn transform_rounds(&self) -> u32 {
        self.transform_rounds
    }

    pub fn info(&self) -> HeaderInfo {
        HeaderInfo {
            format: Format::Kdb,
            signature: self.signature,
            cipher: if self.flags() & FLAG_TWOFISH != 0 {
                "Twofish-CBC"
            } else {
                "AES-256-CBC"
            },
            transform_rounds: u64::from(self.transform_rounds),
            compressed: None,
            inner_stream: None,
            groups: Some(self.groups),
            entries: Some(self.entries),
        }
    }

    fn check_supported(&self) -> Result<(), KdbError> {
        if self.version & VERSION_MASK != VERSION_3 {
            return Err(KdbError::UnsupportedFormat(format!(
                "KeePass 1.x file version {:#010x}",
                self.version
            )));
        }
        if self.flags() & FLAG_RIJNDAEL != 0 {
            return Ok(());
        }
        if self.flags() & FLAG_TWOFISH != 0 {
            return Err(KdbError::UnsupportedFormat("Twofish cipher".to_string()));
        }
        Err(KdbError::MalformedHeader(format!(
            "no known cipher in flags {:#x}",
            self.flags()
        )))
    }
}

fn fixed<const N: usize>(field: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(field);
    out
}

/// An unlocked KDB database.
pub struct KdbReader {
    info: HeaderInfo,
    plaintext: Zeroizing<Vec<u8>>,
    verified: bool,
}

impl KdbReader {
    /// Read the header, derive the master key and decrypt the payload.
    ///
    /// Key files are refused: this reader only accepts a password.
    ///
    /// # Errors
    ///
    /// Returns [`KdbError::UnsupportedCredential`] when a key file is given,
    /// [`KdbError::UnsupportedFormat`] for Twofish or unknown versions, and
    /// [`KdbError::InvalidCredentials`] when verification is on and the
    /// contents hash does not match.
    pub fn open(
        signature: FileSignature,
        reader: &mut dyn Read,
        ctx: &ReadContext<'_>,
    ) -> Result<Self, KdbError> {
        if ctx.credentials.has_key_file() {
            return Err(KdbError::UnsupportedCredential(
                "key files are not supported for KeePass 1.x databases",
            ));
        }

        let header = KdbHeader::read(signature, reader)?;
        header.check_supported()?;
        let composite = ctx.credentials.composite()?;

        let mut ciphertext = Vec::new();
        reader.read_to_end(&mut ciphertext)?;

        info!(
            rounds = header.transform_rounds,
            groups = header.groups,
            entries = header.entries,
            "unlocking KDB database"
        );

        let transformed = ctx.suite.derive_key(
            composite.as_bytes(),
            &header.transform_seed,
            u64::from(header.transform_rounds),
        )?;
        let master_key = Zeroizing::new(sha256_concat(&[&header.final_seed[..], &transformed[..]]));

        let mut plaintext = ctx
            .suite
            .decrypt_cbc(&ciphertext, &master_key[..], &header.encryption_iv)?;
        let len = remove_padding(&plaintext)?.len();
        plaintext.truncate(len);

        if sha256(&plaintext) != header.contents_hash {
            if ctx.verify {
                return Err(KdbError::InvalidCredentials);
            }
            warn!("contents hash does not match, payload may be garbage");
        }

        debug!(payload_len = len, "KDB payload decrypted");

        Ok(Self {
            info: header.info(),
            plaintext,
            verified: ctx.verify,
        })
    }
}

impl DatabaseReader for KdbReader {
    fn format(&self) -> Format {
        Format::Kdb
    }

    fn header(&self) -> &HeaderInfo {
        &self.info
    }

    fn payload(&self) -> &[u8] {
        &self.plaintext
    }

    fn verified(&self) -> bool {
        self.verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use crate::crypto::{StandardSuite, derive_key};
    use crate::format::{KDB_SUB_MAGIC, KEEPASS_MAGIC};
    use aes::Aes256;
    use cbc::cipher::block_padding::Pkcs7;
    use cbc::cipher::{BlockEncryptMut, KeyIvInit};
    use std::io::Cursor;

    const FINAL_SEED: [u8; 16] = [1u8; 16];
    const TRANSFORM_SEED: [u8; 32] = [2u8; 32];
    const IV: [u8; 16] = [3u8; 16];
    const ROUNDS: u32 = 10;

    fn sig(flags: u32) -> FileSignature {
        FileSignature::new(KEEPASS_MAGIC, KDB_SUB_MAGIC, flags)
    }

    fn master_key(password: &str) -> [u8; 32] {
        let transformed = derive_key(&sha256(password.as_bytes()), &TRANSFORM_SEED, u64::from(ROUNDS)).unwrap();
        sha256_concat(&[&FINAL_SEED[..], &transformed[..]])
    }

    /// Header bytes after the signature, followed by the encrypted payload.
    fn body(password: &str, version: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&version.to_le_bytes());
        buf.extend_from_slice(&FINAL_SEED);
        buf.extend_from_slice(&IV);
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&sha256(payload));
        buf.extend_from_slice(&TRANSFORM_SEED);
        buf.extend_from_slice(&ROUNDS.to_le_bytes());
        assert_eq!(buf.len(), HEADER_LEN - SIGNATURE_LEN);

        let key = master_key(password);
        let ciphertext = cbc::Encryptor::<Aes256>::new_from_slices(&key, &IV)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(payload);
        buf.extend_from_slice(&ciphertext);
        buf
    }

    fn open(flags: u32, data: Vec<u8>, credentials: &Credentials) -> Result<KdbReader, KdbError> {
        let suite = StandardSuite::new();
        let ctx = ReadContext {
            credentials,
            suite: &suite,
            verify: true,
        };
        KdbReader::open(sig(flags), &mut Cursor::new(data), &ctx)
    }

    #[test]
    fn master_key_matches_reference() {
        assert_eq!(
            hex::encode(master_key("pw")),
            "c4c0f2204e534e0db2db26497d38618d91c75fe89c1e30fe9dd7a466fe23fc24"
        );
    }

    #[test]
    fn header_fields_are_parsed() {
        let data = body("pw", 0x0003_0002, b"groups and entries");
        let header = KdbHeader::read(sig(3), &mut Cursor::new(data)).unwrap();
        assert_eq!(header.flags(), 3);
        assert_eq!(header.version(), 0x0003_0002);
        assert_eq!(header.transform_rounds(), ROUNDS);

        let info = header.info();
        assert_eq!(info.groups, Some(2));
        assert_eq!(info.entries, Some(7));
        assert_eq!(info.cipher, "AES-256-CBC");
    }

    #[test]
    fn unlock_returns_payload() {
        let data = body("pw", 0x0003_0002, b"groups and entries");
        let reader = open(3, data, &Credentials::from_password("pw")).unwrap();
        assert_eq!(reader.payload(), b"groups and entries");
        assert!(reader.verified());
        assert_eq!(reader.format(), Format::Kdb);
    }

    #[test]
    fn wrong_password_is_reported() {
        let data = body("pw", 0x0003_0002, b"groups and entries");
        let result = open(3, data, &Credentials::from_password("wrong"));
        assert!(matches!(
            result,
            Err(KdbError::InvalidCredentials | KdbError::InvalidPadding)
        ));
    }

    #[test]
    fn key_file_is_rejected() {
        let data = body("pw", 0x0003_0002, b"x");
        let creds = Credentials::from_password("pw").with_key_file(b"key");
        assert!(matches!(
            open(3, data, &creds),
            Err(KdbError::UnsupportedCredential(_))
        ));
    }

    #[test]
    fn twofish_is_unsupported() {
        let data = body("pw", 0x0003_0002, b"x");
        assert!(matches!(
            open(FLAG_TWOFISH | 1, data, &Credentials::from_password("pw")),
            Err(KdbError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn old_file_version_is_unsupported() {
        let data = body("pw", 0x0002_0000, b"x");
        assert!(matches!(
            open(3, data, &Credentials::from_password("pw")),
            Err(KdbError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn short_header_is_truncated() {
        let data = vec![0u8; 50];
        assert!(matches!(
            KdbHeader::read(sig(3), &mut Cursor::new(data)),
            Err(KdbError::TruncatedInput)
        ));
    }
}
