//! KeePass 2.x (KDBX, major version up to 3).
//!
//! Header layout after the signature, repeated until the end marker:
//! ```text
//! FIELD_ID (1) | LENGTH (2, LE) | DATA (LENGTH)
//! ```
//! The encrypted payload follows the end marker. It decrypts to the stream
//! start bytes followed by the hashed block stream.

use std::io::Read;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{DatabaseReader, Format, HeaderInfo, ReadContext, read_u32, read_u64};
use crate::crypto::{IV_LEN, KEY_LEN, ProtectedStream, remove_padding, sha256_concat};
use crate::error::KdbError;
use crate::signature::FileSignature;

const END_OF_HEADER: u8 = 0;
const COMMENT: u8 = 1;
const CIPHER_ID: u8 = 2;
const COMPRESSION_FLAGS: u8 = 3;
const MASTER_SEED: u8 = 4;
const TRANSFORM_SEED: u8 = 5;
const TRANSFORM_ROUNDS: u8 = 6;
const ENCRYPTION_IV: u8 = 7;
const PROTECTED_STREAM_KEY: u8 = 8;
const STREAM_START_BYTES: u8 = 9;
const INNER_RANDOM_STREAM_ID: u8 = 10;

/// UUID of the AES-256 cipher, 31c1f2e6-bf71-4350-be58-05216afc5aff.
pub const CIPHER_AES256: [u8; 16] = [
    0x31, 0xC1, 0xF2, 0xE6, 0xBF, 0x71, 0x43, 0x50, 0xBE, 0x58, 0x05, 0x21, 0x6A, 0xFC, 0x5A, 0xFF,
];

/// Length of the stream start bytes (32 bytes).
pub const STREAM_START_LEN: usize = 32;

/// Algorithm protecting individual values inside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerStreamId {
    None,
    ArcFour,
    Salsa20,
}

impl InnerStreamId {
    fn from_u32(id: u32) -> Result<Self, KdbError> {
        match id {
            0 => Ok(InnerStreamId::None),
            1 => Ok(InnerStreamId::ArcFour),
            2 => Ok(InnerStreamId::Salsa20),
            other => Err(KdbError::MalformedHeader(format!(
                "unknown inner random stream id {other}"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            InnerStreamId::None => "none",
            InnerStreamId::ArcFour => "ArcFour",
            InnerStreamId::Salsa20 => "Salsa20",
        }
    }
}

/// Parsed plaintext header of a KDBX file.
#[derive(Debug)]
pub struct KdbxHeader {
    signature: FileSignature,
    compressed: bool,
    master_seed: Vec<u8>,
    transform_seed: Vec<u8>,
    transform_rounds: u64,
    encryption_iv: Vec<u8>,
    protected_stream_key: Option<Zeroizing<Vec<u8>>>,
    stream_start_bytes: Vec<u8>,
    inner_stream: InnerStreamId,
}

impl KdbxHeader {
    /// Read header fields up to and including the end marker.
    ///
    /// # Errors
    ///
    /// Returns [`KdbError::TruncatedInput`] if the stream ends inside the
    /// header, [`KdbError::UnsupportedFormat`] for a cipher other than AES and
    /// [`KdbError::MalformedHeader`] for missing or badly sized fields.
    pub fn read(signature: FileSignature, reader: &mut dyn Read) -> Result<Self, KdbError> {
        let mut cipher_seen = false;
        let mut compressed = false;
        let mut master_seed = None;
        let mut transform_seed = None;
        let mut transform_rounds = None;
        let mut encryption_iv = None;
        let mut protected_stream_key = None;
        let mut stream_start_bytes = None;
        let mut inner_stream = InnerStreamId::None;

        loop {
            let mut head = [0u8; 3];
            reader.read_exact(&mut head)?;
            let id = head[0];
            let len = usize::from(u16::from_le_bytes([head[1], head[2]]));

            let mut data = vec![0u8; len];
            reader.read_exact(&mut data)?;

            match id {
                END_OF_HEADER => break,
                COMMENT => {}
                CIPHER_ID => {
                    if data != CIPHER_AES256 {
                        return Err(KdbError::UnsupportedFormat(format!(
                            "cipher {} is not AES-256",
                            hex::encode(&data)
                        )));
                    }
                    cipher_seen = true;
                }
                COMPRESSION_FLAGS => {
                    compressed = match read_u32(&data, "compression flags")? {
                        0 => false,
                        1 => true,
                        other => {
                            return Err(KdbError::MalformedHeader(format!(
                                "unknown compression algorithm {other}"
                            )));
                        }
                    }
                }
                MASTER_SEED => master_seed = Some(exact(data, KEY_LEN, "master seed")?),
                TRANSFORM_SEED => transform_seed = Some(data),
                TRANSFORM_ROUNDS => transform_rounds = Some(read_u64(&data, "transform rounds")?),
                ENCRYPTION_IV => encryption_iv = Some(exact(data, IV_LEN, "encryption IV")?),
                PROTECTED_STREAM_KEY => protected_stream_key = Some(Zeroizing::new(data)),
                STREAM_START_BYTES => {
                    stream_start_bytes = Some(exact(data, STREAM_START_LEN, "stream start bytes")?)
                }
                INNER_RANDOM_STREAM_ID => {
                    inner_stream = InnerStreamId::from_u32(read_u32(&data, "inner random stream id")?)?
                }
                other => debug!(id = other, len, "skipping unknown header field"),
            }
        }

        if !cipher_seen {
            return Err(missing("cipher id"));
        }
        if inner_stream == InnerStreamId::Salsa20 && protected_stream_key.is_none() {
            return Err(missing("protected stream key"));
        }

        Ok(Self {
            signature,
            compressed,
            master_seed: master_seed.ok_or_else(|| missing("master seed"))?,
            transform_seed: transform_seed.ok_or_else(|| missing("transform seed"))?,
            transform_rounds: transform_rounds.ok_or_else(|| missing("transform rounds"))?,
            encryption_iv: encryption_iv.ok_or_else(|| missing("encryption IV"))?,
            protected_stream_key,
            stream_start_bytes: stream_start_bytes.ok_or_else(|| missing("stream start bytes"))?,
            inner_stream,
        })
    }

    pub fn signature(&self) -> &FileSignature {
        &self.signature
    }

    pub fn transform_rounds(&self) -> u64 {
        self.transform_rounds
    }

    pub fn compressed(&self) -> bool {
        self.compressed
    }

    pub fn info(&self) -> HeaderInfo {
        HeaderInfo {
            format: Format::Kdbx,
            signature: self.signature,
            cipher: "AES-256-CBC",
            transform_rounds: self.transform_rounds,
            compressed: Some(self.compressed),
            inner_stream: Some(self.inner_stream.name()),
            groups: None,
            entries: None,
        }
    }
}

fn exact(data: Vec<u8>, len: usize, field: &str) -> Result<Vec<u8>, KdbError> {
    if data.len() != len {
        return Err(KdbError::MalformedHeader(format!(
            "{field} must be {len} bytes, got {}",
            data.len()
        )));
    }
    Ok(data)
}

fn missing(field: &str) -> KdbError {
    KdbError::MalformedHeader(format!("missing {field}"))
}

enum InnerStream {
    None,
    ArcFour,
    Salsa20(ProtectedStream),
    Taken,
}

/// An unlocked KDBX database.
pub struct KdbxReader {
    info: HeaderInfo,
    plaintext: Zeroizing<Vec<u8>>,
    payload_offset: usize,
    verified: bool,
    inner: InnerStream,
}

impl KdbxReader {
    /// Read the header from `reader`, then derive the master key and decrypt
    /// everything that follows.
    ///
    /// # Errors
    ///
    /// Header errors as in [`KdbxHeader::read`]; credential and cipher errors
    /// from the injected suite; [`KdbError::InvalidCredentials`] when
    /// verification is on and the stream start bytes do not match.
    pub fn open(
        signature: FileSignature,
        reader: &mut dyn Read,
        ctx: &ReadContext<'_>,
    ) -> Result<Self, KdbError> {
        let header = KdbxHeader::read(signature, reader)?;
        let composite = ctx.credentials.composite()?;

        let mut ciphertext = Vec::new();
        reader.read_to_end(&mut ciphertext)?;

        info!(
            rounds = header.transform_rounds,
            ciphertext_len = ciphertext.len(),
            "unlocking KDBX database"
        );

        let transformed = ctx.suite.derive_key(
            &composite.digest()[..],
            &header.transform_seed,
            header.transform_rounds,
        )?;
        let master_key = Zeroizing::new(sha256_concat(&[&header.master_seed[..], &transformed[..]]));

        let mut plaintext = ctx
            .suite
            .decrypt_cbc(&ciphertext, &master_key[..], &header.encryption_iv)?;
        let len = remove_padding(&plaintext)?.len();
        plaintext.truncate(len);

        let starts_ok = plaintext.len() >= STREAM_START_LEN
            && plaintext[..STREAM_START_LEN] == header.stream_start_bytes[..];
        if !starts_ok {
            if ctx.verify {
                return Err(KdbError::InvalidCredentials);
            }
            warn!("stream start bytes do not match, payload may be garbage");
        }

        let inner = match (header.inner_stream, &header.protected_stream_key) {
            (InnerStreamId::Salsa20, Some(key)) => InnerStream::Salsa20(ctx.suite.protected_stream(key)?),
            (InnerStreamId::ArcFour, _) => InnerStream::ArcFour,
            _ => InnerStream::None,
        };

        debug!(payload_len = len.saturating_sub(STREAM_START_LEN), "KDBX payload decrypted");

        Ok(Self {
            info: header.info(),
            payload_offset: STREAM_START_LEN.min(plaintext.len()),
            plaintext,
            verified: ctx.verify,
            inner,
        })
    }
}

impl DatabaseReader for KdbxReader {
    fn format(&self) -> Format {
        Format::Kdbx
    }

    fn header(&self) -> &HeaderInfo {
        &self.info
    }

    fn payload(&self) -> &[u8] {
        &self.plaintext[self.payload_offset..]
    }

    fn verified(&self) -> bool {
        self.verified
    }

    fn take_inner_stream(&mut self) -> Result<Option<ProtectedStream>, KdbError> {
        match std::mem::replace(&mut self.inner, InnerStream::Taken) {
            InnerStream::Salsa20(stream) => Ok(Some(stream)),
            InnerStream::ArcFour => {
                self.inner = InnerStream::ArcFour;
                Err(KdbError::UnsupportedFormat("ArcFour inner stream".to_string()))
            }
            InnerStream::None => {
                self.inner = InnerStream::None;
                Ok(None)
            }
            InnerStream::Taken => Ok(None),
        }
    }
}
