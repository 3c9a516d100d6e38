use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockCipher, BlockDecryptMut, KeyInit, KeyIvInit, StreamCipher};
use salsa20::Salsa20;
use zeroize::Zeroizing;

use super::{BLOCK_LEN, IV_LEN, KEY_LEN, STREAM_KEY_LEN, STREAM_NONCE_LEN, sha256};
use crate::error::KdbError;

/// Fixed nonce of the Salsa20 inner stream that protects KDBX field values.
pub const INNER_STREAM_NONCE: [u8; STREAM_NONCE_LEN] = [0xE8, 0x30, 0x09, 0x4B, 0x97, 0x20, 0x5D, 0x2A];

/// Decrypt AES-CBC `ciphertext`. The key length picks AES-128, AES-192 or
/// AES-256. Padding is left in place.
///
/// # Errors
///
/// Returns [`KdbError::InvalidCiphertextLength`] if the length is not a
/// multiple of 16, before anything is decrypted, and
/// [`KdbError::InvalidKeyMaterial`] for a key that is not 16, 24 or 32 bytes
/// or an IV that is not 16 bytes.
pub fn decrypt_cbc(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Zeroizing<Vec<u8>>, KdbError> {
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(KdbError::InvalidCiphertextLength(ciphertext.len()));
    }
    if iv.len() != IV_LEN {
        return Err(KdbError::InvalidKeyMaterial("CBC IV must be 16 bytes"));
    }

    let mut buf = Zeroizing::new(ciphertext.to_vec());
    match key.len() {
        16 => cbc_in_place::<Aes128>(key, iv, &mut buf)?,
        24 => cbc_in_place::<Aes192>(key, iv, &mut buf)?,
        KEY_LEN => cbc_in_place::<Aes256>(key, iv, &mut buf)?,
        _ => return Err(KdbError::InvalidKeyMaterial("AES key must be 16, 24 or 32 bytes")),
    }
    Ok(buf)
}

fn cbc_in_place<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), KdbError>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    let len = buf.len();
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| KdbError::InvalidKeyMaterial("invalid AES-CBC key or IV"))?
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|_| KdbError::InvalidCiphertextLength(len))?;
    Ok(())
}

/// Strip trailing padding: the last byte counts how many bytes to drop.
///
/// # Errors
///
/// Returns [`KdbError::InvalidPadding`] for empty input or a count larger than
/// the input.
pub fn remove_padding(plaintext: &[u8]) -> Result<&[u8], KdbError> {
    let Some(&count) = plaintext.last() else {
        return Err(KdbError::InvalidPadding);
    };
    let count = usize::from(count);
    if count > plaintext.len() {
        return Err(KdbError::InvalidPadding);
    }
    Ok(&plaintext[..plaintext.len() - count])
}

/// XOR `data` with a fresh Salsa20 keystream.
///
/// # Errors
///
/// Returns [`KdbError::InvalidKeyMaterial`] unless `key` is 32 bytes and
/// `nonce` is 8 bytes.
pub fn decrypt_stream(data: &[u8], key: &[u8], nonce: &[u8]) -> Result<Vec<u8>, KdbError> {
    let mut cipher = salsa20_from_slices(key, nonce)?;
    let mut out = data.to_vec();
    cipher.apply_keystream(&mut out);
    Ok(out)
}

/// Position-wise XOR. The result is as long as the shorter input.
pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

fn salsa20_from_slices(key: &[u8], nonce: &[u8]) -> Result<Salsa20, KdbError> {
    if key.len() != STREAM_KEY_LEN {
        return Err(KdbError::InvalidKeyMaterial("Salsa20 key must be 32 bytes"));
    }
    if nonce.len() != STREAM_NONCE_LEN {
        return Err(KdbError::InvalidKeyMaterial("Salsa20 nonce must be 8 bytes"));
    }
    Salsa20::new_from_slices(key, nonce)
        .map_err(|_| KdbError::InvalidKeyMaterial("invalid Salsa20 key or nonce"))
}

/// Salsa20 keystream shared by all protected values of one KDBX database.
///
/// Values must be passed in document order; each call continues the
/// keystream where the previous one stopped.
pub struct ProtectedStream {
    cipher: Salsa20,
}

impl ProtectedStream {
    /// Build the stream from the raw protected-stream key stored in the header.
    pub fn new(protected_stream_key: &[u8]) -> Result<Self, KdbError> {
        let key = Zeroizing::new(sha256(protected_stream_key));
        let cipher = salsa20_from_slices(&key[..], &INNER_STREAM_NONCE)?;
        Ok(Self { cipher })
    }

    pub fn unprotect(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.cipher.apply_keystream(&mut out);
        out
    }
}
