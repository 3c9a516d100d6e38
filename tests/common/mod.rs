#![allow(dead_code)]

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use kdbcrypt::crypto::{sha256, sha256_concat};
use kdbcrypt::format::kdbx::CIPHER_AES256;
use kdbcrypt::format::{KDB_SUB_MAGIC, KDBX_SUB_MAGIC, KEEPASS_MAGIC};
use kdbcrypt::{Credentials, FileSignature, derive_key};

pub const ROUNDS: u32 = 50;
pub const PAYLOAD: &[u8] = b"<KeePassFile>fixture</KeePassFile>";

const MASTER_SEED: [u8; 32] = [0x11; 32];
const TRANSFORM_SEED: [u8; 32] = [0x22; 32];
const IV: [u8; 16] = [0x33; 16];
const START: [u8; 32] = [0x44; 32];
const FINAL_SEED: [u8; 16] = [0x55; 16];

fn encrypt(key: &[u8], plaintext: &[u8]) -> Vec<u8> {
    cbc::Encryptor::<Aes256>::new_from_slices(key, &IV)
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

fn field(buf: &mut Vec<u8>, id: u8, data: &[u8]) {
    buf.push(id);
    buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
    buf.extend_from_slice(data);
}

/// A complete KDBX 3.1 file encrypting `payload` under `credentials`.
pub fn kdbx_file(credentials: &Credentials, payload: &[u8]) -> Vec<u8> {
    let mut file = FileSignature::new(KEEPASS_MAGIC, KDBX_SUB_MAGIC, 0x0003_0001)
        .to_bytes()
        .to_vec();
    field(&mut file, 2, &CIPHER_AES256);
    field(&mut file, 3, &0u32.to_le_bytes());
    field(&mut file, 4, &MASTER_SEED);
    field(&mut file, 5, &TRANSFORM_SEED);
    field(&mut file, 6, &u64::from(ROUNDS).to_le_bytes());
    field(&mut file, 7, &IV);
    field(&mut file, 8, b"inner key");
    field(&mut file, 9, &START);
    field(&mut file, 10, &2u32.to_le_bytes());
    field(&mut file, 0, b"\r\n\r\n");

    let composite = credentials.composite().unwrap();
    let transformed = derive_key(&composite.digest()[..], &TRANSFORM_SEED, u64::from(ROUNDS)).unwrap();
    let key = sha256_concat(&[&MASTER_SEED[..], &transformed[..]]);

    let mut plaintext = START.to_vec();
    plaintext.extend_from_slice(payload);
    file.extend_from_slice(&encrypt(&key, &plaintext));
    file
}

/// A complete KDB 1.x file encrypting `payload` under `password`.
pub fn kdb_file(password: &str, payload: &[u8]) -> Vec<u8> {
    let mut file = FileSignature::new(KEEPASS_MAGIC, KDB_SUB_MAGIC, 3)
        .to_bytes()
        .to_vec();
    file.extend_from_slice(&0x0003_0004u32.to_le_bytes());
    file.extend_from_slice(&FINAL_SEED);
    file.extend_from_slice(&IV);
    file.extend_from_slice(&4u32.to_le_bytes());
    file.extend_from_slice(&9u32.to_le_bytes());
    file.extend_from_slice(&sha256(payload));
    file.extend_from_slice(&TRANSFORM_SEED);
    file.extend_from_slice(&ROUNDS.to_le_bytes());

    let transformed = derive_key(&sha256(password.as_bytes()), &TRANSFORM_SEED, u64::from(ROUNDS)).unwrap();
    let key = sha256_concat(&[&FINAL_SEED[..], &transformed[..]]);
    file.extend_from_slice(&encrypt(&key, payload));
    file
}
