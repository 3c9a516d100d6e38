use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use aes::cipher::consts::U16;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};
use tracing::debug;
use zeroize::Zeroizing;

use super::{BLOCK_LEN, KEY_LEN, sha256};
use crate::error::KdbError;

/// A 32-byte key produced by [`derive_key`]. Zeroized on drop.
pub type DerivedKey = Zeroizing<[u8; KEY_LEN]>;

/// Shared flag that aborts a running key derivation between rounds.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Stretch `composite` with `rounds` AES-ECB passes keyed by `seed`, then hash.
///
/// `composite` must be 32 bytes; `seed` must be a valid AES key (16, 24 or
/// 32 bytes). With `rounds == 0` the result is `SHA-256(composite)`.
///
/// # Errors
///
/// Returns [`KdbError::InvalidKeyMaterial`] if either input has the wrong length.
pub fn derive_key(composite: &[u8], seed: &[u8], rounds: u64) -> Result<DerivedKey, KdbError> {
    transform(composite, seed, rounds, None)
}

/// Same as [`derive_key`], checking `cancel` before every round.
///
/// # Errors
///
/// Returns [`KdbError::Cancelled`] once the token is set.
pub fn derive_key_with_cancel(
    composite: &[u8],
    seed: &[u8],
    rounds: u64,
    cancel: &CancelToken,
) -> Result<DerivedKey, KdbError> {
    transform(composite, seed, rounds, Some(cancel))
}

fn transform(
    composite: &[u8],
    seed: &[u8],
    rounds: u64,
    cancel: Option<&CancelToken>,
) -> Result<DerivedKey, KdbError> {
    if composite.len() != KEY_LEN {
        return Err(KdbError::InvalidKeyMaterial("composite secret must be 32 bytes"));
    }

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(composite);

    debug!(rounds, seed_len = seed.len(), "transforming composite key");

    match seed.len() {
        16 => run_rounds(&Aes128::new_from_slice(seed).map_err(bad_seed)?, &mut key, rounds, cancel)?,
        24 => run_rounds(&Aes192::new_from_slice(seed).map_err(bad_seed)?, &mut key, rounds, cancel)?,
        32 => run_rounds(&Aes256::new_from_slice(seed).map_err(bad_seed)?, &mut key, rounds, cancel)?,
        _ => return Err(KdbError::InvalidKeyMaterial("transform seed must be 16, 24 or 32 bytes")),
    }

    Ok(Zeroizing::new(sha256(&key[..])))
}

fn bad_seed<E>(_: E) -> KdbError {
    KdbError::InvalidKeyMaterial("transform seed must be 16, 24 or 32 bytes")
}

fn run_rounds<C: BlockEncrypt<BlockSize = U16>>(
    cipher: &C,
    key: &mut [u8; KEY_LEN],
    rounds: u64,
    cancel: Option<&CancelToken>,
) -> Result<(), KdbError> {
    for _ in 0..rounds {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(KdbError::Cancelled);
        }
        for chunk in key.chunks_exact_mut(BLOCK_LEN) {
            cipher.encrypt_block(Block::from_mut_slice(chunk));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn pw_hash() -> [u8; 32] {
        sha256(b"pw")
    }

    #[test]
    fn zero_rounds_is_plain_hash() {
        let composite = pw_hash();
        let key = derive_key(&composite, &[0u8; 16], 0).unwrap();
        assert_eq!(*key, sha256(&composite));
    }

    #[test]
    fn three_rounds_with_zero_aes128_seed_matches_reference() {
        let key = derive_key(&pw_hash(), &[0u8; 16], 3).unwrap();
        assert_eq!(
            hex::encode(*key),
            "48db7945fab86601f24fc9ebbe8e2e9cc62655d104eba010542d87017126f0fe"
        );
    }

    #[test]
    fn aes256_seed_matches_reference() {
        let seed: Vec<u8> = (0u8..32).collect();

        let three = derive_key(&pw_hash(), &seed, 3).unwrap();
        assert_eq!(
            hex::encode(*three),
            "0d2edaa12592a292284580fe533d3edfcea0e71554ab3a34faa36aeabc161d57"
        );

        let thousand = derive_key(&pw_hash(), &seed, 1000).unwrap();
        assert_eq!(
            hex::encode(*thousand),
            "3327f82aaafb04a6f45c55cf1782165f9fb6f26c7a273622fcbf29d2b8ee8444"
        );
    }

    #[test]
    fn kdf_is_deterministic() {
        let k1 = derive_key(&[42u8; 32], &[7u8; 32], 500).unwrap();
        let k2 = derive_key(&[42u8; 32], &[7u8; 32], 500).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn round_count_affects_output() {
        let k1 = derive_key(&[1u8; 32], &[2u8; 32], 1).unwrap();
        let k2 = derive_key(&[1u8; 32], &[2u8; 32], 2).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn aes192_seed_is_accepted() {
        assert!(derive_key(&[1u8; 32], &[2u8; 24], 4).is_ok());
    }

    #[test]
    fn aes192_seed_matches_reference() {
        let seed: Vec<u8> = (0u8..24).collect();
        let key = derive_key(&pw_hash(), &seed, 3).unwrap();
        assert_eq!(
            hex::encode(*key),
            "3ad144201f3fe458b4fc3b0244ef50711ebe26887ec28a463adae768a1771d37"
        );
    }

    #[test]
    fn wrong_composite_length_fails() {
        let result = derive_key(&[0u8; 31], &[0u8; 32], 1);
        assert!(matches!(result, Err(KdbError::InvalidKeyMaterial(_))));
    }

    #[test]
    fn wrong_seed_length_fails() {
        let result = derive_key(&[0u8; 32], &[0u8; 20], 1);
        assert!(matches!(result, Err(KdbError::InvalidKeyMaterial(_))));
    }

    #[test]
    fn cancel_before_first_round_aborts() {
        let token = CancelToken::new();
        token.cancel();
        let result = derive_key_with_cancel(&[0u8; 32], &[0u8; 32], 1_000_000, &token);
        assert!(matches!(result, Err(KdbError::Cancelled)));
    }

    #[test]
    fn cancel_token_is_ignored_for_zero_rounds() {
        let token = CancelToken::new();
        token.cancel();
        assert!(derive_key_with_cancel(&[0u8; 32], &[0u8; 32], 0, &token).is_ok());
    }

    #[test]
    fn uncancelled_token_gives_same_key() {
        let token = CancelToken::new();
        let a = derive_key_with_cancel(&[3u8; 32], &[4u8; 32], 100, &token).unwrap();
        let b = derive_key(&[3u8; 32], &[4u8; 32], 100).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn more_rounds_take_longer() {
        let time = |rounds| {
            let start = Instant::now();
            derive_key(&[9u8; 32], &[8u8; 32], rounds).unwrap();
            start.elapsed()
        };
        // warm up
        time(1_000);
        let small = time(1_000);
        let large = time(400_000);
        assert!(large > small);
    }
}
