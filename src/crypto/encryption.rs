//! AEAD sealing primitives
//!
//! All authenticated encryption in this crate goes through `seal`/`open`:
//! - Confidentiality: data is encrypted under a 256-bit key
//! - Integrity: any tampering is detected by the authentication tag
//! - Fresh random nonce per call, prepended to the ciphertext
//!
//! Wire format: `nonce (12) || ciphertext || tag (16)`

use crate::crypto::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use rand::RngCore;
use ring::aead::{Aad, Algorithm, LessSafeKey, Nonce, UnboundKey};

/// Encrypt `plaintext` and return `nonce || ciphertext || tag`
///
/// # Arguments
/// * `algorithm` - ring AEAD algorithm (AES-256-GCM or ChaCha20-Poly1305)
/// * `key` - 256-bit encryption key
/// * `plaintext` - Data to encrypt
/// * `aad` - Additional authenticated data (authenticated but not encrypted)
pub fn seal(
    algorithm: &'static Algorithm,
    key: &[u8; KEY_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let unbound_key = UnboundKey::new(algorithm, key)
        .map_err(|_| Error::EncryptFailed("Failed to create encryption key".to_string()))?;
    let sealing_key = LessSafeKey::new(unbound_key);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    in_out.reserve(TAG_SIZE);

    sealing_key
        .seal_in_place_append_tag(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| Error::EncryptFailed("Encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + in_out.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

/// Decrypt bytes produced by [`seal`]
///
/// Fails with `DecryptFailed` on truncated input, wrong key, wrong AAD or tampering.
pub fn open(
    algorithm: &'static Algorithm,
    key: &[u8; KEY_SIZE],
    sealed: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptFailed(format!(
            "Ciphertext too short: {} bytes",
            sealed.len()
        )));
    }

    let unbound_key = UnboundKey::new(algorithm, key)
        .map_err(|_| Error::DecryptFailed("Failed to create decryption key".to_string()))?;
    let opening_key = LessSafeKey::new(unbound_key);

    let (nonce_part, ciphertext) = sealed.split_at(NONCE_SIZE);
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(nonce_part);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| {
            Error::DecryptFailed("Decryption failed - data corrupted or wrong key".to_string())
        })?;

    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::aead::{AES_256_GCM, CHACHA20_POLY1305};

    fn test_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    #[test]
    fn test_seal_open() {
        let key = test_key();
        let plaintext = b"Hello, bibd!";

        let sealed = seal(&AES_256_GCM, &key, plaintext, &[]).unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);

        let opened = open(&AES_256_GCM, &key, &sealed, &[]).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_chacha_seal_open() {
        let key = test_key();
        let sealed = seal(&CHACHA20_POLY1305, &key, b"row value", b"jobs").unwrap();
        let opened = open(&CHACHA20_POLY1305, &key, &sealed, b"jobs").unwrap();
        assert_eq!(opened, b"row value");
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = test_key();
        let sealed = seal(&AES_256_GCM, &key, b"Secret data", b"table:a").unwrap();
        assert!(open(&AES_256_GCM, &key, &sealed, b"table:b").is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&AES_256_GCM, &test_key(), b"Secret data", &[]).unwrap();
        assert!(open(&AES_256_GCM, &test_key(), &sealed, &[]).is_err());
    }

    #[test]
    fn test_nonce_is_fresh() {
        let key = test_key();
        let a = seal(&AES_256_GCM, &key, b"same", &[]).unwrap();
        let b = seal(&AES_256_GCM, &key, b"same", &[]).unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
    }

    #[test]
    fn test_truncated_fails() {
        let key = test_key();
        let sealed = seal(&AES_256_GCM, &key, b"Secret data", &[]).unwrap();
        let result = open(&AES_256_GCM, &key, &sealed[..NONCE_SIZE + TAG_SIZE - 1], &[]);
        assert!(matches!(result, Err(Error::DecryptFailed(_))));
    }
}
