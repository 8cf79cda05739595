//! Application-level authenticated encryption of column values
//!
//! Output layout matches [`crate::crypto::encryption::seal`]:
//! `nonce (12) || ciphertext || tag (16)`. Empty values stay empty so that
//! NULL-ish columns round-trip without growing.

use crate::column::{AeadAlgorithm, ColumnEncryption};
use crate::config::Method;
use crate::crypto::encryption::{open, seal};
use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use zeroize::Zeroizing;

/// Seals column values under a key derived for application encryption
pub struct ApplicationEncryption {
    algorithm: AeadAlgorithm,
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl ApplicationEncryption {
    pub fn new(algorithm: AeadAlgorithm, key: &[u8; KEY_SIZE]) -> Self {
        ApplicationEncryption {
            algorithm,
            key: Zeroizing::new(*key),
        }
    }

    pub fn algorithm(&self) -> AeadAlgorithm {
        self.algorithm
    }

    pub fn encrypt_string(&self, plaintext: &str) -> Result<Vec<u8>> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_string(&self, ciphertext: &[u8]) -> Result<String> {
        let plaintext = self.decrypt(ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|e| Error::DecryptFailed(format!("plaintext is not UTF-8: {}", e)))
    }

    /// Serialize `value` to JSON and seal it
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(value)?;
        self.encrypt(&json)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, ciphertext: &[u8]) -> Result<T> {
        let json = self.decrypt(ciphertext)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

impl ColumnEncryption for ApplicationEncryption {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() {
            return Ok(Vec::new());
        }
        seal(self.algorithm.ring_algorithm(), &self.key, plaintext, &[])
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }
        open(self.algorithm.ring_algorithm(), &self.key, ciphertext, &[])
    }

    fn method(&self) -> Method {
        Method::Application
    }
}

impl fmt::Debug for ApplicationEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationEncryption")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
