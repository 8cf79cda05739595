//! Column-level encryption
//!
//! Individual column values are sealed with an AEAD before the storage layer
//! writes them. [`FieldEncryptor`] decides which table/column pairs are affected.

mod application;
mod field;

pub use application::ApplicationEncryption;
pub use field::FieldEncryptor;

use crate::config::Method;
use crate::error::{Error, Result};
use std::fmt;

/// AEAD algorithms available for column encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AeadAlgorithm {
    #[default]
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl AeadAlgorithm {
    /// Parse a configuration name such as `"aes-256-gcm"`
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "aes-256-gcm" | "aes256gcm" => Ok(AeadAlgorithm::Aes256Gcm),
            "chacha20-poly1305" | "chacha20poly1305" => Ok(AeadAlgorithm::ChaCha20Poly1305),
            other => Err(Error::InvalidConfig(format!(
                "unsupported column algorithm: {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AeadAlgorithm::Aes256Gcm => "aes-256-gcm",
            AeadAlgorithm::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    pub(crate) fn ring_algorithm(&self) -> &'static ring::aead::Algorithm {
        match self {
            AeadAlgorithm::Aes256Gcm => &ring::aead::AES_256_GCM,
            AeadAlgorithm::ChaCha20Poly1305 => &ring::aead::CHACHA20_POLY1305,
        }
    }
}

impl fmt::Display for AeadAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capability shared by column strategies
pub trait ColumnEncryption {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    fn method(&self) -> Method;
}

/// The configured column strategy
pub enum ColumnStrategy {
    None,
    Application(ApplicationEncryption),
}

impl ColumnStrategy {
    pub fn is_none(&self) -> bool {
        matches!(self, ColumnStrategy::None)
    }
}

impl ColumnEncryption for ColumnStrategy {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self {
            ColumnStrategy::None => Ok(plaintext.to_vec()),
            ColumnStrategy::Application(app) => app.encrypt(plaintext),
        }
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self {
            ColumnStrategy::None => Ok(ciphertext.to_vec()),
            ColumnStrategy::Application(app) => app.decrypt(ciphertext),
        }
    }

    fn method(&self) -> Method {
        match self {
            ColumnStrategy::None => Method::None,
            ColumnStrategy::Application(app) => app.method(),
        }
    }
}
