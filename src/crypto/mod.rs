//! Cryptography module for bibd-encryption
//!
//! Provides the HKDF key hierarchy, AEAD sealing and Shamir's Secret Sharing
//! over GF(256) for master key backup.

pub mod encryption;
pub mod gf256;
mod keys;
mod shamir;
mod share;

pub use keys::{
    KeyInfo, KeyManager, KeyStore, HKDF_SALT, MASTER_KEY_INFO, MAX_DERIVED_KEY_SIZE,
    MIN_IDENTITY_KEY_SIZE, PURPOSE_APPLICATION, PURPOSE_VOLUME,
};
pub use shamir::ShamirManager;
pub use share::{import_share, Share, ShareRecipient, EXPORT_PREFIX};

/// Size of AES-256 / ChaCha20 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of AEAD nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of AEAD authentication tag in bytes
pub const TAG_SIZE: usize = 16;
