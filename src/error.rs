//! Error types for bibd-encryption

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bibd-encryption
#[derive(Error, Debug)]
pub enum Error {
    // Platform / lifecycle errors
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Encryption not initialized")]
    NotInitialized,

    #[error("Encryption already initialized")]
    AlreadyInitialized,

    // Key errors
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    // Strategy errors
    #[error("Mount failed: {0}")]
    MountFailed(String),

    #[error("Encryption error: {0}")]
    EncryptFailed(String),

    #[error("Decryption error: {0}")]
    DecryptFailed(String),

    // Secret sharing errors
    #[error("Insufficient shares: need {required}, got {got}")]
    InsufficientShares { required: usize, got: usize },

    #[error("Invalid share: {0}")]
    InvalidShare(String),

    #[error("Share recovery failed: {0}")]
    ShareRecoveryFailed(String),

    // External tool errors
    #[error("{program} failed (exit code {code:?}): {output}")]
    Command {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Deadline exceeded while running {0}")]
    DeadlineExceeded(String),

    #[error("Cancelled while running {0}")]
    Cancelled(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error came from a cipher authentication or format check
    pub fn is_decrypt_failure(&self) -> bool {
        matches!(self, Error::DecryptFailed(_))
    }

    /// Whether the error reflects a missing platform capability rather than a fault
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Error::NotSupported(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
