//! bibd-encryption - Encryption at rest for node storage
//!
//! This library protects a node's persistent data with a LUKS-encrypted volume,
//! per-field authenticated encryption, or both. Every key derives from the node
//! identity key through HKDF, and the master key can be backed up with Shamir's
//! Secret Sharing.

pub mod column;
pub mod config;
pub mod crypto;
pub mod deadline;
pub mod error;
pub mod manager;
pub mod status;
pub mod volume;

pub use config::{Config, Method};
pub use deadline::{CancelHandle, Deadline};
pub use error::{Error, Result};
pub use manager::Manager;
pub use status::EncryptionStatus;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, Method};
    pub use crate::crypto::{import_share, KeyManager, Share, ShareRecipient};
    pub use crate::deadline::Deadline;
    pub use crate::error::{Error, Result};
    pub use crate::manager::Manager;
    pub use crate::status::EncryptionStatus;
}
