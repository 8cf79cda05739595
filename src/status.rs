//! Read-only status snapshots

use crate::config::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of an encryption strategy or of the whole manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionStatus {
    /// Configured method
    pub method: Method,

    /// Whether initialization completed
    pub initialized: bool,

    /// Whether data written now is protected
    pub active: bool,

    /// Creation time of the backing volume
    pub created_at: Option<DateTime<Utc>>,

    /// Last modification time of the backing volume
    pub modified_at: Option<DateTime<Utc>>,

    /// When the volume was last mounted by this instance
    pub mounted_at: Option<DateTime<Utc>>,

    /// Size of the backing volume in bytes
    pub volume_size: u64,

    /// Bytes in use on the mounted filesystem
    pub used_size: u64,

    /// Conditions the caller should know about (e.g. unsupported platform)
    pub warnings: Vec<String>,
}

impl EncryptionStatus {
    /// Empty snapshot for a method
    pub fn new(method: Method) -> Self {
        EncryptionStatus {
            method,
            initialized: false,
            active: false,
            created_at: None,
            modified_at: None,
            mounted_at: None,
            volume_size: 0,
            used_size: 0,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}
