//! Transparent database encryption hook
//!
//! Reserved for a database engine that encrypts its own pages. No such engine is
//! wired in, so the strategy reports itself unsupported.

use crate::config::{Method, TdeConfig};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::status::EncryptionStatus;
use crate::volume::VolumeEncryption;
use std::path::Path;
use tracing::warn;

#[derive(Debug)]
pub struct TdeEncryption {
    config: TdeConfig,
}

impl TdeEncryption {
    pub fn new(config: &TdeConfig) -> Self {
        warn!(
            "TDE ({}) requested but no database engine supports it; data is not encrypted",
            config.algorithm
        );
        TdeEncryption {
            config: config.clone(),
        }
    }

    fn unsupported(&self) -> Error {
        Error::NotSupported(format!(
            "TDE with {} is not available in this build",
            self.config.algorithm
        ))
    }
}

impl VolumeEncryption for TdeEncryption {
    fn is_supported(&self) -> bool {
        false
    }

    fn initialize(&mut self, _data_dir: &Path, _key: &[u8], _deadline: &Deadline) -> Result<()> {
        Err(self.unsupported())
    }

    fn mount(&mut self, _key: &[u8], _deadline: &Deadline) -> Result<()> {
        Err(self.unsupported())
    }

    fn unmount(&mut self, _deadline: &Deadline) -> Result<()> {
        Ok(())
    }

    fn status(&self) -> EncryptionStatus {
        EncryptionStatus::new(Method::Tde)
            .with_warning("TDE is not implemented; database files are stored unencrypted")
    }

    fn method(&self) -> Method {
        Method::Tde
    }
}
