//! Pass-through volume strategy

use crate::config::Method;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::status::EncryptionStatus;
use crate::volume::VolumeEncryption;
use std::path::Path;

/// Leaves the data directory as-is
#[derive(Debug, Default)]
pub struct NullEncryption {
    initialized: bool,
}

impl NullEncryption {
    pub fn new() -> Self {
        NullEncryption::default()
    }
}

impl VolumeEncryption for NullEncryption {
    fn is_supported(&self) -> bool {
        true
    }

    fn initialize(&mut self, _data_dir: &Path, _key: &[u8], _deadline: &Deadline) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn mount(&mut self, _key: &[u8], _deadline: &Deadline) -> Result<()> {
        Ok(())
    }

    fn unmount(&mut self, _deadline: &Deadline) -> Result<()> {
        Ok(())
    }

    fn status(&self) -> EncryptionStatus {
        let mut status = EncryptionStatus::new(Method::None);
        status.initialized = self.initialized;
        status.active = true;
        status
    }

    fn method(&self) -> Method {
        Method::None
    }
}
