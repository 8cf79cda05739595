//! Volume-level encryption strategies
//!
//! A volume strategy protects everything the node writes under its data directory.
//! The strategy is chosen once from configuration and held as a [`VolumeStrategy`].

pub mod command;
mod luks;
mod null;
mod tde;

#[cfg(test)]
pub(crate) mod testing;

pub use command::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use luks::{LuksEncryption, BACKING_FILE, MOUNT_DIR};
pub use null::NullEncryption;
pub use tde::TdeEncryption;

use crate::config::Method;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::status::EncryptionStatus;
use std::path::Path;

/// Capability shared by volume strategies
pub trait VolumeEncryption {
    /// Whether this host can run the strategy
    fn is_supported(&self) -> bool;

    /// Create the protected volume under `data_dir` if it does not exist yet
    fn initialize(&mut self, data_dir: &Path, key: &[u8], deadline: &Deadline) -> Result<()>;

    /// Unlock and attach the volume
    fn mount(&mut self, key: &[u8], deadline: &Deadline) -> Result<()>;

    /// Detach and lock the volume
    fn unmount(&mut self, deadline: &Deadline) -> Result<()>;

    fn status(&self) -> EncryptionStatus;

    fn method(&self) -> Method;
}

/// The configured volume strategy
pub enum VolumeStrategy {
    None(NullEncryption),
    Luks(LuksEncryption),
    Tde(TdeEncryption),
}

impl VolumeStrategy {
    fn inner(&self) -> &dyn VolumeEncryption {
        match self {
            VolumeStrategy::None(v) => v,
            VolumeStrategy::Luks(v) => v,
            VolumeStrategy::Tde(v) => v,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn VolumeEncryption {
        match self {
            VolumeStrategy::None(v) => v,
            VolumeStrategy::Luks(v) => v,
            VolumeStrategy::Tde(v) => v,
        }
    }

    /// True for the pass-through strategy
    pub fn is_null(&self) -> bool {
        matches!(self, VolumeStrategy::None(_))
    }
}

impl VolumeEncryption for VolumeStrategy {
    fn is_supported(&self) -> bool {
        self.inner().is_supported()
    }

    fn initialize(&mut self, data_dir: &Path, key: &[u8], deadline: &Deadline) -> Result<()> {
        self.inner_mut().initialize(data_dir, key, deadline)
    }

    fn mount(&mut self, key: &[u8], deadline: &Deadline) -> Result<()> {
        self.inner_mut().mount(key, deadline)
    }

    fn unmount(&mut self, deadline: &Deadline) -> Result<()> {
        self.inner_mut().unmount(deadline)
    }

    fn status(&self) -> EncryptionStatus {
        self.inner().status()
    }

    fn method(&self) -> Method {
        self.inner().method()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TdeConfig;

    #[test]
    fn test_dispatch() {
        let null = VolumeStrategy::None(NullEncryption::new());
        assert!(null.is_null());
        assert!(null.is_supported());
        assert_eq!(null.method(), Method::None);

        let tde = VolumeStrategy::Tde(TdeEncryption::new(&TdeConfig::default()));
        assert!(!tde.is_null());
        assert!(!tde.is_supported());
        assert_eq!(tde.method(), Method::Tde);
    }
}
