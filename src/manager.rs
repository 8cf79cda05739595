//! Encryption manager
//!
//! Single entry point for the storage layer. Strategies are selected once from
//! [`Config`] when the manager is built:
//!
//! | method        | volume  | column      |
//! |---------------|---------|-------------|
//! | `none`        | null    | none        |
//! | `luks`        | LUKS    | none        |
//! | `tde`         | TDE     | none        |
//! | `application` | null    | application |
//! | `hybrid`      | LUKS (best effort) | application |

use crate::column::{AeadAlgorithm, ApplicationEncryption, ColumnStrategy, FieldEncryptor};
use crate::config::{Config, Method};
use crate::crypto::{KeyManager, Share, KEY_SIZE, PURPOSE_APPLICATION, PURPOSE_VOLUME};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::status::EncryptionStatus;
use crate::volume::{
    CommandRunner, LuksEncryption, NullEncryption, TdeEncryption, VolumeEncryption, VolumeStrategy,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Wires key management and the configured strategies together
pub struct Manager {
    config: Config,
    keys: Option<KeyManager>,
    volume: VolumeStrategy,
    fields: FieldEncryptor,
    initialized: bool,
    warnings: Vec<String>,
}

impl Manager {
    /// Build a manager for `config`, keyed by the node identity key
    ///
    /// # Errors
    /// `InvalidKey` for an identity key shorter than 32 bytes, `InvalidConfig` for an
    /// invalid configuration, `NotSupported` for `method = luks` off Linux.
    pub fn new(config: Config, identity_key: &[u8]) -> Result<Self> {
        Self::build(config, identity_key, None)
    }

    /// Like [`Manager::new`], but LUKS tools are run through `runner`
    pub fn with_runner(
        config: Config,
        identity_key: &[u8],
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        Self::build(config, identity_key, Some(runner))
    }

    fn build(
        config: Config,
        identity_key: &[u8],
        runner: Option<Arc<dyn CommandRunner>>,
    ) -> Result<Self> {
        if !config.enabled {
            info!("Encryption disabled; all operations pass through");
            return Ok(Manager {
                config,
                keys: None,
                volume: VolumeStrategy::None(NullEncryption::new()),
                fields: FieldEncryptor::disabled(),
                initialized: false,
                warnings: Vec::new(),
            });
        }

        config.validate()?;
        let keys = KeyManager::new(identity_key, &config.recovery)?;
        let mut warnings = Vec::new();

        let volume = match config.method {
            Method::Luks => VolumeStrategy::Luks(Self::luks(&config, runner)?),
            Method::Hybrid => match Self::luks(&config, runner) {
                Ok(luks) => VolumeStrategy::Luks(luks),
                Err(e) => {
                    let warning = format!("volume encryption unavailable: {}", e);
                    warn!("{}; continuing with field encryption only", warning);
                    warnings.push(warning);
                    VolumeStrategy::None(NullEncryption::new())
                }
            },
            Method::Tde => VolumeStrategy::Tde(TdeEncryption::new(&config.tde)),
            Method::Application | Method::None => VolumeStrategy::None(NullEncryption::new()),
        };

        let column = Self::column_strategy(&config, &keys)?;
        let fields = FieldEncryptor::new(column, &config.application.encrypted_fields);

        info!("Encryption enabled (method: {})", config.method);

        Ok(Manager {
            config,
            keys: Some(keys),
            volume,
            fields,
            initialized: false,
            warnings,
        })
    }

    fn luks(config: &Config, runner: Option<Arc<dyn CommandRunner>>) -> Result<LuksEncryption> {
        match runner {
            Some(runner) => LuksEncryption::with_runner(&config.luks, runner),
            None => LuksEncryption::new(&config.luks),
        }
    }

    fn column_strategy(config: &Config, keys: &KeyManager) -> Result<ColumnStrategy> {
        if !matches!(config.method, Method::Application | Method::Hybrid) {
            return Ok(ColumnStrategy::None);
        }
        let algorithm = AeadAlgorithm::from_name(&config.application.algorithm)?;
        let key = keys.derive_key(PURPOSE_APPLICATION)?;
        Ok(ColumnStrategy::Application(ApplicationEncryption::new(
            algorithm, &key,
        )))
    }

    /// Column keys derive from the master key, so they follow it
    fn rebuild_column_strategy(&mut self) -> Result<()> {
        if let Some(keys) = &self.keys {
            self.fields
                .replace_strategy(Self::column_strategy(&self.config, keys)?);
            debug!("Column strategy rebuilt at key version {}", keys.version());
        }
        Ok(())
    }

    fn keys(&self) -> Result<&KeyManager> {
        self.keys.as_ref().ok_or(Error::NotInitialized)
    }

    fn volume_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        self.keys()?.derive_key(PURPOSE_VOLUME)
    }

    fn record_warning(&mut self, warning: String) {
        if !self.warnings.contains(&warning) {
            warn!("{}", warning);
            self.warnings.push(warning);
        }
    }

    fn volume_engaged(&self) -> bool {
        !self.volume.is_null() && self.volume.is_supported()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn method(&self) -> Method {
        self.config.method
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Key hierarchy, when encryption is enabled
    pub fn key_manager(&self) -> Option<&KeyManager> {
        self.keys.as_ref()
    }

    /// Prepare the volume strategy under `data_dir`
    ///
    /// A volume strategy the host cannot run is skipped with a warning in
    /// [`Manager::status`]; deciding whether to proceed is up to the caller.
    pub fn initialize(&mut self, data_dir: &Path, deadline: &Deadline) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        if self.initialized {
            return Err(Error::AlreadyInitialized);
        }

        if !self.volume.is_null() && !self.volume.is_supported() {
            let warning = format!(
                "{} volume encryption is not supported on this host; data directory is not encrypted",
                self.volume.method()
            );
            self.record_warning(warning);
        }

        if self.volume_engaged() {
            let key = self.volume_key()?;
            self.volume.initialize(data_dir, &key[..], deadline)?;
        }

        self.initialized = true;
        info!("Encryption initialized for {:?}", data_dir);
        Ok(())
    }

    /// Unlock and attach the encrypted volume, if there is one
    pub fn mount(&mut self, deadline: &Deadline) -> Result<()> {
        if !self.config.enabled || !self.volume_engaged() {
            return Ok(());
        }
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        let key = self.volume_key()?;
        self.volume.mount(&key[..], deadline)
    }

    pub fn unmount(&mut self, deadline: &Deadline) -> Result<()> {
        if !self.config.enabled || !self.volume_engaged() {
            return Ok(());
        }
        self.volume.unmount(deadline)
    }

    /// Shutdown hook; the volume is always unmounted
    pub fn close(&mut self, deadline: &Deadline) -> Result<()> {
        if let Err(e) = self.unmount(deadline) {
            warn!("Failed to unmount encrypted volume on close: {}", e);
            return Err(e);
        }
        debug!("Encryption manager closed");
        Ok(())
    }

    /// Encrypt a column value if `table.column` is configured for encryption
    pub fn encrypt_field(&self, table: &str, column: &str, value: &[u8]) -> Result<Vec<u8>> {
        if !self.config.enabled {
            return Ok(value.to_vec());
        }
        self.fields.encrypt_field(table, column, value)
    }

    pub fn decrypt_field(&self, table: &str, column: &str, value: &[u8]) -> Result<Vec<u8>> {
        if !self.config.enabled {
            return Ok(value.to_vec());
        }
        self.fields.decrypt_field(table, column, value)
    }

    pub fn is_encrypted_field(&self, table: &str, column: &str) -> bool {
        self.config.enabled && self.fields.is_encrypted_field(table, column)
    }

    /// Split the master key into recovery shares
    pub fn generate_recovery_shares(&self) -> Result<Vec<Share>> {
        self.keys()?.generate_recovery_shares()
    }

    /// Restore the master key from shares; field keys follow the restored key
    pub fn recover_from_shares(&mut self, shares: &[Share]) -> Result<()> {
        let keys = self.keys.as_mut().ok_or(Error::NotInitialized)?;
        keys.recover_from_shares(shares)?;
        self.rebuild_column_strategy()
    }

    /// Switch to a master key derived from `new_identity_key`, returning the old one
    ///
    /// Values already encrypted stay under the old key until the caller re-encrypts them.
    pub fn rotate_master_key(
        &mut self,
        new_identity_key: &[u8],
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        let keys = self.keys.as_mut().ok_or(Error::NotInitialized)?;
        let old = keys.rotate_master_key(new_identity_key)?;
        self.rebuild_column_strategy()?;
        Ok(old)
    }

    pub fn key_hash(&self) -> Result<String> {
        Ok(self.keys()?.key_hash())
    }

    pub fn verify_key(&self, known_hash: &str) -> bool {
        self.keys
            .as_ref()
            .map(|keys| keys.verify_key(known_hash))
            .unwrap_or(false)
    }

    /// Combined snapshot of the volume and column strategies
    pub fn status(&self) -> EncryptionStatus {
        if !self.config.enabled {
            return EncryptionStatus::new(self.config.method)
                .with_warning("encryption is disabled");
        }

        let mut status = self.volume.status();
        let volume_active = self.volume.is_null() || status.active;
        let column_active = !matches!(self.config.method, Method::Application | Method::Hybrid)
            || !self.fields.strategy().is_none();

        status.method = self.config.method;
        status.initialized = self.initialized;
        status.active = self.initialized && volume_active && column_active;
        for warning in &self.warnings {
            if !status.warnings.contains(warning) {
                status.warnings.push(warning.clone());
            }
        }
        status
    }
}
