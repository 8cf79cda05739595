//! LUKS/dm-crypt volume encryption
//!
//! The encrypted volume is a sparse backing file at `<data_dir>/encrypted.img`,
//! formatted as LUKS2 and mounted at `<data_dir>/encrypted`.
//!
//! Lifecycle:
//! ```text
//! Uninitialized --initialize--> Initialized --mount--> Mounted
//!                                    ^                    |
//!                                    +------unmount-------+
//! ```
//! Every transition is idempotent: initializing an existing volume, mounting a
//! mounted one, or unmounting an unmounted one succeeds without touching the host.

use crate::config::{parse_size, LuksConfig, Method};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::status::EncryptionStatus;
use crate::volume::command::{run_checked, with_key_file, CommandRunner, Invocation, SystemRunner};
use crate::volume::VolumeEncryption;
use chrono::{DateTime, Utc};
use ring::digest::{digest, SHA256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backing file name inside the data directory
pub const BACKING_FILE: &str = "encrypted.img";

/// Mount point name inside the data directory
pub const MOUNT_DIR: &str = "encrypted";

/// Prefix of device-mapper names
const MAPPER_PREFIX: &str = "bibd-";

/// `blkid` exit code when no filesystem signature is found
const BLKID_NOT_FOUND: i32 = 2;

/// Time budget for the queries made by `status()`
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// LUKS volume strategy
pub struct LuksEncryption {
    config: LuksConfig,
    volume_bytes: u64,
    runner: Arc<dyn CommandRunner>,
    supported: bool,
    data_dir: Option<PathBuf>,
    initialized: bool,
    mounted: bool,
    mounted_at: Option<DateTime<Utc>>,
}

impl LuksEncryption {
    /// Create a LUKS strategy that drives the host's tools
    ///
    /// # Errors
    /// `NotSupported` on anything but Linux. Missing tools are not an error; they
    /// make [`VolumeEncryption::is_supported`] return false.
    pub fn new(config: &LuksConfig) -> Result<Self> {
        if !cfg!(target_os = "linux") {
            return Err(Error::NotSupported(
                "LUKS encryption is only available on Linux".to_string(),
            ));
        }
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    /// Create a LUKS strategy with a custom host interface
    pub fn with_runner(config: &LuksConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let volume_bytes = parse_size(&config.volume_size)?;
        let supported = Self::probe(config, runner.as_ref());

        if supported {
            debug!("LUKS support detected");
        } else {
            info!("LUKS not supported on this host (tools or device-mapper missing)");
        }

        Ok(LuksEncryption {
            config: config.clone(),
            volume_bytes,
            runner,
            supported,
            data_dir: None,
            initialized: false,
            mounted: false,
            mounted_at: None,
        })
    }

    fn required_tools(config: &LuksConfig) -> Vec<String> {
        vec![
            "cryptsetup".to_string(),
            "truncate".to_string(),
            "blkid".to_string(),
            format!("mkfs.{}", config.filesystem),
            "mount".to_string(),
            "umount".to_string(),
            "mountpoint".to_string(),
            "df".to_string(),
        ]
    }

    fn probe(config: &LuksConfig, runner: &dyn CommandRunner) -> bool {
        if !cfg!(target_os = "linux") {
            return false;
        }
        for tool in Self::required_tools(config) {
            if !runner.has_program(&tool) {
                debug!("LUKS probe: {} not found on PATH", tool);
                return false;
            }
        }
        runner.device_mapper_accessible()
    }

    /// Path of the backing file, once a data directory is known
    pub fn backing_file(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join(BACKING_FILE))
    }

    /// Mount point, once a data directory is known
    pub fn mount_point(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join(MOUNT_DIR))
    }

    /// Device-mapper name, once a data directory is known
    pub fn mapper_name(&self) -> Option<String> {
        self.data_dir.as_deref().map(mapper_name_for)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn layout(&self) -> Result<(PathBuf, PathBuf, String)> {
        let data_dir = self.data_dir.as_ref().ok_or(Error::NotInitialized)?;
        Ok((
            data_dir.join(BACKING_FILE),
            data_dir.join(MOUNT_DIR),
            mapper_name_for(data_dir),
        ))
    }

    fn require_supported(&self) -> Result<()> {
        if !self.supported {
            return Err(Error::NotSupported(
                "LUKS tools or device-mapper are not available".to_string(),
            ));
        }
        Ok(())
    }

    fn device_is_open(&self, name: &str, deadline: &Deadline) -> Result<bool> {
        let status = Invocation::new("cryptsetup").arg("status").arg(name);
        Ok(self.runner.run(&status, deadline)?.success())
    }

    fn is_mount_point(&self, mount_point: &Path, deadline: &Deadline) -> Result<bool> {
        if !mount_point.exists() {
            return Ok(false);
        }
        let check = Invocation::new("mountpoint").arg("-q").arg(mount_point);
        Ok(self.runner.run(&check, deadline)?.success())
    }

    fn create_volume(&self, backing: &Path, key: &[u8], deadline: &Deadline) -> Result<()> {
        let create = Invocation::new("truncate")
            .arg("-s")
            .arg(self.volume_bytes.to_string())
            .arg(backing);
        run_checked(self.runner.as_ref(), &create, deadline)?;

        with_key_file(key, |key_file| {
            let format = Invocation::new("cryptsetup")
                .arg("luksFormat")
                .arg("--type")
                .arg("luks2")
                .arg("--batch-mode")
                .arg("--cipher")
                .arg(&self.config.cipher)
                .arg("--key-size")
                .arg(self.config.key_size.to_string())
                .arg("--hash")
                .arg(&self.config.hash_algorithm)
                .arg("--key-file")
                .arg(key_file)
                .arg(backing);
            run_checked(self.runner.as_ref(), &format, deadline).map(|_| ())
        })
    }

    fn open_device(&self, backing: &Path, name: &str, key: &[u8], deadline: &Deadline) -> Result<()> {
        with_key_file(key, |key_file| {
            let open = Invocation::new("cryptsetup")
                .arg("open")
                .arg("--type")
                .arg("luks")
                .arg("--key-file")
                .arg(key_file)
                .arg(backing)
                .arg(name);
            run_checked(self.runner.as_ref(), &open, deadline).map(|_| ())
        })
    }

    fn close_device(&self, name: &str, deadline: &Deadline) -> Result<()> {
        if !self.device_is_open(name, deadline)? {
            debug!("Device {} already closed", name);
            return Ok(());
        }
        let close = Invocation::new("cryptsetup").arg("close").arg(name);
        run_checked(self.runner.as_ref(), &close, deadline).map(|_| ())
    }

    /// Create a filesystem if the opened device has none, then mount it
    fn mount_device(&self, device: &Path, mount_point: &Path, deadline: &Deadline) -> Result<()> {
        let probe = Invocation::new("blkid")
            .arg("-o")
            .arg("value")
            .arg("-s")
            .arg("TYPE")
            .arg(device);
        let probed = self.runner.run(&probe, deadline)?;

        let has_filesystem = match probed.code {
            Some(0) => !probed.stdout.trim().is_empty(),
            Some(BLKID_NOT_FOUND) => false,
            code => {
                return Err(Error::Command {
                    program: "blkid".to_string(),
                    code,
                    output: probed.diagnostics(),
                })
            }
        };

        if !has_filesystem {
            info!("Creating {} filesystem on {:?}", self.config.filesystem, device);
            let mkfs = Invocation::new(&format!("mkfs.{}", self.config.filesystem))
                .arg("-q")
                .arg(device);
            run_checked(self.runner.as_ref(), &mkfs, deadline)?;
        }

        std::fs::create_dir_all(mount_point)?;
        let mount = Invocation::new("mount").arg(device).arg(mount_point);
        run_checked(self.runner.as_ref(), &mount, deadline)?;
        Ok(())
    }

    fn used_bytes(&self, mount_point: &Path) -> Result<u64> {
        let df = Invocation::new("df")
            .arg("-B1")
            .arg("--output=used")
            .arg(mount_point);
        let output = run_checked(
            self.runner.as_ref(),
            &df,
            &Deadline::after(STATUS_TIMEOUT),
        )?;
        output
            .stdout
            .lines()
            .skip(1)
            .find_map(|line| line.trim().parse::<u64>().ok())
            .ok_or_else(|| Error::Internal(format!("unexpected df output: {:?}", output.stdout)))
    }
}

impl VolumeEncryption for LuksEncryption {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn initialize(&mut self, data_dir: &Path, key: &[u8], deadline: &Deadline) -> Result<()> {
        self.require_supported()?;

        self.data_dir = Some(data_dir.to_path_buf());
        let (backing, _, _) = self.layout()?;

        if backing.exists() {
            info!("LUKS volume already exists at {:?}", backing);
            self.initialized = true;
            return Ok(());
        }

        std::fs::create_dir_all(data_dir)?;
        info!(
            "Creating LUKS volume at {:?} ({} bytes, {})",
            backing, self.volume_bytes, self.config.cipher
        );

        if let Err(e) = self.create_volume(&backing, key, deadline) {
            if backing.exists() {
                if let Err(rm) = std::fs::remove_file(&backing) {
                    warn!("Failed to remove partial volume {:?}: {}", backing, rm);
                }
            }
            return Err(e);
        }

        self.initialized = true;
        Ok(())
    }

    fn mount(&mut self, key: &[u8], deadline: &Deadline) -> Result<()> {
        self.require_supported()?;
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        let (backing, mount_point, name) = self.layout()?;

        if self.is_mount_point(&mount_point, deadline)? {
            debug!("LUKS volume already mounted at {:?}", mount_point);
            self.mounted = true;
            return Ok(());
        }

        if !self.device_is_open(&name, deadline)? {
            self.open_device(&backing, &name, key, deadline)
                .map_err(|e| Error::MountFailed(format!("failed to open {}: {}", name, e)))?;
        }

        let device = Path::new("/dev/mapper").join(&name);
        if let Err(e) = self.mount_device(&device, &mount_point, deadline) {
            if let Err(close_err) = self.close_device(&name, &Deadline::after(STATUS_TIMEOUT)) {
                warn!("Failed to close {} after mount failure: {}", name, close_err);
            }
            return Err(Error::MountFailed(e.to_string()));
        }

        info!("LUKS volume mounted at {:?}", mount_point);
        self.mounted = true;
        self.mounted_at = Some(Utc::now());
        Ok(())
    }

    fn unmount(&mut self, deadline: &Deadline) -> Result<()> {
        if !self.supported || self.data_dir.is_none() {
            return Ok(());
        }
        let (_, mount_point, name) = self.layout()?;

        if self.is_mount_point(&mount_point, deadline)? {
            let umount = Invocation::new("umount").arg(&mount_point);
            run_checked(self.runner.as_ref(), &umount, deadline)?;
            info!("LUKS volume unmounted from {:?}", mount_point);
        }

        self.close_device(&name, deadline)?;
        self.mounted = false;
        Ok(())
    }

    fn status(&self) -> EncryptionStatus {
        let mut status = EncryptionStatus::new(Method::Luks);
        status.initialized = self.initialized;
        status.active = self.mounted;
        status.mounted_at = if self.mounted { self.mounted_at } else { None };

        if !self.supported {
            status
                .warnings
                .push("LUKS is not supported on this host; volume is not encrypted".to_string());
            return status;
        }

        if let Some(backing) = self.backing_file() {
            match std::fs::metadata(&backing) {
                Ok(meta) => {
                    status.volume_size = meta.len();
                    status.modified_at = meta.modified().ok().map(DateTime::<Utc>::from);
                    status.created_at = meta.created().ok().map(DateTime::<Utc>::from);
                }
                Err(e) if self.initialized => {
                    status
                        .warnings
                        .push(format!("backing file {:?} unreadable: {}", backing, e));
                }
                Err(_) => {}
            }
        }

        if self.mounted {
            if let Some(mount_point) = self.mount_point() {
                match self.used_bytes(&mount_point) {
                    Ok(used) => status.used_size = used,
                    Err(e) => status.warnings.push(format!("disk usage unavailable: {}", e)),
                }
            }
        }

        status
    }

    fn method(&self) -> Method {
        Method::Luks
    }
}

/// Device-mapper name for a data directory: `bibd-` + 12 hex chars of its SHA-256
fn mapper_name_for(data_dir: &Path) -> String {
    let hash = digest(&SHA256, data_dir.to_string_lossy().as_bytes());
    format!("{}{}", MAPPER_PREFIX, &hex::encode(hash.as_ref())[..12])
}
