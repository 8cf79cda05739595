//! Configuration management for bibd-encryption

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Default LUKS cipher
pub const DEFAULT_LUKS_CIPHER: &str = "aes-xts-plain64";

/// Default LUKS key size in bits
pub const DEFAULT_LUKS_KEY_SIZE: u32 = 512;

/// Default LUKS header hash
pub const DEFAULT_LUKS_HASH: &str = "sha512";

/// Default size of the LUKS backing file
pub const DEFAULT_VOLUME_SIZE: &str = "50GB";

/// Default number of recovery shares
pub const DEFAULT_TOTAL_SHARES: u8 = 5;

/// Default number of shares required for recovery
pub const DEFAULT_THRESHOLD: u8 = 3;

/// Encryption method
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// No encryption
    None,

    /// Full-volume encryption with LUKS/dm-crypt
    Luks,

    /// Transparent database encryption (reserved)
    Tde,

    /// Per-field authenticated encryption
    Application,

    /// LUKS volume plus per-field encryption
    Hybrid,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::None => "none",
            Method::Luks => "luks",
            Method::Tde => "tde",
            Method::Application => "application",
            Method::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Method::None),
            "luks" => Ok(Method::Luks),
            "tde" => Ok(Method::Tde),
            "application" => Ok(Method::Application),
            "hybrid" => Ok(Method::Hybrid),
            other => Err(Error::InvalidConfig(format!(
                "unknown encryption method: {}",
                other
            ))),
        }
    }
}

/// LUKS volume configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LuksConfig {
    /// Size of the sparse backing file (e.g. "50GB")
    pub volume_size: String,

    /// dm-crypt cipher specification
    pub cipher: String,

    /// Key size in bits
    pub key_size: u32,

    /// Hash used for the LUKS header
    pub hash_algorithm: String,

    /// Filesystem created inside the container on first mount
    pub filesystem: String,
}

impl Default for LuksConfig {
    fn default() -> Self {
        LuksConfig {
            volume_size: DEFAULT_VOLUME_SIZE.to_string(),
            cipher: DEFAULT_LUKS_CIPHER.to_string(),
            key_size: DEFAULT_LUKS_KEY_SIZE,
            hash_algorithm: DEFAULT_LUKS_HASH.to_string(),
            filesystem: "ext4".to_string(),
        }
    }
}

/// Transparent database encryption configuration (reserved)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TdeConfig {
    pub algorithm: String,
    pub encrypt_wal: bool,
}

impl Default for TdeConfig {
    fn default() -> Self {
        TdeConfig {
            algorithm: "aes-256-gcm".to_string(),
            encrypt_wal: true,
        }
    }
}

/// A table and the columns in it that are encrypted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedField {
    pub table: String,
    pub columns: Vec<String>,
}

impl EncryptedField {
    pub fn new(table: &str, columns: &[&str]) -> Self {
        EncryptedField {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Application-level field encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// AEAD algorithm ("aes-256-gcm" or "chacha20-poly1305")
    pub algorithm: String,

    /// Allowlist of encrypted columns
    pub encrypted_fields: Vec<EncryptedField>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        ApplicationConfig {
            algorithm: "aes-256-gcm".to_string(),
            encrypted_fields: vec![
                EncryptedField::new("datasets", &["content", "metadata"]),
                EncryptedField::new("jobs", &["parameters", "result"]),
                EncryptedField::new("nodes", &["metadata"]),
            ],
        }
    }
}

/// Master key recovery method
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMethod {
    /// No recovery shares
    None,

    /// Shamir's Secret Sharing over GF(256)
    Shamir,
}

/// Shamir's Secret Sharing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShamirConfig {
    /// Number of shares generated
    pub total_shares: u8,

    /// Number of shares required for recovery
    pub threshold: u8,

    /// Optional share ids, one per share in index order
    pub shareholder_ids: Vec<String>,
}

impl Default for ShamirConfig {
    fn default() -> Self {
        ShamirConfig {
            total_shares: DEFAULT_TOTAL_SHARES,
            threshold: DEFAULT_THRESHOLD,
            shareholder_ids: Vec::new(),
        }
    }
}

impl ShamirConfig {
    /// Validate the threshold parameters
    pub fn validate(&self) -> Result<()> {
        if self.threshold < 2 {
            return Err(Error::InvalidConfig(format!(
                "shamir threshold must be at least 2, got {}",
                self.threshold
            )));
        }
        if self.total_shares < self.threshold {
            return Err(Error::InvalidConfig(format!(
                "shamir total_shares ({}) must not be below threshold ({})",
                self.total_shares, self.threshold
            )));
        }
        Ok(())
    }
}

/// Recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub method: RecoveryMethod,
    pub shamir: ShamirConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            method: RecoveryMethod::Shamir,
            shamir: ShamirConfig::default(),
        }
    }
}

/// Main encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch; when false every operation is a pass-through
    pub enabled: bool,

    /// Encryption method
    pub method: Method,

    /// LUKS volume settings
    pub luks: LuksConfig,

    /// TDE settings (reserved)
    pub tde: TdeConfig,

    /// Field encryption settings
    pub application: ApplicationConfig,

    /// Master key recovery settings
    pub recovery: RecoveryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: false,
            method: Method::Application,
            luks: LuksConfig::default(),
            tde: TdeConfig::default(),
            application: ApplicationConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file (YAML or JSON), with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let content = Self::substitute_env_vars(&content);

        let mut config: Config = if is_yaml(path_ref) {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(enabled) = std::env::var("BIBD_ENCRYPTION_ENABLED") {
            match enabled.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.enabled = true,
                "0" | "false" | "no" => self.enabled = false,
                _ => {}
            }
        }

        if let Ok(method) = std::env::var("BIBD_ENCRYPTION_METHOD") {
            if !method.trim().is_empty() {
                self.method = method.parse()?;
            }
        }

        Ok(())
    }

    /// Substitute environment variables in config content
    /// Supports ${VAR_NAME} syntax
    fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();

        let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
            Ok(re) => re,
            Err(_) => return result,
        };

        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let var_name = &cap[1];

            if let Ok(value) = std::env::var(var_name) {
                result = result.replace(full_match, &value);
            }
        }

        result
    }

    /// Save configuration to a file (format determined by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let content = if is_yaml(path_ref) {
            serde_yaml::to_string(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to YAML: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to JSON: {}", e))
            })?
        };

        std::fs::write(path_ref, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if matches!(self.method, Method::Luks | Method::Hybrid) {
            parse_size(&self.luks.volume_size)?;
            if self.luks.key_size == 0 || self.luks.key_size % 8 != 0 {
                return Err(Error::InvalidConfig(format!(
                    "LUKS key size must be a positive multiple of 8, got {}",
                    self.luks.key_size
                )));
            }
            if self.luks.cipher.is_empty() || self.luks.hash_algorithm.is_empty() {
                return Err(Error::InvalidConfig(
                    "LUKS cipher and hash algorithm are required".to_string(),
                ));
            }
        }

        if matches!(self.method, Method::Application | Method::Hybrid) {
            crate::column::AeadAlgorithm::from_name(&self.application.algorithm)?;
            for field in &self.application.encrypted_fields {
                if field.table.is_empty() {
                    return Err(Error::InvalidConfig(
                        "encrypted field entry has an empty table name".to_string(),
                    ));
                }
            }
        }

        if self.recovery.method == RecoveryMethod::Shamir {
            self.recovery.shamir.validate()?;
        }

        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Parse a human-readable size ("50GB", "512M", "1024") into bytes.
///
/// Units are binary (1 KB = 1024 bytes).
pub fn parse_size(size: &str) -> Result<u64> {
    let trimmed = size.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value: u64 = number
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid size: {:?}", size)))?;

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        other => {
            return Err(Error::InvalidConfig(format!(
                "unknown size unit {:?} in {:?}",
                other, size
            )))
        }
    };

    let bytes = value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::InvalidConfig(format!("size overflows: {:?}", size)))?;
    if bytes == 0 {
        return Err(Error::InvalidConfig("size must be greater than 0".to_string()));
    }
    Ok(bytes)
}
