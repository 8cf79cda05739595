//! Key Management for bibd-encryption
//!
//! Implements a deterministic key hierarchy:
//! - Identity Key: the node's identity secret, supplied by the caller (>= 32 bytes)
//! - Master Key: HKDF-SHA256 of the identity key
//! - Purpose Keys: HKDF-SHA256 of the master key, one per purpose label
//!
//! The master key can be split into Shamir shares for disaster recovery.

use crate::config::{RecoveryConfig, RecoveryMethod};
use crate::crypto::{ShamirManager, Share, KEY_SIZE};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use ring::digest::{digest, SHA256};
use ring::hkdf::{self, Salt, HKDF_SHA256};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

/// HKDF salt shared by every level of the hierarchy
pub const HKDF_SALT: &[u8] = b"bibd-encryption-v1";

/// HKDF info for the master key
pub const MASTER_KEY_INFO: &[u8] = b"bibd-master-encryption-key";

/// Minimum identity key length in bytes
pub const MIN_IDENTITY_KEY_SIZE: usize = 32;

/// Largest HKDF-SHA256 output (255 * hash length)
pub const MAX_DERIVED_KEY_SIZE: usize = 255 * 32;

/// Purpose label for the field encryption key
pub const PURPOSE_APPLICATION: &str = "application-encryption";

/// Purpose label for the volume encryption key
pub const PURPOSE_VOLUME: &str = "volume-encryption";

/// Metadata describing a derived key, for an external [`KeyStore`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyInfo {
    pub id: String,
    pub purpose: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub algorithm: String,
    pub version: u32,
}

/// Persistence for key metadata.
///
/// Only metadata is stored; key material is always re-derived. No implementation
/// ships with this crate.
pub trait KeyStore {
    /// Persist key metadata
    fn save(&mut self, info: &KeyInfo) -> Result<()>;

    /// Load metadata by key id
    fn load(&self, id: &str) -> Result<Option<KeyInfo>>;

    /// List metadata for a purpose
    fn list(&self, purpose: &str) -> Result<Vec<KeyInfo>>;

    /// Remove metadata by key id
    fn delete(&mut self, id: &str) -> Result<()>;
}

/// HKDF output length for ring
struct HkdfLen(usize);

impl hkdf::KeyType for HkdfLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-SHA256 with the hierarchy salt
fn hkdf_sha256(secret: &[u8], info: &[u8], output: &mut [u8]) -> Result<()> {
    let prk = Salt::new(HKDF_SHA256, HKDF_SALT).extract(secret);
    let info_parts = [info];
    prk.expand(&info_parts, HkdfLen(output.len()))
        .map_err(|_| Error::KeyDerivation("HKDF expansion failed".to_string()))?
        .fill(output)
        .map_err(|_| Error::KeyDerivation("HKDF fill failed".to_string()))
}

fn derive_master_key(identity_key: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    if identity_key.len() < MIN_IDENTITY_KEY_SIZE {
        return Err(Error::InvalidKey(format!(
            "identity key must be at least {} bytes, got {}",
            MIN_IDENTITY_KEY_SIZE,
            identity_key.len()
        )));
    }

    let mut master = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf_sha256(identity_key, MASTER_KEY_INFO, &mut master[..])?;
    Ok(master)
}

/// Owner of the master key and its derived hierarchy
pub struct KeyManager {
    master_key: Zeroizing<[u8; KEY_SIZE]>,
    shamir: Option<ShamirManager>,
    version: u32,
}

impl KeyManager {
    /// Derive the master key from the node identity key
    ///
    /// # Errors
    /// `InvalidKey` if the identity key is shorter than 32 bytes; `InvalidConfig` if
    /// Shamir recovery is configured with an invalid scheme
    pub fn new(identity_key: &[u8], recovery: &RecoveryConfig) -> Result<Self> {
        let master_key = derive_master_key(identity_key)?;

        let shamir = match recovery.method {
            RecoveryMethod::Shamir => Some(ShamirManager::new(&recovery.shamir)?),
            RecoveryMethod::None => None,
        };

        Ok(KeyManager {
            master_key,
            shamir,
            version: 1,
        })
    }

    /// Derive a 32-byte key for `purpose`
    pub fn derive_key(&self, purpose: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        hkdf_sha256(&self.master_key[..], purpose.as_bytes(), &mut key[..])?;
        Ok(key)
    }

    /// Derive a key of `size` bytes for `purpose`
    pub fn derive_key_sized(&self, purpose: &str, size: usize) -> Result<Zeroizing<Vec<u8>>> {
        if size == 0 || size > MAX_DERIVED_KEY_SIZE {
            return Err(Error::KeyDerivation(format!(
                "derived key size must be 1..={} bytes, got {}",
                MAX_DERIVED_KEY_SIZE, size
            )));
        }
        let mut key = Zeroizing::new(vec![0u8; size]);
        hkdf_sha256(&self.master_key[..], purpose.as_bytes(), &mut key[..])?;
        Ok(key)
    }

    /// Whether Shamir backup of the master key is configured
    pub fn has_recovery(&self) -> bool {
        self.shamir.is_some()
    }

    /// Split the master key into recovery shares
    pub fn generate_recovery_shares(&self) -> Result<Vec<Share>> {
        let shamir = self.shamir.as_ref().ok_or_else(|| {
            Error::InvalidConfig("shamir recovery is not configured".to_string())
        })?;
        let shares = shamir.split_key(&self.master_key[..])?;
        info!(
            "Generated {} recovery shares (threshold {})",
            shares.len(),
            shamir.threshold()
        );
        Ok(shares)
    }

    /// Replace the master key with the one reconstructed from `shares`
    ///
    /// Every key derived afterwards differs from keys derived before.
    pub fn recover_from_shares(&mut self, shares: &[Share]) -> Result<()> {
        let shamir = self.shamir.as_ref().ok_or_else(|| {
            Error::InvalidConfig("shamir recovery is not configured".to_string())
        })?;

        let recovered = shamir.recover_key(shares)?;
        if recovered.len() != KEY_SIZE {
            return Err(Error::InvalidShare(format!(
                "recovered key is {} bytes, expected {}",
                recovered.len(),
                KEY_SIZE
            )));
        }

        self.master_key.copy_from_slice(&recovered);
        self.version += 1;
        info!("Master key recovered from shares (version {})", self.version);
        Ok(())
    }

    /// Derive a new master key from `new_identity_key` and return the previous one.
    ///
    /// Existing ciphertext is not touched; re-encrypting it with keys from the new
    /// hierarchy is the caller's job.
    pub fn rotate_master_key(
        &mut self,
        new_identity_key: &[u8],
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        let new_master = derive_master_key(new_identity_key)?;
        let old_master = std::mem::replace(&mut self.master_key, new_master);
        self.version += 1;
        info!("Master key rotated (version {})", self.version);
        Ok(old_master)
    }

    /// Hex SHA-256 of the master key, for out-of-band verification
    pub fn key_hash(&self) -> String {
        hex::encode(digest(&SHA256, &self.master_key[..]).as_ref())
    }

    /// Check the master key against a hash from [`KeyManager::key_hash`]
    pub fn verify_key(&self, known_hash: &str) -> bool {
        let known = match hex::decode(known_hash.trim()) {
            Ok(known) => known,
            Err(_) => return false,
        };
        let actual = digest(&SHA256, &self.master_key[..]);
        constant_time_eq(actual.as_ref(), &known)
    }

    /// Master key generation, starting at 1 and bumped by rotation and recovery
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Metadata for a key derived for `purpose` at the current version
    pub fn key_info(&self, purpose: &str) -> KeyInfo {
        debug!("Describing {} key at version {}", purpose, self.version);
        KeyInfo {
            id: Uuid::new_v4().to_string(),
            purpose: purpose.to_string(),
            created_at: Utc::now(),
            expires_at: None,
            algorithm: "HKDF-SHA256".to_string(),
            version: self.version,
        }
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("master_key", &"[REDACTED]")
            .field("shamir", &self.shamir)
            .field("version", &self.version)
            .finish()
    }
}

#[inline(never)]
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShamirConfig;

    fn identity(byte: u8) -> Vec<u8> {
        vec![byte; 32]
    }

    fn test_manager() -> KeyManager {
        KeyManager::new(&identity(0x42), &RecoveryConfig::default()).unwrap()
    }

    #[test]
    fn test_short_identity_key_rejected() {
        let result = KeyManager::new(&[0u8; 31], &RecoveryConfig::default());
        assert!(matches!(result, Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_master_key_deterministic() {
        let a = test_manager();
        let b = test_manager();
        assert_eq!(a.key_hash(), b.key_hash());

        let c = KeyManager::new(&identity(0x43), &RecoveryConfig::default()).unwrap();
        assert_ne!(a.key_hash(), c.key_hash());
    }

    #[test]
    fn test_master_key_matches_hkdf() {
        let manager = test_manager();
        let mut expected = [0u8; KEY_SIZE];
        hkdf_sha256(&identity(0x42), MASTER_KEY_INFO, &mut expected).unwrap();
        assert_eq!(&manager.master_key[..], &expected[..]);
    }

    #[test]
    fn test_purpose_key_derivation() {
        let manager = test_manager();

        let app1 = manager.derive_key(PURPOSE_APPLICATION).unwrap();
        let app2 = manager.derive_key(PURPOSE_APPLICATION).unwrap();
        let volume = manager.derive_key(PURPOSE_VOLUME).unwrap();

        assert_eq!(app1[..], app2[..]);
        assert_ne!(app1[..], volume[..]);
        assert_ne!(app1[..], manager.master_key[..]);
    }

    #[test]
    fn test_sized_derivation() {
        let manager = test_manager();
        let long = manager.derive_key_sized("luks", 64).unwrap();
        assert_eq!(long.len(), 64);
        assert_eq!(long.as_slice(), manager.derive_key_sized("luks", 64).unwrap().as_slice());

        // HKDF output is a prefix-stable stream for a fixed info
        let short = manager.derive_key("luks").unwrap();
        assert_eq!(&long[..32], &short[..]);

        assert!(manager.derive_key_sized("luks", 0).is_err());
        assert!(manager.derive_key_sized("luks", MAX_DERIVED_KEY_SIZE + 1).is_err());
    }

    #[test]
    fn test_recovery_round_trip() {
        let mut manager = test_manager();
        let original_hash = manager.key_hash();
        let original_app = manager.derive_key(PURPOSE_APPLICATION).unwrap();

        let shares = manager.generate_recovery_shares().unwrap();
        assert_eq!(shares.len(), 5);

        manager.rotate_master_key(&identity(0x99)).unwrap();
        assert_ne!(manager.key_hash(), original_hash);

        manager.recover_from_shares(&shares[2..5]).unwrap();
        assert_eq!(manager.key_hash(), original_hash);
        assert_eq!(
            manager.derive_key(PURPOSE_APPLICATION).unwrap()[..],
            original_app[..]
        );
        assert_eq!(manager.version(), 3);
    }

    #[test]
    fn test_recovery_not_configured() {
        let recovery = RecoveryConfig {
            method: RecoveryMethod::None,
            shamir: ShamirConfig::default(),
        };
        let mut manager = KeyManager::new(&identity(1), &recovery).unwrap();
        assert!(!manager.has_recovery());
        assert!(manager.generate_recovery_shares().is_err());
        assert!(manager.recover_from_shares(&[]).is_err());
    }

    #[test]
    fn test_recovery_insufficient_shares() {
        let mut manager = test_manager();
        let shares = manager.generate_recovery_shares().unwrap();
        assert!(matches!(
            manager.recover_from_shares(&shares[..2]),
            Err(Error::InsufficientShares { .. })
        ));
    }

    #[test]
    fn test_rotation_returns_old_key() {
        let mut manager = test_manager();
        let before = manager.derive_key("purpose").unwrap();
        let expected_old = *manager.master_key;

        let old = manager.rotate_master_key(&identity(0x07)).unwrap();
        assert_eq!(*old, expected_old);
        assert_ne!(manager.derive_key("purpose").unwrap()[..], before[..]);

        assert!(manager.rotate_master_key(&[0u8; 8]).is_err());
        assert_eq!(manager.version(), 2);
    }

    #[test]
    fn test_key_hash_verification() {
        let manager = test_manager();
        let hash = manager.key_hash();
        assert_eq!(hash.len(), 64);
        assert!(manager.verify_key(&hash));
        assert!(manager.verify_key(&hash.to_uppercase()));
        assert!(!manager.verify_key(&"00".repeat(32)));
        assert!(!manager.verify_key("not hex"));
    }

    #[test]
    fn test_key_info() {
        let manager = test_manager();
        let info = manager.key_info(PURPOSE_VOLUME);
        assert_eq!(info.purpose, PURPOSE_VOLUME);
        assert_eq!(info.algorithm, "HKDF-SHA256");
        assert_eq!(info.version, 1);
        assert!(info.expires_at.is_none());
        assert!(Uuid::parse_str(&info.id).is_ok());
    }

    #[test]
    fn test_debug_redaction() {
        let debug_str = format!("{:?}", test_manager());
        assert!(debug_str.contains("REDACTED"));
    }
}
