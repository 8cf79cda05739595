//! Portable secret-sharing shares
//!
//! A share is one point `(index, data)` on the sharing polynomial plus enough
//! metadata to describe the split it came from. Shares are exported as ASCII strings
//! for out-of-band hand-off to recovery operators, optionally sealed to the
//! operator's X25519 public key:
//!
//! ```text
//! bibd-share-v1:<base64(JSON envelope)>
//! ```
//!
//! Sealed envelopes use an ephemeral X25519 key agreement, HKDF-SHA256 and
//! AES-256-GCM.

use crate::crypto::{encryption, KEY_SIZE};
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use ring::aead::AES_256_GCM;
use ring::hkdf::{Salt, HKDF_SHA256};
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

/// Prefix of exported share strings
pub const EXPORT_PREFIX: &str = "bibd-share-v1:";

/// Envelope format version
const ENVELOPE_VERSION: u32 = 1;

/// HKDF salt for share sealing keys
const SEAL_SALT: &[u8] = b"bibd-share-export-v1";

/// AAD bound to sealed shares
const SEAL_AAD: &[u8] = b"bibd-share";

/// One share of a split secret
#[derive(Clone, Serialize, Deserialize)]
pub struct Share {
    /// Shareholder id (configured id, or "share-{index}")
    pub id: String,

    /// Polynomial x-coordinate, 1-based
    pub index: u8,

    /// Polynomial evaluations, one byte per secret byte
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,

    /// When the share was generated
    pub created: DateTime<Utc>,

    /// Shares required to recover the secret
    pub threshold: u8,

    /// Shares generated in this split
    pub total_shares: u8,
}

impl Share {
    /// Export the share as an ASCII string.
    ///
    /// With `recipient`, the share is sealed to that X25519 public key and can only be
    /// imported by the holder of the matching [`ShareRecipient`].
    pub fn export(&self, recipient: Option<&[u8; 32]>) -> Result<String> {
        let plain = Zeroizing::new(serde_json::to_vec(self)?);

        let envelope = match recipient {
            None => Envelope {
                version: ENVELOPE_VERSION,
                ephemeral_key: None,
                payload: STANDARD.encode(plain.as_slice()),
            },
            Some(recipient) => {
                let recipient = PublicKey::from(*recipient);

                let mut seed = Zeroizing::new([0u8; 32]);
                rand::thread_rng().fill_bytes(&mut seed[..]);
                let ephemeral = StaticSecret::from(*seed);
                let ephemeral_public = PublicKey::from(&ephemeral);

                let shared = ephemeral.diffie_hellman(&recipient);
                let key = sealing_key(&shared, &ephemeral_public, &recipient)?;
                let sealed = encryption::seal(&AES_256_GCM, &key, &plain, SEAL_AAD)?;

                Envelope {
                    version: ENVELOPE_VERSION,
                    ephemeral_key: Some(hex::encode(ephemeral_public.as_bytes())),
                    payload: STANDARD.encode(sealed),
                }
            }
        };

        let json = serde_json::to_vec(&envelope)?;
        Ok(format!("{}{}", EXPORT_PREFIX, STANDARD.encode(json)))
    }
}

impl Drop for Share {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("length", &self.data.len())
            .field("data", &"[REDACTED]")
            .field("created", &self.created)
            .field("threshold", &self.threshold)
            .field("total_shares", &self.total_shares)
            .finish()
    }
}

/// Import a share exported with [`Share::export`].
///
/// Sealed shares need the recipient's secret; plain shares ignore it.
pub fn import_share(encoded: &str, recipient: Option<&ShareRecipient>) -> Result<Share> {
    let body = encoded
        .trim()
        .strip_prefix(EXPORT_PREFIX)
        .ok_or_else(|| Error::InvalidShare("missing bibd-share-v1 prefix".to_string()))?;

    let json = STANDARD
        .decode(body)
        .map_err(|e| Error::InvalidShare(format!("invalid base64: {}", e)))?;
    let envelope: Envelope = serde_json::from_slice(&json)
        .map_err(|e| Error::InvalidShare(format!("invalid envelope: {}", e)))?;

    if envelope.version != ENVELOPE_VERSION {
        return Err(Error::InvalidShare(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }

    let payload = STANDARD
        .decode(&envelope.payload)
        .map_err(|e| Error::InvalidShare(format!("invalid payload: {}", e)))?;

    let plain = match envelope.ephemeral_key {
        None => Zeroizing::new(payload),
        Some(ephemeral_hex) => {
            let recipient = recipient.ok_or_else(|| {
                Error::InvalidShare("share is sealed; recipient secret required".to_string())
            })?;
            let ephemeral_public = PublicKey::from(decode_key(&ephemeral_hex)?);
            let shared = recipient.secret.diffie_hellman(&ephemeral_public);
            let key = sealing_key(&shared, &ephemeral_public, &recipient.public)?;
            Zeroizing::new(encryption::open(&AES_256_GCM, &key, &payload, SEAL_AAD)?)
        }
    };

    let share: Share = serde_json::from_slice(&plain)
        .map_err(|e| Error::InvalidShare(format!("invalid share: {}", e)))?;
    if share.index == 0 {
        return Err(Error::InvalidShare("share index must be non-zero".to_string()));
    }
    Ok(share)
}

/// An operator's X25519 key pair for receiving sealed shares
pub struct ShareRecipient {
    secret: StaticSecret,
    public: PublicKey,
}

impl ShareRecipient {
    /// Generate a fresh recipient key pair
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut seed[..]);
        Self::from_bytes(*seed)
    }

    /// Restore a recipient from its 32-byte secret
    pub fn from_bytes(secret: [u8; 32]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        ShareRecipient { secret, public }
    }

    /// The public key senders seal shares to
    pub fn public_key(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// The raw secret, for the operator's own safekeeping
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }
}

impl fmt::Debug for ShareRecipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareRecipient")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ephemeral_key: Option<String>,
    payload: String,
}

/// Derive the AES key for a sealed share from the X25519 shared secret.
///
/// The HKDF info binds `ephemeral_public || recipient_public`.
fn sealing_key(
    shared: &SharedSecret,
    ephemeral_public: &PublicKey,
    recipient_public: &PublicKey,
) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    if !shared.was_contributory() {
        return Err(Error::InvalidShare(
            "low-order public key in share envelope".to_string(),
        ));
    }

    let mut info = [0u8; 64];
    info[..32].copy_from_slice(ephemeral_public.as_bytes());
    info[32..].copy_from_slice(recipient_public.as_bytes());

    let prk = Salt::new(HKDF_SHA256, SEAL_SALT).extract(shared.as_bytes());
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    let info_parts = [&info[..]];
    prk.expand(&info_parts, HKDF_SHA256)
        .map_err(|_| Error::KeyDerivation("HKDF expansion failed".to_string()))?
        .fill(&mut key[..])
        .map_err(|_| Error::KeyDerivation("HKDF fill failed".to_string()))?;

    Ok(key)
}

fn decode_key(hex_key: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| Error::InvalidShare(format!("invalid ephemeral key: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidShare("ephemeral key must be 32 bytes".to_string()))
}

/// Hex serialization for share data
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_share() -> Share {
        Share {
            id: "alice".to_string(),
            index: 2,
            data: vec![0xAB; 32],
            created: Utc::now(),
            threshold: 3,
            total_shares: 5,
        }
    }

    #[test]
    fn test_plain_export_import() {
        let share = test_share();
        let exported = share.export(None).unwrap();
        assert!(exported.starts_with(EXPORT_PREFIX));

        let imported = import_share(&exported, None).unwrap();
        assert_eq!(imported.id, "alice");
        assert_eq!(imported.index, 2);
        assert_eq!(imported.data, share.data);
        assert_eq!(imported.threshold, 3);
        assert_eq!(imported.total_shares, 5);
    }

    #[test]
    fn test_sealed_export_import() {
        let recipient = ShareRecipient::generate();
        let share = test_share();

        let exported = share.export(Some(&recipient.public_key())).unwrap();
        let imported = import_share(&exported, Some(&recipient)).unwrap();
        assert_eq!(imported.data, share.data);

        // The sealed form does not carry the share bytes in the clear
        assert!(!exported.contains(&hex::encode(&share.data)));
    }

    #[test]
    fn test_sealed_import_needs_recipient() {
        let recipient = ShareRecipient::generate();
        let exported = test_share().export(Some(&recipient.public_key())).unwrap();

        assert!(matches!(
            import_share(&exported, None),
            Err(Error::InvalidShare(_))
        ));

        let stranger = ShareRecipient::generate();
        assert!(matches!(
            import_share(&exported, Some(&stranger)),
            Err(Error::DecryptFailed(_))
        ));
    }

    #[test]
    fn test_recipient_restore() {
        let recipient = ShareRecipient::generate();
        let restored = ShareRecipient::from_bytes(*recipient.secret_bytes());
        assert_eq!(recipient.public_key(), restored.public_key());

        let exported = test_share().export(Some(&recipient.public_key())).unwrap();
        assert!(import_share(&exported, Some(&restored)).is_ok());
    }

    #[test]
    fn test_import_rejects_garbage() {
        assert!(import_share("not a share", None).is_err());
        assert!(import_share("bibd-share-v1:!!!", None).is_err());
    }

    #[test]
    fn test_debug_redaction() {
        let debug_str = format!("{:?}", test_share());
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("171, 171")); // 0xAB
    }
}
