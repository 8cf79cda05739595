//! Allowlist gate for column encryption

use crate::column::{ColumnEncryption, ColumnStrategy};
use crate::config::EncryptedField;
use crate::error::Result;
use std::collections::{HashMap, HashSet};

/// Applies a column strategy to the `table -> {columns}` pairs that must be encrypted
pub struct FieldEncryptor {
    strategy: ColumnStrategy,
    fields: HashMap<String, HashSet<String>>,
}

impl FieldEncryptor {
    pub fn new(strategy: ColumnStrategy, fields: &[EncryptedField]) -> Self {
        let mut map: HashMap<String, HashSet<String>> = HashMap::new();
        for field in fields {
            map.entry(field.table.clone())
                .or_default()
                .extend(field.columns.iter().cloned());
        }
        FieldEncryptor {
            strategy,
            fields: map,
        }
    }

    /// Encrypts nothing
    pub fn disabled() -> Self {
        FieldEncryptor::new(ColumnStrategy::None, &[])
    }

    pub fn strategy(&self) -> &ColumnStrategy {
        &self.strategy
    }

    /// Swap in a strategy keyed from a new master key; the allowlist is kept
    pub fn replace_strategy(&mut self, strategy: ColumnStrategy) {
        self.strategy = strategy;
    }

    pub fn is_encrypted_field(&self, table: &str, column: &str) -> bool {
        !self.strategy.is_none()
            && self
                .fields
                .get(table)
                .map(|columns| columns.contains(column))
                .unwrap_or(false)
    }

    /// Encrypt `value` if the pair is allowlisted, otherwise return it unchanged
    pub fn encrypt_field(&self, table: &str, column: &str, value: &[u8]) -> Result<Vec<u8>> {
        if !self.is_encrypted_field(table, column) {
            return Ok(value.to_vec());
        }
        self.strategy.encrypt(value)
    }

    pub fn decrypt_field(&self, table: &str, column: &str, value: &[u8]) -> Result<Vec<u8>> {
        if !self.is_encrypted_field(table, column) {
            return Ok(value.to_vec());
        }
        self.strategy.decrypt(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{AeadAlgorithm, ApplicationEncryption};
    use crate::config::ApplicationConfig;

    fn strategy(key: u8) -> ColumnStrategy {
        ColumnStrategy::Application(ApplicationEncryption::new(
            AeadAlgorithm::Aes256Gcm,
            &[key; 32],
        ))
    }

    #[test]
    fn test_default_allowlist() {
        let fields =
            FieldEncryptor::new(strategy(7), &ApplicationConfig::default().encrypted_fields);
        assert!(fields.is_encrypted_field("datasets", "content"));
        assert!(fields.is_encrypted_field("datasets", "metadata"));
        assert!(fields.is_encrypted_field("jobs", "parameters"));
        assert!(fields.is_encrypted_field("jobs", "result"));
        assert!(fields.is_encrypted_field("nodes", "metadata"));
        assert!(!fields.is_encrypted_field("datasets", "name"));
        assert!(!fields.is_encrypted_field("users", "content"));
    }

    #[test]
    fn test_pass_through_and_round_trip() {
        let fields = FieldEncryptor::new(
            strategy(7),
            &[EncryptedField::new("datasets", &["content"])],
        );

        let clear = fields.encrypt_field("datasets", "name", b"visible").unwrap();
        assert_eq!(clear, b"visible");
        assert_eq!(
            fields.decrypt_field("datasets", "name", &clear).unwrap(),
            b"visible"
        );

        let sealed = fields.encrypt_field("datasets", "content", b"secret").unwrap();
        assert_ne!(sealed, b"secret");
        assert_eq!(
            fields.decrypt_field("datasets", "content", &sealed).unwrap(),
            b"secret"
        );
    }

    #[test]
    fn test_duplicate_tables_merge() {
        let fields = FieldEncryptor::new(
            strategy(7),
            &[
                EncryptedField::new("jobs", &["parameters"]),
                EncryptedField::new("jobs", &["result"]),
            ],
        );
        assert!(fields.is_encrypted_field("jobs", "parameters"));
        assert!(fields.is_encrypted_field("jobs", "result"));
    }

    #[test]
    fn test_replace_strategy_keeps_allowlist() {
        let mut fields =
            FieldEncryptor::new(strategy(1), &[EncryptedField::new("jobs", &["result"])]);
        let sealed = fields.encrypt_field("jobs", "result", b"42").unwrap();

        fields.replace_strategy(strategy(2));
        assert!(fields.is_encrypted_field("jobs", "result"));
        assert!(fields
            .decrypt_field("jobs", "result", &sealed)
            .unwrap_err()
            .is_decrypt_failure());

        let resealed = fields.encrypt_field("jobs", "result", b"42").unwrap();
        assert_eq!(fields.decrypt_field("jobs", "result", &resealed).unwrap(), b"42");
    }

    #[test]
    fn test_disabled_passes_everything_through() {
        let fields = FieldEncryptor::disabled();
        assert!(fields.strategy().is_none());
        assert!(!fields.is_encrypted_field("datasets", "content"));
        assert_eq!(
            fields.encrypt_field("datasets", "content", b"plain").unwrap(),
            b"plain"
        );
    }
}
