//! Shamir's Secret Sharing over GF(256)
//!
//! A secret is split byte-wise: every byte is the constant term of its own random
//! polynomial of degree `threshold - 1`, evaluated at x = 1..=total_shares.
//! Any `threshold` shares reconstruct the secret by Lagrange interpolation at x = 0;
//! fewer reveal nothing about it.

use crate::config::ShamirConfig;
use crate::crypto::gf256;
use crate::crypto::Share;
use crate::error::{Error, Result};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;
use zeroize::Zeroizing;

/// Splits and reconstructs secrets for a fixed `(threshold, total_shares)` scheme
#[derive(Debug, Clone)]
pub struct ShamirManager {
    threshold: u8,
    total_shares: u8,
    shareholder_ids: Vec<String>,
}

impl ShamirManager {
    /// Create a manager for the configured scheme
    ///
    /// # Errors
    /// Returns `InvalidConfig` unless `2 <= threshold <= total_shares`
    pub fn new(config: &ShamirConfig) -> Result<Self> {
        config.validate()?;
        Ok(ShamirManager {
            threshold: config.threshold,
            total_shares: config.total_shares,
            shareholder_ids: config.shareholder_ids.clone(),
        })
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn total_shares(&self) -> u8 {
        self.total_shares
    }

    /// Split `secret` into `total_shares` shares with indices 1..=total_shares
    pub fn split_key(&self, secret: &[u8]) -> Result<Vec<Share>> {
        if self.threshold < 2 || self.total_shares < self.threshold {
            return Err(Error::InvalidConfig(format!(
                "invalid shamir scheme {}-of-{}",
                self.threshold, self.total_shares
            )));
        }
        if secret.is_empty() {
            return Err(Error::InvalidKey("cannot split an empty secret".to_string()));
        }

        let len = secret.len();
        let degree = self.threshold as usize - 1;

        // Coefficient j (1..=degree) for byte k lives at random[(j - 1) * len + k]
        let mut random = Zeroizing::new(vec![0u8; degree * len]);
        OsRng.fill_bytes(&mut random[..]);

        let created = Utc::now();
        let mut shares = Vec::with_capacity(self.total_shares as usize);

        for x in 1..=self.total_shares {
            let mut data = vec![0u8; len];
            for (k, out) in data.iter_mut().enumerate() {
                let mut y = 0u8;
                for j in (1..=degree).rev() {
                    y = gf256::add(gf256::mul(y, x), random[(j - 1) * len + k]);
                }
                *out = gf256::add(gf256::mul(y, x), secret[k]);
            }

            let id = self
                .shareholder_ids
                .get(x as usize - 1)
                .filter(|id| !id.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("share-{}", x));

            shares.push(Share {
                id,
                index: x,
                data,
                created,
                threshold: self.threshold,
                total_shares: self.total_shares,
            });
        }

        debug!(
            "Split {}-byte secret into {} shares (threshold {})",
            len, self.total_shares, self.threshold
        );
        Ok(shares)
    }

    /// Reconstruct the secret from the first `threshold` shares
    ///
    /// # Errors
    /// - `InsufficientShares` if fewer than `threshold` shares are given
    /// - `InvalidShare` if the used shares differ in length, are empty, or have a zero
    ///   or duplicate index
    pub fn recover_key(&self, shares: &[Share]) -> Result<Zeroizing<Vec<u8>>> {
        let threshold = self.threshold as usize;
        if shares.len() < threshold {
            return Err(Error::InsufficientShares {
                required: threshold,
                got: shares.len(),
            });
        }

        let used = &shares[..threshold];
        let len = used[0].data.len();
        if len == 0 {
            return Err(Error::InvalidShare("share data is empty".to_string()));
        }
        if used.iter().any(|s| s.data.len() != len) {
            return Err(Error::InvalidShare(
                "shares have different data lengths".to_string(),
            ));
        }

        let mut seen = [false; 256];
        for share in used {
            if share.index == 0 {
                return Err(Error::InvalidShare(format!(
                    "share {} has index 0",
                    share.id
                )));
            }
            if seen[share.index as usize] {
                return Err(Error::InvalidShare(format!(
                    "duplicate share index {}",
                    share.index
                )));
            }
            seen[share.index as usize] = true;
        }

        let mut secret = Zeroizing::new(vec![0u8; len]);
        for (i, share) in used.iter().enumerate() {
            let coefficient = lagrange_at_zero(used, i)?;
            for (out, &y) in secret.iter_mut().zip(share.data.iter()) {
                *out ^= gf256::mul(y, coefficient);
            }
        }

        debug!("Recovered {}-byte secret from {} shares", len, threshold);
        Ok(secret)
    }
}

/// Lagrange basis polynomial `L_i(0) = prod_{j != i} x_j / (x_i - x_j)`.
///
/// Subtraction is XOR in GF(256), so `0 - x_j = x_j`.
fn lagrange_at_zero(shares: &[Share], i: usize) -> Result<u8> {
    let xi = shares[i].index;
    let mut numerator = 1u8;
    let mut denominator = 1u8;

    for (j, share) in shares.iter().enumerate() {
        if j == i {
            continue;
        }
        let xj = share.index;
        numerator = gf256::mul(numerator, xj);
        denominator = gf256::mul(denominator, gf256::add(xi, xj));
    }

    gf256::div(numerator, denominator).ok_or_else(|| {
        Error::ShareRecoveryFailed("zero denominator in Lagrange coefficient".to_string())
    })
}
