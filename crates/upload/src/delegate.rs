//! Delegated batch signing.
//!
//! A multi-object confirm generates a throwaway ed25519 sub-account, funds
//! it and grants it gas allowance plus bucket write permission in a single
//! wallet interaction. Every creation transaction of the batch is then
//! signed by the sub-account without further prompts.

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use stowage_fees::{Amount, FeeBreakdown};

use crate::config::DelegateConfig;
use crate::facade::DelegateGrant;

/// A generated sub-account. The private key never leaves the process.
pub struct DelegatedAccount {
    key: SigningKey,
    address: String,
}

impl DelegatedAccount {
    /// Generates a fresh key pair from the OS-seeded thread RNG.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    fn from_seed(seed: &[u8; 32]) -> Self {
        let key = SigningKey::from_bytes(seed);
        let address = address_of(&key.verifying_key());
        Self { key, address }
    }

    /// `0x`-prefixed 20-byte address derived from the public key.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Signs a serialized transaction body.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.key.sign(message).to_bytes()
    }

    /// Checks a signature produced by [`sign`](Self::sign).
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        let signature = Signature::from_bytes(signature);
        self.key
            .verifying_key()
            .verify(message, &signature)
            .is_ok()
    }
}

impl fmt::Debug for DelegatedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedAccount")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn address_of(key: &VerifyingKey) -> String {
    let hash = Sha256::digest(key.as_bytes());
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Amount moved into the sub-account: the batch total plus the configured
/// margin, capped at what the owner holds.
pub fn funding_amount(fees: &FeeBreakdown, owner_balance: Amount, config: &DelegateConfig) -> Amount {
    fees.total()
        .mul_percent(config.fund_margin_percent)
        .min(owner_balance)
}

/// Builds the provisioning grant for `delegate`.
pub fn build_grant(
    owner: &str,
    bucket: &str,
    delegate: &DelegatedAccount,
    fees: &FeeBreakdown,
    owner_balance: Amount,
    config: &DelegateConfig,
    now: DateTime<Utc>,
) -> DelegateGrant {
    let ttl = ChronoDuration::seconds(i64::try_from(config.ttl_secs).unwrap_or(i64::MAX));
    DelegateGrant {
        owner: owner.to_string(),
        delegate: delegate.address().to_string(),
        bucket: bucket.to_string(),
        fund: funding_amount(fees, owner_balance, config),
        allowance: fees.gas_fee.mul_percent(config.fund_margin_percent),
        expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fees(total_tokens: u64) -> FeeBreakdown {
        FeeBreakdown {
            gas_fee: Amount::from_tokens(1),
            store_fee: Amount::from_tokens(total_tokens - 1),
            ..FeeBreakdown::default()
        }
    }

    #[test]
    fn address_is_stable_per_key() {
        let a = DelegatedAccount::from_seed(&[9u8; 32]);
        let b = DelegatedAccount::from_seed(&[9u8; 32]);
        assert_eq!(a.address(), b.address());
        assert!(a.address().starts_with("0x"));
        assert_eq!(a.address().len(), 42);
    }

    #[test]
    fn generated_accounts_differ() {
        let a = DelegatedAccount::generate();
        let b = DelegatedAccount::generate();
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn signatures_verify() {
        let account = DelegatedAccount::generate();
        let sig = account.sign(b"create object");
        assert!(account.verify(b"create object", &sig));
        assert!(!account.verify(b"create other", &sig));
    }

    #[test]
    fn debug_hides_key() {
        let account = DelegatedAccount::from_seed(&[1u8; 32]);
        let out = format!("{account:?}");
        assert!(out.contains(account.address()));
        assert!(!out.contains("key"));
    }

    #[test]
    fn funding_adds_margin() {
        let config = DelegateConfig::default();
        let fund = funding_amount(&fees(100), Amount::from_tokens(1_000), &config);
        assert_eq!(fund, Amount::from_tokens(105));
    }

    #[test]
    fn funding_capped_at_balance() {
        let config = DelegateConfig::default();
        let fund = funding_amount(&fees(100), Amount::from_tokens(102), &config);
        assert_eq!(fund, Amount::from_tokens(102));
    }

    #[test]
    fn grant_expires_after_ttl() {
        let config = DelegateConfig::default();
        let delegate = DelegatedAccount::generate();
        let now = Utc::now();
        let grant = build_grant(
            "0xowner",
            "bucket",
            &delegate,
            &fees(10),
            Amount::from_tokens(50),
            &config,
            now,
        );
        assert_eq!(grant.delegate, delegate.address());
        assert_eq!(grant.allowance, Amount::from_tokens(1).mul_percent(105));
        assert_eq!((grant.expires_at - now).num_seconds(), 86_400);
    }
}
