//! Collaborator interfaces: chain and storage-provider access.
//!
//! The UI layer implements these on top of its wallet, chain RPC client and
//! storage-provider HTTP client. Keeping them as traits decouples the
//! pipeline from transports and lets tests drive it with mocks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_checksum::ChecksumSet;
use stowage_fees::Amount;

use crate::delegate::DelegatedAccount;
use crate::types::Visibility;

/// Boxed future returned by collaborator methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Called with the cumulative number of payload bytes sent.
pub type ProgressSink = Arc<dyn Fn(u64) + Send + Sync>;

/// Failures reported by the chain facade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The user declined the wallet prompt.
    #[error("user rejected the request")]
    UserRejected,

    /// The chain refused the transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("chain network error: {0}")]
    Network(String),
}

/// Failures reported by the storage facade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The object is unknown to (or was removed from) the storage side.
    #[error("object not found")]
    NotFound,

    #[error("storage provider rejected the request: {0}")]
    Rejected(String),

    #[error("storage network error: {0}")]
    Network(String),
}

/// What the storage side knows about an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectPresence {
    /// Recorded on chain, payload not yet durable.
    Created,
    /// Payload replicated and ready to serve.
    Sealed,
}

/// Who signs a transaction.
#[derive(Debug, Clone)]
pub enum Signer {
    /// The signed-in wallet; signing prompts the user.
    Owner { address: String },
    /// A batch's delegated sub-account; signs without prompting.
    Delegate(Arc<DelegatedAccount>),
}

impl Signer {
    pub fn address(&self) -> &str {
        match self {
            Signer::Owner { address } => address,
            Signer::Delegate(account) => account.address(),
        }
    }
}

/// Everything the chain needs to approve an object's creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateObjectRequest {
    pub creator: String,
    pub bucket: String,
    pub object: String,
    pub size: u64,
    pub visibility: Visibility,
    pub content_type: String,
    /// Absent for folder placeholders.
    pub checksums: Option<ChecksumSet>,
}

/// Payload upload to the storage endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub object: String,
    pub size: u64,
    pub content_type: String,
    /// Creation transaction the payload belongs to.
    pub tx_hash: String,
    /// Address that signed the creation.
    pub uploader: String,
}

/// The single wallet-signed transaction that provisions a batch's
/// sub-account: funding transfer, gas allowance and bucket write policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateGrant {
    pub owner: String,
    pub delegate: String,
    pub bucket: String,
    /// Transferred to the sub-account.
    pub fund: Amount,
    /// Gas the sub-account may spend from the owner.
    pub allowance: Amount,
    /// Expiry of both the allowance and the write policy.
    pub expires_at: DateTime<Utc>,
}

/// Chain-facing collaborator.
pub trait ChainFacade: Send + Sync {
    /// Simulates object creation and returns the gas it would cost.
    fn simulate_create_object<'a>(
        &'a self,
        req: &'a CreateObjectRequest,
    ) -> BoxFuture<'a, Result<Amount, ChainError>>;

    /// Signs and broadcasts object creation; returns the transaction hash.
    fn broadcast_create_object<'a>(
        &'a self,
        req: &'a CreateObjectRequest,
        signer: &'a Signer,
    ) -> BoxFuture<'a, Result<String, ChainError>>;

    /// Provisions a delegated sub-account in one wallet interaction.
    fn provision_delegate<'a>(
        &'a self,
        grant: &'a DelegateGrant,
    ) -> BoxFuture<'a, Result<String, ChainError>>;

    /// Cancels an object whose creation was recorded but never sealed.
    fn cancel_create_object<'a>(
        &'a self,
        bucket: &'a str,
        object: &'a str,
        signer: &'a Signer,
    ) -> BoxFuture<'a, Result<String, ChainError>>;
}

/// Storage-provider-facing collaborator.
pub trait StorageFacade: Send + Sync {
    /// Looks up an object's presence and seal status.
    fn head_object<'a>(
        &'a self,
        bucket: &'a str,
        object: &'a str,
    ) -> BoxFuture<'a, Result<ObjectPresence, StorageError>>;

    /// Streams the payload, reporting cumulative bytes sent to `progress`.
    fn put_object<'a>(
        &'a self,
        req: &'a PutObjectRequest,
        payload: Arc<[u8]>,
        progress: ProgressSink,
    ) -> BoxFuture<'a, Result<(), StorageError>>;
}
