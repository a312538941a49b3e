//! Object upload pipeline for the storage network.
//!
//! This crate holds the **business logic** between a user picking files
//! and the network reporting them durably stored. It has no UI or
//! transport dependencies: the UI layer implements [`ChainFacade`] and
//! [`StorageFacade`] on top of its wallet and HTTP clients, drives an
//! [`UploadManager`] and renders its snapshots and events.
//!
//! # Pipeline
//!
//! 1. **Check**: name, size and duplicate validation, guarded by a
//!    per-task sequence number so stale results are dropped
//! 2. **Confirm**: gated on the fee verdict; a batch provisions one
//!    delegated sub-account so the wallet is prompted once
//! 3. **Hash**: Checksum Set on the blocking pool
//! 4. **Sign**: simulate, sign and broadcast the creation
//! 5. **Upload**: stream the payload to the storage endpoint
//! 6. **Seal**: poll until the object is durable

pub mod config;
pub mod delegate;
pub mod error;
pub mod facade;
pub mod manager;
mod pipeline;
pub mod queue;
pub mod seal;
pub mod sequence;
pub mod session;
pub mod task;
#[cfg(test)]
mod testing;
pub mod types;
pub mod validation;

// Re-export primary types for convenience.
pub use config::{DelegateConfig, MAX_OBJECT_SIZE, SealConfig, UploadConfig};
pub use delegate::{DelegatedAccount, build_grant, funding_amount};
pub use error::{ErrorKind, TaskError, UploadError};
pub use facade::{
    BoxFuture, ChainError, ChainFacade, CreateObjectRequest, DelegateGrant, ObjectPresence,
    ProgressSink, PutObjectRequest, Signer, StorageError, StorageFacade,
};
pub use manager::{ConfirmHandle, UploadManager};
pub use queue::TaskQueue;
pub use seal::SealMonitor;
pub use session::{AccountSession, SessionStore};
pub use task::{TaskState, TaskStatus, UploadTask};
pub use types::{
    AccountContext, BucketInfo, FileSource, Partition, QueueSummary, SelectedFile, TaskId,
    TaskSnapshot, UploadEvent, Visibility,
};
