//! Upload task and its state machine.
//!
//! ```text
//! CHECK -> WAIT -> HASH -> HASHED -> SIGN -> SIGNED -> UPLOAD -> SEAL -> SEALING -> FINISH
//!   any non-terminal -> ERROR
//!   WAIT..UPLOAD -> CANCEL
//!   ERROR | CANCEL -> RETRY_CHECK -> RETRY_CHECKING -> WAIT
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_checksum::ChecksumSet;
use stowage_fees::Amount;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::sequence::SequenceGuard;
use crate::types::{FileSource, Partition, TaskId, TaskSnapshot, Visibility};

/// Flat status tag, used for events and transition checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Check,
    Wait,
    Hash,
    Hashed,
    Sign,
    Signed,
    Upload,
    Seal,
    Sealing,
    Finish,
    Error,
    Cancel,
    RetryCheck,
    RetryChecking,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Check => "CHECK",
            TaskStatus::Wait => "WAIT",
            TaskStatus::Hash => "HASH",
            TaskStatus::Hashed => "HASHED",
            TaskStatus::Sign => "SIGN",
            TaskStatus::Signed => "SIGNED",
            TaskStatus::Upload => "UPLOAD",
            TaskStatus::Seal => "SEAL",
            TaskStatus::Sealing => "SEALING",
            TaskStatus::Finish => "FINISH",
            TaskStatus::Error => "ERROR",
            TaskStatus::Cancel => "CANCEL",
            TaskStatus::RetryCheck => "RETRY_CHECK",
            TaskStatus::RetryChecking => "RETRY_CHECKING",
        }
    }

    /// FINISH, ERROR and CANCEL.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finish | TaskStatus::Error | TaskStatus::Cancel)
    }

    /// States in which a user cancel is honoured. Once SEAL begins the
    /// object exists on chain and is left to complete.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            TaskStatus::Wait
                | TaskStatus::Hash
                | TaskStatus::Hashed
                | TaskStatus::Sign
                | TaskStatus::Signed
                | TaskStatus::Upload
        )
    }

    /// Validation in flight.
    pub fn is_validating(self) -> bool {
        matches!(
            self,
            TaskStatus::Check | TaskStatus::RetryCheck | TaskStatus::RetryChecking
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            // Rename re-enters validation.
            (Check | Wait | Error, Check) => true,
            (Check, Wait | Error) => true,
            (Wait, Wait | Hash | Error | Cancel) => true,
            (Hash, Hashed | Error | Cancel) => true,
            (Hashed, Sign | Error | Cancel) => true,
            // Wallet rejection returns the task to WAIT.
            (Sign, Signed | Wait | Error | Cancel) => true,
            (Signed, Upload | Error | Cancel) => true,
            (Upload, Upload | Seal | Error | Cancel) => true,
            (Seal, Sealing | Finish | Error) => true,
            (Sealing, Sealing | Finish | Error) => true,
            (Error | Cancel, RetryCheck) => true,
            (RetryCheck, RetryChecking | Wait | Error) => true,
            (RetryChecking, RetryChecking | Wait | Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task state; each variant carries only what is meaningful in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Check,
    Wait,
    Hash,
    Hashed,
    Sign,
    Signed,
    Upload { progress: u8 },
    Seal,
    Sealing { attempt: u32 },
    Finish,
    Error(TaskError),
    Cancel,
    RetryCheck,
    RetryChecking,
}

impl TaskState {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskState::Check => TaskStatus::Check,
            TaskState::Wait => TaskStatus::Wait,
            TaskState::Hash => TaskStatus::Hash,
            TaskState::Hashed => TaskStatus::Hashed,
            TaskState::Sign => TaskStatus::Sign,
            TaskState::Signed => TaskStatus::Signed,
            TaskState::Upload { .. } => TaskStatus::Upload,
            TaskState::Seal => TaskStatus::Seal,
            TaskState::Sealing { .. } => TaskStatus::Sealing,
            TaskState::Finish => TaskStatus::Finish,
            TaskState::Error(_) => TaskStatus::Error,
            TaskState::Cancel => TaskStatus::Cancel,
            TaskState::RetryCheck => TaskStatus::RetryCheck,
            TaskState::RetryChecking => TaskStatus::RetryChecking,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            TaskState::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn progress(&self) -> Option<u8> {
        match self {
            TaskState::Upload { progress } => Some(*progress),
            _ => None,
        }
    }
}

/// One object being uploaded.
///
/// Fields are only written by [`TaskQueue`](crate::queue::TaskQueue).
#[derive(Debug)]
pub struct UploadTask {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) relative_path: Option<String>,
    pub(crate) prefix: String,
    pub(crate) bucket: String,
    pub(crate) size: u64,
    pub(crate) source: FileSource,
    pub(crate) visibility: Visibility,
    pub(crate) state: TaskState,
    pub(crate) partition: Partition,
    pub(crate) checksums: Option<ChecksumSet>,
    pub(crate) tx_hash: Option<String>,
    pub(crate) gas: Option<Amount>,
    pub(crate) signer: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) validation: SequenceGuard,
    pub(crate) cancel: CancellationToken,
}

impl UploadTask {
    pub(crate) fn new(
        id: TaskId,
        name: String,
        relative_path: Option<String>,
        prefix: String,
        bucket: String,
        size: u64,
        source: FileSource,
    ) -> Self {
        Self {
            id,
            name,
            relative_path,
            prefix,
            bucket,
            size,
            source,
            visibility: Visibility::Inherit,
            state: TaskState::Check,
            partition: Partition::Wait,
            checksums: None,
            tx_hash: None,
            gas: None,
            signer: None,
            created_at: Utc::now(),
            validation: SequenceGuard::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn is_folder(&self) -> bool {
        self.source.is_folder()
    }

    pub fn checksums(&self) -> Option<&ChecksumSet> {
        self.checksums.as_ref()
    }

    pub fn tx_hash(&self) -> Option<&str> {
        self.tx_hash.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Full object path inside the bucket.
    pub fn object_name(&self) -> String {
        match &self.relative_path {
            Some(rel) => format!("{}{}", self.prefix, rel),
            None if self.is_folder() => format!("{}{}/", self.prefix, self.name),
            None => format!("{}{}", self.prefix, self.name),
        }
    }

    /// Applies a new name to the leaf of the object path.
    pub(crate) fn set_name(&mut self, name: String) {
        if let Some(rel) = &self.relative_path {
            let folder = rel.ends_with('/');
            let parent = rel
                .trim_end_matches('/')
                .rsplit_once('/')
                .map(|(parent, _)| format!("{parent}/"))
                .unwrap_or_default();
            let suffix = if folder { "/" } else { "" };
            self.relative_path = Some(format!("{parent}{name}{suffix}"));
        }
        self.name = name;
    }

    /// Drops pipeline artifacts before a retry; identity is kept.
    pub(crate) fn reset_for_retry(&mut self) {
        self.checksums = None;
        self.tx_hash = None;
        self.gas = None;
        self.signer = None;
        self.cancel = CancellationToken::new();
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            name: self.name.clone(),
            object_name: self.object_name(),
            relative_path: self.relative_path.clone(),
            size: self.size,
            status: self.status(),
            progress: self.state.progress(),
            error: self.state.error().map(|e| e.message.clone()),
            partition: self.partition,
            visibility: self.visibility,
            tx_hash: self.tx_hash.clone(),
            signer: self.signer.clone(),
        }
    }
}
