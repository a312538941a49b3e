//! Upload error types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::TaskStatus;
use crate::types::TaskId;

/// Errors returned by queue and manager operations.
///
/// Failures inside a task's pipeline never surface here; they are recorded
/// on the task as a [`TaskError`].
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checksum error: {0}")]
    Checksum(#[from] stowage_checksum::ChecksumError),

    #[error("chain error: {0}")]
    Chain(#[from] crate::facade::ChainError),

    #[error("no account signed in")]
    NoAccount,

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {task}: invalid transition {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {0} is already confirmed")]
    NotEditable(TaskId),

    #[error("cannot cancel task {task} in {status}")]
    CancelNotAllowed { task: TaskId, status: TaskStatus },

    #[error("too many objects: {requested} exceeds the limit of {max}")]
    TooManyObjects { max: usize, requested: usize },

    #[error("selection contains no new files")]
    EmptySelection,

    #[error("bucket storage is paid by {0}; its balance must be given separately")]
    PaymentBalanceRequired(String),

    #[error("confirm blocked: {0}")]
    ConfirmBlocked(String),
}

/// Classification of a task-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Name, size or duplicate rules failed.
    Validation,
    /// Checksum or gas simulation failed.
    Estimation,
    /// Signing or broadcasting the creation transaction failed.
    Broadcast,
    /// Transport failure before anything was recorded on chain.
    Network,
    /// The chain has the object but the storage side never received it.
    /// Needs an on-chain cancel before a retry can succeed.
    Stranded,
    /// Sealing did not complete within the polling budget.
    StuckSealing,
}

/// A failure recorded on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
