//! Data types shared across the upload pipeline.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stowage_fees::{FeeSnapshot, FlowRate};

use crate::task::TaskStatus;

/// Process-local task identity.
///
/// Built from the creation timestamp with a random perturbation; the queue
/// re-draws on the rare collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl TaskId {
    pub(crate) fn generate() -> Self {
        use rand::Rng;
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let jitter: u64 = rand::thread_rng().gen_range(0..1_000_000);
        TaskId(millis.wrapping_mul(1_000_000).wrapping_add(jitter))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object visibility on the storage network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Use the bucket's visibility.
    #[default]
    Inherit,
    Public,
    Private,
}

/// Where a task's payload comes from.
#[derive(Clone)]
pub enum FileSource {
    /// A file on local disk, read when hashing starts.
    Path(PathBuf),
    /// Bytes already in memory.
    Memory(Arc<[u8]>),
    /// A zero-length folder placeholder.
    Folder,
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            FileSource::Memory(b) => write!(f, "Memory({} bytes)", b.len()),
            FileSource::Folder => f.write_str("Folder"),
        }
    }
}

impl FileSource {
    /// Reads the full payload. Folders read as empty.
    pub async fn read(&self) -> std::io::Result<Arc<[u8]>> {
        match self {
            FileSource::Path(path) => Ok(Arc::from(tokio::fs::read(path).await?)),
            FileSource::Memory(bytes) => Ok(Arc::clone(bytes)),
            FileSource::Folder => Ok(Arc::from(Vec::new())),
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, FileSource::Folder)
    }
}

/// A file or folder picked or dropped by the user.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    /// Leaf name.
    pub name: String,
    /// Path relative to the dropped root, including the leaf (folder uploads).
    pub relative_path: Option<String>,
    pub size: u64,
    pub source: FileSource,
}

impl SelectedFile {
    /// An in-memory file.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            name: name.into(),
            relative_path: None,
            size: bytes.len() as u64,
            source: FileSource::Memory(Arc::from(bytes)),
        }
    }

    /// A file on disk. The size is taken from its metadata.
    pub fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path: PathBuf = path.into();
        let size = std::fs::metadata(&path)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            relative_path: None,
            size,
            source: FileSource::Path(path),
        })
    }

    /// A folder placeholder at `relative_path` (for example `photos/2024/`).
    pub fn folder(relative_path: impl Into<String>) -> Self {
        let relative_path: String = relative_path.into();
        let trimmed = relative_path.trim_end_matches('/');
        let name = trimmed.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            name,
            relative_path: Some(format!("{trimmed}/")),
            size: 0,
            source: FileSource::Folder,
        }
    }

    /// Sets the path relative to the dropped root.
    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }
}

/// Target bucket of the signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    /// Account that pays the bucket's storage fees.
    pub payment_address: String,
    /// Current outflow rate, used for the settlement reserve.
    pub flow_rate: FlowRate,
}

/// The signed-in account and where it is uploading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContext {
    pub address: String,
    pub bucket: BucketInfo,
    /// Folder prefix inside the bucket, empty or ending with `/`.
    #[serde(default)]
    pub prefix: String,
}

impl AccountContext {
    /// Whether the owner pays the bucket's storage fees itself.
    pub fn owner_pays_storage(&self) -> bool {
        self.bucket.payment_address.eq_ignore_ascii_case(&self.address)
    }
}

/// Partition of the task collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Selected but not yet confirmed.
    Wait,
    /// Confirmed: mid-pipeline or terminal.
    Upload,
}

/// Read model of one task for list rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub object_name: String,
    pub relative_path: Option<String>,
    pub size: u64,
    pub status: TaskStatus,
    pub progress: Option<u8>,
    pub error: Option<String>,
    pub partition: Partition,
    pub visibility: Visibility,
    pub tx_hash: Option<String>,
    pub signer: Option<String>,
}

/// Aggregate counts for tab badges and the confirm gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    /// Wait-partition tasks ready to confirm.
    pub ready: usize,
    /// Wait-partition tasks whose validation failed.
    pub invalid: usize,
    /// Tasks still being validated.
    pub validating: usize,
    /// Upload-partition tasks not yet terminal.
    pub uploading: usize,
    pub finished: usize,
    /// Upload-partition tasks in ERROR or CANCEL.
    pub failed: usize,
    /// True when the confirm action must stay disabled.
    pub blocking: bool,
}

/// Events emitted to UI observers.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// A task entered a new status.
    Status {
        account: String,
        task: TaskId,
        status: TaskStatus,
        error: Option<String>,
    },
    /// Upload progress, 0–99 until the transfer completes.
    Progress {
        account: String,
        task: TaskId,
        progress: u8,
    },
    /// A task left the queue.
    Removed { account: String, task: TaskId },
    /// The fee snapshot changed.
    Fees {
        account: String,
        snapshot: FeeSnapshot,
    },
    /// A delegated sub-account was provisioned for a batch.
    DelegateProvisioned {
        account: String,
        address: String,
        funded: stowage_fees::Amount,
    },
}
