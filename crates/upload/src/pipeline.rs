//! Per-task upload pipeline.
//!
//! Drives one confirmed task through
//! HASH -> HASHED -> SIGN -> SIGNED -> UPLOAD -> SEAL -> FINISH.
//! Each step starts only after the previous one settled. A user cancel is
//! observed at the checkpoint before each step; once a creation
//! transaction exists, the object is also cancelled on chain.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, TaskError, UploadError};
use crate::facade::{ChainError, CreateObjectRequest, ProgressSink, PutObjectRequest, Signer};
use crate::manager::Shared;
use crate::queue::{ConfirmedTask, TaskQueue};
use crate::seal::SealMonitor;
use crate::task::TaskState;

const CONTENT_TYPE: &str = "application/octet-stream";
const FOLDER_CONTENT_TYPE: &str = "application/x-directory";

/// Why a pipeline stopped early.
enum Stop {
    Cancelled,
    /// The wallet prompt was declined.
    Rejected,
    Failed(TaskError),
    /// The task was removed or its account signed out.
    Gone,
}

pub(crate) struct TaskPipeline {
    shared: Arc<Shared>,
    account: String,
    task: ConfirmedTask,
    signer: Signer,
    tx_hash: Option<String>,
}

impl TaskPipeline {
    pub(crate) fn new(shared: Arc<Shared>, account: String, task: ConfirmedTask, signer: Signer) -> Self {
        Self {
            shared,
            account,
            task,
            signer,
            tx_hash: None,
        }
    }

    /// Runs the pipeline to completion. Failures are recorded on the task.
    pub(crate) async fn run(mut self) {
        let id = self.task.id;
        let outcome = match self.drive().await {
            // The task is already in CANCEL; the failure only tells us the
            // in-flight call did not complete.
            Err(Stop::Failed(err)) if self.task.cancel.is_cancelled() => {
                debug!(task = %id, error = %err, "step failed after cancel");
                Err(Stop::Cancelled)
            }
            outcome => outcome,
        };
        match outcome {
            Ok(()) => {
                info!(task = %id, object = %self.task.object_name, "upload finished");
            }
            Err(Stop::Cancelled) => {
                debug!(task = %id, "pipeline stopped by cancel");
                self.cancel_on_chain().await;
            }
            Err(Stop::Rejected) => {
                debug!(task = %id, "signature declined, task returned to wait");
                self.shared.with_queue(&self.account, |q| {
                    if let Err(e) = q.return_to_wait(id) {
                        debug!(task = %id, error = %e, "task not returned to wait");
                    }
                });
            }
            Err(Stop::Failed(err)) => {
                error!(
                    task = %id,
                    object = %self.task.object_name,
                    kind = ?err.kind,
                    error = %err,
                    "upload failed"
                );
                self.shared.with_queue(&self.account, |q| q.fail(id, err));
            }
            Err(Stop::Gone) => {
                debug!(task = %id, "task left the queue, pipeline dropped");
            }
        }
    }

    async fn drive(&mut self) -> Result<(), Stop> {
        let id = self.task.id;

        // 1. Checksums
        self.check_cancelled()?;
        self.apply(|q| q.transition(id, TaskState::Hash))?;

        let payload = self.task.source.read().await.map_err(|e| {
            Stop::Failed(TaskError::new(
                ErrorKind::Estimation,
                format!("Failed to read file: {e}"),
            ))
        })?;
        if payload.len() as u64 != self.task.size {
            return Err(Stop::Failed(TaskError::validation(
                "File changed since it was selected",
            )));
        }

        let checksums = if self.task.source.is_folder() {
            None
        } else {
            let set = self
                .shared
                .checksums
                .compute(Arc::clone(&payload))
                .await
                .map_err(|e| {
                    Stop::Failed(TaskError::new(
                        ErrorKind::Estimation,
                        format!("Checksum failed: {e}"),
                    ))
                })?;
            let recorded = set.clone();
            self.apply(|q| q.record_checksums(id, recorded))?;
            Some(set)
        };
        self.apply(|q| q.transition(id, TaskState::Hashed))?;

        // 2. Approval and broadcast
        self.check_cancelled()?;
        self.apply(|q| q.transition(id, TaskState::Sign))?;

        let req = CreateObjectRequest {
            creator: self.account.clone(),
            bucket: self.task.bucket.clone(),
            object: self.task.object_name.clone(),
            size: self.task.size,
            visibility: self.task.visibility,
            content_type: self.content_type().to_string(),
            checksums,
        };
        let gas = self
            .shared
            .chain
            .simulate_create_object(&req)
            .await
            .map_err(|e| {
                Stop::Failed(TaskError::new(
                    ErrorKind::Estimation,
                    format!("Gas simulation failed: {e}"),
                ))
            })?;
        self.apply(|q| q.record_gas(id, gas))?;
        debug!(task = %id, %gas, "creation simulated");

        if let Some(set) = &req.checksums {
            set.verify_len(&self.shared.config.redundancy)
                .map_err(|e| Stop::Failed(TaskError::validation(format!("Invalid checksums: {e}"))))?;
        }

        self.check_cancelled()?;
        let tx_hash = match self
            .shared
            .chain
            .broadcast_create_object(&req, &self.signer)
            .await
        {
            Ok(tx_hash) => tx_hash,
            Err(ChainError::UserRejected) => return Err(Stop::Rejected),
            Err(e) => {
                let kind = match e {
                    ChainError::Network(_) => ErrorKind::Network,
                    _ => ErrorKind::Broadcast,
                };
                return Err(Stop::Failed(TaskError::new(kind, format!("Broadcast failed: {e}"))));
            }
        };
        self.tx_hash = Some(tx_hash.clone());
        let signer = self.signer.address().to_string();
        debug!(task = %id, tx = %tx_hash, signer = %signer, "creation broadcast");
        self.apply(|q| q.record_broadcast(id, tx_hash, signer))?;

        // 3. Payload
        self.check_cancelled()?;
        self.apply(|q| q.transition(id, TaskState::Upload { progress: 0 }))?;

        let put = PutObjectRequest {
            bucket: self.task.bucket.clone(),
            object: self.task.object_name.clone(),
            size: self.task.size,
            content_type: req.content_type.clone(),
            tx_hash: self.tx_hash.clone().unwrap_or_default(),
            uploader: self.signer.address().to_string(),
        };
        self.shared
            .storage
            .put_object(&put, payload, self.progress_sink())
            .await
            .map_err(|e| {
                Stop::Failed(TaskError::new(
                    ErrorKind::Stranded,
                    format!("Upload failed after the object was created on chain: {e}"),
                ))
            })?;

        // 4. Sealing
        self.check_cancelled()?;
        self.apply(|q| q.transition(id, TaskState::Seal))?;

        let monitor = SealMonitor::new(self.shared.storage.as_ref(), &self.shared.config.seal);
        let shared = &self.shared;
        let account = &self.account;
        monitor
            .wait_sealed(&self.task.bucket, &self.task.object_name, |attempt| {
                shared.with_queue(account, |q| {
                    if let Err(e) = q.transition(id, TaskState::Sealing { attempt }) {
                        debug!(task = %id, error = %e, "sealing attempt not recorded");
                    }
                });
            })
            .await
            .map_err(Stop::Failed)?;

        self.apply(|q| q.transition(id, TaskState::Finish))
    }

    fn content_type(&self) -> &'static str {
        if self.task.source.is_folder() {
            FOLDER_CONTENT_TYPE
        } else {
            CONTENT_TYPE
        }
    }

    fn check_cancelled(&self) -> Result<(), Stop> {
        if self.task.cancel.is_cancelled() {
            Err(Stop::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Applies a queue mutation for this task. A rejected transition means
    /// the task moved on without us, normally through a cancel.
    fn apply<R>(&self, f: impl FnOnce(&mut TaskQueue) -> Result<R, UploadError>) -> Result<R, Stop> {
        match self.shared.with_queue(&self.account, f) {
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) => {
                debug!(task = %self.task.id, error = %e, "queue update rejected");
                if self.task.cancel.is_cancelled() {
                    Err(Stop::Cancelled)
                } else {
                    Err(Stop::Gone)
                }
            }
            None => Err(Stop::Gone),
        }
    }

    fn progress_sink(&self) -> ProgressSink {
        let shared = Arc::clone(&self.shared);
        let account = self.account.clone();
        let id = self.task.id;
        let size = self.task.size.max(1);
        Arc::new(move |sent: u64| {
            let percent = (sent.min(size) * 100 / size) as u8;
            shared.with_queue(&account, |q| q.update_progress(id, percent));
        })
    }

    /// Best-effort cancel of an object created before the user cancelled.
    async fn cancel_on_chain(&self) {
        let Some(created) = &self.tx_hash else {
            return;
        };
        match self
            .shared
            .chain
            .cancel_create_object(&self.task.bucket, &self.task.object_name, &self.signer)
            .await
        {
            Ok(tx) => debug!(task = %self.task.id, tx = %tx, "on-chain object cancelled"),
            Err(e) => warn!(
                task = %self.task.id,
                created_tx = %created,
                error = %e,
                "could not cancel object on chain"
            ),
        }
    }
}
