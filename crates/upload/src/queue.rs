//! Task Queue: the ordered task collection of one account.
//!
//! Every mutation of a task goes through this type. Each applied
//! transition is checked against [`TaskStatus::can_transition_to`] and
//! recorded in an outbox that the manager drains into the event channel,
//! so observers see transitions in the order they were applied.
//!
//! The queue is synchronous; the manager holds it behind a lock and never
//! across an `.await`.

use stowage_checksum::ChecksumSet;
use stowage_fees::{Amount, FeeInputs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::UploadConfig;
use crate::error::{ErrorKind, TaskError, UploadError};
use crate::sequence::{Sequence, SequenceGuard};
use crate::task::{TaskState, TaskStatus, UploadTask};
use crate::types::{
    AccountContext, FileSource, Partition, QueueSummary, SelectedFile, TaskId, TaskSnapshot,
    UploadEvent, Visibility,
};
use crate::validation::{
    validate_object_name, validate_object_path, validate_relative_path, validate_size,
};

/// Progress never reaches 100 until the transfer has completed.
const MAX_IN_FLIGHT_PROGRESS: u8 = 99;

/// An asynchronous duplicate check to run outside the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationJob {
    pub id: TaskId,
    pub seq: Sequence,
    pub bucket: String,
    pub object_name: String,
}

/// What the pipeline needs to drive one confirmed task.
#[derive(Debug, Clone)]
pub struct ConfirmedTask {
    pub id: TaskId,
    pub bucket: String,
    pub object_name: String,
    pub size: u64,
    pub visibility: Visibility,
    pub source: FileSource,
    pub cancel: CancellationToken,
}

/// Object left on chain by a task, for best-effort cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrandedObject {
    pub bucket: String,
    pub object_name: String,
    pub tx_hash: String,
}

/// Tasks of one account in insertion order.
#[derive(Debug)]
pub struct TaskQueue {
    account: String,
    tasks: Vec<UploadTask>,
    fee_seq: SequenceGuard,
    simulated_gas: Option<Amount>,
    outbox: Vec<UploadEvent>,
}

impl TaskQueue {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            tasks: Vec::new(),
            fee_seq: SequenceGuard::default(),
            simulated_gas: None,
            outbox: Vec::new(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<&UploadTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &UploadTask> {
        self.tasks.iter()
    }

    fn index_of(&self, id: TaskId) -> Result<usize, UploadError> {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(UploadError::TaskNotFound(id))
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut UploadTask, UploadError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(UploadError::TaskNotFound(id))
    }

    /// Takes the events recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<UploadEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn emit_status(&mut self, index: usize) {
        let task = &self.tasks[index];
        self.outbox.push(UploadEvent::Status {
            account: self.account.clone(),
            task: task.id,
            status: task.status(),
            error: task.state.error().map(|e| e.message.clone()),
        });
    }

    fn wait_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.partition == Partition::Wait)
            .count()
    }

    fn unique_id(&self) -> TaskId {
        loop {
            let id = TaskId::generate();
            if self.get(id).is_none() {
                return id;
            }
        }
    }

    /// Adds one task per selected entry, each starting in CHECK.
    ///
    /// Folder placeholders already present in the wait queue (or repeated
    /// within the selection) are dropped. The whole selection is rejected
    /// when it would push the wait queue past `max_batch_objects`, or when
    /// nothing new remains after filtering.
    pub fn enqueue(
        &mut self,
        files: Vec<SelectedFile>,
        ctx: &AccountContext,
        config: &UploadConfig,
    ) -> Result<Vec<TaskId>, UploadError> {
        let mut fresh: Vec<UploadTask> = Vec::with_capacity(files.len());
        for file in files {
            let task = UploadTask::new(
                TaskId(0),
                file.name,
                file.relative_path,
                ctx.prefix.clone(),
                ctx.bucket.name.clone(),
                file.size,
                file.source,
            );
            if task.is_folder() {
                let object = task.object_name();
                let known = self
                    .tasks
                    .iter()
                    .filter(|t| t.partition == Partition::Wait)
                    .chain(fresh.iter())
                    .any(|t| t.object_name() == object);
                if known {
                    trace!(object = %object, "skipping known folder placeholder");
                    continue;
                }
            }
            fresh.push(task);
        }

        if fresh.is_empty() {
            return Err(UploadError::EmptySelection);
        }
        let requested = self.wait_count() + fresh.len();
        if requested > config.max_batch_objects {
            return Err(UploadError::TooManyObjects {
                max: config.max_batch_objects,
                requested,
            });
        }

        let mut ids = Vec::with_capacity(fresh.len());
        for mut task in fresh {
            task.id = self.unique_id();
            ids.push(task.id);
            self.tasks.push(task);
            self.emit_status(self.tasks.len() - 1);
        }
        debug!(account = %self.account, count = ids.len(), "tasks enqueued");
        Ok(ids)
    }

    /// Applies a state, rejecting illegal transitions.
    pub fn transition(&mut self, id: TaskId, state: TaskState) -> Result<(), UploadError> {
        let index = self.index_of(id)?;
        let task = &mut self.tasks[index];
        let from = task.status();
        let to = state.status();
        if !from.can_transition_to(to) {
            return Err(UploadError::InvalidTransition { task: id, from, to });
        }
        trace!(task = %id, %from, %to, "transition");
        task.state = state;
        self.emit_status(index);
        Ok(())
    }

    /// Records a task failure unless the task already settled.
    pub fn fail(&mut self, id: TaskId, error: TaskError) -> bool {
        match self.transition(id, TaskState::Error(error)) {
            Ok(()) => true,
            Err(e) => {
                trace!(task = %id, error = %e, "failure not applied");
                false
            }
        }
    }

    /// Starts validation of a task in CHECK or RETRY_CHECK.
    ///
    /// The synchronous validators run here; a failure settles the task
    /// immediately and returns `None`. Otherwise the returned job carries
    /// the sequence number the asynchronous check must present to
    /// [`finish_validation`](Self::finish_validation).
    pub fn begin_validation(
        &mut self,
        id: TaskId,
        config: &UploadConfig,
    ) -> Result<Option<ValidationJob>, UploadError> {
        let index = self.index_of(id)?;
        let status = self.tasks[index].status();
        if !status.is_validating() {
            return Err(UploadError::InvalidTransition {
                task: id,
                from: status,
                to: TaskStatus::Check,
            });
        }
        if status == TaskStatus::RetryCheck {
            self.transition(id, TaskState::RetryChecking)?;
        }

        let task = &mut self.tasks[index];
        let seq = task.validation.next();
        let object_name = task.object_name();
        let bucket = task.bucket.clone();
        if let Err(message) = sync_checks(task, &object_name, config) {
            self.transition(id, TaskState::Error(TaskError::validation(message)))?;
            return Ok(None);
        }
        Ok(Some(ValidationJob {
            id,
            seq,
            bucket,
            object_name,
        }))
    }

    /// Applies the result of an asynchronous duplicate check.
    ///
    /// Returns `false` when the result is stale: the task is gone, left
    /// validation, or a newer validation was dispatched since `seq`.
    pub fn finish_validation(&mut self, id: TaskId, seq: Sequence, remote: Result<(), String>) -> bool {
        let Ok(index) = self.index_of(id) else {
            return false;
        };
        let task = &self.tasks[index];
        if !task.validation.is_current(seq) || !task.status().is_validating() {
            trace!(task = %id, seq, current = task.validation.current(), "stale validation dropped");
            return false;
        }

        let verdict = remote.and_then(|()| self.check_queue_duplicate(index));
        let state = match verdict {
            Ok(()) => TaskState::Wait,
            Err(message) => TaskState::Error(TaskError::validation(message)),
        };
        self.transition(id, state).is_ok()
    }

    /// The first task targeting an object path wins; later ones are duplicates.
    fn check_queue_duplicate(&self, index: usize) -> Result<(), String> {
        let object = self.tasks[index].object_name();
        let clash = self.tasks.iter().enumerate().any(|(i, other)| {
            i != index
                && !matches!(other.status(), TaskStatus::Error | TaskStatus::Cancel)
                && (i < index || other.partition == Partition::Upload)
                && other.object_name() == object
        });
        if clash {
            return Err("Duplicate object name in upload queue".into());
        }
        Ok(())
    }

    /// Renames an unconfirmed task and puts it back into CHECK.
    pub fn rename(&mut self, id: TaskId, name: String) -> Result<(), UploadError> {
        let index = self.index_of(id)?;
        if self.tasks[index].partition != Partition::Wait {
            return Err(UploadError::NotEditable(id));
        }
        self.transition(id, TaskState::Check)?;
        self.tasks[index].set_name(name);
        Ok(())
    }

    pub fn set_visibility(&mut self, id: TaskId, visibility: Visibility) -> Result<(), UploadError> {
        let task = self.task_mut(id)?;
        if task.partition != Partition::Wait {
            return Err(UploadError::NotEditable(id));
        }
        task.visibility = visibility;
        Ok(())
    }

    /// Sends an ERROR or CANCEL task back through validation.
    ///
    /// Any other status is left untouched and yields `Ok(None)`, so a
    /// mixed selection retries only its failed tasks. When the failure left
    /// an unsealed object on chain, the object is returned so the caller can
    /// cancel it before revalidating.
    pub fn retry(&mut self, id: TaskId) -> Result<Option<StrandedObject>, UploadError> {
        let index = self.index_of(id)?;
        let status = self.tasks[index].status();
        if !matches!(status, TaskStatus::Error | TaskStatus::Cancel) {
            trace!(task = %id, %status, "nothing to retry");
            return Ok(None);
        }
        let task = &self.tasks[index];
        let left_on_chain = task
            .state
            .error()
            .is_some_and(|e| matches!(e.kind, ErrorKind::Stranded | ErrorKind::StuckSealing));
        let stranded = task
            .tx_hash
            .clone()
            .filter(|_| left_on_chain)
            .map(|tx_hash| StrandedObject {
                bucket: task.bucket.clone(),
                object_name: task.object_name(),
                tx_hash,
            });
        self.transition(id, TaskState::RetryCheck)?;

        let task = &mut self.tasks[index];
        task.reset_for_retry();
        task.partition = Partition::Wait;
        Ok(stranded)
    }

    /// Ids of every ERROR or CANCEL task.
    pub fn retryable(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status(), TaskStatus::Error | TaskStatus::Cancel))
            .map(|t| t.id)
            .collect()
    }

    /// Removes terminal upload-partition tasks among `ids`.
    pub fn clear(&mut self, ids: &[TaskId]) -> usize {
        self.remove_where(|t| {
            ids.contains(&t.id) && t.partition == Partition::Upload && t.status().is_terminal()
        })
    }

    /// Removes every terminal upload-partition task.
    pub fn clear_all(&mut self) -> usize {
        self.remove_where(|t| t.partition == Partition::Upload && t.status().is_terminal())
    }

    /// Removes unconfirmed tasks among `ids`.
    pub fn remove(&mut self, ids: &[TaskId]) -> usize {
        self.remove_where(|t| ids.contains(&t.id) && t.partition == Partition::Wait)
    }

    fn remove_where(&mut self, pred: impl Fn(&UploadTask) -> bool) -> usize {
        let mut removed = Vec::new();
        self.tasks.retain(|t| {
            if pred(t) {
                t.cancel.cancel();
                removed.push(t.id);
                false
            } else {
                true
            }
        });
        for id in &removed {
            self.outbox.push(UploadEvent::Removed {
                account: self.account.clone(),
                task: *id,
            });
        }
        removed.len()
    }

    /// Cancels a task before sealing begins.
    ///
    /// The pipeline observes the cancellation at its next checkpoint.
    /// Cancelling an already cancelled task is a no-op.
    pub fn cancel(&mut self, id: TaskId) -> Result<(), UploadError> {
        let index = self.index_of(id)?;
        let status = self.tasks[index].status();
        if status == TaskStatus::Cancel {
            return Ok(());
        }
        if !status.is_cancellable() {
            return Err(UploadError::CancelNotAllowed { task: id, status });
        }
        self.transition(id, TaskState::Cancel)?;
        self.tasks[index].cancel.cancel();
        debug!(task = %id, from = %status, "task cancelled");
        Ok(())
    }

    /// Moves every WAIT task of the wait partition into the upload partition.
    pub fn confirm_ready(&mut self) -> Vec<ConfirmedTask> {
        self.tasks
            .iter_mut()
            .filter(|t| t.partition == Partition::Wait && t.status() == TaskStatus::Wait)
            .map(|t| {
                t.partition = Partition::Upload;
                ConfirmedTask {
                    id: t.id,
                    bucket: t.bucket.clone(),
                    object_name: t.object_name(),
                    size: t.size,
                    visibility: t.visibility,
                    source: t.source.clone(),
                    cancel: t.cancel.clone(),
                }
            })
            .collect()
    }

    /// Puts a confirmed task back in the wait partition after the wallet
    /// prompt was declined.
    pub fn return_to_wait(&mut self, id: TaskId) -> Result<(), UploadError> {
        let index = self.index_of(id)?;
        let status = self.tasks[index].status();
        if status == TaskStatus::Sign {
            self.transition(id, TaskState::Wait)?;
        } else if status != TaskStatus::Wait {
            return Err(UploadError::InvalidTransition {
                task: id,
                from: status,
                to: TaskStatus::Wait,
            });
        }
        let task = &mut self.tasks[index];
        task.partition = Partition::Wait;
        task.gas = None;
        task.signer = None;
        Ok(())
    }

    pub fn record_checksums(&mut self, id: TaskId, checksums: ChecksumSet) -> Result<(), UploadError> {
        self.task_mut(id)?.checksums = Some(checksums);
        Ok(())
    }

    /// Records per-task simulated gas; it also becomes the queue's estimate.
    pub fn record_gas(&mut self, id: TaskId, gas: Amount) -> Result<(), UploadError> {
        self.task_mut(id)?.gas = Some(gas);
        self.fee_seq.next();
        self.simulated_gas = Some(gas);
        Ok(())
    }

    /// Records the creation transaction and moves the task to SIGNED.
    pub fn record_broadcast(
        &mut self,
        id: TaskId,
        tx_hash: String,
        signer: String,
    ) -> Result<(), UploadError> {
        self.transition(id, TaskState::Signed)?;
        let task = self.task_mut(id)?;
        task.tx_hash = Some(tx_hash);
        task.signer = Some(signer);
        Ok(())
    }

    /// Raises upload progress. Regressions are ignored and the value is
    /// clamped below 100.
    pub fn update_progress(&mut self, id: TaskId, progress: u8) -> bool {
        let Ok(index) = self.index_of(id) else {
            return false;
        };
        let progress = progress.min(MAX_IN_FLIGHT_PROGRESS);
        let TaskState::Upload { progress: current } = &mut self.tasks[index].state else {
            return false;
        };
        if progress <= *current {
            return false;
        }
        *current = progress;
        self.outbox.push(UploadEvent::Progress {
            account: self.account.clone(),
            task: id,
            progress,
        });
        true
    }

    /// Starts a gas refresh and returns its ticket.
    pub fn begin_fee_refresh(&mut self) -> Sequence {
        self.fee_seq.next()
    }

    /// Applies a refreshed gas estimate unless a newer one superseded it.
    pub fn finish_fee_refresh(&mut self, seq: Sequence, gas: Amount) -> bool {
        if !self.fee_seq.is_current(seq) {
            trace!(seq, current = self.fee_seq.current(), "stale gas estimate dropped");
            return false;
        }
        self.simulated_gas = Some(gas);
        true
    }

    pub fn simulated_gas(&self) -> Option<Amount> {
        self.simulated_gas
    }

    /// Inputs for the fee engine: unconfirmed tasks not in ERROR or CANCEL.
    pub fn fee_inputs(&self) -> FeeInputs {
        FeeInputs {
            sizes: self
                .tasks
                .iter()
                .filter(|t| t.partition == Partition::Wait)
                .filter(|t| !matches!(t.status(), TaskStatus::Error | TaskStatus::Cancel))
                .map(|t| t.size)
                .collect(),
            simulated_gas: self.simulated_gas,
            ..FeeInputs::default()
        }
    }

    /// Whether any unconfirmed task is still validating.
    pub fn has_pending_validation(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| t.partition == Partition::Wait && t.status().is_validating())
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(UploadTask::snapshot).collect()
    }

    /// Counts for tab badges. `blocking` here covers queue state only; fee
    /// sufficiency is folded in by the manager.
    pub fn summary(&self) -> QueueSummary {
        let mut s = QueueSummary::default();
        for task in &self.tasks {
            let status = task.status();
            match task.partition {
                Partition::Wait => match status {
                    TaskStatus::Wait => s.ready += 1,
                    TaskStatus::Error | TaskStatus::Cancel => s.invalid += 1,
                    _ if status.is_validating() => s.validating += 1,
                    _ => {}
                },
                Partition::Upload => match status {
                    TaskStatus::Finish => s.finished += 1,
                    TaskStatus::Error | TaskStatus::Cancel => s.failed += 1,
                    _ => s.uploading += 1,
                },
            }
        }
        s.blocking = s.ready == 0 || s.validating > 0;
        s
    }
}

fn sync_checks(task: &UploadTask, object_name: &str, config: &UploadConfig) -> Result<(), String> {
    validate_object_name(&task.name)?;
    if let Some(rel) = &task.relative_path {
        validate_relative_path(rel)?;
    }
    validate_object_path(object_name, config)?;
    validate_size(task.size, task.is_folder(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BucketInfo;
    use stowage_fees::FlowRate;

    fn ctx() -> AccountContext {
        AccountContext {
            address: "0xowner".into(),
            bucket: BucketInfo {
                name: "bucket".into(),
                payment_address: "0xowner".into(),
                flow_rate: FlowRate::ZERO,
            },
            prefix: String::new(),
        }
    }

    fn file(name: &str, len: usize) -> SelectedFile {
        SelectedFile::from_bytes(name, vec![0u8; len])
    }

    fn statuses(events: &[UploadEvent]) -> Vec<TaskStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                UploadEvent::Status { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    /// Enqueues and validates without a remote duplicate check.
    fn ready_queue(names: &[&str]) -> (TaskQueue, Vec<TaskId>) {
        let config = UploadConfig::default();
        let mut q = TaskQueue::new("0xowner");
        let ids = q
            .enqueue(names.iter().map(|n| file(n, 10)).collect(), &ctx(), &config)
            .unwrap();
        for id in &ids {
            let job = q.begin_validation(*id, &config).unwrap().unwrap();
            assert!(q.finish_validation(*id, job.seq, Ok(())));
        }
        q.drain_events();
        (q, ids)
    }

    #[test]
    fn enqueue_starts_in_check() {
        let mut q = TaskQueue::new("0xowner");
        let ids = q
            .enqueue(vec![file("a", 1), file("b", 2)], &ctx(), &UploadConfig::default())
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert!(q.tasks().all(|t| t.status() == TaskStatus::Check));
        assert_eq!(statuses(&q.drain_events()), vec![TaskStatus::Check; 2]);
    }

    #[test]
    fn enqueue_rejects_oversized_batch() {
        let config = UploadConfig {
            max_batch_objects: 2,
            ..UploadConfig::default()
        };
        let mut q = TaskQueue::new("0xowner");
        q.enqueue(vec![file("a", 1)], &ctx(), &config).unwrap();
        let err = q
            .enqueue(vec![file("b", 1), file("c", 1)], &ctx(), &config)
            .unwrap_err();
        assert!(matches!(err, UploadError::TooManyObjects { max: 2, requested: 3 }));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn enqueue_filters_known_folders() {
        let config = UploadConfig::default();
        let mut q = TaskQueue::new("0xowner");
        q.enqueue(vec![SelectedFile::folder("photos")], &ctx(), &config)
            .unwrap();
        let err = q
            .enqueue(
                vec![SelectedFile::folder("photos"), SelectedFile::folder("photos/")],
                &ctx(),
                &config,
            )
            .unwrap_err();
        assert!(matches!(err, UploadError::EmptySelection));

        let ids = q
            .enqueue(
                vec![
                    SelectedFile::folder("photos"),
                    file("a.jpg", 3).with_relative_path("photos/a.jpg"),
                ],
                &ctx(),
                &config,
            )
            .unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn sync_validation_failure_settles_immediately() {
        let config = UploadConfig::default();
        let mut q = TaskQueue::new("0xowner");
        let ids = q
            .enqueue(vec![file("bad/name", 1)], &ctx(), &config)
            .unwrap();
        assert!(q.begin_validation(ids[0], &config).unwrap().is_none());
        let task = q.get(ids[0]).unwrap();
        assert_eq!(task.state().error().map(|e| e.kind), Some(ErrorKind::Validation));
    }

    #[test]
    fn stale_validation_is_dropped() {
        let config = UploadConfig::default();
        let mut q = TaskQueue::new("0xowner");
        let id = q.enqueue(vec![file("a", 1)], &ctx(), &config).unwrap()[0];
        let first = q.begin_validation(id, &config).unwrap().unwrap();
        q.rename(id, "b".into()).unwrap();
        let second = q.begin_validation(id, &config).unwrap().unwrap();

        assert!(q.finish_validation(id, second.seq, Err("Object already exists".into())));
        assert!(!q.finish_validation(id, first.seq, Ok(())));
        assert_eq!(q.get(id).unwrap().status(), TaskStatus::Error);
    }

    #[test]
    fn later_duplicate_in_queue_fails() {
        let config = UploadConfig::default();
        let mut q = TaskQueue::new("0xowner");
        let ids = q
            .enqueue(vec![file("same", 1), file("same", 2)], &ctx(), &config)
            .unwrap();
        let jobs: Vec<_> = ids
            .iter()
            .map(|id| q.begin_validation(*id, &config).unwrap().unwrap())
            .collect();
        // Completion order does not matter; the earlier task wins.
        assert!(q.finish_validation(ids[1], jobs[1].seq, Ok(())));
        assert!(q.finish_validation(ids[0], jobs[0].seq, Ok(())));
        assert_eq!(q.get(ids[0]).unwrap().status(), TaskStatus::Wait);
        assert_eq!(q.get(ids[1]).unwrap().status(), TaskStatus::Error);
    }

    #[test]
    fn retry_on_wait_is_noop() {
        let (mut q, ids) = ready_queue(&["a"]);
        assert!(q.retry(ids[0]).unwrap().is_none());
        assert_eq!(q.get(ids[0]).unwrap().status(), TaskStatus::Wait);
        assert!(q.drain_events().is_empty());
    }

    #[test]
    fn retry_skips_tasks_that_did_not_fail() {
        let (mut q, ids) = ready_queue(&["a", "b", "c"]);
        q.confirm_ready();
        q.fail(ids[0], TaskError::validation("Object already exists"));
        q.transition(ids[1], TaskState::Hash).unwrap();
        for state in [TaskState::Hash, TaskState::Hashed, TaskState::Sign] {
            q.transition(ids[2], state).unwrap();
        }
        q.record_broadcast(ids[2], "0xtx".into(), "0xowner".into()).unwrap();
        q.transition(ids[2], TaskState::Upload { progress: 0 }).unwrap();
        q.transition(ids[2], TaskState::Seal).unwrap();
        q.transition(ids[2], TaskState::Finish).unwrap();
        q.drain_events();

        assert!(q.retry(ids[2]).unwrap().is_none());
        assert!(q.retry(ids[1]).unwrap().is_none());
        assert!(q.retry(ids[0]).unwrap().is_none());

        assert_eq!(q.get(ids[0]).unwrap().status(), TaskStatus::RetryCheck);
        assert_eq!(q.get(ids[1]).unwrap().status(), TaskStatus::Hash);
        assert_eq!(q.get(ids[2]).unwrap().status(), TaskStatus::Finish);
        assert_eq!(q.get(ids[2]).unwrap().tx_hash(), Some("0xtx"));
        assert_eq!(statuses(&q.drain_events()), vec![TaskStatus::RetryCheck]);
    }

    #[test]
    fn retry_revalidates_and_reports_stranded_object() {
        let config = UploadConfig::default();
        let (mut q, ids) = ready_queue(&["a"]);
        let id = ids[0];
        q.confirm_ready();
        for state in [TaskState::Hash, TaskState::Hashed, TaskState::Sign] {
            q.transition(id, state).unwrap();
        }
        q.record_broadcast(id, "0xtx".into(), "0xowner".into()).unwrap();
        q.transition(id, TaskState::Upload { progress: 0 }).unwrap();
        q.fail(id, TaskError::new(ErrorKind::Stranded, "lost"));
        q.drain_events();

        let stranded = q.retry(id).unwrap().unwrap();
        assert_eq!(stranded.tx_hash, "0xtx");
        assert_eq!(stranded.object_name, "a");

        let task = q.get(id).unwrap();
        assert_eq!(task.partition(), Partition::Wait);
        assert!(task.tx_hash().is_none());

        let job = q.begin_validation(id, &config).unwrap().unwrap();
        assert!(q.finish_validation(id, job.seq, Ok(())));
        assert_eq!(
            statuses(&q.drain_events()),
            vec![TaskStatus::RetryCheck, TaskStatus::RetryChecking, TaskStatus::Wait]
        );
    }

    #[test]
    fn cancel_only_before_seal() {
        let (mut q, ids) = ready_queue(&["a", "b"]);
        q.confirm_ready();
        q.cancel(ids[0]).unwrap();
        q.cancel(ids[0]).unwrap();
        assert_eq!(q.get(ids[0]).unwrap().status(), TaskStatus::Cancel);

        let id = ids[1];
        for state in [TaskState::Hash, TaskState::Hashed, TaskState::Sign] {
            q.transition(id, state).unwrap();
        }
        q.record_broadcast(id, "0xtx".into(), "0xowner".into()).unwrap();
        q.transition(id, TaskState::Upload { progress: 0 }).unwrap();
        q.transition(id, TaskState::Seal).unwrap();
        assert!(matches!(
            q.cancel(id),
            Err(UploadError::CancelNotAllowed { status: TaskStatus::Seal, .. })
        ));
    }

    #[test]
    fn cancel_trips_pipeline_token() {
        let (mut q, ids) = ready_queue(&["a"]);
        let confirmed = q.confirm_ready();
        q.cancel(ids[0]).unwrap();
        assert!(confirmed[0].cancel.is_cancelled());
    }

    #[test]
    fn clear_ignores_non_terminal() {
        let (mut q, ids) = ready_queue(&["a", "b"]);
        q.confirm_ready();
        q.cancel(ids[0]).unwrap();
        assert_eq!(q.clear(&ids), 1);
        assert!(q.get(ids[0]).is_none());
        assert!(q.get(ids[1]).is_some());
        assert_eq!(q.clear_all(), 0);
    }

    #[test]
    fn remove_only_touches_wait_partition() {
        let (mut q, ids) = ready_queue(&["a", "b"]);
        q.remove(&ids[..1]);
        q.confirm_ready();
        assert_eq!(q.remove(&ids), 0);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let (mut q, ids) = ready_queue(&["a"]);
        let id = ids[0];
        q.confirm_ready();
        for state in [TaskState::Hash, TaskState::Hashed, TaskState::Sign] {
            q.transition(id, state).unwrap();
        }
        q.record_broadcast(id, "0xtx".into(), "0xowner".into()).unwrap();
        q.transition(id, TaskState::Upload { progress: 0 }).unwrap();

        assert!(q.update_progress(id, 40));
        assert!(!q.update_progress(id, 30));
        assert!(q.update_progress(id, 100));
        assert_eq!(q.get(id).unwrap().state().progress(), Some(99));
    }

    #[test]
    fn user_rejection_returns_to_wait() {
        let (mut q, ids) = ready_queue(&["a"]);
        let id = ids[0];
        q.confirm_ready();
        q.transition(id, TaskState::Hash).unwrap();
        q.transition(id, TaskState::Hashed).unwrap();
        q.transition(id, TaskState::Sign).unwrap();
        q.record_gas(id, Amount::from_tokens(1)).unwrap();
        q.return_to_wait(id).unwrap();
        let task = q.get(id).unwrap();
        assert_eq!(task.status(), TaskStatus::Wait);
        assert_eq!(task.partition(), Partition::Wait);
        assert!(task.gas.is_none());
    }

    #[test]
    fn fee_inputs_skip_failed_and_confirmed() {
        let config = UploadConfig::default();
        let (mut q, _) = ready_queue(&["a", "b"]);
        q.confirm_ready();
        let ids = q
            .enqueue(vec![file("c", 5), file("d/e", 7)], &ctx(), &config)
            .unwrap();
        let job = q.begin_validation(ids[0], &config).unwrap().unwrap();
        q.finish_validation(ids[0], job.seq, Ok(()));
        assert!(q.begin_validation(ids[1], &config).unwrap().is_none());
        assert_eq!(q.fee_inputs().sizes, vec![5]);
    }

    #[test]
    fn stale_gas_refresh_is_dropped() {
        let mut q = TaskQueue::new("0xowner");
        let old = q.begin_fee_refresh();
        let new = q.begin_fee_refresh();
        assert!(q.finish_fee_refresh(new, Amount::from_tokens(2)));
        assert!(!q.finish_fee_refresh(old, Amount::from_tokens(1)));
        assert_eq!(q.simulated_gas(), Some(Amount::from_tokens(2)));
    }

    #[test]
    fn summary_counts_partitions() {
        let config = UploadConfig::default();
        let (mut q, ids) = ready_queue(&["a", "b"]);
        q.confirm_ready();
        q.cancel(ids[0]).unwrap();
        q.enqueue(vec![file("c", 1)], &ctx(), &config).unwrap();
        let s = q.summary();
        assert_eq!(s.failed, 1);
        assert_eq!(s.uploading, 1);
        assert_eq!(s.validating, 1);
        assert!(s.blocking);
    }
}
