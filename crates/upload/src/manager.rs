//! Upload manager: the Task Queue Manager's public face.
//!
//! Owns the per-account session store, routes every mutation through the
//! account's [`TaskQueue`], recomputes the fee snapshot after each one and
//! forwards the resulting events to the UI channel. Confirmed tasks run
//! concurrently, one [`TaskPipeline`] each.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::future::join_all;
use stowage_checksum::ChecksumService;
use stowage_fees::{
    Balances, FeeEngine, FeeSnapshot, PaymentBalance, PriceParams, PricingProvider, Sufficiency,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::UploadConfig;
use crate::delegate::{DelegatedAccount, build_grant};
use crate::error::{ErrorKind, TaskError, UploadError};
use crate::facade::{
    ChainError, ChainFacade, CreateObjectRequest, ObjectPresence, Signer, StorageError,
    StorageFacade,
};
use crate::pipeline::TaskPipeline;
use crate::queue::{TaskQueue, ValidationJob};
use crate::session::{AccountSession, SessionStore};
use crate::task::TaskStatus;
use crate::types::{
    AccountContext, QueueSummary, SelectedFile, TaskId, TaskSnapshot, UploadEvent, Visibility,
};

#[derive(Debug, Default)]
struct State {
    sessions: SessionStore,
    params: Option<PriceParams>,
}

/// State shared between the manager and running pipelines.
pub(crate) struct Shared {
    pub(crate) config: UploadConfig,
    pub(crate) chain: Arc<dyn ChainFacade>,
    pub(crate) storage: Arc<dyn StorageFacade>,
    pub(crate) checksums: ChecksumService,
    fees: FeeEngine,
    state: Mutex<State>,
    events_tx: mpsc::Sender<UploadEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn send_event(&self, event: UploadEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            trace!(error = %e, "upload event dropped");
        }
    }

    /// Recomputes the session's fees and publishes pending events.
    fn flush(&self, session: &mut AccountSession, params: Option<&PriceParams>) {
        let mut inputs = session.queue.fee_inputs();
        inputs.quota_bytes = session.quota_bytes;
        inputs.bucket_rate = session.context.bucket.flow_rate;
        let pending = session.queue.has_pending_validation();
        let balances = session.effective_balances();
        let snapshot = self
            .fees
            .snapshot(params, balances.as_ref(), &inputs, pending);

        for event in session.queue.drain_events() {
            self.send_event(event);
        }
        if snapshot != session.fees {
            session.fees = snapshot;
            self.send_event(UploadEvent::Fees {
                account: session.context.address.clone(),
                snapshot,
            });
        }
    }

    /// Runs `f` against the active account's session.
    fn with_active<R>(
        &self,
        f: impl FnOnce(&mut AccountSession) -> Result<R, UploadError>,
    ) -> Result<R, UploadError> {
        let mut guard = self.lock();
        let State { sessions, params } = &mut *guard;
        let session = sessions.active_mut()?;
        let result = f(session);
        self.flush(session, params.as_ref());
        result
    }

    /// Runs `f` against `account`'s queue, whether or not it is active.
    /// Returns `None` when the account has no session.
    pub(crate) fn with_queue<R>(&self, account: &str, f: impl FnOnce(&mut TaskQueue) -> R) -> Option<R> {
        let mut guard = self.lock();
        let State { sessions, params } = &mut *guard;
        let session = sessions.get_mut(account)?;
        let result = f(&mut session.queue);
        self.flush(session, params.as_ref());
        Some(result)
    }
}

/// Handle to the batch started by [`UploadManager::confirm`].
#[derive(Debug)]
pub struct ConfirmHandle {
    /// Tasks moved into the upload partition.
    pub tasks: Vec<TaskId>,
    /// Sub-account address for a multi-object batch.
    pub delegate: Option<String>,
    /// The wallet prompt was declined; tasks are back in the wait queue.
    pub rejected: bool,
    handles: Vec<JoinHandle<()>>,
}

impl ConfirmHandle {
    /// Waits for every pipeline of the batch to settle.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "upload pipeline panicked");
            }
        }
    }
}

/// Orchestrates uploads for the signed-in account.
pub struct UploadManager {
    shared: Arc<Shared>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

impl UploadManager {
    /// Creates a manager and starts its checksum worker on the current
    /// tokio runtime.
    pub fn new(
        config: UploadConfig,
        chain: Arc<dyn ChainFacade>,
        storage: Arc<dyn StorageFacade>,
        pricing: Arc<dyn PricingProvider>,
    ) -> Result<Self, UploadError> {
        let checksums = ChecksumService::spawn(config.redundancy, Some(config.checksum_timeout()))?;
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let shared = Shared {
            config,
            chain,
            storage,
            checksums,
            fees: FeeEngine::new(pricing),
            state: Mutex::new(State::default()),
            events_tx,
        };
        Ok(Self {
            shared: Arc::new(shared),
            events_rx: Some(events_rx),
        })
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn config(&self) -> &UploadConfig {
        &self.shared.config
    }

    /// Activates `context`'s account. Queues of other accounts are kept.
    pub fn switch_account(&self, context: AccountContext) {
        let address = context.address.clone();
        let mut guard = self.shared.lock();
        let State { sessions, params } = &mut *guard;
        sessions.switch_account(context);
        if let Ok(session) = sessions.active_mut() {
            self.shared.flush(session, params.as_ref());
        }
        info!(account = %address, "account switched");
    }

    pub fn sign_out(&self) {
        self.shared.lock().sessions.sign_out();
    }

    pub fn active_account(&self) -> Option<String> {
        self.shared
            .lock()
            .sessions
            .active_address()
            .map(str::to_string)
    }

    /// Installs new price parameters and reprices the active queue.
    pub fn set_price_params(&self, new_params: PriceParams) {
        let mut guard = self.shared.lock();
        let State { sessions, params } = &mut *guard;
        *params = Some(new_params);
        if let Ok(session) = sessions.active_mut() {
            self.shared.flush(session, params.as_ref());
        }
    }

    /// Records the balances fees are checked against. A bucket paid by an
    /// account other than the owner needs that account's balance.
    pub fn set_balances(&self, balances: Balances) -> Result<(), UploadError> {
        self.shared.with_active(|s| {
            if !s.context.owner_pays_storage() && balances.payment == PaymentBalance::SameAsOwner {
                return Err(UploadError::PaymentBalanceRequired(
                    s.context.bucket.payment_address.clone(),
                ));
            }
            s.balances = Some(balances);
            Ok(())
        })
    }

    /// Sets the download quota to purchase with the batch.
    pub fn set_quota(&self, quota_bytes: u64) -> Result<(), UploadError> {
        self.shared.with_active(|s| {
            s.quota_bytes = quota_bytes;
            Ok(())
        })
    }

    /// Adds files to the wait queue and validates them.
    ///
    /// Returns once every new task has left CHECK.
    pub async fn enqueue(&self, files: Vec<SelectedFile>) -> Result<Vec<TaskId>, UploadError> {
        let config = &self.shared.config;
        let (account, ids, jobs) = self.shared.with_active(|s| {
            let ids = s.queue.enqueue(files, &s.context, config)?;
            let mut jobs = Vec::with_capacity(ids.len());
            for id in &ids {
                jobs.extend(s.queue.begin_validation(*id, config)?);
            }
            Ok((s.context.address.clone(), ids, jobs))
        })?;
        self.run_validations(&account, jobs).await;
        Ok(ids)
    }

    /// Renames an unconfirmed task and revalidates it.
    pub async fn rename(&self, id: TaskId, name: impl Into<String>) -> Result<(), UploadError> {
        let name = name.into();
        let config = &self.shared.config;
        let (account, job) = self.shared.with_active(|s| {
            s.queue.rename(id, name)?;
            let job = s.queue.begin_validation(id, config)?;
            Ok((s.context.address.clone(), job))
        })?;
        self.run_validations(&account, job.into_iter().collect()).await;
        Ok(())
    }

    pub fn set_visibility(&self, id: TaskId, visibility: Visibility) -> Result<(), UploadError> {
        self.shared
            .with_active(|s| s.queue.set_visibility(id, visibility))
    }

    /// Checks each job's object against the bucket, concurrently, and
    /// applies the verdicts that are still current.
    async fn run_validations(&self, account: &str, jobs: Vec<ValidationJob>) {
        let storage = &self.shared.storage;
        let checks = jobs.into_iter().map(|job| async move {
            let verdict = match storage.head_object(&job.bucket, &job.object_name).await {
                Ok(ObjectPresence::Created | ObjectPresence::Sealed) => {
                    Err("Object already exists".to_string())
                }
                Err(StorageError::NotFound) => Ok(()),
                Err(e) => Err(format!("Could not check for an existing object: {e}")),
            };
            let applied = self
                .shared
                .with_queue(account, |q| q.finish_validation(job.id, job.seq, verdict))
                .unwrap_or(false);
            trace!(task = %job.id, seq = job.seq, applied, "validation settled");
        });
        join_all(checks).await;
    }

    /// Simulates a representative creation to refresh the per-object gas.
    ///
    /// Returns whether the result was applied; a newer estimate (or a
    /// pipeline's own simulation) supersedes an older one.
    pub async fn refresh_gas_estimate(&self) -> Result<bool, UploadError> {
        let (account, seq, req) = self.shared.with_active(|s| {
            let seq = s.queue.begin_fee_refresh();
            let req = CreateObjectRequest {
                creator: s.context.address.clone(),
                bucket: s.context.bucket.name.clone(),
                object: format!("{}gas-estimate", s.context.prefix),
                size: 0,
                visibility: Visibility::Inherit,
                content_type: "application/octet-stream".into(),
                checksums: None,
            };
            Ok((s.context.address.clone(), seq, req))
        })?;

        let gas = self.shared.chain.simulate_create_object(&req).await?;
        let applied = self
            .shared
            .with_queue(&account, |q| q.finish_fee_refresh(seq, gas))
            .unwrap_or(false);
        debug!(account = %account, seq, %gas, applied, "gas estimate refreshed");
        Ok(applied)
    }

    /// Confirms the wait queue.
    ///
    /// One ready task is signed directly by the owner. Two or more share a
    /// delegated sub-account provisioned in a single wallet interaction.
    /// Fails with [`UploadError::ConfirmBlocked`] while any task is
    /// validating or the balance is not known to be sufficient.
    pub async fn confirm(&self) -> Result<ConfirmHandle, UploadError> {
        let (context, tasks, fees, balances) = self.shared.with_active(|s| {
            let summary = s.queue.summary();
            if summary.validating > 0 {
                return Err(UploadError::ConfirmBlocked("validation in progress".into()));
            }
            if summary.ready == 0 {
                return Err(UploadError::ConfirmBlocked("no tasks ready".into()));
            }
            match s.fees.sufficiency {
                Sufficiency::Sufficient => {}
                Sufficiency::Checking => {
                    return Err(UploadError::ConfirmBlocked("fees are still being checked".into()));
                }
                Sufficiency::Insufficient { payer, shortfall } => {
                    return Err(UploadError::ConfirmBlocked(format!(
                        "insufficient balance ({payer:?} short by {shortfall})"
                    )));
                }
            }
            let fees = s.fees.fees;
            let balances = s.balances.ok_or(UploadError::ConfirmBlocked(
                "balances unknown".into(),
            ))?;
            Ok((s.context.clone(), s.queue.confirm_ready(), fees, balances))
        })?;

        let account = context.address.clone();
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        info!(account = %account, objects = ids.len(), "upload confirmed");

        let (signer, delegate) = if tasks.len() == 1 {
            (Signer::Owner { address: account.clone() }, None)
        } else {
            let delegate = DelegatedAccount::generate();
            let grant = build_grant(
                &account,
                &context.bucket.name,
                &delegate,
                &fees,
                balances.owner,
                &self.shared.config.delegate,
                Utc::now(),
            );

            match self.shared.chain.provision_delegate(&grant).await {
                Ok(tx_hash) => {
                    info!(
                        account = %account,
                        delegate = %grant.delegate,
                        fund = %grant.fund,
                        tx = %tx_hash,
                        "signing account provisioned"
                    );
                    self.shared.send_event(UploadEvent::DelegateProvisioned {
                        account: account.clone(),
                        address: grant.delegate.clone(),
                        funded: grant.fund,
                    });
                    let address = grant.delegate.clone();
                    (Signer::Delegate(Arc::new(delegate)), Some(address))
                }
                Err(ChainError::UserRejected) => {
                    debug!(account = %account, "delegation declined, returning tasks to wait");
                    self.shared.with_queue(&account, |q| {
                        for id in &ids {
                            if let Err(e) = q.return_to_wait(*id) {
                                trace!(task = %id, error = %e, "task not returned");
                            }
                        }
                    });
                    return Ok(ConfirmHandle {
                        tasks: ids,
                        delegate: None,
                        rejected: true,
                        handles: Vec::new(),
                    });
                }
                Err(e) => {
                    warn!(account = %account, error = %e, "signing account provisioning failed");
                    let message = format!("Could not provision the signing account: {e}");
                    self.shared.with_queue(&account, |q| {
                        for id in &ids {
                            q.fail(*id, TaskError::new(ErrorKind::Broadcast, message.clone()));
                        }
                    });
                    return Ok(ConfirmHandle {
                        tasks: ids,
                        delegate: None,
                        rejected: false,
                        handles: Vec::new(),
                    });
                }
            }
        };

        let handles = tasks
            .into_iter()
            .map(|task| {
                let pipeline =
                    TaskPipeline::new(Arc::clone(&self.shared), account.clone(), task, signer.clone());
                tokio::spawn(pipeline.run())
            })
            .collect();

        Ok(ConfirmHandle {
            tasks: ids,
            delegate,
            rejected: false,
            handles,
        })
    }

    /// Sends ERROR or CANCEL tasks back through validation.
    ///
    /// A task whose object was left unsealed on chain gets a best-effort
    /// on-chain cancel first, so the duplicate check does not trip on it.
    pub async fn retry(&self, ids: &[TaskId]) -> Result<(), UploadError> {
        let config = &self.shared.config;
        let (account, stranded) = self.shared.with_active(|s| {
            let mut stranded = Vec::new();
            for id in ids {
                if let Some(object) = s.queue.retry(*id)? {
                    stranded.push(object);
                }
            }
            Ok((s.context.address.clone(), stranded))
        })?;

        let owner = Signer::Owner {
            address: account.clone(),
        };
        for object in &stranded {
            match self
                .shared
                .chain
                .cancel_create_object(&object.bucket, &object.object_name, &owner)
                .await
            {
                Ok(tx) => debug!(object = %object.object_name, tx = %tx, "stranded object cancelled"),
                Err(e) => warn!(
                    object = %object.object_name,
                    created_tx = %object.tx_hash,
                    error = %e,
                    "could not cancel stranded object"
                ),
            }
        }

        let jobs = self
            .shared
            .with_queue(&account, |q| {
                let mut jobs = Vec::new();
                for id in ids {
                    let retrying = q
                        .get(*id)
                        .is_some_and(|t| t.status() == TaskStatus::RetryCheck);
                    if retrying {
                        match q.begin_validation(*id, config) {
                            Ok(job) => jobs.extend(job),
                            Err(e) => trace!(task = %id, error = %e, "retry validation skipped"),
                        }
                    }
                }
                jobs
            })
            .unwrap_or_default();
        self.run_validations(&account, jobs).await;
        Ok(())
    }

    /// Retries every ERROR or CANCEL task. Returns how many were retried.
    pub async fn retry_all(&self) -> Result<usize, UploadError> {
        let ids = self.shared.with_active(|s| Ok(s.queue.retryable()))?;
        self.retry(&ids).await?;
        Ok(ids.len())
    }

    /// Removes terminal upload tasks among `ids`.
    pub fn clear(&self, ids: &[TaskId]) -> Result<usize, UploadError> {
        self.shared.with_active(|s| Ok(s.queue.clear(ids)))
    }

    pub fn clear_all(&self) -> Result<usize, UploadError> {
        self.shared.with_active(|s| Ok(s.queue.clear_all()))
    }

    /// Drops unconfirmed tasks from the wait queue.
    pub fn remove(&self, ids: &[TaskId]) -> Result<usize, UploadError> {
        self.shared.with_active(|s| Ok(s.queue.remove(ids)))
    }

    /// Cancels a task that has not started sealing.
    pub fn cancel(&self, id: TaskId) -> Result<(), UploadError> {
        self.shared.with_active(|s| s.queue.cancel(id))
    }

    pub fn snapshot(&self) -> Result<Vec<TaskSnapshot>, UploadError> {
        self.shared.with_active(|s| Ok(s.queue.snapshot()))
    }

    /// Queue counts; `blocking` also reflects the fee verdict.
    pub fn summary(&self) -> Result<QueueSummary, UploadError> {
        self.shared.with_active(|s| {
            let mut summary = s.queue.summary();
            summary.blocking |= !s.fees.sufficiency.is_sufficient();
            Ok(summary)
        })
    }

    pub fn fees(&self) -> Result<FeeSnapshot, UploadError> {
        self.shared.with_active(|s| Ok(s.fees))
    }
}
