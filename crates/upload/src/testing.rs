//! In-memory collaborators for pipeline and manager tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stowage_fees::Amount;

use crate::facade::{
    BoxFuture, ChainError, ChainFacade, CreateObjectRequest, DelegateGrant, ObjectPresence,
    ProgressSink, PutObjectRequest, Signer, StorageError, StorageFacade,
};

/// Chain mock that records every call.
pub(crate) struct MockChain {
    pub gas: Mutex<Amount>,
    /// Scripted broadcast outcomes, consumed front to back; success once empty.
    pub broadcast_results: Mutex<VecDeque<Result<(), ChainError>>>,
    pub provision_result: Mutex<Option<ChainError>>,
    pub simulations: Mutex<Vec<CreateObjectRequest>>,
    /// `(object, signer address, checksum count)` per broadcast.
    pub broadcasts: Mutex<Vec<(String, String, usize)>>,
    pub grants: Mutex<Vec<DelegateGrant>>,
    pub cancels: Mutex<Vec<(String, String)>>,
    /// Per-object simulate latency.
    pub simulate_delay: Mutex<HashMap<String, Duration>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            gas: Mutex::new("0.00002".parse().unwrap()),
            broadcast_results: Mutex::new(VecDeque::new()),
            provision_result: Mutex::new(None),
            simulations: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
            grants: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            simulate_delay: Mutex::new(HashMap::new()),
        }
    }

    pub fn push_broadcast(&self, result: Result<(), ChainError>) {
        self.broadcast_results.lock().unwrap().push_back(result);
    }

    pub fn broadcast_signers(&self) -> Vec<String> {
        self.broadcasts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, signer, _)| signer.clone())
            .collect()
    }
}

impl ChainFacade for MockChain {
    fn simulate_create_object<'a>(
        &'a self,
        req: &'a CreateObjectRequest,
    ) -> BoxFuture<'a, Result<Amount, ChainError>> {
        self.simulations.lock().unwrap().push(req.clone());
        let gas = *self.gas.lock().unwrap();
        let delay = self.simulate_delay.lock().unwrap().get(&req.object).copied();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(gas)
        })
    }

    fn broadcast_create_object<'a>(
        &'a self,
        req: &'a CreateObjectRequest,
        signer: &'a Signer,
    ) -> BoxFuture<'a, Result<String, ChainError>> {
        let scripted = self.broadcast_results.lock().unwrap().pop_front();
        Box::pin(async move {
            if let Some(Err(e)) = scripted {
                return Err(e);
            }
            let mut broadcasts = self.broadcasts.lock().unwrap();
            broadcasts.push((
                req.object.clone(),
                signer.address().to_string(),
                req.checksums.as_ref().map_or(0, |c| c.len()),
            ));
            Ok(format!("0xtx{}", broadcasts.len()))
        })
    }

    fn provision_delegate<'a>(
        &'a self,
        grant: &'a DelegateGrant,
    ) -> BoxFuture<'a, Result<String, ChainError>> {
        let failure = self.provision_result.lock().unwrap().clone();
        Box::pin(async move {
            if let Some(e) = failure {
                return Err(e);
            }
            self.grants.lock().unwrap().push(grant.clone());
            Ok("0xgrant".to_string())
        })
    }

    fn cancel_create_object<'a>(
        &'a self,
        bucket: &'a str,
        object: &'a str,
        _signer: &'a Signer,
    ) -> BoxFuture<'a, Result<String, ChainError>> {
        self.cancels
            .lock()
            .unwrap()
            .push((bucket.to_string(), object.to_string()));
        Box::pin(async { Ok("0xcancel".to_string()) })
    }
}

/// Storage mock. Uploaded objects are sealed immediately unless a head
/// script is queued for them.
pub(crate) struct MockStorage {
    pub objects: Mutex<HashMap<String, ObjectPresence>>,
    pub head_scripts: Mutex<HashMap<String, VecDeque<Result<ObjectPresence, StorageError>>>>,
    pub head_delay: Mutex<HashMap<String, Duration>>,
    pub put_result: Mutex<Option<StorageError>>,
    pub put_delay: Mutex<Duration>,
    pub puts: Mutex<Vec<PutObjectRequest>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            head_scripts: Mutex::new(HashMap::new()),
            head_delay: Mutex::new(HashMap::new()),
            put_result: Mutex::new(None),
            put_delay: Mutex::new(Duration::ZERO),
            puts: Mutex::new(Vec::new()),
        }
    }

    pub fn script_head(&self, object: &str, answers: Vec<Result<ObjectPresence, StorageError>>) {
        self.head_scripts
            .lock()
            .unwrap()
            .insert(object.to_string(), answers.into());
    }

    pub fn insert(&self, object: &str, presence: ObjectPresence) {
        self.objects
            .lock()
            .unwrap()
            .insert(object.to_string(), presence);
    }
}

impl StorageFacade for MockStorage {
    fn head_object<'a>(
        &'a self,
        _bucket: &'a str,
        object: &'a str,
    ) -> BoxFuture<'a, Result<ObjectPresence, StorageError>> {
        let scripted = self
            .head_scripts
            .lock()
            .unwrap()
            .get_mut(object)
            .and_then(VecDeque::pop_front);
        let delay = self.head_delay.lock().unwrap().get(object).copied();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(answer) = scripted {
                return answer;
            }
            self.objects
                .lock()
                .unwrap()
                .get(object)
                .copied()
                .ok_or(StorageError::NotFound)
        })
    }

    fn put_object<'a>(
        &'a self,
        req: &'a PutObjectRequest,
        payload: Arc<[u8]>,
        progress: ProgressSink,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        self.puts.lock().unwrap().push(req.clone());
        let failure = self.put_result.lock().unwrap().clone();
        let delay = *self.put_delay.lock().unwrap();
        Box::pin(async move {
            let total = payload.len() as u64;
            progress(total / 2);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(e) = failure {
                return Err(e);
            }
            progress(total);
            self.objects
                .lock()
                .unwrap()
                .insert(req.object.clone(), ObjectPresence::Sealed);
            Ok(())
        })
    }
}
