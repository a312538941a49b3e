//! In-memory chain and storage provider.
//!
//! The chain records created objects with their Checksum Sets; the storage
//! side verifies uploaded payloads against them and seals an object a few
//! polls after receiving it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use sha2::{Digest, Sha256};
use stowage_checksum::{ChecksumSet, Redundancy, compute_checksums};
use stowage_fees::Amount;
use stowage_upload::{
    BoxFuture, ChainError, ChainFacade, CreateObjectRequest, DelegateGrant, ObjectPresence,
    ProgressSink, PutObjectRequest, Signer, StorageError, StorageFacade,
};
use tracing::{debug, info};

/// Bytes reported per progress callback.
const PROGRESS_STEP: usize = 1024 * 1024;

#[derive(Debug)]
struct SimObject {
    checksums: Option<ChecksumSet>,
    received: bool,
    polls_since_upload: u32,
}

#[derive(Debug, Default)]
struct Ledger {
    objects: HashMap<(String, String), SimObject>,
    /// Provisioned sub-account addresses.
    delegates: HashSet<String>,
    tx_count: u64,
}

/// Simulated network behaviour.
#[derive(Debug, Clone)]
pub struct SimOptions {
    pub gas_per_object: Amount,
    /// Polls answered `Created` after the payload arrived.
    pub seal_after_polls: u32,
    /// Upper bound of the random latency added to each call.
    pub max_latency: Duration,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            gas_per_object: Amount::from_base_units(20_000_000_000_000),
            seal_after_polls: 2,
            max_latency: Duration::from_millis(40),
        }
    }
}

pub struct SimNetwork {
    options: SimOptions,
    redundancy: Redundancy,
    ledger: Mutex<Ledger>,
}

impl SimNetwork {
    pub fn new(options: SimOptions, redundancy: Redundancy) -> Arc<Self> {
        Arc::new(Self {
            options,
            redundancy,
            ledger: Mutex::new(Ledger::default()),
        })
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn latency(&self) {
        let max = self.options.max_latency.as_millis() as u64;
        if max > 0 {
            let ms = rand::thread_rng().gen_range(0..=max);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// A sub-account must be provisioned and must sign the request body.
    /// The owner's signature comes from the wallet and is taken as given.
    fn check_signature(
        &self,
        req: &CreateObjectRequest,
        signer: &Signer,
    ) -> Result<(), ChainError> {
        let Signer::Delegate(account) = signer else {
            return Ok(());
        };
        if !self.ledger().delegates.contains(account.address()) {
            return Err(ChainError::Rejected(format!(
                "signer {} has no allowance",
                account.address()
            )));
        }
        let body = serde_json::to_vec(req).map_err(|e| ChainError::Rejected(e.to_string()))?;
        let signature = account.sign(&body);
        if !account.verify(&body, &signature) {
            return Err(ChainError::Rejected("bad signature".into()));
        }
        debug!(
            signer = %account.address(),
            public_key = %hex::encode(account.public_key()),
            "delegated signature verified"
        );
        Ok(())
    }

    fn next_tx(&self, ledger: &mut Ledger, what: &str) -> String {
        ledger.tx_count += 1;
        let digest = Sha256::digest(format!("{what}:{}", ledger.tx_count));
        format!("0x{}", hex::encode(digest))
    }
}

impl ChainFacade for SimNetwork {
    fn simulate_create_object<'a>(
        &'a self,
        _req: &'a CreateObjectRequest,
    ) -> BoxFuture<'a, Result<Amount, ChainError>> {
        Box::pin(async move {
            self.latency().await;
            Ok(self.options.gas_per_object)
        })
    }

    fn broadcast_create_object<'a>(
        &'a self,
        req: &'a CreateObjectRequest,
        signer: &'a Signer,
    ) -> BoxFuture<'a, Result<String, ChainError>> {
        Box::pin(async move {
            self.latency().await;
            if let Some(set) = &req.checksums {
                set.verify_len(&self.redundancy)
                    .map_err(|e| ChainError::Rejected(e.to_string()))?;
            }
            self.check_signature(req, signer)?;

            let mut ledger = self.ledger();
            let key = (req.bucket.clone(), req.object.clone());
            if ledger.objects.contains_key(&key) {
                return Err(ChainError::Rejected(format!("object {} exists", req.object)));
            }
            ledger.objects.insert(
                key,
                SimObject {
                    checksums: req.checksums.clone(),
                    received: false,
                    polls_since_upload: 0,
                },
            );
            let tx = self.next_tx(&mut ledger, &req.object);
            debug!(object = %req.object, signer = %signer.address(), tx = %tx, "object created");
            Ok(tx)
        })
    }

    fn provision_delegate<'a>(
        &'a self,
        grant: &'a DelegateGrant,
    ) -> BoxFuture<'a, Result<String, ChainError>> {
        Box::pin(async move {
            self.latency().await;
            let mut ledger = self.ledger();
            ledger.delegates.insert(grant.delegate.clone());
            let tx = self.next_tx(&mut ledger, &grant.delegate);
            info!(
                delegate = %grant.delegate,
                fund = %grant.fund,
                allowance = %grant.allowance,
                expires_at = %grant.expires_at,
                "delegate provisioned"
            );
            Ok(tx)
        })
    }

    fn cancel_create_object<'a>(
        &'a self,
        bucket: &'a str,
        object: &'a str,
        _signer: &'a Signer,
    ) -> BoxFuture<'a, Result<String, ChainError>> {
        Box::pin(async move {
            self.latency().await;
            let mut ledger = self.ledger();
            let key = (bucket.to_string(), object.to_string());
            match ledger.objects.get(&key) {
                None => return Err(ChainError::Rejected(format!("no object {object}"))),
                Some(o) if o.received => {
                    return Err(ChainError::Rejected(format!("object {object} already stored")));
                }
                Some(_) => {}
            }
            ledger.objects.remove(&key);
            Ok(self.next_tx(&mut ledger, object))
        })
    }
}

impl StorageFacade for SimNetwork {
    fn head_object<'a>(
        &'a self,
        bucket: &'a str,
        object: &'a str,
    ) -> BoxFuture<'a, Result<ObjectPresence, StorageError>> {
        Box::pin(async move {
            self.latency().await;
            let mut ledger = self.ledger();
            let key = (bucket.to_string(), object.to_string());
            let Some(entry) = ledger.objects.get_mut(&key) else {
                return Err(StorageError::NotFound);
            };
            if !entry.received {
                return Ok(ObjectPresence::Created);
            }
            entry.polls_since_upload += 1;
            if entry.polls_since_upload > self.options.seal_after_polls {
                Ok(ObjectPresence::Sealed)
            } else {
                Ok(ObjectPresence::Created)
            }
        })
    }

    fn put_object<'a>(
        &'a self,
        req: &'a PutObjectRequest,
        payload: Arc<[u8]>,
        progress: ProgressSink,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let expected = {
                let ledger = self.ledger();
                let key = (req.bucket.clone(), req.object.clone());
                let entry = ledger.objects.get(&key).ok_or(StorageError::NotFound)?;
                entry.checksums.clone()
            };

            let mut sent = 0usize;
            for chunk in payload.chunks(PROGRESS_STEP) {
                self.latency().await;
                sent += chunk.len();
                progress(sent as u64);
            }

            if let Some(expected) = expected {
                let actual = compute_checksums(&payload, &self.redundancy)
                    .map_err(|e| StorageError::Rejected(e.to_string()))?;
                if actual != expected {
                    return Err(StorageError::Rejected("checksum mismatch".into()));
                }
            }

            let mut ledger = self.ledger();
            let key = (req.bucket.clone(), req.object.clone());
            let entry = ledger.objects.get_mut(&key).ok_or(StorageError::NotFound)?;
            entry.received = true;
            debug!(object = %req.object, bytes = payload.len(), "payload stored");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_upload::{DelegatedAccount, Visibility};

    fn quiet() -> SimOptions {
        SimOptions {
            max_latency: Duration::ZERO,
            ..SimOptions::default()
        }
    }

    fn layout() -> Redundancy {
        Redundancy {
            segment_size: 1024,
            ..Redundancy::default()
        }
    }

    fn request(object: &str, data: &[u8]) -> CreateObjectRequest {
        CreateObjectRequest {
            creator: "0xowner".into(),
            bucket: "b".into(),
            object: object.into(),
            size: data.len() as u64,
            visibility: Visibility::Inherit,
            content_type: "application/octet-stream".into(),
            checksums: Some(compute_checksums(data, &layout()).unwrap()),
        }
    }

    fn put(object: &str, size: usize) -> PutObjectRequest {
        PutObjectRequest {
            bucket: "b".into(),
            object: object.into(),
            size: size as u64,
            content_type: "application/octet-stream".into(),
            tx_hash: "0x1".into(),
            uploader: "0xowner".into(),
        }
    }

    fn owner() -> Signer {
        Signer::Owner {
            address: "0xowner".into(),
        }
    }

    #[tokio::test]
    async fn object_seals_after_configured_polls() {
        let net = SimNetwork::new(quiet(), layout());
        let data = vec![3u8; 4000];
        net.broadcast_create_object(&request("o", &data), &owner())
            .await
            .unwrap();
        assert_eq!(net.head_object("b", "o").await, Ok(ObjectPresence::Created));

        net.put_object(&put("o", data.len()), Arc::from(data), Arc::new(|_| {}))
            .await
            .unwrap();
        assert_eq!(net.head_object("b", "o").await, Ok(ObjectPresence::Created));
        assert_eq!(net.head_object("b", "o").await, Ok(ObjectPresence::Created));
        assert_eq!(net.head_object("b", "o").await, Ok(ObjectPresence::Sealed));
    }

    #[tokio::test]
    async fn corrupted_payload_is_rejected() {
        let net = SimNetwork::new(quiet(), layout());
        let data = vec![3u8; 4000];
        net.broadcast_create_object(&request("o", &data), &owner())
            .await
            .unwrap();
        let mut tampered = data.clone();
        tampered[10] ^= 1;
        let err = net
            .put_object(&put("o", tampered.len()), Arc::from(tampered), Arc::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Rejected(_)));
    }

    fn grant_for(delegate: &DelegatedAccount) -> DelegateGrant {
        DelegateGrant {
            owner: "0xowner".into(),
            delegate: delegate.address().to_string(),
            bucket: "b".into(),
            fund: Amount::from_tokens(1),
            allowance: Amount::from_tokens(1),
            expires_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn delegate_signs_only_after_provisioning() {
        let net = SimNetwork::new(quiet(), layout());
        let delegate = Arc::new(DelegatedAccount::generate());
        let signer = Signer::Delegate(Arc::clone(&delegate));

        let err = net
            .broadcast_create_object(&request("o", b"x"), &signer)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Rejected(_)));

        net.provision_delegate(&grant_for(&delegate)).await.unwrap();
        let tx = net
            .broadcast_create_object(&request("o", b"x"), &signer)
            .await
            .unwrap();
        assert!(tx.starts_with("0x"));
    }

    #[tokio::test]
    async fn unknown_object_is_not_found() {
        let net = SimNetwork::new(quiet(), layout());
        assert_eq!(net.head_object("b", "nope").await, Err(StorageError::NotFound));
    }

    #[tokio::test]
    async fn cancel_removes_unreceived_object() {
        let net = SimNetwork::new(quiet(), layout());
        net.broadcast_create_object(&request("o", b"x"), &owner())
            .await
            .unwrap();
        net.cancel_create_object("b", "o", &owner()).await.unwrap();
        assert_eq!(net.head_object("b", "o").await, Err(StorageError::NotFound));
    }
}
