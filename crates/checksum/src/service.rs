//! Request/response front end for checksum computation.
//!
//! Callers talk to a worker task over a channel; the worker hands every
//! request to the blocking pool so hashing never runs on the async
//! executor threads. The worker keeps no state between requests and
//! imposes no ordering across them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::{ChecksumError, ChecksumSet, Redundancy, compute_checksums};

/// Default timeout for a single computation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

struct ChecksumJob {
    data: Arc<[u8]>,
    reply: oneshot::Sender<Result<ChecksumSet, ChecksumError>>,
}

/// Handle to the checksum worker. Cheap to clone.
#[derive(Clone)]
pub struct ChecksumService {
    jobs: mpsc::Sender<ChecksumJob>,
    redundancy: Redundancy,
    timeout: Duration,
}

impl ChecksumService {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(redundancy: Redundancy, timeout: Option<Duration>) -> Result<Self, ChecksumError> {
        redundancy.validate()?;
        let (jobs, mut rx) = mpsc::channel::<ChecksumJob>(64);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                tokio::spawn(async move {
                    let len = job.data.len();
                    let result = tokio::task::spawn_blocking(move || {
                        compute_checksums(&job.data, &redundancy)
                    })
                    .await
                    .unwrap_or_else(|e| Err(ChecksumError::Worker(e.to_string())));
                    debug!(bytes = len, ok = result.is_ok(), "checksum job settled");
                    if job.reply.send(result).is_err() {
                        debug!("checksum caller went away before the result arrived");
                    }
                });
            }
            debug!("checksum worker stopped");
        });

        Ok(Self {
            jobs,
            redundancy,
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
        })
    }

    /// Layout the worker computes for.
    pub fn redundancy(&self) -> &Redundancy {
        &self.redundancy
    }

    /// Computes the Checksum Set of `data`.
    ///
    /// Fails with [`ChecksumError::Timeout`] when the worker does not answer
    /// within the configured timeout; the abandoned computation finishes in
    /// the background and its result is dropped.
    pub async fn compute(&self, data: Arc<[u8]>) -> Result<ChecksumSet, ChecksumError> {
        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(ChecksumJob { data, reply })
            .await
            .map_err(|_| ChecksumError::WorkerGone)?;

        let set = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(ChecksumError::WorkerGone),
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "checksum timed out");
                return Err(ChecksumError::Timeout);
            }
        };
        set.verify_len(&self.redundancy)?;
        Ok(set)
    }
}
