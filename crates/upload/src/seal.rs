//! Sealing Monitor.
//!
//! After the payload has been handed to the storage side, polls the object
//! until it is reported sealed. Polls back off exponentially up to a cap
//! and the loop gives up after `max_attempts`.

use tracing::{debug, warn};

use crate::config::SealConfig;
use crate::error::{ErrorKind, TaskError};
use crate::facade::{ObjectPresence, StorageError, StorageFacade};

pub struct SealMonitor<'a> {
    storage: &'a dyn StorageFacade,
    config: &'a SealConfig,
}

impl<'a> SealMonitor<'a> {
    pub fn new(storage: &'a dyn StorageFacade, config: &'a SealConfig) -> Self {
        Self { storage, config }
    }

    /// Polls until `object` is sealed and returns the number of polls made.
    ///
    /// `on_retry` is called with the attempt number before every poll after
    /// the first. A `NotFound` answer means the storage side never received
    /// the object and ends the loop as [`ErrorKind::Stranded`]; other errors
    /// are treated as transient.
    pub async fn wait_sealed(
        &self,
        bucket: &str,
        object: &str,
        mut on_retry: impl FnMut(u32),
    ) -> Result<u32, TaskError> {
        for attempt in 1..=self.config.max_attempts {
            tokio::time::sleep(self.config.delay_for_attempt(attempt)).await;
            if attempt > 1 {
                on_retry(attempt);
            }

            match self.storage.head_object(bucket, object).await {
                Ok(ObjectPresence::Sealed) => {
                    debug!(bucket, object, attempt, "object sealed");
                    return Ok(attempt);
                }
                Ok(ObjectPresence::Created) => {}
                Err(StorageError::NotFound) => {
                    warn!(bucket, object, attempt, "object missing on storage side");
                    return Err(TaskError::new(
                        ErrorKind::Stranded,
                        "Object was created on chain but never reached storage",
                    ));
                }
                Err(e) => {
                    debug!(bucket, object, attempt, error = %e, "seal poll failed, retrying");
                }
            }
        }

        warn!(bucket, object, attempts = self.config.max_attempts, "sealing timed out");
        Err(TaskError::new(
            ErrorKind::StuckSealing,
            format!(
                "Object not sealed after {} checks",
                self.config.max_attempts
            ),
        ))
    }
}
