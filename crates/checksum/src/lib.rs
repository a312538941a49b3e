//! Redundancy-encoded content checksums.
//!
//! An object's Checksum Set is one primary digest over the whole payload
//! followed by one digest per erasure shard. The storage network refuses an
//! object whose set does not match the configured redundancy, so the set is
//! always computed from the exact bytes that will be transmitted.
//!
//! Hashing a 256 MiB payload takes long enough to stall an interactive
//! caller, so [`ChecksumService`] runs the work on the blocking pool and is
//! reached only through a request/response channel.

mod digest;
mod erasure;
mod service;

pub use digest::{ChecksumSet, DIGEST_LEN, Digest, checksum_bytes, compute_checksums};
pub use erasure::ErasureEncoder;
pub use service::ChecksumService;

use serde::{Deserialize, Serialize};

/// Default segment size: 16 MiB.
pub const DEFAULT_SEGMENT_SIZE: usize = 16 * 1024 * 1024;

/// Errors produced by the checksum crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChecksumError {
    #[error("invalid redundancy: {0}")]
    InvalidRedundancy(String),

    #[error("checksum set has {actual} digests, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("checksum computation timed out")]
    Timeout,

    #[error("checksum worker unavailable")]
    WorkerGone,

    #[error("checksum task failed: {0}")]
    Worker(String),
}

/// Erasure layout used by the storage network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redundancy {
    /// Data shards per segment.
    pub data_shards: usize,
    /// Parity shards per segment.
    pub parity_shards: usize,
    /// Payload bytes per segment.
    pub segment_size: usize,
}

impl Default for Redundancy {
    fn default() -> Self {
        Self {
            data_shards: 4,
            parity_shards: 2,
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

impl Redundancy {
    /// Number of digests in a valid Checksum Set.
    pub fn set_len(&self) -> usize {
        1 + self.data_shards + self.parity_shards
    }

    /// Rejects layouts the encoder cannot produce.
    pub fn validate(&self) -> Result<(), ChecksumError> {
        if self.data_shards == 0 {
            return Err(ChecksumError::InvalidRedundancy(
                "at least one data shard is required".into(),
            ));
        }
        if self.data_shards + self.parity_shards >= 256 {
            return Err(ChecksumError::InvalidRedundancy(format!(
                "{} shards exceed the GF(256) limit",
                self.data_shards + self.parity_shards
            )));
        }
        if self.segment_size == 0 {
            return Err(ChecksumError::InvalidRedundancy(
                "segment size must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_has_seven_digests() {
        assert_eq!(Redundancy::default().set_len(), 7);
    }

    #[test]
    fn rejects_zero_data_shards() {
        let r = Redundancy {
            data_shards: 0,
            ..Redundancy::default()
        };
        assert!(matches!(r.validate(), Err(ChecksumError::InvalidRedundancy(_))));
    }

    #[test]
    fn rejects_oversized_layout() {
        let r = Redundancy {
            data_shards: 200,
            parity_shards: 56,
            ..Redundancy::default()
        };
        assert!(r.validate().is_err());
    }
}
