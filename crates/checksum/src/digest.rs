use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::erasure::ErasureEncoder;
use crate::{ChecksumError, Redundancy};

/// Length of a single SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

/// A single content digest.
pub type Digest = [u8; DIGEST_LEN];

/// Computes SHA-256 of `data`.
pub fn checksum_bytes(data: &[u8]) -> Digest {
    Sha256::digest(data).into()
}

/// Ordered digests for one object: primary first, then one per shard.
#[derive(Clone, PartialEq, Eq)]
pub struct ChecksumSet {
    digests: Vec<Digest>,
}

impl ChecksumSet {
    /// Wraps precomputed digests.
    pub fn from_digests(digests: Vec<Digest>) -> Self {
        Self { digests }
    }

    /// Digest addressing the primary replica.
    pub fn primary(&self) -> Option<&Digest> {
        self.digests.first()
    }

    /// Digests addressing the secondary (erasure) replicas.
    pub fn secondaries(&self) -> &[Digest] {
        self.digests.get(1..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    pub fn digests(&self) -> &[Digest] {
        &self.digests
    }

    /// Checks that the set matches the network's redundancy.
    pub fn verify_len(&self, redundancy: &Redundancy) -> Result<(), ChecksumError> {
        let expected = redundancy.set_len();
        if self.digests.len() != expected {
            return Err(ChecksumError::LengthMismatch {
                expected,
                actual: self.digests.len(),
            });
        }
        Ok(())
    }

    /// Hex-encoded digests, in order.
    pub fn to_hex(&self) -> Vec<String> {
        self.digests.iter().map(hex::encode).collect()
    }
}

impl fmt::Debug for ChecksumSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_hex()).finish()
    }
}

impl Serialize for ChecksumSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ChecksumSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        let mut digests = Vec::with_capacity(encoded.len());
        for item in encoded {
            let bytes = hex::decode(&item).map_err(serde::de::Error::custom)?;
            let digest: Digest = bytes
                .try_into()
                .map_err(|_| serde::de::Error::custom("digest must be 32 bytes"))?;
            digests.push(digest);
        }
        Ok(Self { digests })
    }
}

/// Computes the Checksum Set of `data` under `redundancy`.
///
/// The payload is cut into segments of `segment_size` bytes. The primary
/// digest is the hash of the concatenated segment hashes; secondary digest
/// `i` is the hash of the concatenated hashes of shard `i` of every segment.
/// An empty payload is treated as a single empty segment.
pub fn compute_checksums(
    data: &[u8],
    redundancy: &Redundancy,
) -> Result<ChecksumSet, ChecksumError> {
    let encoder = ErasureEncoder::new(redundancy)?;
    let shards = encoder.total_shards();

    let mut primary = Sha256::new();
    let mut per_shard: Vec<Sha256> = (0..shards).map(|_| Sha256::new()).collect();

    let mut segments: Vec<&[u8]> = data.chunks(redundancy.segment_size).collect();
    if segments.is_empty() {
        segments.push(&[]);
    }

    for segment in segments {
        primary.update(checksum_bytes(segment));
        for (hasher, shard) in per_shard.iter_mut().zip(encoder.encode(segment)) {
            hasher.update(checksum_bytes(&shard));
        }
    }

    let mut digests = Vec::with_capacity(1 + shards);
    digests.push(primary.finalize().into());
    digests.extend(per_shard.into_iter().map(|h| Digest::from(h.finalize())));
    Ok(ChecksumSet { digests })
}
