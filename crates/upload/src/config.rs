//! Pipeline configuration.
//!
//! Loaded from a JSON file; every field is optional and falls back to the
//! network defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stowage_checksum::Redundancy;

use crate::error::UploadError;

/// Largest object accepted for a single upload: 256 MiB.
pub const MAX_OBJECT_SIZE: u64 = 256 * 1024 * 1024;

/// Sealing poll policy with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    /// Delay before the first poll.
    pub initial_interval_ms: u64,
    /// Backoff cap.
    pub max_interval_ms: u64,
    pub backoff_factor: f64,
    /// Polls before the task is failed as stuck.
    pub max_attempts: u32,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 300,
            max_interval_ms: 5_000,
            backoff_factor: 1.5,
            max_attempts: 60,
        }
    }
}

impl SealConfig {
    /// Delay before poll `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let ms = self.initial_interval_ms as f64 * self.backoff_factor.powi(exp);
        let capped = ms.min(self.max_interval_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Delegated sub-account funding and grant policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegateConfig {
    /// Funding margin over the estimated fee, in percent.
    pub fund_margin_percent: u32,
    /// Lifetime of the allowance and write-policy grants.
    pub ttl_secs: u64,
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            fund_margin_percent: 105,
            ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Upload pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_object_size: u64,
    /// Maximum tasks the wait queue may hold after an enqueue.
    pub max_batch_objects: usize,
    /// Maximum bytes in a full object path.
    pub max_name_len: usize,
    pub redundancy: Redundancy,
    pub checksum_timeout_ms: u64,
    pub seal: SealConfig,
    pub delegate: DelegateConfig,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_object_size: MAX_OBJECT_SIZE,
            max_batch_objects: 100,
            max_name_len: 1024,
            redundancy: Redundancy::default(),
            checksum_timeout_ms: 120_000,
            seal: SealConfig::default(),
            delegate: DelegateConfig::default(),
            event_buffer: 1024,
        }
    }
}

impl UploadConfig {
    /// Loads the config at `path`, or defaults when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, UploadError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no upload config, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: UploadConfig = serde_json::from_str(&content)?;
        config.redundancy.validate()?;
        Ok(config)
    }

    pub fn checksum_timeout(&self) -> Duration {
        Duration::from_millis(self.checksum_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_network() {
        let c = UploadConfig::default();
        assert_eq!(c.max_object_size, 256 * 1024 * 1024);
        assert_eq!(c.redundancy.set_len(), 7);
        assert_eq!(c.delegate.fund_margin_percent, 105);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{ "max_batch_objects": 10, "seal": { "max_attempts": 5 } }"#;
        let c: UploadConfig = serde_json::from_str(json).unwrap();
        assert_eq!(c.max_batch_objects, 10);
        assert_eq!(c.seal.max_attempts, 5);
        assert_eq!(c.seal.initial_interval_ms, 300);
        assert_eq!(c.max_name_len, 1024);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = UploadConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(c, UploadConfig::default());
    }

    #[test]
    fn load_rejects_bad_redundancy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.json");
        std::fs::write(
            &path,
            r#"{ "redundancy": { "data_shards": 0, "parity_shards": 2, "segment_size": 16 } }"#,
        )
        .unwrap();
        assert!(matches!(
            UploadConfig::load_from(&path),
            Err(UploadError::Checksum(_))
        ));
    }

    #[test]
    fn seal_backoff_is_capped() {
        let s = SealConfig::default();
        assert_eq!(s.delay_for_attempt(1), Duration::from_millis(300));
        assert_eq!(s.delay_for_attempt(2), Duration::from_millis(450));
        assert_eq!(s.delay_for_attempt(40), Duration::from_millis(5_000));
    }
}
