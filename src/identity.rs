//! Deterministic identifiers for sleep periods
//!
//! A period's identity is the SHA256 digest of `"{source}-{start}"` where
//! `start` is rendered as RFC 3339 at second precision in UTC. The same
//! source and start always map to the same id, so re-ingesting a batch
//! upserts instead of duplicating.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// Stable identity generator for [`crate::models::SleepPeriod`]
pub struct StableIdentity;

impl StableIdentity {
    /// Length of a generated identifier in hex characters
    pub const LENGTH: usize = 64;

    /// Compute the identifier for a period from `source` starting at `start`
    pub fn compute(source: &str, start: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(Self::key(source, start).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// The hashed key, exposed for diagnostics
    pub fn key(source: &str, start: DateTime<Utc>) -> String {
        format!(
            "{}-{}",
            source,
            start.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}
