use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod dynamo;
mod memory;

pub use dynamo::DynamoRecordStore;
pub use memory::InMemoryRecordStore;

/// The single coordination document all instances compete over.
///
/// An empty `holder_identity` means nobody is leading; a non-empty holder's
/// claim is valid until `renew_time + lease_duration_seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadershipRecord {
    pub holder_identity: String,
    pub lease_duration_seconds: u64,
    pub acquire_time: DateTime<Utc>,
    pub renew_time: DateTime<Utc>,
    pub leader_transitions: u64,
}

impl LeadershipRecord {
    /// Whether some instance currently claims the lease (expired or not).
    pub fn is_held(&self) -> bool {
        !self.holder_identity.is_empty()
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder_identity == identity
    }

    /// A record is expired once the lease window after the last renewal has
    /// fully elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.renew_time + chrono::Duration::seconds(self.lease_duration_seconds as i64)
    }
}

/// Store-assigned token identifying the revision of a record. Opaque to the
/// elector; every conditional write must present the version that was read
/// alongside the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordVersion(u64);

impl RecordVersion {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record together with the version it was read at.
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    pub record: LeadershipRecord,
    pub version: RecordVersion,
}

/// Errors surfaced by a [`RecordStore`].
///
/// `Conflict` is the expected outcome of losing a race and is handled
/// without logging noise; transient variants are retried on the next tick.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conditional write conflict on '{0}'")]
    Conflict(String),

    #[error("no record exists for '{0}'")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("stored record is malformed: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the failure is worth retrying on a later tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Thin client abstraction over the external coordination store.
///
/// `create` and `update` must be atomic with respect to the version check:
/// of any set of concurrent callers presenting the same observed version,
/// exactly one may succeed; the rest receive [`StoreError::Conflict`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StoreError>;

    async fn create(&self, key: &str, record: LeadershipRecord) -> Result<RecordVersion, StoreError>;

    async fn update(
        &self,
        key: &str,
        record: LeadershipRecord,
        expected: RecordVersion,
    ) -> Result<RecordVersion, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(holder: &str, renewed: DateTime<Utc>) -> LeadershipRecord {
        LeadershipRecord {
            holder_identity: holder.to_string(),
            lease_duration_seconds: 15,
            acquire_time: renewed,
            renew_time: renewed,
            leader_transitions: 0,
        }
    }

    #[test]
    fn fresh_record_is_not_expired() {
        let now = Utc::now();
        assert!(!record("a", now).is_expired(now));
    }

    #[test]
    fn record_expires_only_after_full_lease_window() {
        let now = Utc::now();
        let rec = record("a", now - chrono::Duration::seconds(15));
        // Exactly at the boundary the lease still holds.
        assert!(!rec.is_expired(now));
        assert!(rec.is_expired(now + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn empty_holder_means_unheld() {
        let now = Utc::now();
        assert!(!record("", now).is_held());
        assert!(record("a", now).is_held());
        assert!(record("a", now).is_held_by("a"));
        assert!(!record("a", now).is_held_by("b"));
    }

    #[test]
    fn transient_classification() {
        assert!(StoreError::Unavailable("boom".to_string()).is_transient());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!StoreError::Conflict("k".to_string()).is_transient());
        assert!(!StoreError::NotFound("k".to_string()).is_transient());
    }
}
