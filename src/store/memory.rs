use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{LeadershipRecord, RecordStore, RecordVersion, StoreError, VersionedRecord};

struct StoredRecord {
    record: LeadershipRecord,
    version: u64,
}

/// Linearizable in-process record store.
///
/// Suitable for tests and for single-process deployments where the election
/// degenerates to a formality. All operations serialize on one mutex, which
/// is what gives `create`/`update` their atomic version check.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<String, StoredRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StoreError> {
        self.records
            .lock()
            .await
            .get(key)
            .map(|stored| VersionedRecord {
                record: stored.record.clone(),
                version: RecordVersion::new(stored.version),
            })
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn create(&self, key: &str, record: LeadershipRecord) -> Result<RecordVersion, StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(key) {
            return Err(StoreError::Conflict(key.to_string()));
        }
        records.insert(key.to_string(), StoredRecord { record, version: 1 });
        Ok(RecordVersion::new(1))
    }

    async fn update(
        &self,
        key: &str,
        record: LeadershipRecord,
        expected: RecordVersion,
    ) -> Result<RecordVersion, StoreError> {
        let mut records = self.records.lock().await;
        match records.get_mut(key) {
            None => Err(StoreError::NotFound(key.to_string())),
            Some(stored) if stored.version != expected.value() => {
                Err(StoreError::Conflict(key.to_string()))
            }
            Some(stored) => {
                stored.record = record;
                stored.version += 1;
                Ok(RecordVersion::new(stored.version))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(holder: &str) -> LeadershipRecord {
        let now = Utc::now();
        LeadershipRecord {
            holder_identity: holder.to_string(),
            lease_duration_seconds: 15,
            acquire_time: now,
            renew_time: now,
            leader_transitions: 0,
        }
    }

    #[tokio::test]
    async fn get_of_missing_key_is_not_found() {
        let store = InMemoryRecordStore::new();
        assert!(matches!(
            store.get("svc/lock").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_then_get_round_trips_version() {
        let store = InMemoryRecordStore::new();
        let version = store.create("svc/lock", record("a")).await.unwrap();
        let found = store.get("svc/lock").await.unwrap();
        assert_eq!(found.version, version);
        assert_eq!(found.record.holder_identity, "a");
    }

    #[tokio::test]
    async fn second_create_conflicts() {
        let store = InMemoryRecordStore::new();
        store.create("svc/lock", record("a")).await.unwrap();
        assert!(matches!(
            store.create("svc/lock", record("b")).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let store = InMemoryRecordStore::new();
        let v1 = store.create("svc/lock", record("a")).await.unwrap();
        let v2 = store.update("svc/lock", record("a"), v1).await.unwrap();
        assert_ne!(v1, v2);

        // The old version no longer wins.
        assert!(matches!(
            store.update("svc/lock", record("b"), v1).await,
            Err(StoreError::Conflict(_))
        ));
        store.update("svc/lock", record("b"), v2).await.unwrap();
    }

    #[tokio::test]
    async fn racing_writers_on_one_version_produce_one_winner() {
        let store = std::sync::Arc::new(InMemoryRecordStore::new());
        let v1 = store.create("svc/lock", record("a")).await.unwrap();

        let mut handles = Vec::new();
        for contender in ["b", "c", "d"].iter() {
            let store = store.clone();
            let rec = record(contender);
            handles.push(tokio::spawn(async move {
                store.update("svc/lock", rec, v1).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
