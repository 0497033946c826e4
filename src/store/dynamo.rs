use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dynomite::AttributeError::{self, MissingField};
use dynomite::{
    dynamodb::{DynamoDb, DynamoDbClient, GetItemInput, PutItemError, PutItemInput},
    Attribute, Attributes, FromAttributes, Item,
};
use rusoto_core::{Region, RusotoError};

use super::{LeadershipRecord, RecordStore, RecordVersion, StoreError, VersionedRecord};

static DEFAULT_RECORD_TABLE: &str = "leadership_records";

/// The DynamoDB item shape. Timestamps travel as epoch milliseconds; the
/// version is an ordinary numeric attribute guarded by condition
/// expressions, which is what turns `put_item` into a conditional update.
#[derive(Item, Clone)]
struct RecordDocument {
    #[dynomite(partition_key)]
    record_key: String,
    holder_identity: String,
    lease_duration_seconds: u64,
    acquire_time_millis: i64,
    renew_time_millis: i64,
    leader_transitions: u64,
    record_version: u64,
}

impl RecordDocument {
    fn from_record(key: &str, record: &LeadershipRecord, version: u64) -> Self {
        Self {
            record_key: key.to_string(),
            holder_identity: record.holder_identity.clone(),
            lease_duration_seconds: record.lease_duration_seconds,
            acquire_time_millis: record.acquire_time.timestamp_millis(),
            renew_time_millis: record.renew_time.timestamp_millis(),
            leader_transitions: record.leader_transitions,
            record_version: version,
        }
    }

    fn into_versioned(self) -> Result<VersionedRecord, StoreError> {
        let acquire_time = Utc
            .timestamp_millis_opt(self.acquire_time_millis)
            .single()
            .ok_or_else(|| StoreError::Corrupt("acquire time is out of range".to_string()))?;
        let renew_time = Utc
            .timestamp_millis_opt(self.renew_time_millis)
            .single()
            .ok_or_else(|| StoreError::Corrupt("renew time is out of range".to_string()))?;
        Ok(VersionedRecord {
            record: LeadershipRecord {
                holder_identity: self.holder_identity,
                lease_duration_seconds: self.lease_duration_seconds,
                acquire_time,
                renew_time,
                leader_transitions: self.leader_transitions,
            },
            version: RecordVersion::new(self.record_version),
        })
    }
}

fn decode_error(err: AttributeError) -> StoreError {
    match err {
        AttributeError::InvalidFormat => {
            StoreError::Corrupt("attribute contains an invalid format".to_string())
        }
        AttributeError::InvalidType => {
            StoreError::Corrupt("attribute contains invalid type".to_string())
        }
        MissingField { name } => StoreError::Corrupt(format!("attribute '{}' was missing", name)),
    }
}

/// [`RecordStore`] backed by a DynamoDB table, one item per resource key.
pub struct DynamoRecordStore {
    dynamo_client: DynamoDbClient,
    table_name: String,
}

impl DynamoRecordStore {
    pub fn new(region: Region) -> Self {
        Self::from_client(DynamoDbClient::new(region), DEFAULT_RECORD_TABLE)
    }

    pub fn from_client(dynamo_client: DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            dynamo_client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl RecordStore for DynamoRecordStore {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StoreError> {
        let mut key_attrs = Attributes::new();
        key_attrs.insert("record_key".to_string(), key.to_string().into_attr());

        let input = GetItemInput {
            consistent_read: Some(true),
            key: key_attrs,
            table_name: self.table_name.clone(),
            ..Default::default()
        };
        match self.dynamo_client.get_item(input).await {
            Ok(res) => match res.item {
                Some(attrs) => match RecordDocument::from_attrs(attrs) {
                    Ok(doc) => doc.into_versioned(),
                    Err(err) => Err(decode_error(err)),
                },
                None => Err(StoreError::NotFound(key.to_string())),
            },
            Err(err) => Err(StoreError::Unavailable(err.to_string())),
        }
    }

    async fn create(&self, key: &str, record: LeadershipRecord) -> Result<RecordVersion, StoreError> {
        let doc = RecordDocument::from_record(key, &record, 1);
        let input = PutItemInput {
            condition_expression: Some("attribute_not_exists(record_key)".to_string()),
            item: doc.into(),
            table_name: self.table_name.clone(),
            ..Default::default()
        };
        match self.dynamo_client.put_item(input).await {
            Ok(_) => Ok(RecordVersion::new(1)),
            Err(RusotoError::Service(PutItemError::ConditionalCheckFailed(_))) => {
                Err(StoreError::Conflict(key.to_string()))
            }
            Err(err) => Err(StoreError::Unavailable(err.to_string())),
        }
    }

    async fn update(
        &self,
        key: &str,
        record: LeadershipRecord,
        expected: RecordVersion,
    ) -> Result<RecordVersion, StoreError> {
        let next_version = expected.value() + 1;
        let doc = RecordDocument::from_record(key, &record, next_version);

        let mut expression_values = Attributes::new();
        expression_values.insert(":expected".to_string(), expected.value().into_attr());

        let input = PutItemInput {
            condition_expression: Some("record_version = :expected".to_string()),
            expression_attribute_values: Some(expression_values),
            item: doc.into(),
            table_name: self.table_name.clone(),
            ..Default::default()
        };
        match self.dynamo_client.put_item(input).await {
            Ok(_) => Ok(RecordVersion::new(next_version)),
            Err(RusotoError::Service(PutItemError::ConditionalCheckFailed(_))) => {
                Err(StoreError::Conflict(key.to_string()))
            }
            Err(err) => Err(StoreError::Unavailable(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_round_trips_through_item_shape() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
        let record = LeadershipRecord {
            holder_identity: "instance-1".to_string(),
            lease_duration_seconds: 15,
            acquire_time: now,
            renew_time: now,
            leader_transitions: 3,
        };

        let doc = RecordDocument::from_record("svc/microservice-lock", &record, 7);
        let versioned = doc.into_versioned().unwrap();
        assert_eq!(versioned.record, record);
        assert_eq!(versioned.version, RecordVersion::new(7));
    }
}
