//! Storage-write notifications delivered through a pub/sub topic.
//!
//! The body is a topic envelope whose first record carries, as a JSON string,
//! an object-storage event:
//!
//! ```json
//! {"Records":[{"Sns":{"Message":"{\"Records\":[{\"s3\":{\"bucket\":{\"name\":\"b\"},\"object\":{\"key\":\"images/...\",\"size\":1}}}]}"}}]}
//! ```
//!
//! Only the first record of each level is read.

use crate::error::{MediaError, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TopicEnvelope {
    #[serde(rename = "Records")]
    records: Vec<TopicRecord>,
}

#[derive(Debug, Deserialize)]
struct TopicRecord {
    #[serde(rename = "Sns")]
    sns: TopicMessage,
}

#[derive(Debug, Deserialize)]
struct TopicMessage {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StorageEvent {
    #[serde(rename = "Records")]
    records: Vec<StorageEventRecord>,
}

#[derive(Debug, Deserialize)]
struct StorageEventRecord {
    s3: StorageEntity,
}

#[derive(Debug, Deserialize)]
struct StorageEntity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: String,
    size: u64,
}

/// A single object written to storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageWrite {
    pub bucket: String,
    pub key: String,
    /// Object size in bytes as reported by the event
    pub size: u64,
}

/// Unwrap the topic envelope and the storage event inside it
pub fn parse_storage_write(body: &[u8]) -> Result<StorageWrite> {
    let envelope: TopicEnvelope = serde_json::from_slice(body)
        .map_err(|e| MediaError::Notification(format!("envelope: {e}")))?;

    let message = envelope
        .records
        .into_iter()
        .next()
        .ok_or_else(|| MediaError::Notification("envelope has no records".into()))?
        .sns
        .message;

    let event: StorageEvent = serde_json::from_str(&message)
        .map_err(|e| MediaError::Notification(format!("message: {e}")))?;

    let entity = event
        .records
        .into_iter()
        .next()
        .ok_or_else(|| MediaError::Notification("event has no records".into()))?
        .s3;

    Ok(StorageWrite {
        bucket: entity.bucket.name,
        key: entity.object.key,
        size: entity.object.size,
    })
}
