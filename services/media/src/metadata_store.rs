use crate::config::DynamoDbConfig;
use crate::error::{MediaError, Result};
use crate::record::{FieldValue, MetadataRecord, RecordPatch};
use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::config::Builder as DynamoConfigBuilder;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::RwLock;
use tracing::{debug, info, instrument};

/// Primary key attribute of the metadata table
const KEY_ATTRIBUTE: &str = "id";

/// Opaque continuation token returned by a partial scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor(String);

/// One page of a table scan
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub records: Vec<MetadataRecord>,
    /// Present when more records remain
    pub next: Option<ScanCursor>,
}

/// Key-value storage for metadata records
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<MetadataRecord>>;

    async fn put(&self, record: &MetadataRecord) -> Result<()>;

    /// Apply `patch` only if a record with `id` exists, returning the updated
    /// record. Fails with [`MediaError::ConditionFailed`] otherwise.
    async fn update(&self, id: &str, patch: &RecordPatch, now_ms: i64) -> Result<MetadataRecord>;

    /// Read one page of the table, starting after `cursor`
    async fn scan_page(&self, cursor: Option<ScanCursor>) -> Result<ScanPage>;

    /// Read the whole table, following continuation tokens until exhausted
    async fn scan_all(&self) -> Result<Vec<MetadataRecord>> {
        let mut records = Vec::new();
        let mut cursor = None;

        loop {
            let page = self.scan_page(cursor).await?;
            records.extend(page.records);

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(records)
    }
}

/// DynamoDB-backed metadata store
pub struct DynamoMetadataStore {
    client: DynamoClient,
    table: String,
}

impl DynamoMetadataStore {
    /// Create a new DynamoDB metadata store
    pub async fn new(config: &DynamoDbConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = DynamoConfigBuilder::from(&aws_config);

        // Configure custom endpoint for DynamoDB Local
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        info!(table = %config.table, region = %config.region, "DynamoDB metadata store initialized");

        Self {
            client: DynamoClient::from_conf(builder.build()),
            table: config.table.clone(),
        }
    }

    fn key(id: &str) -> AttributeValue {
        AttributeValue::S(id.to_string())
    }
}

fn attribute_value(value: &FieldValue) -> AttributeValue {
    match value {
        FieldValue::Bool(b) => AttributeValue::Bool(*b),
        FieldValue::Number(n) => AttributeValue::N(n.to_string()),
        FieldValue::Text(s) => AttributeValue::S(s.clone()),
    }
}

#[async_trait]
impl MetadataStore for DynamoMetadataStore {
    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Option<MetadataRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(KEY_ATTRIBUTE, Self::key(id))
            .send()
            .await
            .context("Failed to get metadata record")?;

        match output.item {
            Some(item) => Ok(Some(
                serde_dynamo::from_item(item).context("Failed to deserialize metadata record")?,
            )),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, record), fields(id = %record.id))]
    async fn put(&self, record: &MetadataRecord) -> Result<()> {
        let item: HashMap<String, AttributeValue> =
            serde_dynamo::to_item(record).context("Failed to serialize metadata record")?;

        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .send()
            .await
            .context("Failed to put metadata record")?;

        Ok(())
    }

    #[instrument(skip(self, patch), fields(patch = patch.name()))]
    async fn update(&self, id: &str, patch: &RecordPatch, now_ms: i64) -> Result<MetadataRecord> {
        let mut names = HashMap::from([(format!("#{KEY_ATTRIBUTE}"), KEY_ATTRIBUTE.to_string())]);
        let mut values = HashMap::new();
        let mut assignments = Vec::new();

        for (name, value) in patch.fields(now_ms) {
            names.insert(format!("#{name}"), name.to_string());
            values.insert(format!(":{name}"), attribute_value(&value));
            assignments.push(format!("#{name} = :{name}"));
        }

        let output = self
            .client
            .update_item()
            .table_name(&self.table)
            .key(KEY_ATTRIBUTE, Self::key(id))
            .update_expression(format!("SET {}", assignments.join(", ")))
            .condition_expression(format!("attribute_exists(#{KEY_ATTRIBUTE})"))
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(Some(values))
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false)
                {
                    MediaError::ConditionFailed { id: id.to_string() }
                } else {
                    MediaError::Storage(anyhow::Error::new(e).context("Failed to update metadata record"))
                }
            })?;

        let attributes = output
            .attributes
            .context("UpdateItem returned no attributes")?;

        debug!(id = %id, "Metadata record updated");

        Ok(serde_dynamo::from_item(attributes).context("Failed to deserialize metadata record")?)
    }

    #[instrument(skip(self))]
    async fn scan_page(&self, cursor: Option<ScanCursor>) -> Result<ScanPage> {
        let start_key = cursor.map(|ScanCursor(id)| {
            HashMap::from([(KEY_ATTRIBUTE.to_string(), Self::key(&id))])
        });

        let output = self
            .client
            .scan()
            .table_name(&self.table)
            .set_exclusive_start_key(start_key)
            .send()
            .await
            .context("Failed to scan metadata table")?;

        let records: Vec<MetadataRecord> =
            serde_dynamo::from_items(output.items.unwrap_or_default())
                .context("Failed to deserialize metadata records")?;

        let next = match output.last_evaluated_key {
            None => None,
            Some(key) => match key.get(KEY_ATTRIBUTE) {
                Some(AttributeValue::S(id)) => Some(ScanCursor(id.clone())),
                _ => {
                    return Err(anyhow::anyhow!("LastEvaluatedKey has no string id: {key:?}").into())
                }
            },
        };

        debug!(count = records.len(), more = next.is_some(), "Scanned metadata page");

        Ok(ScanPage { records, next })
    }
}

/// Process-local metadata store for development and tests.
///
/// Scans return records in id order, `page_size` at a time.
pub struct InMemoryMetadataStore {
    records: RwLock<BTreeMap<String, MetadataRecord>>,
    page_size: usize,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get(&self, id: &str) -> Result<Option<MetadataRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn put(&self, record: &MetadataRecord) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, id: &str, patch: &RecordPatch, now_ms: i64) -> Result<MetadataRecord> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .get_mut(id)
            .ok_or_else(|| MediaError::ConditionFailed { id: id.to_string() })?;

        patch.apply(record, now_ms);
        Ok(record.clone())
    }

    async fn scan_page(&self, cursor: Option<ScanCursor>) -> Result<ScanPage> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let lower = match &cursor {
            Some(ScanCursor(id)) => Bound::Excluded(id.clone()),
            None => Bound::Unbounded,
        };

        let mut remaining = records.range((lower, Bound::Unbounded)).map(|(_, r)| r);
        let page: Vec<MetadataRecord> = remaining.by_ref().take(self.page_size).cloned().collect();

        let next = match (remaining.next(), page.last()) {
            (Some(_), Some(last)) => Some(ScanCursor(last.id.clone())),
            _ => None,
        };

        Ok(ScanPage {
            records: page,
            next,
        })
    }
}
