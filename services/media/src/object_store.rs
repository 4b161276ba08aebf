use crate::config::S3Config;
use crate::error::{MediaError, Result};
use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Prefix under which clients upload original images
pub const IMAGES_PREFIX: &str = "images/";

/// Length of a hyphenated UUID
const RECORD_ID_LEN: usize = 36;

/// HTTP method a presigned URL is issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PresignMethod {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "PUT")]
    Put,
}

impl PresignMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

/// Blob storage used by the handlers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>, content_type: &str)
        -> Result<()>;

    /// Fetch an object's bytes
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Issue a time-limited URL granting `method` on one key
    async fn presign(
        &self,
        method: PresignMethod,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String>;
}

/// Key of an uploaded original: `images/{id}/{filename}`
pub fn image_key(id: &str, filename: &str) -> String {
    format!("{IMAGES_PREFIX}{id}/{filename}")
}

/// Key of a generated thumbnail: `thumbnails/{id}/{name}.png`
pub fn thumbnail_key(id: &str, name: &str) -> String {
    format!("thumbnails/{id}/{name}.png")
}

/// Record id carried by an image key (the fixed-width segment after `images/`)
pub fn record_id_from_key(key: &str) -> Result<&str> {
    key.get(IMAGES_PREFIX.len()..IMAGES_PREFIX.len() + RECORD_ID_LEN)
        .ok_or_else(|| MediaError::InvalidObjectKey(key.to_string()))
}

/// Last path segment of a key without its final extension
pub fn file_stem(key: &str) -> String {
    Path::new(key)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload object to S3")?;

        debug!(key = %key, "Object uploaded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .context("Failed to fetch object from S3")?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read object body")?;

        Ok(data.into_bytes().to_vec())
    }

    #[instrument(skip(self))]
    async fn presign(
        &self,
        method: PresignMethod,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String> {
        let presigning_config =
            PresigningConfig::expires_in(expires_in).context("Failed to create presigning config")?;

        let presigned = match method {
            PresignMethod::Get => self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning_config)
                .await
                .context("Failed to presign GET")?,
            PresignMethod::Put => self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning_config)
                .await
                .context("Failed to presign PUT")?,
        };

        Ok(presigned.uri().to_string())
    }
}

/// Process-local object store for development and tests
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
}

/// An object held by [`InMemoryObjectStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an object without going through the trait
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.objects.write().unwrap_or_else(|e| e.into_inner()).insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.object(bucket, key)
            .map(|object| object.data)
            .ok_or_else(|| anyhow::anyhow!("no such object: {bucket}/{key}").into())
    }

    async fn presign(
        &self,
        method: PresignMethod,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String> {
        Ok(format!(
            "memory://{bucket}/{key}?method={}&expires={}",
            method.as_str(),
            expires_in.as_secs()
        ))
    }
}
