use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the media service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Which gateway implementations to run against
    #[serde(default)]
    pub storage: StorageConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// DynamoDB configuration
    pub dynamodb: DynamoDbConfig,
    /// Thumbnail generation configuration
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Storage backend selection
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// S3 + DynamoDB
    #[default]
    Aws,
    /// Process-local maps, for local development
    Memory,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding uploaded images and thumbnails
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
}

/// DynamoDB configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DynamoDbConfig {
    /// Table holding metadata records, keyed by `id`
    pub table: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for DynamoDB Local)
    pub endpoint_url: Option<String>,
}

/// Thumbnail configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    /// Side length of the square thumbnail in pixels
    #[serde(default = "default_thumbnail_size")]
    pub size: u32,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "media-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    3600
}

fn default_thumbnail_size() -> u32 {
    256
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

/// Unprefixed deployment variables, applied last.
const LEGACY_OVERRIDES: [(&str, &str); 3] = [
    ("DATA_TABLE_NAME", "dynamodb.table"),
    ("DATA_BUCKET_NAME", "s3.bucket"),
    ("THUMBNAIL_SIZE", "thumbnail.size"),
];

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            // Start with default values
            .set_default("service.name", "media-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/media").required(false))
            .add_source(config::File::with_name("/etc/media/media").required(false))
            // Override with environment variables
            // MEDIA__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("MEDIA")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_OVERRIDES {
            builder = builder.set_override_option(key, std::env::var(var).ok())?;
        }

        builder.build()?.try_deserialize().map_err(Into::into)
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            size: default_thumbnail_size(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}
