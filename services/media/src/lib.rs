//! Media Service
//!
//! Image upload, metadata and thumbnail service. Clients register an upload
//! and receive a presigned PUT URL, upload the image straight to S3, and the
//! bucket's write notifications drive dimension analysis and thumbnail
//! generation. Record state lives in DynamoDB.
//!
//! ## Features
//!
//! - **Upload Intake**: Validates the filename, creates a pending metadata
//!   record and issues a presigned upload URL
//! - **Upload Analysis**: Reads image dimensions and marks the record uploaded
//! - **Square Thumbnails**: Letterboxes the image onto a square canvas and
//!   resizes it with a Lanczos filter
//! - **Metadata API**: Single and full-table queries with download URLs for
//!   uploaded images, and filename replacement
//!
//! ## Architecture
//!
//! ```text
//! Client                      S3 Bucket                  DynamoDB
//! ┌──────────────┐  PUT URL  ┌──────────────┐          ┌──────────────┐
//! │ Metadata     │──────────▶│ images/      │          │ metadata     │
//! │ API          │           │   {id}/      │          │ records      │
//! └──────────────┘           │ thumbnails/  │          └──────────────┘
//!        │                   │   {id}/      │                 ▲
//!        │                   └──────────────┘                 │
//!        │                          │ write notification      │
//!        │                          ▼                         │
//!        │                   ┌──────────────┐                 │
//!        │                   │ Event        │                 │
//!        │                   │ Processor    │─────────────────┤
//!        │                   └──────────────┘                 │
//!        │                                                    │
//!        └────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod metadata_store;
pub mod notifications;
pub mod object_store;
pub mod processing;
pub mod record;
pub mod thumbnail;
pub mod validation;

pub use api::{create_router, start_api_server, AppState, PresignedUrl};
pub use config::{Config, StorageBackend};
pub use error::{MediaError, Result};
pub use metadata_store::{
    DynamoMetadataStore, InMemoryMetadataStore, MetadataStore, ScanCursor, ScanPage,
};
pub use notifications::{parse_storage_write, StorageWrite};
pub use object_store::{InMemoryObjectStore, ObjectStore, PresignMethod, S3ObjectStore};
pub use processing::EventProcessor;
pub use record::{MetadataRecord, RecordPatch};
