use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata tracking one logical image upload.
///
/// A record starts out pending (`is_uploaded == false`), becomes uploaded once
/// the raw object has been analyzed, and gains `has_thumbnail` once the
/// thumbnail has been written. Replacing the filename sends it back to
/// pending but leaves `has_thumbnail` untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub id: String,
    pub filename: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    pub is_uploaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_thumbnail: Option<bool>,
    /// Object size in bytes, set by analysis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl MetadataRecord {
    /// Build a fresh pending record
    pub fn new(id: impl Into<String>, filename: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            created_at: now.timestamp_millis(),
            updated_at: None,
            is_uploaded: false,
            has_thumbnail: None,
            size: None,
            width: None,
            height: None,
        }
    }
}

/// The only mutations a record ever sees. Each one is applied as a
/// conditional update that requires the record to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPatch {
    MarkUploaded { size: u64, width: u32, height: u32 },
    MarkThumbnailed,
    ReplaceFilename { filename: String },
}

/// Value of a single attribute written by a patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    Number(i64),
    Text(String),
}

impl RecordPatch {
    /// Attributes written by this patch, `updatedAt` included.
    pub fn fields(&self, now_ms: i64) -> Vec<(&'static str, FieldValue)> {
        let mut fields = match self {
            Self::MarkUploaded {
                size,
                width,
                height,
            } => vec![
                ("size", FieldValue::Number(*size as i64)),
                ("width", FieldValue::Number(i64::from(*width))),
                ("height", FieldValue::Number(i64::from(*height))),
                ("isUploaded", FieldValue::Bool(true)),
            ],
            Self::MarkThumbnailed => vec![("hasThumbnail", FieldValue::Bool(true))],
            Self::ReplaceFilename { filename } => vec![
                ("isUploaded", FieldValue::Bool(false)),
                ("filename", FieldValue::Text(filename.clone())),
            ],
        };
        fields.push(("updatedAt", FieldValue::Number(now_ms)));
        fields
    }

    /// Apply the patch to an in-memory record
    pub fn apply(&self, record: &mut MetadataRecord, now_ms: i64) {
        match self {
            Self::MarkUploaded {
                size,
                width,
                height,
            } => {
                record.size = Some(*size);
                record.width = Some(*width);
                record.height = Some(*height);
                record.is_uploaded = true;
            }
            Self::MarkThumbnailed => record.has_thumbnail = Some(true),
            // hasThumbnail stays as-is until a new thumbnail is written.
            Self::ReplaceFilename { filename } => {
                record.filename = filename.clone();
                record.is_uploaded = false;
            }
        }
        record.updated_at = Some(now_ms);
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MarkUploaded { .. } => "mark_uploaded",
            Self::MarkThumbnailed => "mark_thumbnailed",
            Self::ReplaceFilename { .. } => "replace_filename",
        }
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
