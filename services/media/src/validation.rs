//! Input validation for the HTTP-facing handlers.

use crate::error::{MediaError, Result};
use axum::http::{header::CONTENT_TYPE, HeaderMap};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const CONTENT_TYPE_MESSAGE: &str = "ContentType of body is not \"application/json\".";
pub const BODY_NOT_JSON_MESSAGE: &str = "Request body is not json format.";
pub const FILENAME_NOT_STRING_MESSAGE: &str = "filename is not string.";
pub const FILENAME_CHARS_MESSAGE: &str = "filename can use next chars. regex [a-zA-Z0-9_\\-.]";
pub const INVALID_ID_MESSAGE: &str = "id is invalid.";

fn is_filename_char(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.')
}

/// Require a `Content-Type` header mentioning `application/json`
pub fn require_json_content(headers: &HeaderMap) -> Result<()> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("application/json"))
        .unwrap_or(false);

    if is_json {
        Ok(())
    } else {
        Err(MediaError::validation(CONTENT_TYPE_MESSAGE))
    }
}

/// Parse a request body as JSON
pub fn parse_json_body(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(error = %e, "Request body is not JSON");
        MediaError::validation(BODY_NOT_JSON_MESSAGE)
    })
}

/// Validate a filename value. The empty string passes.
pub fn validate_filename(value: Option<&Value>) -> Result<String> {
    let name = match value {
        Some(Value::String(name)) => name,
        _ => return Err(MediaError::validation(FILENAME_NOT_STRING_MESSAGE)),
    };

    if name.chars().all(is_filename_char) {
        Ok(name.clone())
    } else {
        Err(MediaError::validation(FILENAME_CHARS_MESSAGE))
    }
}

/// Filename of an optional replacement. A missing or `null` field means
/// "keep the current filename".
pub fn validate_optional_filename(body: &Map<String, Value>) -> Result<Option<String>> {
    match body.get("filename") {
        None | Some(Value::Null) => Ok(None),
        value => validate_filename(value).map(Some),
    }
}

/// Check that a caller-supplied record id parses as a UUID
pub fn validate_id(id: &str) -> Result<()> {
    Uuid::parse_str(id).map(|_| ()).map_err(|e| {
        tracing::warn!(error = %e, id = %id, "Rejected record id");
        MediaError::validation(INVALID_ID_MESSAGE)
    })
}
