use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

pub type Result<T, E = MediaError> = std::result::Result<T, E>;

/// Errors produced by the media handlers and gateways
#[derive(Error, Debug)]
pub enum MediaError {
    /// Malformed caller input. The message is returned to the caller verbatim.
    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    /// Conditional update against a record that does not exist
    #[error("record {id} does not exist")]
    ConditionFailed { id: String },

    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("image encode failed: {0}")]
    Encode(String),

    #[error("object key does not carry a record id: {0}")]
    InvalidObjectKey(String),

    #[error("malformed storage notification: {0}")]
    Notification(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl MediaError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MediaError {
    fn into_response(self) -> Response {
        let status = self.status();
        metrics::counter!("media.api.errors", "status" => status.as_u16().to_string())
            .increment(1);

        let message = match &self {
            Self::Validation(msg) => {
                warn!(reason = %msg, "Rejected request");
                msg.clone()
            }
            Self::NotFound => self.to_string(),
            other => {
                error!(error = %other, "Request failed");
                "InternalServerError".to_string()
            }
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}
