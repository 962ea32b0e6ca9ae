use crate::services::upload_service::UploadError;
use axum::{
    Json,
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use std::fmt;

/// HTTP-facing error: a status, a message and optional extra body fields.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub extra: Map<String, Value>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            extra: Map::new(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Attach an additional top-level field to the JSON body.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = self.extra;
        body.insert("error".into(), json!(self.message));
        body.insert("status".into(), json!(self.status.as_u16()));

        (self.status, Json(Value::Object(body))).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::InvalidSessionRequest(_)
            | UploadError::ChunkIndexOutOfRange { .. }
            | UploadError::ChunkSizeMismatch { .. } => StatusCode::BAD_REQUEST,
            UploadError::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            UploadError::ChunksIncomplete { .. } => StatusCode::CONFLICT,
            UploadError::SignatureValidationFailed | UploadError::FinalSizeMismatch { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            UploadError::AssemblyIo(_)
            | UploadError::DownstreamPersistence(_)
            | UploadError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %err, "upload request failed");
        }

        let app_err = AppError::new(status, err.to_string());
        match err {
            UploadError::ChunksIncomplete { missing_chunk } => {
                app_err.with_field("missing_chunk", missing_chunk)
            }
            _ => app_err,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::new(rejection.status(), format!("invalid JSON: {}", rejection.body_text()))
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), format!("invalid multipart body: {}", err.body_text()))
    }
}
