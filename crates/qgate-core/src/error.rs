//! Error taxonomy shared by every qgate service and its HTTP representation

use std::fmt;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

/// Stable, externally visible error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
pub enum ErrorCode {
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput,
    #[serde(rename = "INVALID_TABLE")]
    InvalidTable,
    #[serde(rename = "INVALID_SCHEMA")]
    InvalidSchema,
    #[serde(rename = "COLUMN_BLOCKED")]
    ColumnBlocked,
    #[serde(rename = "DATASOURCE_NOT_FOUND")]
    DataSourceNotFound,
    #[serde(rename = "UNSUPPORTED_TYPE")]
    UnsupportedType,
    #[serde(rename = "QUERY_FAILED")]
    QueryFailed,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InvalidTable => "INVALID_TABLE",
            ErrorCode::InvalidSchema => "INVALID_SCHEMA",
            ErrorCode::ColumnBlocked => "COLUMN_BLOCKED",
            ErrorCode::DataSourceNotFound => "DATASOURCE_NOT_FOUND",
            ErrorCode::UnsupportedType => "UNSUPPORTED_TYPE",
            ErrorCode::QueryFailed => "QUERY_FAILED",
            ErrorCode::Internal => "INTERNAL_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
        }
    }

    /// Default HTTP status class for this code
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput
            | ErrorCode::InvalidTable
            | ErrorCode::InvalidSchema
            | ErrorCode::UnsupportedType => StatusCode::BAD_REQUEST,
            ErrorCode::ColumnBlocked => StatusCode::FORBIDDEN,
            ErrorCode::DataSourceNotFound | ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::QueryFailed | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured application error returned to callers as `{code, message, details?}`
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct AppError {
    code: ErrorCode,
    message: String,
    details: Option<Map<String, Value>>,
    status: StatusCode,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            status: code.status(),
        }
    }

    /// Override the status derived from the error code
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Attach a detail entry; values that fail to serialize are skipped
    pub fn with_detail<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.details
                .get_or_insert_with(Map::new)
                .insert(key.to_string(), value);
        }
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// An internal error reported with 503, used when an optional backend is absent
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message).with_status(StatusCode::SERVICE_UNAVAILABLE)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Map<String, Value>> {
        self.details.as_ref()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

/// Wire representation of an [`AppError`]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({
    "code": "COLUMN_BLOCKED",
    "message": "column blocked: password",
    "details": { "column": "password" }
}))]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Map<String, Value>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body())).into_response()
    }
}
