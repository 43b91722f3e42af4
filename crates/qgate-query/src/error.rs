use qgate_core::{AppError, ErrorCode, Interrupted};
use thiserror::Error;

/// Errors raised while validating, compiling or executing a table query
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("invalid table name")]
    InvalidTable,

    #[error("invalid schema name")]
    InvalidSchema,

    /// An explicitly projected column failed the identifier check
    #[error("invalid column name: {0}")]
    InvalidColumn(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("column blocked: {0}")]
    ColumnBlocked(String),

    #[error("datasource not found: {0}")]
    DataSourceNotFound(String),

    #[error("unsupported datasource type: {0} (only postgres is supported)")]
    UnsupportedType(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("query failed: {message}")]
    QueryFailed {
        message: String,
        detail: Option<String>,
    },

    /// The backend refused the statement itself (bad value, missing column)
    #[error("query rejected: {0}")]
    StatementRejected(String),

    #[error("query timeout after {0}ms")]
    QueryTimeout(u64),

    #[error("query cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn query_failed(message: impl Into<String>) -> Self {
        QueryError::QueryFailed {
            message: message.into(),
            detail: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        QueryError::InvalidInput(message.into())
    }

    /// Map an interrupted context into the matching query error
    pub fn interrupted(reason: Interrupted, timeout_ms: u64) -> Self {
        match reason {
            Interrupted::DeadlineExceeded => QueryError::QueryTimeout(timeout_ms),
            Interrupted::Cancelled => QueryError::Cancelled,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            QueryError::InvalidTable => ErrorCode::InvalidTable,
            QueryError::InvalidSchema => ErrorCode::InvalidSchema,
            QueryError::InvalidColumn(_) | QueryError::InvalidInput(_) => ErrorCode::InvalidInput,
            QueryError::ColumnBlocked(_) => ErrorCode::ColumnBlocked,
            QueryError::DataSourceNotFound(_) => ErrorCode::DataSourceNotFound,
            QueryError::UnsupportedType(_) => ErrorCode::UnsupportedType,
            QueryError::ConnectionFailed(_)
            | QueryError::QueryFailed { .. }
            | QueryError::StatementRejected(_)
            | QueryError::QueryTimeout(_)
            | QueryError::Cancelled => ErrorCode::QueryFailed,
            QueryError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether re-running the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::ConnectionFailed(_)
                | QueryError::QueryFailed { .. }
                | QueryError::QueryTimeout(_)
                | QueryError::Cancelled
        )
    }
}

impl From<QueryError> for AppError {
    fn from(error: QueryError) -> Self {
        let code = error.code();
        let message = error.to_string();
        match error {
            QueryError::ColumnBlocked(column) => {
                AppError::new(code, message).with_detail("column", column)
            }
            QueryError::InvalidColumn(column) => {
                AppError::new(code, message).with_detail("column", column)
            }
            QueryError::DataSourceNotFound(name) => {
                AppError::new(code, message).with_detail("dataSource", name)
            }
            QueryError::QueryFailed {
                detail: Some(detail),
                ..
            } => AppError::new(code, message).with_detail("detail", detail),
            QueryError::QueryTimeout(timeout_ms) => {
                AppError::new(code, message).with_detail("timeoutMs", timeout_ms)
            }
            _ => AppError::new(code, message),
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blocked_column_carries_detail() {
        let app: AppError = QueryError::ColumnBlocked("password".into()).into();
        assert_eq!(app.code(), ErrorCode::ColumnBlocked);
        assert_eq!(app.message(), "column blocked: password");
        assert_eq!(app.details().unwrap()["column"], json!("password"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(QueryError::QueryTimeout(4000).is_retryable());
        assert!(QueryError::ConnectionFailed("refused".into()).is_retryable());
        assert!(!QueryError::InvalidTable.is_retryable());
        assert!(!QueryError::ColumnBlocked("ssn".into()).is_retryable());
        assert!(!QueryError::DataSourceNotFound("x".into()).is_retryable());
        assert!(!QueryError::StatementRejected("column \"x\" does not exist".into()).is_retryable());
    }

    #[test]
    fn test_invalid_column_is_invalid_input() {
        assert_eq!(
            QueryError::InvalidColumn("a-b".into()).code(),
            ErrorCode::InvalidInput
        );
    }
}
