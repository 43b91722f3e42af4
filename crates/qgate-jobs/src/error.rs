use qgate_core::{AppError, ErrorCode};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job already exists: {0}")]
    AlreadyExists(String),

    #[error("job storage error: {0}")]
    Storage(String),

    #[error("invalid job data: {0}")]
    InvalidData(String),
}

impl From<tokio_postgres::Error> for JobError {
    fn from(error: tokio_postgres::Error) -> Self {
        JobError::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for JobError {
    fn from(error: serde_json::Error) -> Self {
        JobError::InvalidData(error.to_string())
    }
}

impl From<JobError> for AppError {
    fn from(error: JobError) -> Self {
        let message = error.to_string();
        match error {
            JobError::NotFound(id) => {
                AppError::new(ErrorCode::NotFound, message).with_detail("jobId", id)
            }
            JobError::InvalidData(_) => AppError::invalid_input(message),
            JobError::AlreadyExists(_) | JobError::Storage(_) => AppError::internal(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
