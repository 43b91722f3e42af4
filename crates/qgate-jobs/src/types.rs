use std::fmt;
use std::str::FromStr;

use qgate_core::UtcDateTime;
use qgate_query::QueryRequest;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobError::InvalidData(format!("unknown job status: {}", other))),
        }
    }
}

/// A deferred query and its progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "id": "0f8e2c56-3b0e-4c59-9a57-2f7c1e8f9a10",
    "payloadHash": "9c1185a5c5e9fc54612808977ee8f548b2258d31...",
    "apiKey": "team-a",
    "dataSource": "main",
    "table": "users",
    "status": "succeeded",
    "rows": 42,
    "tookMs": 18,
    "createdAt": "2025-01-01T10:00:00Z",
    "startedAt": "2025-01-01T10:00:01Z",
    "finishedAt": "2025-01-01T10:00:01.018Z"
}))]
pub struct QueryJob {
    pub id: String,
    pub payload_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub data_source: String,
    pub table: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub took_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub started_at: Option<UtcDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub finished_at: Option<UtcDateTime>,
}

/// How one optional job field changes in an update
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Keep,
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    pub fn apply(self, field: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Clear => *field = None,
            Patch::Set(value) => *field = Some(value),
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }
}

impl<T> From<Option<T>> for Patch<T> {
    /// `Some` sets the field, `None` clears it
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Patch::Set(value),
            None => Patch::Clear,
        }
    }
}

/// A status change plus the optional fields it touches
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub rows: Patch<i64>,
    pub took_ms: Patch<i64>,
    pub error: Patch<String>,
    pub started_at: Patch<UtcDateTime>,
    pub finished_at: Patch<UtcDateTime>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            rows: Patch::Keep,
            took_ms: Patch::Keep,
            error: Patch::Keep,
            started_at: Patch::Keep,
            finished_at: Patch::Keep,
        }
    }

    /// Merge into `job` in place
    pub fn apply_to(self, job: &mut QueryJob) {
        job.status = self.status;
        self.rows.apply(&mut job.rows);
        self.took_ms.apply(&mut job.took_ms);
        self.error.apply(&mut job.error);
        self.started_at.apply(&mut job.started_at);
        self.finished_at.apply(&mut job.finished_at);
    }
}

/// Queue payload describing one deferred query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryJobMessage {
    pub id: String,
    pub payload_hash: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub data_source: String,
    pub table: String,
    pub request: QueryRequest,
    pub created_at: UtcDateTime,
}

impl QueryJobMessage {
    pub fn for_job(job: &QueryJob, request: QueryRequest) -> Self {
        Self {
            id: job.id.clone(),
            payload_hash: job.payload_hash.clone(),
            api_key: job.api_key.clone(),
            data_source: job.data_source.clone(),
            table: job.table.clone(),
            request,
            created_at: job.created_at,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, JobError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self, JobError> {
        Ok(serde_json::from_slice(body)?)
    }
}
