use qgate_core::MetricsSummary;
use qgate_jobs::JobStatus;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Returned with `202 Accepted` when a query was deferred to a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "jobId": "0f8e2c56-3b0e-4c59-9a57-2f7c1e8f9a10",
    "status": "queued",
    "payloadHash": "9c1185a5c5e9fc54612808977ee8f548b2258d31...",
    "message": "Job enqueued for async processing"
}))]
pub struct AcceptedJob {
    pub job_id: String,
    pub status: JobStatus,
    pub payload_hash: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QueryParams {
    /// `true` defers execution to a background job
    #[serde(default, rename = "async")]
    pub async_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub env: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MetricsResponse {
    pub summary: Vec<MetricsSummary>,
    /// Entries currently held in the rolling window
    pub total: usize,
}
