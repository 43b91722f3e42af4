//! Sync-versus-async execution of table queries
//!
//! Sync requests compile, run and respond in one go. Async requests are
//! validated and compiled up front, then recorded as a `queued` job and
//! published; the caller gets the job id back immediately.

use std::sync::Arc;
use std::time::Instant;

use qgate_core::{AppError, ExecutionContext, JobQueue, MetricsAggregator, QueryMetric};
use qgate_jobs::{payload_hash, JobLifecycleManager, JobStatus, QueryJobMessage};
use qgate_query::{QueryRequest, QueryResponse, QueryService};
use tracing::{error, info};

use crate::types::AcceptedJob;

pub const QUEUE_PUBLISH_FAILED: &str = "queue publish failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sync,
    Async,
}

#[derive(Debug)]
pub enum QueryOutcome {
    Completed(QueryResponse),
    Accepted(AcceptedJob),
}

#[derive(Clone)]
pub struct ExecutionCoordinator {
    queries: Arc<QueryService>,
    metrics: Arc<MetricsAggregator>,
    jobs: Option<JobLifecycleManager>,
    queue: Option<Arc<dyn JobQueue>>,
}

impl ExecutionCoordinator {
    pub fn new(queries: Arc<QueryService>, metrics: Arc<MetricsAggregator>) -> Self {
        Self {
            queries,
            metrics,
            jobs: None,
            queue: None,
        }
    }

    /// Enable deferred execution through `jobs` and `queue`
    pub fn with_async(mut self, jobs: JobLifecycleManager, queue: Arc<dyn JobQueue>) -> Self {
        self.jobs = Some(jobs);
        self.queue = Some(queue);
        self
    }

    /// Whether both the job store and the queue are configured
    pub fn async_enabled(&self) -> bool {
        self.jobs.is_some() && self.queue.is_some()
    }

    /// Pick the mode for a request; async hints fall back to sync when unavailable
    pub fn mode_for(&self, async_hint: bool) -> ExecutionMode {
        if async_hint && self.async_enabled() {
            ExecutionMode::Async
        } else {
            ExecutionMode::Sync
        }
    }

    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        source: &str,
        table: &str,
        request: QueryRequest,
        api_key: Option<String>,
        mode: ExecutionMode,
    ) -> Result<QueryOutcome, AppError> {
        match mode {
            ExecutionMode::Sync => self
                .run_sync(ctx, source, table, &request, api_key)
                .await
                .map(QueryOutcome::Completed),
            ExecutionMode::Async => self
                .enqueue(source, table, request, api_key)
                .await
                .map(QueryOutcome::Accepted),
        }
    }

    async fn run_sync(
        &self,
        ctx: &ExecutionContext,
        source: &str,
        table: &str,
        request: &QueryRequest,
        api_key: Option<String>,
    ) -> Result<QueryResponse, AppError> {
        let started = Instant::now();
        match self.queries.query_table(ctx, source, table, request).await {
            Ok(response) => {
                self.metrics.record(
                    QueryMetric::success(
                        source,
                        table,
                        response.metadata.took_ms,
                        response.metadata.rows as i64,
                    )
                    .with_api_key(api_key),
                );
                Ok(response)
            }
            Err(e) => {
                let latency_ms = started.elapsed().as_millis() as i64;
                self.metrics
                    .record(QueryMetric::error(source, table, latency_ms).with_api_key(api_key));
                Err(e.into())
            }
        }
    }

    async fn enqueue(
        &self,
        source: &str,
        table: &str,
        request: QueryRequest,
        api_key: Option<String>,
    ) -> Result<AcceptedJob, AppError> {
        let (Some(jobs), Some(queue)) = (&self.jobs, &self.queue) else {
            return Err(AppError::unavailable("async queue unavailable"));
        };

        self.queries.prepare(source, table, &request).await?;

        let hash = payload_hash(&request);
        let job = jobs
            .enqueue(&hash, api_key, source, table)
            .await
            .map_err(|e| {
                error!(data_source = %source, table = %table, "Failed to persist job: {}", e);
                AppError::internal("failed to persist job")
            })?;

        let message = QueryJobMessage::for_job(&job, request);
        let published = match message.encode() {
            Ok(body) => queue.publish(&body).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(e) = published {
            error!(job_id = %job.id, "Failed to publish job: {}", e);
            if let Err(update_err) = jobs.mark_failed(&job.id, QUEUE_PUBLISH_FAILED, None).await {
                error!(job_id = %job.id, "Failed to mark unpublished job: {}", update_err);
            }
            return Err(AppError::internal("failed to enqueue job"));
        }

        info!(job_id = %job.id, payload_hash = %hash, "Query deferred to job");
        Ok(AcceptedJob {
            job_id: job.id,
            status: JobStatus::Queued,
            payload_hash: hash,
            message: "Job enqueued for async processing".to_string(),
        })
    }
}
