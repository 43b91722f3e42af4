use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use qgate_core::{DeliveryHandler, Disposition, ExecutionContext, MetricsAggregator, QueryMetric};
use qgate_query::{QueryError, QueryService};
use tracing::{debug, error, info, warn};

use crate::error::JobError;
use crate::manager::JobLifecycleManager;
use crate::types::{JobStatus, QueryJobMessage};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const TIMED_OUT: &str = "handler timed out";

/// Bounded redelivery for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Whether a transient failure on delivery `attempt` earns another try
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    fn transient(&self, attempt: u32) -> Disposition {
        if self.should_retry(attempt) {
            Disposition::Requeue
        } else {
            Disposition::Reject
        }
    }
}

/// Runs deferred queries delivered by the job queue
pub struct JobProcessor {
    jobs: JobLifecycleManager,
    queries: Arc<QueryService>,
    metrics: Arc<MetricsAggregator>,
    retry: RetryPolicy,
}

impl JobProcessor {
    pub fn new(
        jobs: JobLifecycleManager,
        queries: Arc<QueryService>,
        metrics: Arc<MetricsAggregator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            jobs,
            queries,
            metrics,
            retry,
        }
    }

    async fn process(
        &self,
        message: &QueryJobMessage,
        attempt: u32,
        ctx: &ExecutionContext,
    ) -> Disposition {
        let job_id = message.id.as_str();

        match self.jobs.get(job_id).await {
            Ok(Some(job)) if job.status.is_terminal() => {
                debug!(job_id, status = %job.status, "Job already finished, acknowledging duplicate delivery");
                return Disposition::Ack;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                error!(job_id, "No job record for delivered message");
                return Disposition::Reject;
            }
            Err(e) => {
                warn!(job_id, attempt, "Failed to load job: {}", e);
                return self.retry.transient(attempt);
            }
        }

        if let Err(e) = self.jobs.mark_running(job_id).await {
            warn!(job_id, attempt, "Failed to mark job running: {}", e);
            return match e {
                JobError::NotFound(_) => Disposition::Reject,
                _ => self.retry.transient(attempt),
            };
        }

        info!(
            job_id,
            attempt,
            data_source = %message.data_source,
            table = %message.table,
            "Running job"
        );

        let started = Instant::now();
        let result = self
            .queries
            .query_table(ctx, &message.data_source, &message.table, &message.request)
            .await;
        let latency_ms = started.elapsed().as_millis() as i64;

        match result {
            Ok(response) => {
                let rows = response.metadata.rows as i64;
                self.metrics.record(
                    QueryMetric::success(&message.data_source, &message.table, latency_ms, rows)
                        .with_job(&message.id, &message.payload_hash)
                        .with_api_key(message.api_key.clone()),
                );

                match self
                    .jobs
                    .mark_succeeded(job_id, rows, response.metadata.took_ms)
                    .await
                {
                    Ok(_) => Disposition::Ack,
                    Err(e) => {
                        error!(job_id, "Query succeeded but job update failed: {}", e);
                        self.retry.transient(attempt)
                    }
                }
            }
            Err(e) => {
                self.metrics.record(
                    QueryMetric::error(&message.data_source, &message.table, latency_ms)
                        .with_job(&message.id, &message.payload_hash)
                        .with_api_key(message.api_key.clone()),
                );
                self.fail(job_id, e, attempt, latency_ms).await
            }
        }
    }

    /// Record a failed attempt; only a rejected delivery leaves the job `failed`
    async fn fail(&self, job_id: &str, e: QueryError, attempt: u32, took_ms: i64) -> Disposition {
        if e.is_retryable() && self.retry.should_retry(attempt) {
            if let Err(update_err) = self.jobs.mark_retrying(job_id, e.to_string()).await {
                error!(job_id, "Failed to record job retry: {}", update_err);
            }
            return Disposition::Requeue;
        }

        let reason = if e.is_retryable() {
            format!("failed after {} attempts: {}", attempt, e)
        } else {
            e.to_string()
        };
        if let Err(update_err) = self.jobs.mark_failed(job_id, reason, Some(took_ms)).await {
            error!(job_id, "Failed to record job failure: {}", update_err);
        }
        Disposition::Reject
    }
}

#[async_trait]
impl DeliveryHandler for JobProcessor {
    async fn handle(&self, body: &[u8], attempt: u32, ctx: &ExecutionContext) -> Disposition {
        let message = match QueryJobMessage::decode(body) {
            Ok(message) => message,
            Err(e) => {
                error!(attempt, "Rejecting undecodable job message: {}", e);
                return Disposition::Reject;
            }
        };

        let disposition = self.process(&message, attempt, ctx).await;
        debug!(job_id = %message.id, attempt, %disposition, "Job delivery handled");
        disposition
    }

    async fn on_timeout(&self, body: &[u8], attempt: u32, disposition: Disposition) {
        let Ok(message) = QueryJobMessage::decode(body) else {
            return;
        };
        let job_id = message.id.as_str();

        let recorded = match disposition {
            Disposition::Requeue => self
                .jobs
                .mark_retrying(job_id, TIMED_OUT)
                .await
                .map(|_| ()),
            Disposition::Reject => self
                .jobs
                .mark_failed(
                    job_id,
                    format!("failed after {} attempts: {}", attempt, TIMED_OUT),
                    None,
                )
                .await
                .map(|_| ()),
            Disposition::Ack => Ok(()),
        };
        if let Err(e) = recorded {
            error!(job_id, attempt, "Failed to record job timeout: {}", e);
        }
    }
}
