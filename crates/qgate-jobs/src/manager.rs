use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::repository::JobRepository;
use crate::types::{JobStatus, JobUpdate, Patch, QueryJob};

/// Creates jobs and moves them through `queued -> running -> succeeded | failed`
///
/// Transitions are not policed here; the processor decides what a delivery
/// means for a job. A retried job goes `running -> queued` and never passes
/// through a terminal state.
#[derive(Clone)]
pub struct JobLifecycleManager {
    repository: Arc<dyn JobRepository>,
}

impl JobLifecycleManager {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    /// Persist a new `queued` job for a request
    pub async fn enqueue(
        &self,
        payload_hash: &str,
        api_key: Option<String>,
        data_source: &str,
        table: &str,
    ) -> Result<QueryJob> {
        let job = QueryJob {
            id: Uuid::new_v4().to_string(),
            payload_hash: payload_hash.to_string(),
            api_key,
            data_source: data_source.to_string(),
            table: table.to_string(),
            status: JobStatus::Queued,
            rows: None,
            took_ms: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        self.repository.insert(&job).await?;
        info!(
            job_id = %job.id,
            data_source = %job.data_source,
            table = %job.table,
            "Job queued"
        );
        Ok(job)
    }

    pub async fn update_status(&self, id: &str, update: JobUpdate) -> Result<QueryJob> {
        debug!(job_id = %id, status = %update.status, "Updating job");
        self.repository.update_status(id, update).await
    }

    pub async fn mark_running(&self, id: &str) -> Result<QueryJob> {
        let mut update = JobUpdate::status(JobStatus::Running);
        update.started_at = Patch::Set(Utc::now());
        update.finished_at = Patch::Clear;
        self.update_status(id, update).await
    }

    pub async fn mark_succeeded(&self, id: &str, rows: i64, took_ms: i64) -> Result<QueryJob> {
        let mut update = JobUpdate::status(JobStatus::Succeeded);
        update.rows = Patch::Set(rows);
        update.took_ms = Patch::Set(took_ms);
        update.error = Patch::Clear;
        update.finished_at = Patch::Set(Utc::now());

        let job = self.update_status(id, update).await?;
        info!(job_id = %id, rows, took_ms, "Job succeeded");
        Ok(job)
    }

    pub async fn mark_failed(
        &self,
        id: &str,
        error: impl Into<String>,
        took_ms: Option<i64>,
    ) -> Result<QueryJob> {
        let error = error.into();
        let mut update = JobUpdate::status(JobStatus::Failed);
        update.error = Patch::Set(error.clone());
        update.rows = Patch::Clear;
        update.finished_at = Patch::Set(Utc::now());
        if let Some(took_ms) = took_ms {
            update.took_ms = Patch::Set(took_ms);
        }

        let job = self.update_status(id, update).await?;
        warn!(job_id = %id, "Job failed: {}", error);
        Ok(job)
    }

    /// Put a job back to `queued` after a transient failure, keeping the last error
    pub async fn mark_retrying(&self, id: &str, error: impl Into<String>) -> Result<QueryJob> {
        let error = error.into();
        let mut update = JobUpdate::status(JobStatus::Queued);
        update.error = Patch::Set(error.clone());
        update.rows = Patch::Clear;
        update.started_at = Patch::Clear;
        update.finished_at = Patch::Clear;

        let job = self.update_status(id, update).await?;
        info!(job_id = %id, "Job requeued after transient failure: {}", error);
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> Result<Option<QueryJob>> {
        self.repository.get_by_id(id).await
    }

    pub async fn find_by_payload_hash(&self, payload_hash: &str) -> Result<Vec<QueryJob>> {
        self.repository.get_by_payload_hash(payload_hash).await
    }
}
