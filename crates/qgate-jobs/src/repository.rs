use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::RwLock;

use crate::error::{JobError, Result};
use crate::types::{JobUpdate, QueryJob};

/// Durable storage for query jobs
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: &QueryJob) -> Result<()>;

    /// Merge `update` into the stored job atomically and return the result
    async fn update_status(&self, id: &str, update: JobUpdate) -> Result<QueryJob>;

    async fn get_by_id(&self, id: &str) -> Result<Option<QueryJob>>;

    /// Every job created from a request with this hash, oldest first
    async fn get_by_payload_hash(&self, payload_hash: &str) -> Result<Vec<QueryJob>>;
}

/// Process-local job store
///
/// The outer lock only guards the id index; each job carries its own mutex so
/// updates to different jobs never wait on each other.
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<String, Arc<Mutex<QueryJob>>>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: &str) -> Option<Arc<Mutex<QueryJob>>> {
        self.jobs.read().await.get(id).cloned()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert(&self, job: &QueryJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(JobError::AlreadyExists(job.id.clone()));
        }
        jobs.insert(job.id.clone(), Arc::new(Mutex::new(job.clone())));
        Ok(())
    }

    async fn update_status(&self, id: &str, update: JobUpdate) -> Result<QueryJob> {
        let entry = self
            .entry(id)
            .await
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        let mut job = entry.lock();
        update.apply_to(&mut job);
        Ok(job.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<QueryJob>> {
        Ok(self.entry(id).await.map(|entry| entry.lock().clone()))
    }

    async fn get_by_payload_hash(&self, payload_hash: &str) -> Result<Vec<QueryJob>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<QueryJob> = jobs
            .values()
            .map(|entry| entry.lock().clone())
            .filter(|job| job.payload_hash == payload_hash)
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobStatus, Patch};
    use chrono::{Duration, Utc};

    fn job(id: &str, hash: &str, age_secs: i64) -> QueryJob {
        QueryJob {
            id: id.into(),
            payload_hash: hash.into(),
            api_key: None,
            data_source: "main".into(),
            table: "users".into(),
            status: JobStatus::Queued,
            rows: None,
            took_ms: None,
            error: None,
            created_at: Utc::now() - Duration::seconds(age_secs),
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = InMemoryJobRepository::new();
        repo.insert(&job("a", "h", 0)).await.unwrap();

        assert_eq!(repo.get_by_id("a").await.unwrap().unwrap().id, "a");
        assert!(repo.get_by_id("b").await.unwrap().is_none());
        assert_eq!(
            repo.insert(&job("a", "h", 0)).await,
            Err(JobError::AlreadyExists("a".into()))
        );
    }

    #[tokio::test]
    async fn test_update_missing_job_is_not_found() {
        let repo = InMemoryJobRepository::new();
        let result = repo
            .update_status("ghost", JobUpdate::status(JobStatus::Running))
            .await;
        assert_eq!(result, Err(JobError::NotFound("ghost".into())));
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let repo = InMemoryJobRepository::new();
        repo.insert(&job("a", "h", 0)).await.unwrap();

        let mut update = JobUpdate::status(JobStatus::Succeeded);
        update.rows = Patch::Set(7);
        let updated = repo.update_status("a", update).await.unwrap();

        assert_eq!(updated.status, JobStatus::Succeeded);
        assert_eq!(updated.rows, Some(7));
        assert_eq!(repo.get_by_id("a").await.unwrap().unwrap(), updated);
    }

    #[tokio::test]
    async fn test_lookup_by_hash_is_oldest_first() {
        let repo = InMemoryJobRepository::new();
        repo.insert(&job("newer", "h1", 1)).await.unwrap();
        repo.insert(&job("older", "h1", 10)).await.unwrap();
        repo.insert(&job("other", "h2", 5)).await.unwrap();

        let ids: Vec<String> = repo
            .get_by_payload_hash("h1")
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(ids, vec!["older", "newer"]);
        assert!(repo.get_by_payload_hash("none").await.unwrap().is_empty());
    }
}
