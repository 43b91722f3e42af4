use std::sync::Arc;

use qgate_jobs::{
    payload_hash, InMemoryJobRepository, JobError, JobLifecycleManager, JobStatus, JobUpdate,
    Patch,
};
use qgate_query::{FilterField, QueryRequest};

fn manager() -> JobLifecycleManager {
    JobLifecycleManager::new(Arc::new(InMemoryJobRepository::new()))
}

#[tokio::test]
async fn test_new_job_is_queued() {
    let jobs = manager();
    let job = jobs
        .enqueue("hash-1", Some("team-a".into()), "main", "users")
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.started_at.is_none());
    assert!(job.finished_at.is_none());
    assert_eq!(job.api_key.as_deref(), Some("team-a"));
    assert_eq!(jobs.get(&job.id).await.unwrap(), Some(job));
}

#[tokio::test]
async fn test_success_path() {
    let jobs = manager();
    let job = jobs.enqueue("hash-1", None, "main", "users").await.unwrap();

    let running = jobs.mark_running(&job.id).await.unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.started_at.is_some());

    let done = jobs.mark_succeeded(&job.id, 12, 34).await.unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.rows, Some(12));
    assert_eq!(done.took_ms, Some(34));
    assert!(done.finished_at.is_some());
    assert!(done.error.is_none());
}

#[tokio::test]
async fn test_failure_path_clears_rows() {
    let jobs = manager();
    let job = jobs.enqueue("hash-1", None, "main", "users").await.unwrap();

    let mut update = JobUpdate::status(JobStatus::Running);
    update.rows = Patch::Set(5);
    jobs.update_status(&job.id, update).await.unwrap();

    let failed = jobs
        .mark_failed(&job.id, "query timeout after 4000ms", Some(4001))
        .await
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("query timeout after 4000ms"));
    assert!(failed.rows.is_none());
    assert_eq!(failed.took_ms, Some(4001));
    assert!(failed.finished_at.is_some());
}

#[tokio::test]
async fn test_retrying_job_returns_to_queued() {
    let jobs = manager();
    let job = jobs.enqueue("hash-1", None, "main", "users").await.unwrap();
    jobs.mark_running(&job.id).await.unwrap();

    let retrying = jobs.mark_retrying(&job.id, "connection refused").await.unwrap();
    assert_eq!(retrying.status, JobStatus::Queued);
    assert_eq!(retrying.error.as_deref(), Some("connection refused"));
    assert!(retrying.started_at.is_none());
    assert!(retrying.finished_at.is_none());

    let running = jobs.mark_running(&job.id).await.unwrap();
    assert_eq!(running.status, JobStatus::Running);

    let done = jobs.mark_succeeded(&job.id, 1, 2).await.unwrap();
    assert!(done.error.is_none());
}

#[tokio::test]
async fn test_updating_unknown_job_fails() {
    let jobs = manager();
    assert_eq!(
        jobs.mark_running("missing").await,
        Err(JobError::NotFound("missing".into()))
    );
}

#[tokio::test]
async fn test_find_by_payload_hash() {
    let jobs = manager();
    let mut request = QueryRequest::default();
    request.filter.insert("status".into(), FilterField::eq("active"));
    let hash = payload_hash(&request);

    let first = jobs.enqueue(&hash, None, "main", "users").await.unwrap();
    let second = jobs.enqueue(&hash, None, "main", "users").await.unwrap();
    jobs.enqueue("unrelated", None, "main", "users").await.unwrap();

    let found: Vec<String> = jobs
        .find_by_payload_hash(&hash)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(found.len(), 2);
    assert!(found.contains(&first.id));
    assert!(found.contains(&second.id));
}

#[tokio::test]
async fn test_concurrent_updates_to_different_jobs() {
    let jobs = manager();
    let mut ids = Vec::new();
    for _ in 0..16 {
        ids.push(jobs.enqueue("h", None, "main", "users").await.unwrap().id);
    }

    let mut handles = Vec::new();
    for (i, id) in ids.iter().cloned().enumerate() {
        let jobs = jobs.clone();
        handles.push(tokio::spawn(async move {
            jobs.mark_running(&id).await.unwrap();
            jobs.mark_succeeded(&id, i as i64, 1).await.unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().status, JobStatus::Succeeded);
    }

    for (i, id) in ids.iter().enumerate() {
        assert_eq!(jobs.get(id).await.unwrap().unwrap().rows, Some(i as i64));
    }
}
