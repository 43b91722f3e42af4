use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use qgate_core::{
    DeliveryHandler, Disposition, ExecutionContext, MetricStatus, MetricsAggregator,
};
use qgate_jobs::{
    payload_hash, InMemoryJobRepository, JobLifecycleManager, JobProcessor, JobStatus, QueryJob,
    QueryJobMessage, RetryPolicy,
};
use qgate_query::{
    CellValue, Connector, ConnectorFactory, DataSource, InMemoryDataSourceRepository, QueryError,
    QueryRegistry, QueryRequest, QueryService, Row, POSTGRES_TYPE,
};

/// Returns queued failures first, then two rows per query
#[derive(Default)]
struct ScriptedConnector {
    failures: Mutex<VecDeque<QueryError>>,
    calls: Mutex<usize>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn query(
        &self,
        _ctx: &ExecutionContext,
        _sql: &str,
        _params: &[Value],
    ) -> qgate_query::Result<Vec<Row>> {
        *self.calls.lock() += 1;
        if let Some(failure) = self.failures.lock().pop_front() {
            return Err(failure);
        }
        Ok((1..=2)
            .map(|id| {
                let mut row = Row::new();
                row.insert("id".into(), CellValue::Int(id));
                row
            })
            .collect())
    }

    async fn close(&self) -> qgate_query::Result<()> {
        Ok(())
    }
}

struct ScriptedFactory(Arc<ScriptedConnector>);

#[async_trait]
impl ConnectorFactory for ScriptedFactory {
    fn backend_type(&self) -> &'static str {
        POSTGRES_TYPE
    }

    async fn connect(&self, _: &DataSource) -> qgate_query::Result<Arc<dyn Connector>> {
        Ok(self.0.clone())
    }
}

struct Harness {
    processor: JobProcessor,
    jobs: JobLifecycleManager,
    metrics: Arc<MetricsAggregator>,
    connector: Arc<ScriptedConnector>,
}

async fn harness(failures: Vec<QueryError>, max_attempts: u32) -> Harness {
    let connector = Arc::new(ScriptedConnector {
        failures: Mutex::new(failures.into()),
        ..Default::default()
    });
    let registry = Arc::new(QueryRegistry::new());
    registry
        .register_factory(Arc::new(ScriptedFactory(connector.clone())))
        .await;

    let source = DataSource {
        name: "main".into(),
        source_type: POSTGRES_TYPE.into(),
        blocked_columns: vec!["users.ssn".into()],
        ..Default::default()
    };
    let queries = Arc::new(QueryService::new(
        Arc::new(InMemoryDataSourceRepository::new(vec![source])),
        registry,
        Duration::from_secs(4),
    ));

    let jobs = JobLifecycleManager::new(Arc::new(InMemoryJobRepository::new()));
    let metrics = Arc::new(MetricsAggregator::new(100));
    let processor = JobProcessor::new(
        jobs.clone(),
        queries,
        metrics.clone(),
        RetryPolicy::new(max_attempts),
    );

    Harness {
        processor,
        jobs,
        metrics,
        connector,
    }
}

async fn queued_message(jobs: &JobLifecycleManager, request: Value) -> (QueryJob, Vec<u8>) {
    let request: QueryRequest = serde_json::from_value(request).unwrap();
    let hash = payload_hash(&request);
    let job = jobs
        .enqueue(&hash, Some("team-a".into()), "main", "users")
        .await
        .unwrap();
    let body = QueryJobMessage::for_job(&job, request).encode().unwrap();
    (job, body)
}

async fn handle(h: &Harness, body: &[u8], attempt: u32) -> Disposition {
    h.processor
        .handle(body, attempt, &ExecutionContext::new())
        .await
}

#[tokio::test]
async fn test_successful_job_is_acked_and_recorded() {
    let h = harness(vec![], 5).await;
    let (job, body) = queued_message(&h.jobs, json!({"limit": 10})).await;

    assert_eq!(handle(&h, &body, 1).await, Disposition::Ack);

    let stored = h.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Succeeded);
    assert_eq!(stored.rows, Some(2));
    assert!(stored.took_ms.is_some());
    assert!(stored.started_at.is_some());
    assert!(stored.finished_at.is_some());

    let metrics = h.metrics.snapshot();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].status, MetricStatus::Success);
    assert_eq!(metrics[0].rows, 2);
    assert_eq!(metrics[0].job_id.as_deref(), Some(job.id.as_str()));
    assert_eq!(metrics[0].payload_hash.as_deref(), Some(job.payload_hash.as_str()));
    assert_eq!(metrics[0].api_key.as_deref(), Some("team-a"));
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    let h = harness(vec![], 5).await;
    let (job, body) = queued_message(&h.jobs, json!({})).await;

    assert_eq!(handle(&h, &body, 1).await, Disposition::Ack);
    let first = h.jobs.get(&job.id).await.unwrap().unwrap();

    assert_eq!(handle(&h, &body, 1).await, Disposition::Ack);
    let second = h.jobs.get(&job.id).await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(*h.connector.calls.lock(), 1);
    assert_eq!(h.metrics.len(), 1);
}

#[tokio::test]
async fn test_transient_failure_requeues_then_succeeds() {
    let h = harness(vec![QueryError::query_failed("connection reset")], 5).await;
    let (job, body) = queued_message(&h.jobs, json!({})).await;

    assert_eq!(handle(&h, &body, 1).await, Disposition::Requeue);
    let retrying = h.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(retrying.status, JobStatus::Queued);
    assert!(!retrying.status.is_terminal());
    assert_eq!(retrying.error.as_deref(), Some("query failed: connection reset"));
    assert!(retrying.finished_at.is_none());
    assert!(retrying.started_at.is_none());
    assert!(retrying.rows.is_none());

    assert_eq!(handle(&h, &body, 2).await, Disposition::Ack);
    let done = h.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert!(done.error.is_none());

    let statuses: Vec<MetricStatus> = h.metrics.snapshot().iter().map(|m| m.status).collect();
    assert_eq!(statuses, vec![MetricStatus::Error, MetricStatus::Success]);
}

#[tokio::test]
async fn test_job_never_leaves_a_terminal_state() {
    let h = harness(
        vec![
            QueryError::query_failed("connection reset"),
            QueryError::QueryTimeout(4000),
        ],
        2,
    )
    .await;
    let (job, body) = queued_message(&h.jobs, json!({})).await;

    assert_eq!(handle(&h, &body, 1).await, Disposition::Requeue);
    assert_eq!(handle(&h, &body, 2).await, Disposition::Reject);
    let failed = h.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.finished_at.is_some());

    // A stray redelivery of a failed job is acknowledged without running it again
    assert_eq!(handle(&h, &body, 3).await, Disposition::Ack);
    let after = h.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(after, failed);
    assert_eq!(*h.connector.calls.lock(), 2);
}

#[tokio::test]
async fn test_handler_timeouts_update_job_state() {
    let h = harness(vec![], 2).await;
    let (job, body) = queued_message(&h.jobs, json!({})).await;

    h.processor.on_timeout(&body, 1, Disposition::Requeue).await;
    let retrying = h.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(retrying.status, JobStatus::Queued);
    assert_eq!(retrying.error.as_deref(), Some("handler timed out"));

    h.processor.on_timeout(&body, 2, Disposition::Reject).await;
    let failed = h.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some("failed after 2 attempts: handler timed out")
    );
    assert!(failed.finished_at.is_some());
}

#[tokio::test]
async fn test_exhausted_retries_dead_letter() {
    let h = harness(vec![QueryError::QueryTimeout(4000)], 3).await;
    let (job, body) = queued_message(&h.jobs, json!({})).await;

    assert_eq!(handle(&h, &body, 3).await, Disposition::Reject);
    let failed = h.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some("failed after 3 attempts: query timeout after 4000ms")
    );
}

#[tokio::test]
async fn test_permanent_failure_is_rejected_without_retry() {
    let h = harness(vec![], 5).await;
    let (job, body) = queued_message(&h.jobs, json!({"fields": ["id", "ssn"]})).await;

    assert_eq!(handle(&h, &body, 1).await, Disposition::Reject);
    let failed = h.jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("column blocked: ssn"));
    assert_eq!(*h.connector.calls.lock(), 0);
}

#[tokio::test]
async fn test_statement_rejection_is_permanent() {
    let h = harness(
        vec![QueryError::StatementRejected("column \"nope\" does not exist".into())],
        5,
    )
    .await;
    let (_, body) = queued_message(&h.jobs, json!({})).await;

    assert_eq!(handle(&h, &body, 1).await, Disposition::Reject);
}

#[tokio::test]
async fn test_undecodable_message_is_rejected() {
    let h = harness(vec![], 5).await;
    assert_eq!(handle(&h, b"{not json", 1).await, Disposition::Reject);
}

#[tokio::test]
async fn test_message_without_job_record_is_rejected() {
    let h = harness(vec![], 5).await;
    let other = JobLifecycleManager::new(Arc::new(InMemoryJobRepository::new()));
    let (_, body) = queued_message(&other, json!({})).await;

    assert_eq!(handle(&h, &body, 1).await, Disposition::Reject);
    assert_eq!(*h.connector.calls.lock(), 0);
}
