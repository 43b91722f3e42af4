use std::sync::Arc;

use qgate_core::{JobQueue, MetricsAggregator};
use qgate_jobs::JobLifecycleManager;
use qgate_query::QueryService;

use crate::coordinator::ExecutionCoordinator;

/// Everything the HTTP handlers share
pub struct AppState {
    pub environment: String,
    pub queries: Arc<QueryService>,
    pub metrics: Arc<MetricsAggregator>,
    pub jobs: Option<JobLifecycleManager>,
    pub coordinator: ExecutionCoordinator,
}

impl AppState {
    pub fn new(
        environment: impl Into<String>,
        queries: Arc<QueryService>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            environment: environment.into(),
            coordinator: ExecutionCoordinator::new(queries.clone(), metrics.clone()),
            queries,
            metrics,
            jobs: None,
        }
    }

    /// Job lookups without deferred execution
    pub fn with_jobs(mut self, jobs: JobLifecycleManager) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Job lookups plus deferred execution through `queue`
    pub fn with_async(mut self, jobs: JobLifecycleManager, queue: Arc<dyn JobQueue>) -> Self {
        self.coordinator = self.coordinator.with_async(jobs.clone(), queue);
        self.jobs = Some(jobs);
        self
    }
}
