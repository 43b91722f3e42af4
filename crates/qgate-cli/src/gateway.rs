use std::sync::Arc;

use anyhow::Context;
use qgate_api::AppState;
use qgate_core::{JobQueue, MetricsAggregator};
use qgate_jobs::{
    InMemoryJobRepository, JobLifecycleManager, JobProcessor, JobRepository,
    PostgresJobRepository, RetryPolicy,
};
use qgate_query::{InMemoryDataSourceRepository, QueryRegistry, QueryService};
use qgate_query_postgres::PostgresConnectorFactory;
use qgate_queue::{Consumer, MemoryQueue, RedisQueue, RedisQueueConfig};
use tracing::{debug, info};

use crate::config::{GatewayConfig, JobsBackend, QueueBackend, QueueSection};

/// Services built from one configuration, shared by the API and the worker
pub struct Gateway {
    pub config: GatewayConfig,
    pub registry: Arc<QueryRegistry>,
    pub queries: Arc<QueryService>,
    pub metrics: Arc<MetricsAggregator>,
    pub jobs: JobLifecycleManager,
    pub queue: Option<Arc<dyn JobQueue>>,
}

impl Gateway {
    pub async fn build(config: GatewayConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(QueryRegistry::new());
        registry
            .register_factory(Arc::new(PostgresConnectorFactory))
            .await;

        let sources = Arc::new(InMemoryDataSourceRepository::new(
            config.datasources.iter().cloned(),
        ));
        let queries = Arc::new(QueryService::new(
            sources,
            registry.clone(),
            config.query.default_timeout(),
        ));
        let metrics = Arc::new(MetricsAggregator::new(config.metrics.capacity));

        let repository: Arc<dyn JobRepository> = match (config.jobs.backend, &config.jobs.url) {
            (JobsBackend::Postgres, Some(url)) => Arc::new(
                PostgresJobRepository::connect(url)
                    .await
                    .context("failed to open the job store")?,
            ),
            _ => {
                debug!("Using in-memory job store");
                Arc::new(InMemoryJobRepository::new())
            }
        };
        let jobs = JobLifecycleManager::new(repository);

        let queue = match &config.queue {
            Some(section) => Some(open_queue(section).await?),
            None => {
                info!("No queue configured, async queries run synchronously");
                None
            }
        };

        info!(
            environment = %config.environment,
            data_sources = config.datasources.len(),
            "Gateway initialized"
        );

        Ok(Self {
            config,
            registry,
            queries,
            metrics,
            jobs,
            queue,
        })
    }

    pub fn app_state(&self) -> AppState {
        let state = AppState::new(
            self.config.environment.clone(),
            self.queries.clone(),
            self.metrics.clone(),
        );
        match &self.queue {
            Some(queue) => state.with_async(self.jobs.clone(), queue.clone()),
            None => state.with_jobs(self.jobs.clone()),
        }
    }

    /// Consumer running deferred queries, if a queue is configured
    pub fn consumer(&self) -> Option<Consumer> {
        let (queue, section) = (self.queue.as_ref()?, self.config.queue.as_ref()?);
        let processor = JobProcessor::new(
            self.jobs.clone(),
            self.queries.clone(),
            self.metrics.clone(),
            RetryPolicy::new(section.max_attempts),
        );
        Some(Consumer::new(
            queue.clone(),
            Arc::new(processor),
            section.consumer_options(),
        ))
    }

    pub async fn close(&self) {
        self.registry.close_all().await;
    }
}

async fn open_queue(section: &QueueSection) -> anyhow::Result<Arc<dyn JobQueue>> {
    match (section.backend, &section.url) {
        (QueueBackend::Redis, Some(url)) => {
            let mut redis = RedisQueueConfig::new(url.clone(), section.name.clone());
            match &section.consumer {
                Some(name) => redis.consumer_name = name.clone(),
                None => info!(
                    consumer = %redis.consumer_name,
                    "No queue.consumer configured, using a generated name"
                ),
            }
            let queue = RedisQueue::connect(redis)
                .await
                .context("failed to connect the job queue")?;
            Ok(Arc::new(queue))
        }
        _ => {
            debug!("Using in-memory job queue");
            Ok(Arc::new(MemoryQueue::new()))
        }
    }
}
