//! Gateway configuration file
//!
//! Every section is optional. Leaving out `queue` turns deferred execution off;
//! jobs are still stored so `/jobs` lookups keep working.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use qgate_jobs::DEFAULT_MAX_ATTEMPTS;
use qgate_query::{DataSource, DEFAULT_QUERY_TIMEOUT};
use qgate_queue::ConsumerOptions;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub environment: String,
    pub query: QuerySection,
    pub metrics: MetricsSection,
    pub queue: Option<QueueSection>,
    pub jobs: JobsSection,
    pub datasources: Vec<DataSource>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            query: QuerySection::default(),
            metrics: MetricsSection::default(),
            queue: None,
            jobs: JobsSection::default(),
            datasources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuerySection {
    pub default_timeout_ms: u64,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_QUERY_TIMEOUT.as_millis() as u64,
        }
    }
}

impl QuerySection {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSection {
    /// Size of the rolling window of recorded queries
    pub capacity: usize,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSection {
    pub backend: QueueBackend,
    pub url: Option<String>,
    pub name: String,
    /// Redis consumer name; must be stable across restarts and unique among
    /// running consumers. Generated per process when absent.
    pub consumer: Option<String>,
    pub max_attempts: u32,
    pub message_timeout_secs: u64,
    pub max_in_flight: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        let consumer = ConsumerOptions::default();
        Self {
            backend: QueueBackend::Memory,
            url: None,
            name: "qgate:jobs".to_string(),
            consumer: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            message_timeout_secs: consumer.message_timeout.as_secs(),
            max_in_flight: consumer.max_in_flight,
        }
    }
}

impl QueueSection {
    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions {
            message_timeout: Duration::from_secs(self.message_timeout_secs),
            max_in_flight: self.max_in_flight.max(1),
            max_attempts: self.max_attempts.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobsBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsSection {
    pub backend: JobsBackend,
    pub url: Option<String>,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            backend: JobsBackend::Memory,
            url: None,
        }
    }
}

impl GatewayConfig {
    /// Load from `path`, or fall back to defaults when no file is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                Self::from_yaml(&raw)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        // An empty document deserializes to unit, not to an empty mapping
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(queue) = &self.queue {
            if queue.backend == QueueBackend::Redis && queue.url.is_none() {
                bail!("queue.url is required for the redis backend");
            }
        }
        if self.jobs.backend == JobsBackend::Postgres && self.jobs.url.is_none() {
            bail!("jobs.url is required for the postgres backend");
        }
        let mut names: Vec<&str> = self.datasources.iter().map(|ds| ds.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            bail!("duplicate data source name: {}", pair[0]);
        }
        Ok(())
    }

    /// A worker in its own process only sees jobs through shared backends
    pub fn ensure_shared_backends(&self) -> anyhow::Result<()> {
        match &self.queue {
            None => bail!("no queue configured; the worker has nothing to consume"),
            Some(queue) if queue.backend == QueueBackend::Memory => {
                bail!("the memory queue is only reachable from `serve`; configure redis")
            }
            Some(queue) if queue.consumer.is_none() => {
                bail!("queue.consumer must name this worker; each worker needs its own name")
            }
            Some(_) => {}
        }
        if self.jobs.backend == JobsBackend::Memory {
            bail!("the memory job store is only reachable from `serve`; configure postgres");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = GatewayConfig::from_yaml("").unwrap();
        assert_eq!(config.environment, "development");
        assert_eq!(config.query.default_timeout_ms, 4000);
        assert_eq!(config.metrics.capacity, 1000);
        assert!(config.queue.is_none());
        assert_eq!(config.jobs.backend, JobsBackend::Memory);
        assert!(config.datasources.is_empty());
    }

    #[test]
    fn test_full_file() {
        let config = GatewayConfig::from_yaml(
            r#"
environment: production
query:
  defaultTimeoutMs: 2500
metrics:
  capacity: 50
queue:
  backend: redis
  url: redis://localhost:6379
  name: gateway-jobs
  consumer: worker-1
  maxAttempts: 3
  messageTimeoutSecs: 10
  maxInFlight: 4
jobs:
  backend: postgres
  url: postgres://qgate@localhost/qgate
datasources:
  - name: main
    type: postgres
    description: primary database
    connection:
      host: db.internal
      user: reader
      password: secret
      database: app
    limits:
      maxRows: 500
    blockedColumns:
      - users.password_hash
"#,
        )
        .unwrap();

        assert_eq!(config.environment, "production");
        assert_eq!(config.query.default_timeout(), Duration::from_millis(2500));
        assert_eq!(config.metrics.capacity, 50);

        let queue = config.queue.as_ref().unwrap();
        assert_eq!(queue.backend, QueueBackend::Redis);
        assert_eq!(queue.name, "gateway-jobs");
        assert_eq!(queue.consumer.as_deref(), Some("worker-1"));
        assert_eq!(queue.max_attempts, 3);
        let options = queue.consumer_options();
        assert_eq!(options.message_timeout, Duration::from_secs(10));
        assert_eq!(options.max_in_flight, 4);
        assert_eq!(options.max_attempts, 3);

        assert_eq!(config.jobs.backend, JobsBackend::Postgres);
        assert_eq!(config.datasources.len(), 1);
        let ds = &config.datasources[0];
        assert_eq!(ds.connection.host, "db.internal");
        assert_eq!(ds.connection.port, 5432);
        assert_eq!(ds.blocked_columns, vec!["users.password_hash".to_string()]);
        assert!(config.ensure_shared_backends().is_ok());
    }

    #[test]
    fn test_queue_section_defaults() {
        let config = GatewayConfig::from_yaml("queue:\n  backend: memory\n").unwrap();
        let queue = config.queue.unwrap();
        assert_eq!(queue.name, "qgate:jobs");
        assert!(queue.consumer.is_none());
        assert_eq!(queue.max_attempts, 5);
        assert_eq!(queue.message_timeout_secs, 30);
    }

    #[test]
    fn test_redis_without_url_is_rejected() {
        let err = GatewayConfig::from_yaml("queue:\n  backend: redis\n").unwrap_err();
        assert!(err.to_string().contains("queue.url"));
    }

    #[test]
    fn test_postgres_jobs_without_url_is_rejected() {
        let err = GatewayConfig::from_yaml("jobs:\n  backend: postgres\n").unwrap_err();
        assert!(err.to_string().contains("jobs.url"));
    }

    #[test]
    fn test_duplicate_datasource_names_are_rejected() {
        let err = GatewayConfig::from_yaml(
            "datasources:\n  - name: main\n    type: postgres\n  - name: main\n    type: postgres\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate data source name: main"));
    }

    #[test]
    fn test_worker_needs_shared_backends() {
        let config = GatewayConfig::from_yaml("queue:\n  backend: memory\n").unwrap();
        assert!(config.ensure_shared_backends().is_err());
        assert!(GatewayConfig::default().ensure_shared_backends().is_err());
    }

    #[test]
    fn test_worker_needs_its_own_consumer_name() {
        let unnamed = GatewayConfig::from_yaml(
            "queue:\n  backend: redis\n  url: redis://localhost\njobs:\n  backend: postgres\n  url: postgres://localhost/qgate\n",
        )
        .unwrap();
        let err = unnamed.ensure_shared_backends().unwrap_err();
        assert!(err.to_string().contains("queue.consumer"));

        let mut named = unnamed.clone();
        if let Some(queue) = named.queue.as_mut() {
            queue.consumer = Some("worker-2".into());
        }
        assert!(named.ensure_shared_backends().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "environment: staging").unwrap();

        let config = GatewayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.environment, "staging");
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        let err = GatewayConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("absent.yaml"));
    }

    #[test]
    fn test_load_without_path() {
        let config = GatewayConfig::load(None).unwrap();
        assert_eq!(config.metrics.capacity, 1000);
    }
}
