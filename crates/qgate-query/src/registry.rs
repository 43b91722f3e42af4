use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::datasource::DataSource;
use crate::error::{QueryError, Result};
use crate::traits::{Connector, ConnectorFactory, DataSourceRepository};

/// Connector factories plus a per-data-source connector cache
pub struct QueryRegistry {
    factories: Arc<RwLock<HashMap<String, Arc<dyn ConnectorFactory>>>>,
    connectors: Arc<RwLock<HashMap<String, Arc<dyn Connector>>>>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self {
            factories: Arc::new(RwLock::new(HashMap::new())),
            connectors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a factory for a backend type
    pub async fn register_factory(&self, factory: Arc<dyn ConnectorFactory>) {
        let backend = factory.backend_type();
        let mut factories = self.factories.write().await;

        if factories.contains_key(backend) {
            warn!("Overwriting existing connector factory for backend: {}", backend);
        }

        factories.insert(backend.to_string(), factory);
        debug!("Registered connector factory for backend: {}", backend);
    }

    /// Cached connector for `data_source`, connecting on first use or after the old one closed
    pub async fn connector_for(&self, data_source: &DataSource) -> Result<Arc<dyn Connector>> {
        {
            let connectors = self.connectors.read().await;
            if let Some(connector) = connectors.get(&data_source.name) {
                if !connector.is_closed() {
                    return Ok(connector.clone());
                }
            }
        }

        let factory = self
            .factories
            .read()
            .await
            .get(&data_source.source_type)
            .cloned()
            .ok_or_else(|| QueryError::UnsupportedType(data_source.source_type.clone()))?;

        debug!(
            "Connecting data source {} (backend: {})",
            data_source.name, data_source.source_type
        );
        let connector = factory.connect(data_source).await?;

        let mut connectors = self.connectors.write().await;
        if let Some(existing) = connectors.get(&data_source.name) {
            if !existing.is_closed() {
                // Lost a connect race; keep the connector that is already shared
                let existing = existing.clone();
                drop(connectors);
                let _ = connector.close().await;
                return Ok(existing);
            }
        }
        connectors.insert(data_source.name.clone(), connector.clone());
        Ok(connector)
    }

    /// Drop and close the cached connector for a data source
    pub async fn remove_connector(&self, name: &str) -> Result<()> {
        let removed = self.connectors.write().await.remove(name);
        if let Some(connector) = removed {
            debug!("Closing connector: {}", name);
            connector.close().await?;
        }
        Ok(())
    }

    pub async fn close_all(&self) {
        let drained: Vec<_> = self.connectors.write().await.drain().collect();
        for (name, connector) in drained {
            if let Err(e) = connector.close().await {
                warn!("Failed to close connector {}: {}", name, e);
            }
        }
    }

    pub async fn list_backends(&self) -> Vec<String> {
        self.factories.read().await.keys().cloned().collect()
    }

    pub async fn has_backend(&self, backend: &str) -> bool {
        self.factories.read().await.contains_key(backend)
    }
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Data sources held in memory, typically loaded from configuration
#[derive(Default)]
pub struct InMemoryDataSourceRepository {
    sources: parking_lot::RwLock<HashMap<String, DataSource>>,
}

impl InMemoryDataSourceRepository {
    pub fn new(sources: impl IntoIterator<Item = DataSource>) -> Self {
        Self {
            sources: parking_lot::RwLock::new(
                sources
                    .into_iter()
                    .map(|source| (source.name.clone(), source))
                    .collect(),
            ),
        }
    }

    /// Insert or replace a data source
    pub fn upsert(&self, source: DataSource) {
        self.sources.write().insert(source.name.clone(), source);
    }
}

#[async_trait]
impl DataSourceRepository for InMemoryDataSourceRepository {
    async fn get_by_name(&self, name: &str) -> Result<Option<DataSource>> {
        Ok(self.sources.read().get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<DataSource>> {
        let mut sources: Vec<_> = self.sources.read().values().cloned().collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sources)
    }
}
