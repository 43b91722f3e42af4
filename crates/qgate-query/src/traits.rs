use std::sync::Arc;

use async_trait::async_trait;
use qgate_core::ExecutionContext;
use serde_json::Value;

use crate::datasource::DataSource;
use crate::error::Result;
use crate::types::Row;

/// An open connection able to run compiled statements
#[async_trait]
pub trait Connector: Send + Sync {
    /// Run `sql` with positional `params`, honouring the context's deadline and cancellation
    async fn query(&self, ctx: &ExecutionContext, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Whether the underlying connection is gone and must be re-established
    fn is_closed(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<()>;
}

/// Creates connectors for one backend type
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    fn backend_type(&self) -> &'static str;

    async fn connect(&self, data_source: &DataSource) -> Result<Arc<dyn Connector>>;
}

/// Lookup of data source descriptors by name
#[async_trait]
pub trait DataSourceRepository: Send + Sync {
    /// `Ok(None)` when no source has that name
    async fn get_by_name(&self, name: &str) -> Result<Option<DataSource>>;

    async fn list(&self) -> Result<Vec<DataSource>>;
}
