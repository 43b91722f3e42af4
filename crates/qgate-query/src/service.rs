use std::sync::Arc;
use std::time::{Duration, Instant};

use qgate_core::ExecutionContext;
use tracing::{debug, warn};

use crate::compiler::{compile, validate_target, CompiledQuery};
use crate::datasource::{DataSource, DataSourceSummary};
use crate::error::{QueryError, Result};
use crate::registry::QueryRegistry;
use crate::traits::DataSourceRepository;
use crate::types::{QueryMetadata, QueryRequest, QueryResponse};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(4000);

/// A validated, compiled request bound to its data source
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub data_source: DataSource,
    pub table: String,
    pub compiled: CompiledQuery,
}

/// Validates, compiles and executes table queries against registered data sources
pub struct QueryService {
    repository: Arc<dyn DataSourceRepository>,
    registry: Arc<QueryRegistry>,
    default_timeout: Duration,
}

impl QueryService {
    pub fn new(
        repository: Arc<dyn DataSourceRepository>,
        registry: Arc<QueryRegistry>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            registry,
            default_timeout,
        }
    }

    pub async fn list_data_sources(&self) -> Result<Vec<DataSourceSummary>> {
        let sources = self.repository.list().await?;
        Ok(sources.iter().map(DataSource::summary).collect())
    }

    /// Validate and compile without executing
    pub async fn prepare(
        &self,
        source_name: &str,
        table: &str,
        request: &QueryRequest,
    ) -> Result<PreparedQuery> {
        validate_target(table, request.schema_name())?;

        let data_source = self
            .repository
            .get_by_name(source_name)
            .await?
            .ok_or_else(|| QueryError::DataSourceNotFound(source_name.to_string()))?;

        let compiled = compile(table, request, &data_source)?;
        Ok(PreparedQuery {
            data_source,
            table: table.to_string(),
            compiled,
        })
    }

    pub async fn query_table(
        &self,
        ctx: &ExecutionContext,
        source_name: &str,
        table: &str,
        request: &QueryRequest,
    ) -> Result<QueryResponse> {
        let prepared = self.prepare(source_name, table, request).await?;
        self.execute(ctx, &prepared).await
    }

    /// Run a prepared query under `ctx`, bounded by the data source timeout
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        prepared: &PreparedQuery,
    ) -> Result<QueryResponse> {
        let PreparedQuery {
            data_source,
            table,
            compiled,
        } = prepared;

        let timeout = self.timeout_for(data_source);
        let ctx = ctx.child().timeout(timeout);
        let connector = self.registry.connector_for(data_source).await?;

        debug!(
            data_source = %data_source.name,
            table = %table,
            sql = %compiled.select_sql,
            "Executing table query"
        );

        let started = Instant::now();
        let mut rows = connector
            .query(&ctx, &compiled.select_sql, &compiled.params)
            .await
            .map_err(|e| match e {
                QueryError::QueryTimeout(_) => QueryError::QueryTimeout(timeout.as_millis() as u64),
                other => other,
            })?;
        let took_ms = started.elapsed().as_millis() as i64;

        for row in rows.iter_mut() {
            data_source.scrub_row(table, row);
        }

        let total = match &compiled.count_sql {
            Some(count_sql) => {
                match connector
                    .query(&ctx, count_sql, compiled.count_params())
                    .await
                {
                    Ok(count_rows) => count_rows
                        .first()
                        .and_then(|row| row.get("total"))
                        .and_then(|value| value.as_i64()),
                    Err(e) => {
                        warn!(
                            data_source = %data_source.name,
                            table = %table,
                            "Count query failed, omitting total: {}",
                            e
                        );
                        None
                    }
                }
            }
            None => None,
        };

        Ok(QueryResponse {
            metadata: QueryMetadata {
                rows: rows.len(),
                table: table.clone(),
                took_ms,
                total,
            },
            data: rows,
        })
    }

    fn timeout_for(&self, data_source: &DataSource) -> Duration {
        match data_source.limits.query_timeout_ms {
            0 => self.default_timeout,
            ms => Duration::from_millis(ms),
        }
    }
}
