//! PostgreSQL connector for qgate-query
//!
//! Each query checks out its own session from a per-data-source pool.
//! Statements are prepared first so that each JSON parameter can be bound to the
//! type the server inferred for its slot. When the execution context is
//! interrupted a server-side cancel is sent for that session only, and the
//! session is discarded instead of going back to the pool.

mod params;
mod values;

pub use params::{bind_param, PgParam};

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use qgate_core::{ExecutionContext, Interrupted};
use qgate_query::{
    ConnectionSettings, Connector, ConnectorFactory, DataSource, QueryError, Result,
    Row as ResultRow, POSTGRES_TYPE,
};
use serde_json::Value;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::ToSql;
use tokio_postgres::{CancelToken, Client, Config, NoTls};
use tracing::{debug, warn};

/// Pooled PostgreSQL sessions for one data source
pub struct PostgresConnector {
    pool: Pool,
    database_name: String,
}

impl PostgresConnector {
    /// Build the pool and open a first session to surface bad settings early
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self> {
        debug!(
            "Connecting to PostgreSQL: {}@{}:{}/{}",
            settings.user, settings.host, settings.port, settings.database
        );

        let pool = build_pool(settings)?;
        pool.get().await.map_err(|e| {
            QueryError::ConnectionFailed(format!("PostgreSQL connection failed: {}", e))
        })?;

        debug!(
            "Successfully connected to PostgreSQL database: {}",
            settings.database
        );

        Ok(Self {
            pool,
            database_name: settings.database.clone(),
        })
    }

    fn interrupted(&self, reason: Interrupted) -> QueryError {
        debug!("Query on {} interrupted: {}", self.database_name, reason);
        QueryError::interrupted(reason, 0)
    }
}

fn build_pool(settings: &ConnectionSettings) -> Result<Pool> {
    let manager = Manager::from_config(
        pg_config(settings)?,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );

    Pool::builder(manager)
        .max_size(settings.max_connections.max(1))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| QueryError::ConnectionFailed(format!("failed to create pool: {}", e)))
}

async fn run(client: &Client, sql: &str, params: &[Value]) -> Result<Vec<ResultRow>> {
    let statement = client.prepare(sql).await.map_err(map_pg_error)?;

    let types = statement.params();
    if types.len() != params.len() {
        return Err(QueryError::Internal(format!(
            "statement expects {} parameters, got {}",
            types.len(),
            params.len()
        )));
    }

    let bound = params
        .iter()
        .zip(types)
        .map(|(value, ty)| bind_param(value, ty))
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&(dyn ToSql + Sync)> =
        bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

    let rows = client.query(&statement, &refs).await.map_err(map_pg_error)?;

    Ok(rows.iter().map(values::row_to_cells).collect())
}

/// Abort the statement running on one session and drop that session
fn abandon_session(session: Object, token: CancelToken, database: String) {
    // Detached from the pool so the cancelled session is never reused
    let client = Object::take(session);
    tokio::spawn(async move {
        if let Err(e) = token.cancel_query(NoTls).await {
            warn!("Failed to cancel PostgreSQL query on {}: {}", database, e);
        }
        drop(client);
    });
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn query(
        &self,
        ctx: &ExecutionContext,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<ResultRow>> {
        let session = match ctx.run(self.pool.get()).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                return Err(QueryError::ConnectionFailed(format!(
                    "no PostgreSQL session available: {}",
                    e
                )))
            }
            Err(reason) => return Err(self.interrupted(reason)),
        };
        let token = session.cancel_token();

        let outcome = ctx.run(run(&session, sql, params)).await;
        match outcome {
            Ok(result) => result,
            Err(reason) => {
                abandon_session(session, token, self.database_name.clone());
                Err(self.interrupted(reason))
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing PostgreSQL pool for {}", self.database_name);
        self.pool.close();
        Ok(())
    }
}

pub struct PostgresConnectorFactory;

#[async_trait]
impl ConnectorFactory for PostgresConnectorFactory {
    fn backend_type(&self) -> &'static str {
        POSTGRES_TYPE
    }

    async fn connect(&self, data_source: &DataSource) -> Result<Arc<dyn Connector>> {
        let connector = PostgresConnector::connect(&data_source.connection).await?;
        Ok(Arc::new(connector))
    }
}

fn parse_ssl_mode(mode: &str) -> Result<SslMode> {
    match mode.to_ascii_lowercase().as_str() {
        "" | "disable" => Ok(SslMode::Disable),
        "allow" | "prefer" => Ok(SslMode::Prefer),
        "require" | "verify-ca" | "verify-full" => Ok(SslMode::Require),
        other => Err(QueryError::ConnectionFailed(format!(
            "unsupported sslMode: {}",
            other
        ))),
    }
}

fn pg_config(settings: &ConnectionSettings) -> Result<Config> {
    let mut config = Config::new();
    config
        .host(&settings.host)
        .port(settings.port)
        .user(&settings.user)
        .password(&settings.password)
        .dbname(&settings.database)
        .application_name("qgate")
        .ssl_mode(parse_ssl_mode(&settings.ssl_mode)?);
    Ok(config)
}

/// SQLSTATE classes for statements the server will never accept as written
fn is_statement_error(sqlstate: &str) -> bool {
    // 22: data exception, 42: syntax error or access rule violation
    sqlstate.starts_with("22") || sqlstate.starts_with("42")
}

fn map_pg_error(e: tokio_postgres::Error) -> QueryError {
    if let Some(db_error) = e.as_db_error() {
        let message = db_error.message().to_string();
        if is_statement_error(db_error.code().code()) {
            return QueryError::StatementRejected(message);
        }
        return QueryError::QueryFailed {
            message,
            detail: db_error.detail().map(str::to_string),
        };
    }

    if e.is_closed() {
        return QueryError::ConnectionFailed(e.to_string());
    }
    QueryError::query_failed(e.to_string())
}
