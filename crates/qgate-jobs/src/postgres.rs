//! PostgreSQL job store
//!
//! Merges are a single `UPDATE ... RETURNING` statement so concurrent updates
//! to one job serialize on the row lock.

use async_trait::async_trait;
use qgate_core::UtcDateTime;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

use crate::error::{JobError, Result};
use crate::repository::JobRepository;
use crate::types::{JobUpdate, Patch, QueryJob};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS query_jobs (
    id TEXT PRIMARY KEY,
    payload_hash TEXT NOT NULL,
    api_key TEXT,
    data_source TEXT NOT NULL,
    table_name TEXT NOT NULL,
    status TEXT NOT NULL,
    row_count BIGINT,
    took_ms BIGINT,
    error TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    started_at TIMESTAMPTZ,
    finished_at TIMESTAMPTZ
)"#;

const CREATE_HASH_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_query_jobs_payload_hash ON query_jobs (payload_hash)";

const COLUMNS: &str = "id, payload_hash, api_key, data_source, table_name, status, row_count, \
                       took_ms, error, created_at, started_at, finished_at";

pub struct PostgresJobRepository {
    client: Client,
}

impl PostgresJobRepository {
    /// Connect with a libpq-style URL and create the jobs table if needed
    pub async fn connect(url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Job store connection error: {}", e);
            }
        });

        let repository = Self { client };
        repository.ensure_schema().await?;
        info!("Job store ready");
        Ok(repository)
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.client.batch_execute(CREATE_TABLE).await?;
        self.client.batch_execute(CREATE_HASH_INDEX).await?;
        Ok(())
    }
}

fn job_from_row(row: &Row) -> Result<QueryJob> {
    let status: String = row.try_get("status")?;
    Ok(QueryJob {
        id: row.try_get("id")?,
        payload_hash: row.try_get("payload_hash")?,
        api_key: row.try_get("api_key")?,
        data_source: row.try_get("data_source")?,
        table: row.try_get("table_name")?,
        status: status.parse()?,
        rows: row.try_get("row_count")?,
        took_ms: row.try_get("took_ms")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

/// Collects `SET` assignments and their parameters for one merge
struct UpdateBuilder {
    assignments: Vec<String>,
    params: Vec<Box<dyn ToSql + Sync + Send>>,
}

impl UpdateBuilder {
    fn new() -> Self {
        Self {
            assignments: Vec::new(),
            params: Vec::new(),
        }
    }

    fn set<T: ToSql + Sync + Send + 'static>(&mut self, column: &str, value: T) {
        self.params.push(Box::new(value));
        self.assignments
            .push(format!("{} = ${}", column, self.params.len()));
    }

    fn patch<T: ToSql + Sync + Send + 'static>(&mut self, column: &str, patch: Patch<T>) {
        match patch {
            Patch::Keep => {}
            Patch::Clear => self.assignments.push(format!("{} = NULL", column)),
            Patch::Set(value) => self.set(column, value),
        }
    }

    /// `UPDATE` statement keyed on the id, which becomes the last parameter
    fn build(mut self, id: &str) -> (String, Vec<Box<dyn ToSql + Sync + Send>>) {
        self.params.push(Box::new(id.to_string()));
        let sql = format!(
            "UPDATE query_jobs SET {} WHERE id = ${} RETURNING {}",
            self.assignments.join(", "),
            self.params.len(),
            COLUMNS
        );
        (sql, self.params)
    }
}

fn update_statement(id: &str, update: JobUpdate) -> (String, Vec<Box<dyn ToSql + Sync + Send>>) {
    let mut builder = UpdateBuilder::new();
    builder.set("status", update.status.as_str().to_string());
    builder.patch("row_count", update.rows);
    builder.patch("took_ms", update.took_ms);
    builder.patch("error", update.error);
    builder.patch::<UtcDateTime>("started_at", update.started_at);
    builder.patch::<UtcDateTime>("finished_at", update.finished_at);
    builder.build(id)
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    async fn insert(&self, job: &QueryJob) -> Result<()> {
        let sql = format!(
            "INSERT INTO query_jobs ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            COLUMNS
        );
        let status = job.status.as_str();
        let params: [&(dyn ToSql + Sync); 12] = [
            &job.id,
            &job.payload_hash,
            &job.api_key,
            &job.data_source,
            &job.table,
            &status,
            &job.rows,
            &job.took_ms,
            &job.error,
            &job.created_at,
            &job.started_at,
            &job.finished_at,
        ];

        self.client
            .execute(sql.as_str(), &params)
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    JobError::AlreadyExists(job.id.clone())
                } else {
                    JobError::from(e)
                }
            })?;
        debug!(job_id = %job.id, "Inserted job");
        Ok(())
    }

    async fn update_status(&self, id: &str, update: JobUpdate) -> Result<QueryJob> {
        let (sql, params) = update_statement(id, update);
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let row = self
            .client
            .query_opt(sql.as_str(), &refs)
            .await?
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        job_from_row(&row)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<QueryJob>> {
        let sql = format!("SELECT {} FROM query_jobs WHERE id = $1", COLUMNS);
        let row = self.client.query_opt(sql.as_str(), &[&id]).await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn get_by_payload_hash(&self, payload_hash: &str) -> Result<Vec<QueryJob>> {
        let sql = format!(
            "SELECT {} FROM query_jobs WHERE payload_hash = $1 ORDER BY created_at, id",
            COLUMNS
        );
        let rows = self.client.query(sql.as_str(), &[&payload_hash]).await?;
        rows.iter().map(job_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;
    use chrono::Utc;

    #[test]
    fn test_update_statement_covers_set_and_clear() {
        let mut update = JobUpdate::status(JobStatus::Succeeded);
        update.rows = Patch::Set(10);
        update.took_ms = Patch::Set(25);
        update.error = Patch::Clear;
        update.finished_at = Patch::Set(Utc::now());

        let (sql, params) = update_statement("job-1", update);
        assert_eq!(
            sql,
            format!(
                "UPDATE query_jobs SET status = $1, row_count = $2, took_ms = $3, error = NULL, \
                 finished_at = $4 WHERE id = $5 RETURNING {}",
                COLUMNS
            )
        );
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn test_status_only_update() {
        let (sql, params) = update_statement("job-1", JobUpdate::status(JobStatus::Running));
        assert!(sql.starts_with("UPDATE query_jobs SET status = $1 WHERE id = $2"));
        assert_eq!(params.len(), 2);
    }
}
