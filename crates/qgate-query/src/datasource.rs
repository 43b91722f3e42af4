//! Registered data source descriptors and their column blocklists

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::Row;

pub const POSTGRES_TYPE: &str = "postgres";

/// A named relational backend callers may query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub limits: Limits,
    /// Entries of the form `table.column`, compared case-insensitively
    #[serde(default)]
    pub blocked_columns: Vec<String>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    /// Upper bound on sessions opened for this source
    pub max_connections: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            ssl_mode: "disable".to_string(),
            max_connections: 10,
        }
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Informational only; the compiler never reads these
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub supports_joins: bool,
    pub supports_transactions: bool,
    pub max_depth_limit: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Limits {
    /// Row ceiling for this source; `0` keeps the global ceiling
    pub max_rows: i64,
    /// Per-query deadline; `0` falls back to the service default
    pub query_timeout_ms: u64,
}

/// Public view of a data source without connection details
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DataSourceSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub description: String,
}

impl DataSource {
    pub fn summary(&self) -> DataSourceSummary {
        DataSourceSummary {
            name: self.name.clone(),
            source_type: self.source_type.clone(),
            description: self.description.clone(),
        }
    }

    pub fn is_postgres(&self) -> bool {
        self.source_type == POSTGRES_TYPE
    }

    /// Whether `table.column` appears in the blocklist
    pub fn is_column_blocked(&self, table: &str, column: &str) -> bool {
        let qualified = format!("{}.{}", table, column).to_lowercase();
        self.blocked_columns
            .iter()
            .any(|entry| entry.to_lowercase() == qualified)
    }

    /// Column names blocked for `table`
    pub fn blocked_columns_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.blocked_columns.iter().filter_map(move |entry| {
            let (entry_table, column) = entry.split_once('.')?;
            entry_table.eq_ignore_ascii_case(table).then_some(column)
        })
    }

    /// Remove every blocked column of `table` from `row`
    pub fn scrub_row(&self, table: &str, row: &mut Row) {
        let blocked: Vec<&str> = self.blocked_columns_for(table).collect();
        if blocked.is_empty() {
            return;
        }
        row.retain(|column, _| !blocked.iter().any(|b| b.eq_ignore_ascii_case(column)));
    }
}
