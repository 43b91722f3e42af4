//! # qgate-query
//!
//! Turns a JSON-described, single-table read request into a parameterized SQL
//! statement for a registered data source, and runs it through a backend
//! connector.
//!
//! ## Architecture
//!
//! - **validate**: identifier whitelist in lenient-drop and strict-reject modes
//! - **compiler**: request + data source to `SELECT`/`COUNT` SQL and bound parameters
//! - **Connector** / **ConnectorFactory**: backend traits, implemented by
//!   `qgate-query-postgres`
//! - **QueryRegistry**: factories plus a per-data-source connector cache
//! - **QueryService**: lookup, compile, execute, scrub blocked columns
//!
//! ## Example
//!
//! ```rust
//! use qgate_query::{compile, DataSource, FilterField, QueryRequest};
//!
//! let source = DataSource {
//!     name: "main".into(),
//!     source_type: "postgres".into(),
//!     ..Default::default()
//! };
//! let mut request = QueryRequest::default();
//! request.filter.insert("status".into(), FilterField::eq("active"));
//!
//! let compiled = compile("users", &request, &source).unwrap();
//! assert_eq!(
//!     compiled.select_sql,
//!     r#"SELECT * FROM "users" WHERE "status" = $1 LIMIT $2 OFFSET $3"#
//! );
//! ```

pub mod compiler;
pub mod datasource;
pub mod error;
pub mod registry;
pub mod service;
pub mod traits;
pub mod types;
pub mod validate;

pub use compiler::{compile, effective_limit, validate_target, CompiledQuery, DEFAULT_LIMIT, MAX_LIMIT};
pub use datasource::{
    Capabilities, ConnectionSettings, DataSource, DataSourceSummary, Limits, POSTGRES_TYPE,
};
pub use error::{QueryError, Result};
pub use registry::{InMemoryDataSourceRepository, QueryRegistry};
pub use service::{PreparedQuery, QueryService, DEFAULT_QUERY_TIMEOUT};
pub use traits::{Connector, ConnectorFactory, DataSourceRepository};
pub use types::{CellValue, FilterField, OrderField, QueryMetadata, QueryRequest, QueryResponse, Row};
pub use validate::ValidationMode;
