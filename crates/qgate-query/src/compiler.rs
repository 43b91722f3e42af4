//! Compiles a [`QueryRequest`] into parameterized SQL for one data source
//!
//! Identifiers are whitelisted and quoted; every caller-supplied value is a bound
//! parameter. Blocklist enforcement happens before any SQL text is produced.

use serde_json::Value;

use crate::datasource::DataSource;
use crate::error::{QueryError, Result};
use crate::types::QueryRequest;
use crate::validate::{
    check_column, normalize_direction, quote_ident, validate_schema, validate_table,
    ValidationMode,
};

/// Rows returned when the request leaves `limit` unset or non-positive
pub const DEFAULT_LIMIT: i64 = 100;
/// Global row ceiling; a data source may only lower it
pub const MAX_LIMIT: i64 = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Quoted, optionally schema-qualified target
    pub target: String,
    pub select_sql: String,
    pub count_sql: Option<String>,
    /// Bound values; `limit` and `offset` are always the last two
    pub params: Vec<Value>,
    pub limit: i64,
    pub offset: i64,
}

impl CompiledQuery {
    /// Parameters shared with the count statement (everything but limit/offset)
    pub fn count_params(&self) -> &[Value] {
        &self.params[..self.params.len().saturating_sub(2)]
    }
}

/// Identifier checks for the table and optional schema
pub fn validate_target(table: &str, schema: Option<&str>) -> Result<()> {
    validate_table(table)?;
    validate_schema(schema)
}

/// Clamp a requested limit to the default, the global ceiling and `max_rows`
pub fn effective_limit(requested: i64, max_rows: i64) -> i64 {
    let limit = if requested > 0 { requested } else { DEFAULT_LIMIT };
    let ceiling = if max_rows > 0 && max_rows < MAX_LIMIT {
        max_rows
    } else {
        MAX_LIMIT
    };
    limit.min(ceiling)
}

pub fn compile(table: &str, request: &QueryRequest, data_source: &DataSource) -> Result<CompiledQuery> {
    let schema = request.schema_name();
    validate_target(table, schema)?;

    if !data_source.is_postgres() {
        return Err(QueryError::UnsupportedType(data_source.source_type.clone()));
    }

    enforce_blocklist(table, request, data_source)?;

    let limit = effective_limit(request.limit, data_source.limits.max_rows);
    let offset = request.offset.max(0);

    let target = match schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
        None => quote_ident(table),
    };

    let projection = if request.fields.is_empty() {
        "*".to_string()
    } else {
        request
            .fields
            .iter()
            .map(|field| quote_ident(field))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let (where_clause, mut params) = build_where(request)?;
    let order_clause = build_order(request)?;

    let count_sql = request.count_total.then(|| {
        join_clauses(&[
            format!("SELECT COUNT(1) AS total FROM {}", target),
            where_clause.clone(),
        ])
    });

    let limit_index = params.len() + 1;
    params.push(Value::from(limit));
    params.push(Value::from(offset));

    let select_sql = join_clauses(&[
        format!("SELECT {} FROM {}", projection, target),
        where_clause,
        order_clause,
        format!("LIMIT ${} OFFSET ${}", limit_index, limit_index + 1),
    ]);

    Ok(CompiledQuery {
        target,
        select_sql,
        count_sql,
        params,
        limit,
        offset,
    })
}

fn enforce_blocklist(table: &str, request: &QueryRequest, data_source: &DataSource) -> Result<()> {
    let mut filter_keys: Vec<&String> = request.filter.keys().collect();
    filter_keys.sort();

    for column in filter_keys {
        if data_source.is_column_blocked(table, column) {
            return Err(QueryError::ColumnBlocked(column.clone()));
        }
    }

    for order in &request.order_by {
        if data_source.is_column_blocked(table, &order.field) {
            return Err(QueryError::ColumnBlocked(order.field.clone()));
        }
    }

    for field in &request.fields {
        check_column(field, ValidationMode::StrictReject)?;
        if data_source.is_column_blocked(table, field) {
            return Err(QueryError::ColumnBlocked(field.clone()));
        }
    }

    Ok(())
}

fn build_where(request: &QueryRequest) -> Result<(String, Vec<Value>)> {
    let mut columns: Vec<_> = request.filter.iter().collect();
    columns.sort_by(|a, b| a.0.cmp(b.0));

    let mut clauses = Vec::new();
    let mut params = Vec::new();

    for (column, field) in columns {
        if !check_column(column, ValidationMode::LenientDrop)? {
            continue;
        }
        let ident = quote_ident(column);
        for (op, value) in field.operands() {
            params.push(value.clone());
            clauses.push(format!("{} {} ${}", ident, op, params.len()));
        }
    }

    if clauses.is_empty() {
        return Ok((String::new(), params));
    }
    Ok((format!("WHERE {}", clauses.join(" AND ")), params))
}

fn build_order(request: &QueryRequest) -> Result<String> {
    let mut clauses = Vec::new();
    for order in &request.order_by {
        if !check_column(&order.field, ValidationMode::LenientDrop)? {
            continue;
        }
        clauses.push(format!(
            "{} {}",
            quote_ident(&order.field),
            normalize_direction(&order.direction)
        ));
    }

    if clauses.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("ORDER BY {}", clauses.join(", ")))
}

fn join_clauses(parts: &[String]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}
