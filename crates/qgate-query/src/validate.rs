//! Identifier and sort-direction whitelisting
//!
//! Two modes are exposed. [`ValidationMode::LenientDrop`] silently skips an
//! invalid name (filter keys and `orderBy` fields); [`ValidationMode::StrictReject`]
//! turns it into an error (explicit projection `fields`).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::QueryError;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("identifier pattern is valid"));

static DIRECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)(asc|desc)$").expect("direction pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Invalid names are dropped from the generated SQL
    LenientDrop,
    /// Invalid names fail the whole request with `INVALID_INPUT`
    StrictReject,
}

pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Check a column name under `mode`
///
/// Returns `Ok(true)` when the column should be emitted, `Ok(false)` when it
/// should be dropped, and an error only in strict mode.
pub fn check_column(name: &str, mode: ValidationMode) -> Result<bool, QueryError> {
    if is_valid_identifier(name) {
        return Ok(true);
    }
    match mode {
        ValidationMode::LenientDrop => Ok(false),
        ValidationMode::StrictReject => Err(QueryError::InvalidColumn(name.to_string())),
    }
}

pub fn validate_table(table: &str) -> Result<(), QueryError> {
    if is_valid_identifier(table) {
        Ok(())
    } else {
        Err(QueryError::InvalidTable)
    }
}

pub fn validate_schema(schema: Option<&str>) -> Result<(), QueryError> {
    match schema {
        Some(schema) if !is_valid_identifier(schema) => Err(QueryError::InvalidSchema),
        _ => Ok(()),
    }
}

/// `ASC` or `DESC`; anything unrecognised sorts ascending
pub fn normalize_direction(direction: &str) -> &'static str {
    if DIRECTION.is_match(direction) && direction.eq_ignore_ascii_case("desc") {
        "DESC"
    } else {
        "ASC"
    }
}

/// Double-quote an identifier, doubling any embedded quote
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
