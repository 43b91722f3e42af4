//! Shared primitive types

use chrono::{DateTime as ChronoDateTime, Utc};

/// Standard UTC DateTime type used across all qgate crates
///
/// Serializes as RFC 3339 with a 'Z' suffix (`2025-10-12T12:15:47.609192Z`).
///
/// # OpenAPI Schema
/// When using with utoipa, add the schema attribute:
/// ```rust,ignore
/// #[schema(value_type = String, format = DateTime)]
/// pub field: UtcDateTime,
/// ```
pub type UtcDateTime = ChronoDateTime<Utc>;
