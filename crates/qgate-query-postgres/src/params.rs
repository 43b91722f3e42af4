//! Binding JSON filter values to the parameter types PostgreSQL inferred

use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use qgate_query::QueryError;
use serde_json::Value;
use tokio_postgres::types::{Format, IsNull, ToSql, Type};
use uuid::Uuid;

/// A parameter converted for one statement slot
#[derive(Debug, Clone, PartialEq)]
pub enum PgParam {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Json(Value),
    /// Sent in text format and parsed by the server (numeric, time, enums, ...)
    Raw(String),
}

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            PgParam::Null => Ok(IsNull::Yes),
            PgParam::Bool(v) => v.to_sql(ty, out),
            PgParam::Int2(v) => v.to_sql(ty, out),
            PgParam::Int4(v) => v.to_sql(ty, out),
            PgParam::Int8(v) => v.to_sql(ty, out),
            PgParam::Float4(v) => v.to_sql(ty, out),
            PgParam::Float8(v) => v.to_sql(ty, out),
            PgParam::Text(v) => v.to_sql(ty, out),
            PgParam::Uuid(v) => v.to_sql(ty, out),
            PgParam::Timestamp(v) => v.to_sql(ty, out),
            PgParam::TimestampTz(v) => v.to_sql(ty, out),
            PgParam::Date(v) => v.to_sql(ty, out),
            PgParam::Json(v) => v.to_sql(ty, out),
            PgParam::Raw(v) => {
                out.extend_from_slice(v.as_bytes());
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        match self {
            PgParam::Raw(_) => Format::Text,
            _ => Format::Binary,
        }
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.to_sql(ty, out)
    }
}

fn mismatch(value: &Value, ty: &Type) -> QueryError {
    QueryError::invalid_input(format!(
        "value {} is not valid for a parameter of type {}",
        value,
        ty.name()
    ))
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_naive_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Convert one JSON value into the parameter type PostgreSQL inferred for its slot
pub fn bind_param(value: &Value, ty: &Type) -> Result<PgParam, QueryError> {
    if value.is_null() {
        return Ok(PgParam::Null);
    }

    let param = match *ty {
        Type::BOOL => match value {
            Value::Bool(b) => PgParam::Bool(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => PgParam::Bool(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => PgParam::Bool(false),
            _ => return Err(mismatch(value, ty)),
        },
        Type::INT2 => as_i64(value)
            .and_then(|v| i16::try_from(v).ok())
            .map(PgParam::Int2)
            .ok_or_else(|| mismatch(value, ty))?,
        Type::INT4 => as_i64(value)
            .and_then(|v| i32::try_from(v).ok())
            .map(PgParam::Int4)
            .ok_or_else(|| mismatch(value, ty))?,
        Type::INT8 => as_i64(value)
            .map(PgParam::Int8)
            .ok_or_else(|| mismatch(value, ty))?,
        Type::FLOAT4 => as_f64(value)
            .map(|v| PgParam::Float4(v as f32))
            .ok_or_else(|| mismatch(value, ty))?,
        Type::FLOAT8 => as_f64(value)
            .map(PgParam::Float8)
            .ok_or_else(|| mismatch(value, ty))?,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => scalar_text(value)
            .map(PgParam::Text)
            .ok_or_else(|| mismatch(value, ty))?,
        Type::UUID => value
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(PgParam::Uuid)
            .ok_or_else(|| mismatch(value, ty))?,
        Type::TIMESTAMPTZ => value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| PgParam::TimestampTz(ts.with_timezone(&Utc)))
            .ok_or_else(|| mismatch(value, ty))?,
        Type::TIMESTAMP => value
            .as_str()
            .and_then(parse_naive_timestamp)
            .map(PgParam::Timestamp)
            .ok_or_else(|| mismatch(value, ty))?,
        Type::DATE => value
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .map(PgParam::Date)
            .ok_or_else(|| mismatch(value, ty))?,
        Type::JSON | Type::JSONB => PgParam::Json(value.clone()),
        _ => scalar_text(value)
            .map(PgParam::Raw)
            .ok_or_else(|| mismatch(value, ty))?,
    };

    Ok(param)
}
