//! Normalizing PostgreSQL column values into [`CellValue`]s

use std::error::Error;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use qgate_query::{CellValue, Row as ResultRow};
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::Row;
use uuid::Uuid;

/// Binary `numeric` decoded to a float; NaN and infinities become NaN
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PgNumeric(pub f64);

const NUMERIC_NEG: u16 = 0x4000;

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        if raw.len() < 8 {
            return Err("numeric value too short".into());
        }
        let ndigits = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        let weight = i16::from_be_bytes([raw[2], raw[3]]) as i32;
        let sign = u16::from_be_bytes([raw[4], raw[5]]);

        if sign != 0 && sign != NUMERIC_NEG {
            return Ok(PgNumeric(f64::NAN));
        }
        if raw.len() < 8 + ndigits * 2 {
            return Err("numeric value truncated".into());
        }

        let mut value = 0f64;
        for i in 0..ndigits {
            let offset = 8 + i * 2;
            let digit = u16::from_be_bytes([raw[offset], raw[offset + 1]]) as f64;
            value += digit * 10_000f64.powi(weight - i as i32);
        }
        if sign == NUMERIC_NEG {
            value = -value;
        }
        Ok(PgNumeric(value))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

pub(crate) fn row_to_cells(row: &Row) -> ResultRow {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| (column.name().to_string(), extract_value(row, idx)))
        .collect()
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

/// Extract a column by its PostgreSQL type name; unreadable values become `Null`
fn extract_value(row: &Row, idx: usize) -> CellValue {
    let type_name = row.columns()[idx].type_().name();

    let value = match type_name {
        "bool" => get::<bool>(row, idx).map(CellValue::Bool),
        "int2" => get::<i16>(row, idx).map(|v| CellValue::Int(v.into())),
        "int4" => get::<i32>(row, idx).map(|v| CellValue::Int(v.into())),
        "int8" => get::<i64>(row, idx).map(CellValue::Int),
        "oid" => get::<u32>(row, idx).map(|v| CellValue::Int(v.into())),
        "float4" => get::<f32>(row, idx).map(|v| CellValue::Float(v.into())),
        "float8" => get::<f64>(row, idx).map(CellValue::Float),
        "numeric" => get::<PgNumeric>(row, idx).map(|v| CellValue::Float(v.0)),
        "varchar" | "text" | "char" | "bpchar" | "name" | "citext" => {
            get::<String>(row, idx).map(CellValue::Text)
        }
        "bytea" => get::<Vec<u8>>(row, idx).map(CellValue::Bytes),
        "uuid" => get::<Uuid>(row, idx).map(CellValue::Uuid),
        "timestamptz" => get::<DateTime<Utc>>(row, idx).map(CellValue::Timestamp),
        "timestamp" => get::<NaiveDateTime>(row, idx).map(|v| CellValue::Timestamp(v.and_utc())),
        "date" => get::<NaiveDate>(row, idx).map(|v| CellValue::Text(v.to_string())),
        "time" => get::<NaiveTime>(row, idx).map(|v| CellValue::Text(v.to_string())),
        "json" | "jsonb" => get::<serde_json::Value>(row, idx).map(CellValue::Json),
        _ => get::<String>(row, idx).map(CellValue::Text),
    };

    value.unwrap_or(CellValue::Null)
}
