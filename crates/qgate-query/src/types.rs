use std::collections::{BTreeMap, HashMap};

use chrono::SecondsFormat;
use qgate_core::UtcDateTime;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// A single-table read request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
#[schema(example = json!({
    "schema": "public",
    "limit": 50,
    "offset": 0,
    "countTotal": true,
    "orderBy": [{ "field": "created_at", "direction": "desc" }],
    "filter": { "status": { "$eq": "active" }, "age": { "$gte": 18 } },
    "fields": ["id", "name", "status"]
}))]
pub struct QueryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub limit: i64,
    pub offset: i64,
    pub count_total: bool,
    pub order_by: Vec<OrderField>,
    pub filter: HashMap<String, FilterField>,
    pub fields: Vec<String>,
}

impl QueryRequest {
    /// Schema name when one was given; empty strings count as absent
    pub fn schema_name(&self) -> Option<&str> {
        self.schema.as_deref().filter(|schema| !schema.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderField {
    pub field: String,
    #[serde(default)]
    pub direction: String,
}

impl OrderField {
    pub fn new(field: impl Into<String>, direction: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: direction.into(),
        }
    }
}

/// Comparison operands for one column; every present operand becomes one AND-ed predicate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FilterField {
    #[serde(rename = "$eq", alias = "eq", default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub eq: Option<Value>,
    #[serde(rename = "$gt", alias = "gt", default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub gt: Option<Value>,
    #[serde(rename = "$gte", alias = "gte", default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub gte: Option<Value>,
    #[serde(rename = "$lt", alias = "lt", default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub lt: Option<Value>,
    #[serde(rename = "$lte", alias = "lte", default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub lte: Option<Value>,
}

impl FilterField {
    pub fn eq(value: impl Into<Value>) -> Self {
        Self {
            eq: Some(value.into()),
            ..Default::default()
        }
    }

    /// Present operands with their SQL operator, in `=, >, >=, <, <=` order
    pub fn operands(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        [
            ("=", self.eq.as_ref()),
            (">", self.gt.as_ref()),
            (">=", self.gte.as_ref()),
            ("<", self.lt.as_ref()),
            ("<=", self.lte.as_ref()),
        ]
        .into_iter()
        .filter_map(|(op, value)| value.filter(|v| !v.is_null()).map(|v| (op, v)))
    }
}

/// A column value as read from a backend
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(UtcDateTime),
    Json(Value),
}

impl CellValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Null => serializer.serialize_none(),
            CellValue::Bool(v) => serializer.serialize_bool(*v),
            CellValue::Int(v) => serializer.serialize_i64(*v),
            CellValue::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            CellValue::Float(_) => serializer.serialize_none(),
            CellValue::Text(v) => serializer.serialize_str(v),
            CellValue::Bytes(bytes) => match Uuid::from_slice(bytes) {
                Ok(uuid) => serializer.collect_str(&uuid.hyphenated()),
                Err(_) => serializer.serialize_str(&String::from_utf8_lossy(bytes)),
            },
            CellValue::Uuid(v) => serializer.collect_str(&v.hyphenated()),
            CellValue::Timestamp(v) => {
                serializer.serialize_str(&v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            CellValue::Json(v) => v.serialize(serializer),
        }
    }
}

/// One result row keyed by column name
pub type Row = BTreeMap<String, CellValue>;

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub rows: usize,
    pub table: String,
    pub took_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueryResponse {
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<Row>,
    pub metadata: QueryMetadata,
}
