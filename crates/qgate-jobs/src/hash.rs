//! Stable request fingerprints
//!
//! Filter maps have no inherent order, so filters are flattened into a list
//! sorted by column before hashing. Everything else hashes in request order.

use qgate_query::{FilterField, OrderField, QueryRequest};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalRequest<'a> {
    schema: &'a str,
    limit: i64,
    offset: i64,
    count_total: bool,
    order_by: &'a [OrderField],
    filter: Vec<CanonicalFilter<'a>>,
    fields: &'a [String],
}

#[derive(Serialize)]
struct CanonicalFilter<'a> {
    key: &'a str,
    value: &'a FilterField,
}

/// Lowercase hex SHA-256 of the canonical form of `request`
pub fn payload_hash(request: &QueryRequest) -> String {
    let mut filter: Vec<CanonicalFilter<'_>> = request
        .filter
        .iter()
        .map(|(key, value)| CanonicalFilter { key, value })
        .collect();
    filter.sort_by(|a, b| a.key.cmp(b.key));

    let canonical = CanonicalRequest {
        schema: request.schema.as_deref().unwrap_or(""),
        limit: request.limit,
        offset: request.offset,
        count_total: request.count_total,
        order_by: &request.order_by,
        filter,
        fields: &request.fields,
    };

    // Strings, integers, bools and JSON values with string keys always
    // serialize, so a failure here is a broken derive, not bad input
    let bytes = serde_json::to_vec(&canonical).expect("canonical request serializes");
    format!("{:x}", Sha256::digest(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> QueryRequest {
        serde_json::from_value(value).unwrap()
    }

    const EMPTY_INPUT_DIGEST: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_digest_covers_the_canonical_form() {
        let request = QueryRequest::default();
        let hash = payload_hash(&request);
        assert_ne!(hash, EMPTY_INPUT_DIGEST);

        let expected = format!(
            r#"{{"schema":"","limit":{},"offset":{},"countTotal":false,"orderBy":[],"filter":[],"fields":[]}}"#,
            request.limit, request.offset
        );
        assert_eq!(hash, format!("{:x}", Sha256::digest(expected.as_bytes())));
    }

    #[test]
    fn test_filter_order_does_not_matter() {
        let mut a = QueryRequest::default();
        a.filter.insert("status".into(), FilterField::eq("active"));
        a.filter.insert("age".into(), FilterField::eq(30));
        a.filter.insert("country".into(), FilterField::eq("NL"));

        let mut b = QueryRequest::default();
        b.filter.insert("country".into(), FilterField::eq("NL"));
        b.filter.insert("age".into(), FilterField::eq(30));
        b.filter.insert("status".into(), FilterField::eq("active"));

        assert_eq!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn test_digest_is_lowercase_hex() {
        let hash = payload_hash(&QueryRequest::default());
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_scalar_changes_change_digest() {
        let base = request(json!({"limit": 10, "filter": {"age": {"$gte": 18}}}));
        let other_limit = request(json!({"limit": 11, "filter": {"age": {"$gte": 18}}}));
        let other_value = request(json!({"limit": 10, "filter": {"age": {"$gte": 19}}}));
        let with_count = request(json!({"limit": 10, "countTotal": true, "filter": {"age": {"$gte": 18}}}));
        let with_schema = request(json!({"schema": "app", "limit": 10, "filter": {"age": {"$gte": 18}}}));

        let hash = payload_hash(&base);
        assert_ne!(hash, payload_hash(&other_limit));
        assert_ne!(hash, payload_hash(&other_value));
        assert_ne!(hash, payload_hash(&with_count));
        assert_ne!(hash, payload_hash(&with_schema));
    }

    #[test]
    fn test_sequence_order_changes_digest() {
        let fields_ab = request(json!({"fields": ["a", "b"]}));
        let fields_ba = request(json!({"fields": ["b", "a"]}));
        assert_ne!(payload_hash(&fields_ab), payload_hash(&fields_ba));

        let order_ab = request(json!({"orderBy": [{"field": "a"}, {"field": "b"}]}));
        let order_ba = request(json!({"orderBy": [{"field": "b"}, {"field": "a"}]}));
        assert_ne!(payload_hash(&order_ab), payload_hash(&order_ba));
    }

    #[test]
    fn test_operand_aliases_hash_identically() {
        let dollar = request(json!({"filter": {"age": {"$gt": 1}}}));
        let bare = request(json!({"filter": {"age": {"gt": 1}}}));
        assert_eq!(payload_hash(&dollar), payload_hash(&bare));
    }
}
