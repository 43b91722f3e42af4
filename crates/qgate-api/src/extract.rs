use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Caller identity from the optional `X-API-Key` header
///
/// Only identifies the caller for job and metric records; it grants nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiKey(pub Option<String>);

impl ApiKey {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let key = headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        ApiKey(key)
    }

    pub fn into_inner(self) -> Option<String> {
        self.0
    }
}

impl<S> FromRequestParts<S> for ApiKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ApiKey::from_headers(&parts.headers))
    }
}

/// `?async=true` or `Prefer: respond-async`, both case-insensitive
pub fn async_requested(async_param: Option<&str>, headers: &HeaderMap) -> bool {
    let by_param = async_param.is_some_and(|value| value.eq_ignore_ascii_case("true"));
    let by_header = headers
        .get("prefer")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("respond-async"));
    by_param || by_header
}
