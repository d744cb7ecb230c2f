use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{SecondsFormat, Utc};

use crate::ApiError;

pub fn require_bearer(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing authorization header"))?;

    let mut parts = value.split_whitespace();
    let scheme = parts.next().unwrap_or("");
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return Err(ApiError::unauthorized("invalid authorization scheme"));
    }

    let token = parts.next().unwrap_or("");
    if token.is_empty() {
        return Err(ApiError::unauthorized("missing bearer token"));
    }

    Ok(token.to_string())
}

/// Bearer token from the `Authorization` header, falling back to a `token`
/// query parameter for clients that cannot set headers (EventSource, links).
pub fn bearer_or_query(headers: &HeaderMap, query_token: Option<&str>) -> Result<String, ApiError> {
    if headers.contains_key(AUTHORIZATION) {
        return require_bearer(headers);
    }

    query_token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ApiError::unauthorized("missing authorization header"))
}

pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn require_bearer_extracts_token_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer TOKEN123"));

        let token = require_bearer(&headers).expect("token should be extracted");
        assert_eq!(token, "TOKEN123");
    }

    #[test]
    fn require_bearer_rejects_missing_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer"));

        let error = require_bearer(&headers).expect_err("should reject missing token");
        assert_eq!(error.status, axum::http::StatusCode::UNAUTHORIZED);
        assert!(error.message.contains("missing bearer token"));
    }

    #[test]
    fn bearer_or_query_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));

        let token = bearer_or_query(&headers, Some("query-token")).unwrap();
        assert_eq!(token, "header-token");
    }

    #[test]
    fn bearer_or_query_uses_query_parameter() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_or_query(&headers, Some("abc")).unwrap(), "abc");
        assert!(bearer_or_query(&headers, Some("  ")).is_err());
        assert!(bearer_or_query(&headers, None).is_err());
    }
}
