use super::*;
use reqwest::header::HeaderValue;

fn headers_with_retry_after(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
    headers
}

#[test]
fn classifies_named_statuses() {
    let headers = HeaderMap::new();
    assert_eq!(ErrorKind::from_status(401, &headers), ErrorKind::AuthExpired);
    assert_eq!(ErrorKind::from_status(403, &headers), ErrorKind::Forbidden);
    assert_eq!(ErrorKind::from_status(404, &headers), ErrorKind::NotFound);
    assert_eq!(ErrorKind::from_status(500, &headers), ErrorKind::ServerError);
    assert_eq!(ErrorKind::from_status(503, &headers), ErrorKind::ServerError);
    assert_eq!(ErrorKind::from_status(400, &headers), ErrorKind::Client);
    assert_eq!(ErrorKind::from_status(422, &headers), ErrorKind::Client);
}

#[test]
fn rate_limit_reads_retry_after_seconds() {
    let kind = ErrorKind::from_status(429, &headers_with_retry_after("45"));
    assert_eq!(kind, ErrorKind::RateLimited { retry_after: Duration::from_secs(45) });
}

#[test]
fn rate_limit_defaults_to_sixty_seconds() {
    let kind = ErrorKind::from_status(429, &HeaderMap::new());
    assert_eq!(kind, ErrorKind::RateLimited { retry_after: Duration::from_secs(60) });
}

#[test]
fn unparseable_retry_after_uses_default() {
    let headers = headers_with_retry_after("Wed, 21 Oct 2015 07:28:00 GMT");
    assert_eq!(retry_after(&headers), Duration::from_secs(DEFAULT_RETRY_AFTER_SECS));
}

#[test]
fn detail_prefers_string_detail_field() {
    assert_eq!(detail_from_body(400, r#"{"detail":"Email already registered"}"#), "Email already registered");
}

#[test]
fn detail_renders_structured_detail_as_json() {
    let detail = detail_from_body(422, r#"{"detail":[{"loc":["body","email"],"msg":"invalid"}]}"#);
    assert!(detail.starts_with('['));
    assert!(detail.contains("invalid"));
}

#[test]
fn detail_falls_back_to_body_or_reason() {
    assert_eq!(detail_from_body(502, "upstream exploded"), "upstream exploded");
    assert_eq!(detail_from_body(404, ""), "Not Found");
    assert_eq!(detail_from_body(500, r#"{"error":"boom"}"#), r#"{"error":"boom"}"#);
}

#[test]
fn http_error_exposes_status_and_kind() {
    let err = ApiError::from_response_parts(403, &HeaderMap::new(), r#"{"detail":"nope"}"#);
    assert_eq!(err.status(), Some(403));
    assert_eq!(err.kind(), Some(ErrorKind::Forbidden));
    assert_eq!(err.detail(), Some("nope"));
    assert_eq!(err.to_string(), "HTTP 403: nope");
}

#[test]
fn local_errors_have_no_kind() {
    assert_eq!(ApiError::NotAuthenticated.kind(), None);
    assert_eq!(ApiError::Config("x".into()).status(), None);
}
