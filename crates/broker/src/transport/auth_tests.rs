// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::{HeaderMap, HeaderValue};

use super::*;

fn headers_with(value: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", HeaderValue::from_static(value));
    headers
}

#[test]
fn auth_disabled_accepts_anything() {
    assert!(validate_bearer(&HeaderMap::new(), None).is_ok());
    assert!(validate_bearer(&headers_with("Bearer whatever"), None).is_ok());
}

#[test]
fn missing_header_rejected_when_token_required() {
    assert_eq!(
        validate_bearer(&HeaderMap::new(), Some("secret")),
        Err(ErrorCode::Unauthorized)
    );
}

#[test]
fn wrong_scheme_rejected() {
    assert_eq!(
        validate_bearer(&headers_with("Basic secret"), Some("secret")),
        Err(ErrorCode::Unauthorized)
    );
}

#[test]
fn wrong_token_rejected() {
    assert_eq!(
        validate_bearer(&headers_with("Bearer nope"), Some("secret")),
        Err(ErrorCode::Unauthorized)
    );
}

#[test]
fn matching_token_accepted() {
    assert!(validate_bearer(&headers_with("Bearer secret"), Some("secret")).is_ok());
}

#[test]
fn health_probes_stay_public() {
    assert!(is_public("/api/v1/health"));
    assert!(is_public("/api/v1/ready"));
    assert!(!is_public("/api/v1/sessions"));
    assert!(!is_public("/api/v1/tools/speak"));
}
