//! Static API-key admission middleware
//!
//! A thin gate in front of the proxy routes. It validates the caller's own
//! key against a configured allow list; it knows nothing about backend
//! accounts. The proxy handler separately checks the `x-api-key` format —
//! the two checks are deliberately independent layers.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::config::AuthConfig;

/// Admission check applied to the proxy routes. `/health` and `/metrics`
/// are registered outside this layer.
pub async fn require_api_key(
    State(auth): State<Arc<AuthConfig>>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.enabled || auth.api_keys.is_empty() {
        return next.run(request).await;
    }

    let Some(api_key) = extract_api_key(request.headers()) else {
        return reject(
            "Missing API key",
            "Please provide an API key in the x-api-key header or Authorization header",
        );
    };

    if !is_valid_format(&api_key, &auth.prefix) {
        return reject("Invalid API key format", "API key format is invalid");
    }

    if !auth.api_keys.iter().any(|allowed| *allowed == api_key) {
        return reject("Invalid API key", "API key is invalid or expired");
    }

    debug!("admission check passed");
    next.run(request).await
}

/// Pull the API key from the request, in order of preference: `x-api-key`,
/// `Authorization: Bearer`, `api-key`.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok())
        && !value.is_empty()
    {
        return Some(value.to_string());
    }

    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        && let Some(token) = value.strip_prefix("Bearer ")
    {
        return Some(token.to_string());
    }

    if let Some(value) = headers.get("api-key").and_then(|v| v.to_str().ok())
        && !value.is_empty()
    {
        return Some(value.to_string());
    }

    None
}

/// Cheap shape check before the list lookup: plausible length and the
/// configured prefix.
fn is_valid_format(api_key: &str, prefix: &str) -> bool {
    (10..=512).contains(&api_key.len()) && api_key.starts_with(prefix)
}

fn reject(error: &str, message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "error": error, "message": message }).to_string(),
    )
        .into_response()
}
