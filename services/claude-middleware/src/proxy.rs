//! Proxy orchestrator
//!
//! For each admitted request: select an account, swap the client's
//! `x-api-key` for the account id, forward upstream, classify the outcome,
//! update account health, and retry once with a different account when the
//! failure is attributable to the account. Upstream responses are forwarded
//! verbatim; the body is streamed to the client as it arrives.
//!
//! The request body is captured in full before the first attempt so a retry
//! can replay it. The first response is only discarded once a retry response
//! exists — a retry that fails at the transport level falls back to the
//! response already in hand.

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use claude_pool::{AccountPool, HealthTracker, select_account};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::metrics;

/// Maximum request body size (10 MiB). Bodies are held in memory for replay.
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Required prefix on the inbound `x-api-key` value, trailing space included.
const ACCOUNT_KEY_PREFIX: &[u8] = b"authenticator ";

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub upstream_url: String,
    pub pool: Arc<AccountPool>,
    pub health: Arc<HealthTracker>,
    pub timeout: Duration,
}

/// Flat JSON error body: `{"error":"..."}`
fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "error": message }).to_string(),
    )
        .into_response()
}

/// Whether this status is attributable to the account: mark it problematic
/// and try another account once.
fn should_mark_problematic(status: StatusCode) -> bool {
    matches!(status.as_u16(), 401 | 403 | 429 | 500 | 502 | 503 | 504)
}

/// Check if a header is hop-by-hop (stripped in both directions)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Proxy one inbound request, recording request metrics on every outcome.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(state: &ProxyState, request: Request, request_id: String) -> Response {
    let started = Instant::now();
    let method = request.method().clone();

    let response = handle(state, request).await;

    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn handle(state: &ProxyState, request: Request) -> Response {
    // Format-only check on the account key header. The admission middleware
    // validates the caller's credential separately; this stays independent.
    match request.headers().get("x-api-key") {
        None => {
            debug!("rejected: missing x-api-key header");
            return error_response(StatusCode::UNAUTHORIZED, "Missing x-api-key header");
        }
        Some(value) if !value.as_bytes().starts_with(ACCOUNT_KEY_PREFIX) => {
            debug!("rejected: x-api-key lacks the authenticator prefix");
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid API key format, expected 'authenticator' prefix",
            );
        }
        Some(_) => {}
    }

    let snapshot = state.pool.snapshot();
    metrics::set_pool_accounts(snapshot.accounts.len());

    let first_id = match select_account(&snapshot.accounts, &state.health, "") {
        Some(account) => account.id.clone(),
        None => {
            warn!("no accounts available");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "No available Claude accounts");
        }
    };

    let method = request.method().clone();
    let upstream_url = match request.uri().path_and_query() {
        Some(pq) => format!("{}{}", state.upstream_url.trim_end_matches('/'), pq),
        None => state.upstream_url.clone(),
    };

    // Base headers shared by both attempts: everything except x-api-key
    // (replaced per attempt), host (derived from the upstream URL), and
    // hop-by-hop headers.
    let mut base_headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        let name_str = name.as_str();
        if name_str.eq_ignore_ascii_case("x-api-key")
            || name_str.eq_ignore_ascii_case("host")
            || is_hop_by_hop(name_str)
        {
            continue;
        }
        base_headers.append(name.clone(), value.clone());
    }

    // Capture the whole body up front so a retry can replay it.
    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_SIZE).await {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "Failed to read request body");
        }
    };

    debug!(account_id = %first_id, upstream = %upstream_url, "forwarding request");

    match send_attempt(state, &method, &upstream_url, &base_headers, &first_id, body.clone()).await
    {
        Err(e) => {
            error!(account_id = %first_id, error = %e, "upstream request failed");
            state.health.mark_problematic(&first_id, "network_error");
            metrics::record_upstream_error("network_error");

            let Some(retry_id) = select_retry(state, &first_id) else {
                return error_response(StatusCode::BAD_GATEWAY, "Proxy request failed");
            };
            info!(account_id = %retry_id, "retrying with different account");
            match send_attempt(state, &method, &upstream_url, &base_headers, &retry_id, body).await
            {
                Err(e) => {
                    error!(account_id = %retry_id, error = %e, "retry request failed");
                    error_response(StatusCode::BAD_GATEWAY, "Proxy request failed")
                }
                Ok(retry_response) => {
                    mark_retry_outcome(state, &retry_id, retry_response.status());
                    forward_response(state, retry_response, &retry_id)
                }
            }
        }
        Ok(response) => {
            let status = response.status();
            if !should_mark_problematic(status) {
                return forward_response(state, response, &first_id);
            }

            warn!(account_id = %first_id, status = status.as_u16(), "account returned error status");
            let reason = format!("http_error_{}", status.as_u16());
            state.health.mark_problematic(&first_id, &reason);
            metrics::record_upstream_error(&reason);

            let Some(retry_id) = select_retry(state, &first_id) else {
                // Nobody left to try; the client gets the response we have.
                return forward_response(state, response, &first_id);
            };
            info!(account_id = %retry_id, "retrying with different account");
            match send_attempt(state, &method, &upstream_url, &base_headers, &retry_id, body).await
            {
                Err(e) => {
                    error!(account_id = %retry_id, error = %e, "retry request failed, forwarding first response");
                    forward_response(state, response, &first_id)
                }
                Ok(retry_response) => {
                    mark_retry_outcome(state, &retry_id, retry_response.status());
                    forward_response(state, retry_response, &retry_id)
                }
            }
        }
    }
}

/// Send one upstream attempt with the account id substituted into x-api-key.
async fn send_attempt(
    state: &ProxyState,
    method: &Method,
    url: &str,
    base_headers: &reqwest::header::HeaderMap,
    account_id: &str,
    body: Bytes,
) -> reqwest::Result<reqwest::Response> {
    let mut headers = base_headers.clone();
    match reqwest::header::HeaderValue::from_str(account_id) {
        Ok(value) => {
            headers.insert("x-api-key", value);
        }
        Err(e) => warn!(account_id, error = %e, "account id is not a valid header value"),
    }

    state
        .client
        .request(method.clone(), url)
        .headers(headers)
        .timeout(state.timeout)
        .body(body)
        .send()
        .await
}

/// Select a replacement account for the retry, on a fresh snapshot.
fn select_retry(state: &ProxyState, exclude_id: &str) -> Option<String> {
    let snapshot = state.pool.snapshot();
    select_account(&snapshot.accounts, &state.health, exclude_id).map(|a| a.id.clone())
}

/// A retry response is always forwarded, but a failing one still marks the
/// second account before it goes out.
fn mark_retry_outcome(state: &ProxyState, account_id: &str, status: StatusCode) {
    if should_mark_problematic(status) {
        warn!(account_id, status = status.as_u16(), "retry also failed");
        let reason = format!("http_error_{}", status.as_u16());
        state.health.mark_problematic(account_id, &reason);
        metrics::record_upstream_error(&reason);
    }
}

/// Forward an upstream response to the client: status, headers (hop-by-hop
/// stripped), and the body streamed verbatim. Applies the post-forward health
/// side effects for the finally-used account.
fn forward_response(state: &ProxyState, upstream: reqwest::Response, account_id: &str) -> Response {
    let status = upstream.status();
    match status.as_u16() {
        429 => {
            warn!(account_id, "upstream rate limited the account");
            state.health.mark_rate_limited(account_id);
        }
        200 | 201 => info!(account_id, "request completed"),
        code => info!(account_id, status = code, "forwarding upstream response"),
    }

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name.as_str()) {
            builder = builder.header(name, value);
        }
    }

    match builder.body(Body::from_stream(upstream.bytes_stream())) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "failed to build client response");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Proxy request failed")
        }
    }
}
