//! Shared helpers for service tests: registry stubs and mock upstreams.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::StatusCode;
use claude_pool::{AccountPool, HealthTracker};
use claude_registry::{Account, AccountRegistry, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::proxy::ProxyState;

/// Registry stub serving a fixed account list.
pub struct StaticRegistry {
    accounts: Vec<Account>,
}

impl AccountRegistry for StaticRegistry {
    fn list_active_accounts(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Account>>> + Send + '_>> {
        let accounts = self.accounts.clone();
        Box::pin(async move { Ok(accounts) })
    }
}

/// An admissible account with the given id and last-used timestamp.
pub fn account(id: &str, last_used_at: &str) -> Account {
    Account {
        id: id.into(),
        name: id.into(),
        is_active: true,
        status: "active".into(),
        last_used_at: last_used_at.into(),
        expires_at: 0,
    }
}

/// Proxy state over a populated pool, pointing at the given upstream.
pub async fn test_state(upstream_url: &str, accounts: Vec<Account>) -> ProxyState {
    let pool = Arc::new(AccountPool::new(Arc::new(StaticRegistry { accounts })));
    pool.refresh().await;
    ProxyState {
        client: reqwest::Client::new(),
        upstream_url: upstream_url.to_string(),
        pool,
        health: Arc::new(HealthTracker::new()),
        timeout: Duration::from_secs(5),
    }
}

/// Mock upstream that echoes the request back as JSON
/// (headers, method, path, query, body) with an `x-upstream-echo` marker.
pub async fn start_echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let app = Router::new().fallback(|request: axum::http::Request<Body>| async move {
            let mut headers_map = serde_json::Map::new();
            for (name, value) in request.headers() {
                headers_map.insert(
                    name.to_string(),
                    serde_json::Value::String(value.to_str().unwrap_or("").to_string()),
                );
            }
            let method = request.method().to_string();
            let path = request.uri().path().to_string();
            let query = request.uri().query().unwrap_or("").to_string();
            let body_bytes = axum::body::to_bytes(request.into_body(), crate::proxy::MAX_BODY_SIZE)
                .await
                .unwrap();
            let body = serde_json::json!({
                "echoed_headers": headers_map,
                "method": method,
                "path": path,
                "query": query,
                "body": String::from_utf8_lossy(&body_bytes),
            });
            (
                StatusCode::OK,
                [("x-upstream-echo", "true")],
                axum::Json(body),
            )
        });
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting
    tokio::time::sleep(Duration::from_millis(10)).await;
    format!("http://{addr}")
}

/// Mock upstream that answers per account: the status configured for the
/// `x-api-key` it receives, 200 for anyone else. The body names the account
/// so tests can tell which attempt produced the final response.
pub async fn start_status_server(statuses: Vec<(&'static str, u16)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let app = Router::new().fallback(move |request: axum::http::Request<Body>| {
            let statuses = statuses.clone();
            async move {
                let account = request
                    .headers()
                    .get("x-api-key")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let status = statuses
                    .iter()
                    .find(|(id, _)| *id == account)
                    .map(|(_, status)| *status)
                    .unwrap_or(200);
                (
                    StatusCode::from_u16(status).unwrap(),
                    format!("status for {account}"),
                )
            }
        });
        axum::serve(listener, app).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    format!("http://{addr}")
}

/// Raw TCP upstream keyed on the account: connections carrying
/// `x-api-key: <drop_account>` are dropped before a response (a transport
/// error for the client), every other account gets a minimal 429 with the
/// body "first".
pub async fn start_drop_account_server(drop_account: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                // Read up to the end of the request headers so the x-api-key
                // value is in hand before deciding the connection's fate
                let mut data = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            data.extend_from_slice(&buf[..n]);
                            if data.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }
                let request = String::from_utf8_lossy(&data).to_lowercase();
                if request.contains(&format!("x-api-key: {drop_account}")) {
                    drop(socket);
                    return;
                }
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 429 Too Many Requests\r\ncontent-length: 5\r\nconnection: close\r\n\r\nfirst",
                    )
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    format!("http://{addr}")
}

/// Raw TCP upstream that drops the first `drop_first` connections before a
/// response is written (a transport error for the client) and serves a
/// minimal `200 ok` afterwards.
pub async fn start_flaky_server(drop_first: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut seen = 0usize;
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            seen += 1;
            if seen <= drop_first {
                drop(socket);
                continue;
            }
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                    )
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    format!("http://{addr}")
}
