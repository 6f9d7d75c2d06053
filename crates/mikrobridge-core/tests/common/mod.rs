// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for mikrobridge-core integration tests.
//!
//! Provides a throwaway SQLite store, a programmable Mikrotom peer stub
//! that records every callback it receives, and config presets with fast
//! timers.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::Mutex;

use mikrobridge_core::config::Config;
use mikrobridge_core::store::{NewOutboxJob, SqliteStore};

/// Fresh store on a temp database file. Keep the [`TempDir`] alive for the
/// duration of the test.
pub async fn test_store() -> (Arc<SqliteStore>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::from_path(dir.path().join("bridge.db"))
        .await
        .expect("store");
    (Arc::new(store), dir)
}

/// Config preset pointing at the peer stub, with timers fast enough for
/// tests.
pub fn test_config(peer: SocketAddr) -> Config {
    let mut cfg = Config::default();
    cfg.listen_host = "127.0.0.1".to_string();
    cfg.listen_port = 0;
    cfg.peer_base_url = format!("http://{peer}");
    cfg.peer_health_path = "/health".to_string();
    cfg.peer_watchdog_host = String::new();
    cfg.http_timeout_s = 2.0;
    cfg.retry_base_s = 0.05;
    cfg.retry_cap_s = 0.5;
    cfg.watchdog_interval_s = 0.05;
    cfg.watchdog_timeout_s = 0.5;
    cfg.watchdog_down_after = 2;
    cfg.vj6530
        .defaults
        .insert("TTP00002".to_string(), "16".to_string());
    cfg
}

/// A callback job due immediately, minimal headers.
pub fn due_job(url: &str, tag: &str) -> NewOutboxJob {
    NewOutboxJob {
        method: "POST".to_string(),
        url: url.to_string(),
        headers: HashMap::from([(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )]),
        body: format!(r#"{{"msg": "{tag}", "source": "raspi"}}"#).into_bytes(),
        idempotency_key: format!("job-{tag}"),
        correlation_id: None,
        next_attempt_ts: Utc::now(),
    }
}

/// One request captured by the peer stub.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("captured body is JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Programmable Mikrotom stand-in.
///
/// `GET /health` answers according to [`set_health`](Self::set_health);
/// every other request is captured and answered with the next scripted
/// status (default 200).
#[derive(Clone)]
pub struct PeerStub {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    responses: Arc<Mutex<VecDeque<u16>>>,
    health_ok: Arc<AtomicBool>,
}

impl PeerStub {
    /// Bind an ephemeral port and start serving.
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind peer stub");
        let addr = listener.local_addr().expect("peer stub addr");

        let stub = Self {
            addr,
            requests: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            health_ok: Arc::new(AtomicBool::new(true)),
        };

        let app = Router::new().fallback(capture).with_state(stub.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("peer stub server error: {e}");
            }
        });

        stub
    }

    /// Script the statuses of upcoming captured requests.
    pub async fn push_responses(&self, statuses: &[u16]) {
        self.responses.lock().await.extend(statuses.iter().copied());
    }

    /// Toggle the health endpoint.
    pub fn set_health(&self, ok: bool) {
        self.health_ok.store(ok, Ordering::SeqCst);
    }

    /// Snapshot of captured requests.
    pub async fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().await.clone()
    }

    /// Poll until at least `n` requests were captured or the deadline
    /// passes; panics on timeout.
    pub async fn wait_for_requests(&self, n: usize, deadline: Duration) -> Vec<CapturedRequest> {
        let started = tokio::time::Instant::now();
        loop {
            let requests = self.requests().await;
            if requests.len() >= n {
                return requests;
            }
            if started.elapsed() > deadline {
                panic!(
                    "peer stub saw {} requests, expected {} within {:?}",
                    requests.len(),
                    n,
                    deadline
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn capture(
    State(stub): State<PeerStub>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::GET && uri.path() == "/health" {
        return if stub.health_ok.load(Ordering::SeqCst) {
            StatusCode::OK.into_response()
        } else {
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        };
    }

    let mut captured_headers = HashMap::new();
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            captured_headers.insert(name.as_str().to_lowercase(), value.to_string());
        }
    }

    stub.requests.lock().await.push(CapturedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        headers: captured_headers,
        body: body.to_vec(),
    });

    let status = stub.responses.lock().await.pop_front().unwrap_or(200);
    StatusCode::from_u16(status)
        .unwrap_or(StatusCode::OK)
        .into_response()
}
