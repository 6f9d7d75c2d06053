// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ingress HTTP API.
//!
//! Two endpoints: `GET /health` (cheap, dependency-free liveness) and
//! `POST /api/inbox` (accept a host message). The ingress does not parse
//! the command - it authenticates, persists and acknowledges. Once `200
//! stored=true` leaves this handler the message is durable and survives a
//! process crash; everything else is the router's job.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::store::Store;

/// Shared state for the ingress handlers.
#[derive(Clone)]
pub struct IngressState {
    /// The durable queue store.
    pub store: Arc<dyn Store>,
    /// Required `X-Shared-Secret` value; `None` disables the check.
    pub shared_secret: Option<String>,
}

impl IngressState {
    /// Build handler state from config.
    pub fn new(store: Arc<dyn Store>, cfg: &Config) -> Self {
        let shared_secret = match cfg.shared_secret.as_str() {
            "" => None,
            secret => Some(secret.to_string()),
        };
        Self {
            store,
            shared_secret,
        }
    }
}

/// Build the ingress router.
pub fn app(state: IngressState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/inbox", post(post_inbox))
        .with_state(state)
}

/// Serve the ingress until the shutdown channel fires.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: IngressState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            // A dropped sender counts as shutdown too.
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn post_inbox(
    State(state): State<IngressState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.shared_secret {
        let presented = headers
            .get("x-shared-secret")
            .and_then(|v| v.to_str().ok());
        if presented != Some(secret.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"ok": false, "error": "unauthorized"})),
            )
                .into_response();
        }
    }

    let key = headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim()
        .to_string();

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let source = if content_type.contains("json") {
        json_source(&body)
    } else {
        None
    };

    match state.store.inbox_insert(&key, source.as_deref(), &body).await {
        Ok(outcome) => {
            info!(key = %key, stored = outcome.stored, inbox_id = outcome.id, "inbox message accepted");
            (
                StatusCode::OK,
                Json(json!({
                    "ok": true,
                    "stored": outcome.stored,
                    "idempotency_key": key,
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!(key = %key, error = %e, "inbox insert failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"ok": false}))).into_response()
        }
    }
}

/// The JSON `source` field, when the body is a JSON object carrying one.
fn json_source(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<Value>(body)
        .ok()?
        .get("source")?
        .as_str()
        .map(|s| s.to_string())
}
