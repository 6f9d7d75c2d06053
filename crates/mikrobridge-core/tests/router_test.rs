// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Router loop tests: parsing, dispatch, correlation and the atomic reply
//! group, all against the device simulations.

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::test_store;
use tempfile::TempDir;

use mikrobridge_core::config::Config;
use mikrobridge_core::devices::DeviceRegistry;
use mikrobridge_core::router::RouterLoop;
use mikrobridge_core::store::{OutboxJob, SqliteStore, Store};

struct RouterHarness {
    router: RouterLoop,
    store: Arc<SqliteStore>,
    _dir: TempDir,
}

async fn start_router() -> RouterHarness {
    start_router_with(|_| {}).await
}

async fn start_router_with(tweak: impl FnOnce(&mut Config)) -> RouterHarness {
    let (store, dir) = test_store().await;

    let mut cfg = Config::default();
    cfg.peer_base_url = "http://peer.test".to_string();
    cfg.vj6530
        .defaults
        .insert("TTP00002".to_string(), "16".to_string());
    tweak(&mut cfg);

    let devices = Arc::new(DeviceRegistry::from_config(&cfg));
    let router = RouterLoop::new(store.clone() as Arc<dyn Store>, devices, &cfg);

    RouterHarness {
        router,
        store,
        _dir: dir,
    }
}

/// Claim every due outbox job, in sender order.
async fn drain_outbox(store: &SqliteStore) -> Vec<OutboxJob> {
    let mut jobs = Vec::new();
    while let Some(job) = store.outbox_claim_next_due(Utc::now()).await.unwrap() {
        jobs.push(job);
    }
    jobs
}

fn msg_of(job: &OutboxJob) -> String {
    let body: serde_json::Value = serde_json::from_slice(&job.body).unwrap();
    body["msg"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn read_produces_correlated_callback() {
    let h = start_router().await;

    h.store
        .inbox_insert("k1", Some("mikrotom"), br#"{"cmd": "TTP00002=?"}"#)
        .await
        .unwrap();
    assert!(h.router.tick().await.unwrap());

    let jobs = drain_outbox(&h.store).await;
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];

    assert_eq!(job.method, "POST");
    assert_eq!(job.url, "http://peer.test/api/inbox");
    assert_eq!(job.correlation_id.as_deref(), Some("k1"));

    let body: serde_json::Value = serde_json::from_slice(&job.body).unwrap();
    assert_eq!(body["msg"], "TTP00002=16");
    assert_eq!(body["source"], "raspi");

    let headers = job.headers().unwrap();
    assert_eq!(headers.get("X-Correlation-Id").map(String::as_str), Some("k1"));
    assert_eq!(
        headers.get("Content-Type").map(String::as_str),
        Some("application/json")
    );
    // Fresh key, distinct from the inbound one.
    let outbound_key = headers.get("X-Idempotency-Key").unwrap();
    assert_eq!(outbound_key, &job.idempotency_key);
    assert!(!outbound_key.is_empty());
    assert_ne!(outbound_key, "k1");

    // The row is done; nothing left to claim.
    assert!(h.store.inbox_claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn digit_pids_are_normalized_before_reply() {
    let h = start_router().await;

    h.store
        .inbox_insert("k-norm", None, br#"{"cmd": "TTP2=?"}"#)
        .await
        .unwrap();
    h.router.tick().await.unwrap();

    let jobs = drain_outbox(&h.store).await;
    assert_eq!(msg_of(&jobs[0]), "TTP00002=16");
}

#[tokio::test]
async fn multi_command_writes_fan_out() {
    let h = start_router().await;

    h.store
        .inbox_insert("k2", None, br#"{"cmd": "TTP00002=23, TTP00003=10"}"#)
        .await
        .unwrap();
    h.router.tick().await.unwrap();

    let jobs = drain_outbox(&h.store).await;
    assert_eq!(jobs.len(), 2);
    assert_eq!(msg_of(&jobs[0]), "ACK_TTP00002=23");
    assert_eq!(msg_of(&jobs[1]), "ACK_TTP00003=10");

    for job in &jobs {
        assert_eq!(job.correlation_id.as_deref(), Some("k2"));
    }
    assert_ne!(jobs[0].idempotency_key, jobs[1].idempotency_key);
}

#[tokio::test]
async fn write_is_visible_to_later_reads() {
    let h = start_router().await;

    h.store
        .inbox_insert("w1", None, br#"{"cmd": "TTP00002=42"}"#)
        .await
        .unwrap();
    h.router.tick().await.unwrap();
    drain_outbox(&h.store).await;

    h.store
        .inbox_insert("r1", None, br#"{"cmd": "TTP00002=?"}"#)
        .await
        .unwrap();
    h.router.tick().await.unwrap();

    let jobs = drain_outbox(&h.store).await;
    assert_eq!(msg_of(&jobs[0]), "TTP00002=42");
}

#[tokio::test]
async fn parse_failure_is_per_sub_command() {
    let h = start_router().await;

    h.store
        .inbox_insert("k3", None, br#"{"cmd": "TTP2=??; MAP1=5"}"#)
        .await
        .unwrap();
    h.router.tick().await.unwrap();

    let jobs = drain_outbox(&h.store).await;
    assert_eq!(jobs.len(), 2);
    assert_eq!(msg_of(&jobs[0]), "TTP00002=NAK_ParseError");
    assert_eq!(msg_of(&jobs[1]), "ACK_MAP0001=5");
}

#[tokio::test]
async fn unrecoverable_garbage_completes_without_jobs() {
    let h = start_router().await;

    h.store.inbox_insert("k4", None, b"%%%").await.unwrap();
    assert!(h.router.tick().await.unwrap());

    assert!(drain_outbox(&h.store).await.is_empty());
    // Terminal: the row is not claimable again.
    assert!(h.store.inbox_claim_next().await.unwrap().is_none());
    assert_eq!(h.store.counts().await.unwrap().inbox_pending, 0);
}

#[tokio::test]
async fn json_without_command_fields_completes_without_jobs() {
    let h = start_router().await;

    h.store
        .inbox_insert("k5", None, br#"{"foo": "bar"}"#)
        .await
        .unwrap();
    h.router.tick().await.unwrap();

    assert!(drain_outbox(&h.store).await.is_empty());
    assert!(h.store.inbox_claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn keyless_rows_produce_uncorrelated_callbacks() {
    let h = start_router().await;

    h.store
        .inbox_insert("", None, br#"{"cmd": "TTP00002=?"}"#)
        .await
        .unwrap();
    h.router.tick().await.unwrap();

    let jobs = drain_outbox(&h.store).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].correlation_id, None);
    assert!(!jobs[0].headers().unwrap().contains_key("X-Correlation-Id"));
}

#[tokio::test]
async fn outbound_secret_is_attached_when_configured() {
    let h = start_router_with(|cfg| {
        cfg.peer_shared_secret = "callback-secret".to_string();
    })
    .await;

    h.store
        .inbox_insert("k6", None, br#"{"cmd": "TTP00002=?"}"#)
        .await
        .unwrap();
    h.router.tick().await.unwrap();

    let jobs = drain_outbox(&h.store).await;
    let headers = jobs[0].headers().unwrap();
    assert_eq!(
        headers.get("X-Shared-Secret").map(String::as_str),
        Some("callback-secret")
    );
}

#[tokio::test]
async fn push_only_write_naks_back_to_host() {
    let h = start_router().await;

    h.store
        .inbox_insert("k7", None, br#"{"cmd": "TTE1=5"}"#)
        .await
        .unwrap();
    h.router.tick().await.unwrap();

    let jobs = drain_outbox(&h.store).await;
    assert_eq!(msg_of(&jobs[0]), "TTE0001=NAK_ReadOnly");
}

#[tokio::test]
async fn idle_tick_reports_no_work() {
    let h = start_router().await;
    assert!(!h.router.tick().await.unwrap());
}
