// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store tests: dedupe, atomic claims, ordering, the atomic reply group
//! and crash recovery.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{due_job, test_store};
use mikrobridge_core::store::{Store, outbox_state};

#[tokio::test]
async fn duplicate_key_stores_once() {
    let (store, _dir) = test_store().await;

    let first = store.inbox_insert("k1", Some("mikrotom"), b"payload").await.unwrap();
    assert!(first.stored);

    let second = store.inbox_insert("k1", Some("mikrotom"), b"payload").await.unwrap();
    assert!(!second.stored);
    assert_eq!(second.id, first.id);

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.inbox_pending, 1);
}

#[tokio::test]
async fn empty_keys_never_dedupe() {
    let (store, _dir) = test_store().await;

    let first = store.inbox_insert("", None, b"a").await.unwrap();
    let second = store.inbox_insert("", None, b"b").await.unwrap();
    assert!(first.stored);
    assert!(second.stored);
    assert_ne!(first.id, second.id);

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.inbox_pending, 2);
}

#[tokio::test]
async fn claim_is_exclusive_and_oldest_first() {
    let (store, _dir) = test_store().await;

    store.inbox_insert("k1", None, b"first").await.unwrap();
    store.inbox_insert("k2", None, b"second").await.unwrap();

    let first = store.inbox_claim_next().await.unwrap().unwrap();
    assert_eq!(first.key(), "k1");
    assert_eq!(first.payload, b"first");

    // k1 is now processing; only k2 is claimable.
    let second = store.inbox_claim_next().await.unwrap().unwrap();
    assert_eq!(second.key(), "k2");

    assert!(store.inbox_claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn released_row_is_claimable_again() {
    let (store, _dir) = test_store().await;

    store.inbox_insert("k1", None, b"payload").await.unwrap();
    let claimed = store.inbox_claim_next().await.unwrap().unwrap();

    store.inbox_release(claimed.id, "device exploded").await.unwrap();

    let again = store.inbox_claim_next().await.unwrap().unwrap();
    assert_eq!(again.id, claimed.id);
    assert_eq!(again.last_error.as_deref(), Some("device exploded"));
}

#[tokio::test]
async fn terminal_rows_are_never_reclaimed() {
    let (store, _dir) = test_store().await;

    store.inbox_insert("k1", None, b"a").await.unwrap();
    store.inbox_insert("k2", None, b"b").await.unwrap();

    let first = store.inbox_claim_next().await.unwrap().unwrap();
    store.inbox_mark_done(first.id).await.unwrap();

    let second = store.inbox_claim_next().await.unwrap().unwrap();
    store.inbox_mark_failed(second.id, "unroutable").await.unwrap();

    assert!(store.inbox_claim_next().await.unwrap().is_none());
    assert_eq!(store.counts().await.unwrap().inbox_pending, 0);
}

#[tokio::test]
async fn outbox_due_ordering_tuple() {
    let (store, _dir) = test_store().await;
    let now = Utc::now();

    // Same next_attempt_ts for everything; created_ts/id break ties.
    let mut early = due_job("http://peer/api/inbox", "early");
    early.next_attempt_ts = now - ChronoDuration::seconds(5);
    let mut late = due_job("http://peer/api/inbox", "late");
    late.next_attempt_ts = now - ChronoDuration::seconds(1);

    // Insert out of order.
    let late_id = store.outbox_insert(&late).await.unwrap();
    let early_id = store.outbox_insert(&early).await.unwrap();

    let first = store.outbox_claim_next_due(now).await.unwrap().unwrap();
    assert_eq!(first.id, early_id);
    let second = store.outbox_claim_next_due(now).await.unwrap().unwrap();
    assert_eq!(second.id, late_id);
    assert!(store.outbox_claim_next_due(now).await.unwrap().is_none());
}

#[tokio::test]
async fn outbox_retry_count_breaks_timestamp_ties() {
    let (store, _dir) = test_store().await;
    let now = Utc::now();
    let due = now - ChronoDuration::seconds(1);

    let mut a = due_job("http://peer/api/inbox", "a");
    a.next_attempt_ts = due;
    let mut b = due_job("http://peer/api/inbox", "b");
    b.next_attempt_ts = due;

    let a_id = store.outbox_insert(&a).await.unwrap();
    let b_id = store.outbox_insert(&b).await.unwrap();

    // Bump a's retry_count; b should now win despite being created later.
    let claimed = store.outbox_claim_next_due(now).await.unwrap().unwrap();
    assert_eq!(claimed.id, a_id);
    store.outbox_reschedule(claimed.id, 2, due, "HTTP 500", 500).await.unwrap();

    let next = store.outbox_claim_next_due(now).await.unwrap().unwrap();
    assert_eq!(next.id, b_id);
}

#[tokio::test]
async fn future_jobs_are_not_due() {
    let (store, _dir) = test_store().await;

    let mut job = due_job("http://peer/api/inbox", "later");
    job.next_attempt_ts = Utc::now() + ChronoDuration::seconds(60);
    store.outbox_insert(&job).await.unwrap();

    assert!(store.outbox_claim_next_due(Utc::now()).await.unwrap().is_none());
}

#[tokio::test]
async fn reply_group_commits_atomically_with_done() {
    let (store, _dir) = test_store().await;

    store.inbox_insert("k1", None, b"payload").await.unwrap();
    let claimed = store.inbox_claim_next().await.unwrap().unwrap();

    let jobs = vec![
        due_job("http://peer/api/inbox", "one"),
        due_job("http://peer/api/inbox", "two"),
    ];
    store.outbox_complete_inbox(claimed.id, &jobs).await.unwrap();

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.inbox_pending, 0);
    assert_eq!(counts.outbox_pending, 2);
    assert!(store.inbox_claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn job_state_bookkeeping() {
    let (store, _dir) = test_store().await;

    let done_id = store.outbox_insert(&due_job("http://peer/api/inbox", "done")).await.unwrap();
    let perm_id = store.outbox_insert(&due_job("http://peer/api/inbox", "perm")).await.unwrap();

    store.outbox_claim_next_due(Utc::now()).await.unwrap().unwrap();
    store.outbox_mark_done(done_id, 200).await.unwrap();

    store.outbox_claim_next_due(Utc::now()).await.unwrap().unwrap();
    store.outbox_mark_permanent(perm_id, "HTTP 404 Not Found", 404).await.unwrap();

    let done = store.outbox_get(done_id).await.unwrap().unwrap();
    assert_eq!(done.state, outbox_state::DONE);
    assert_eq!(done.last_status, 200);

    let perm = store.outbox_get(perm_id).await.unwrap().unwrap();
    assert_eq!(perm.state, outbox_state::FAILED_PERMANENT);
    assert_eq!(perm.last_status, 404);
    assert_eq!(perm.last_error.as_deref(), Some("HTTP 404 Not Found"));
    assert_eq!(perm.retry_count, 0);

    assert_eq!(store.counts().await.unwrap().outbox_pending, 0);
}

#[tokio::test]
async fn reschedule_returns_job_to_pending() {
    let (store, _dir) = test_store().await;

    let id = store.outbox_insert(&due_job("http://peer/api/inbox", "retry")).await.unwrap();
    store.outbox_claim_next_due(Utc::now()).await.unwrap().unwrap();

    let now = Utc::now();
    let next = now + ChronoDuration::seconds(2);
    store.outbox_reschedule(id, 1, next, "connection refused", 0).await.unwrap();

    let job = store.outbox_get(id).await.unwrap().unwrap();
    assert_eq!(job.state, outbox_state::PENDING);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.last_error.as_deref(), Some("connection refused"));

    // Not yet due, but due once the clock passes next_attempt_ts.
    assert!(store.outbox_claim_next_due(now).await.unwrap().is_none());
    assert!(
        store
            .outbox_claim_next_due(next + ChronoDuration::seconds(1))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn recover_inflight_resets_markers() {
    let (store, _dir) = test_store().await;

    store.inbox_insert("k1", None, b"payload").await.unwrap();
    store.inbox_claim_next().await.unwrap().unwrap();

    store.outbox_insert(&due_job("http://peer/api/inbox", "stuck")).await.unwrap();
    store.outbox_claim_next_due(Utc::now()).await.unwrap().unwrap();

    // Simulates the post-crash startup pass.
    let recovered = store.recover_inflight().await.unwrap();
    assert_eq!(recovered, 2);

    assert!(store.inbox_claim_next().await.unwrap().is_some());
    assert!(store.outbox_claim_next_due(Utc::now()).await.unwrap().is_some());

    // Nothing in flight, nothing to recover.
    assert_eq!(store.recover_inflight().await.unwrap(), 0);
}

#[tokio::test]
async fn stored_headers_round_trip() {
    let (store, _dir) = test_store().await;

    let mut job = due_job("http://peer/api/inbox", "headers");
    job.headers.insert("X-Correlation-Id".to_string(), "k1".to_string());
    let id = store.outbox_insert(&job).await.unwrap();

    let loaded = store.outbox_get(id).await.unwrap().unwrap();
    let headers = loaded.headers().unwrap();
    assert_eq!(headers.get("X-Correlation-Id").map(String::as_str), Some("k1"));
    assert_eq!(
        headers.get("Content-Type").map(String::as_str),
        Some("application/json")
    );
}
