// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable inbox/outbox queues.
//!
//! The store exclusively owns all persistent rows; the ingress, router and
//! sender only read and mutate through it. Claims are atomic (a single
//! `UPDATE ... RETURNING` moves a row to its in-flight marker), so two
//! loops can never dispatch the same row.
//!
//! # Row lifecycles
//!
//! ```text
//! inbox:   pending ──claim──▶ processing ──▶ done
//!                                 │  └─────▶ failed
//!                                 └─release─▶ pending   (error, retried)
//!
//! outbox:  pending ──claim──▶ sending ──▶ done
//!                                │   └──▶ failed_permanent
//!                                └─reschedule─▶ pending (backoff)
//! ```
//!
//! A crash while a row is in flight leaves the marker behind;
//! [`Store::recover_inflight`] resets those rows to `pending` at startup so
//! the next process retries them.

pub mod sqlite;

pub use self::sqlite::SqliteStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BridgeError;

/// Inbox row states.
pub mod inbox_state {
    /// Accepted, waiting for the router.
    pub const PENDING: &str = "pending";
    /// Claimed by a router tick (in-flight marker).
    pub const PROCESSING: &str = "processing";
    /// Fully handled; never dispatched again.
    pub const DONE: &str = "done";
    /// Terminally failed; never dispatched again.
    pub const FAILED: &str = "failed";
}

/// Outbox row states.
pub mod outbox_state {
    /// Waiting for its `next_attempt_ts`.
    pub const PENDING: &str = "pending";
    /// Claimed by the sender (in-flight marker).
    pub const SENDING: &str = "sending";
    /// Delivered with a 2xx.
    pub const DONE: &str = "done";
    /// Given up; surfaced via counts and logs only.
    pub const FAILED_PERMANENT: &str = "failed_permanent";
}

/// An accepted host message.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InboxRecord {
    /// Monotonic row id.
    pub id: i64,
    /// Caller-supplied dedupe key; NULL when the caller sent none.
    pub idempotency_key: Option<String>,
    /// Origin hint from the request body.
    pub source: Option<String>,
    /// Raw request body as received.
    pub payload: Vec<u8>,
    /// Row state, see [`inbox_state`].
    pub state: String,
    /// When the row was accepted.
    pub created_ts: DateTime<Utc>,
    /// Last state change.
    pub updated_ts: DateTime<Utc>,
    /// Most recent processing error, if any.
    pub last_error: Option<String>,
}

impl InboxRecord {
    /// The idempotency key as the router sees it ("" when absent).
    pub fn key(&self) -> &str {
        self.idempotency_key.as_deref().unwrap_or("")
    }
}

/// A pending callback to the peer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxJob {
    /// Monotonic row id.
    pub id: i64,
    /// HTTP method, normally `POST`.
    pub method: String,
    /// Absolute target URL.
    pub url: String,
    /// Request headers as a JSON object.
    pub headers_json: String,
    /// Request body bytes.
    pub body: Vec<u8>,
    /// Bridge-generated key for at-most-once effect at the peer.
    pub idempotency_key: String,
    /// Key of the inbox row this job answers, if any.
    pub correlation_id: Option<String>,
    /// Completed delivery attempts.
    pub retry_count: i64,
    /// Earliest time the next attempt may run.
    pub next_attempt_ts: DateTime<Utc>,
    /// Row state, see [`outbox_state`].
    pub state: String,
    /// When the job was enqueued.
    pub created_ts: DateTime<Utc>,
    /// Last state change.
    pub updated_ts: DateTime<Utc>,
    /// HTTP status of the last attempt, 0 before the first response.
    pub last_status: i64,
    /// Most recent delivery error, if any.
    pub last_error: Option<String>,
}

impl OutboxJob {
    /// Decode the stored headers.
    pub fn headers(&self) -> Result<HashMap<String, String>, BridgeError> {
        serde_json::from_str(&self.headers_json).map_err(|e| BridgeError::Encoding {
            what: format!("outbox job {} headers", self.id),
            details: e.to_string(),
        })
    }
}

/// A callback to enqueue.
#[derive(Debug, Clone)]
pub struct NewOutboxJob {
    /// HTTP method.
    pub method: String,
    /// Absolute target URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body bytes.
    pub body: Vec<u8>,
    /// Fresh idempotency key for this job.
    pub idempotency_key: String,
    /// Originating inbox key, if the inbox row carried one.
    pub correlation_id: Option<String>,
    /// Earliest time of the first attempt.
    pub next_attempt_ts: DateTime<Utc>,
}

/// Result of [`Store::inbox_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// False when the idempotency key was already present.
    pub stored: bool,
    /// Row id - the original row's id on a duplicate.
    pub id: i64,
}

/// Pending-row counts for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCounts {
    /// Inbox rows waiting for the router.
    pub inbox_pending: i64,
    /// Outbox rows waiting for the sender.
    pub outbox_pending: i64,
}

/// Persistence interface used by the ingress and the loops.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist an accepted message.
    ///
    /// A duplicate non-empty `key` is success with `stored: false` and the
    /// original row id; empty keys always store a new row. The row is
    /// durable before this returns.
    async fn inbox_insert(
        &self,
        key: &str,
        source: Option<&str>,
        payload: &[u8],
    ) -> Result<InsertOutcome, BridgeError>;

    /// Atomically claim the oldest pending inbox row, moving it to
    /// `processing`.
    async fn inbox_claim_next(&self) -> Result<Option<InboxRecord>, BridgeError>;

    /// Terminate a claimed row as `done`.
    async fn inbox_mark_done(&self, id: i64) -> Result<(), BridgeError>;

    /// Terminate a claimed row as `failed`.
    async fn inbox_mark_failed(&self, id: i64, error: &str) -> Result<(), BridgeError>;

    /// Return a claimed row to `pending` with `last_error` set, so the next
    /// tick retries it.
    async fn inbox_release(&self, id: i64, error: &str) -> Result<(), BridgeError>;

    /// Enqueue a single callback job; returns its id.
    async fn outbox_insert(&self, job: &NewOutboxJob) -> Result<i64, BridgeError>;

    /// Enqueue all reply jobs of an inbox row and mark the row `done` in
    /// one transaction. Either everything commits or the row stays claimed.
    async fn outbox_complete_inbox(
        &self,
        inbox_id: i64,
        jobs: &[NewOutboxJob],
    ) -> Result<(), BridgeError>;

    /// Atomically claim the next due job (state `pending`,
    /// `next_attempt_ts <= now`), moving it to `sending`. Eligible jobs are
    /// ordered by `(next_attempt_ts, retry_count, created_ts, id)`.
    async fn outbox_claim_next_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxJob>, BridgeError>;

    /// Return a claimed job to `pending` with updated retry bookkeeping.
    async fn outbox_reschedule(
        &self,
        id: i64,
        retry_count: i64,
        next_attempt_ts: DateTime<Utc>,
        last_error: &str,
        last_status: i64,
    ) -> Result<(), BridgeError>;

    /// Terminate a claimed job as delivered.
    async fn outbox_mark_done(&self, id: i64, last_status: i64) -> Result<(), BridgeError>;

    /// Terminate a claimed job as permanently failed.
    async fn outbox_mark_permanent(
        &self,
        id: i64,
        reason: &str,
        last_status: i64,
    ) -> Result<(), BridgeError>;

    /// Look up a job by id, in any state. Operators monitor `retry_count`
    /// and `last_error` through this.
    async fn outbox_get(&self, id: i64) -> Result<Option<OutboxJob>, BridgeError>;

    /// Pending-row counts.
    async fn counts(&self) -> Result<QueueCounts, BridgeError>;

    /// Reset in-flight markers left behind by a crashed process; returns
    /// the number of recovered rows. Run once at startup, before the loops.
    async fn recover_inflight(&self) -> Result<u64, BridgeError>;
}
