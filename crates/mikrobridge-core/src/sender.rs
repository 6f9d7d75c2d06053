// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sender loop: outbox → peer.
//!
//! Drains due outbox jobs while the watchdog reports the peer up. A 2xx
//! finishes a job; 408/429/5xx and transport errors reschedule it with
//! exponential backoff; any other 4xx and malformed URLs fail it
//! permanently. There is no retry ceiling - operators watch `retry_count`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::BridgeError;
use crate::store::{OutboxJob, Store};
use crate::watchdog::{PeerState, PeerStatus};

/// Idle poll interval when no job is due.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// The outbox-draining loop.
pub struct SenderLoop {
    store: Arc<dyn Store>,
    client: reqwest::Client,
    peer_state: watch::Receiver<PeerState>,
    retry_base_s: f64,
    retry_cap_s: f64,
}

impl SenderLoop {
    /// Build the loop. `client` is the shared pooled HTTPS client;
    /// `peer_state` is the watchdog's channel.
    pub fn new(
        store: Arc<dyn Store>,
        client: reqwest::Client,
        peer_state: watch::Receiver<PeerState>,
        cfg: &Config,
    ) -> Self {
        Self {
            store,
            client,
            peer_state,
            retry_base_s: cfg.retry_base_s,
            retry_cap_s: cfg.retry_cap_s,
        }
    }

    /// Run until shutdown. While the peer is not up the loop only watches
    /// for watchdog transitions; jobs accumulate and resume in order.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                debug!("sender stopping");
                return;
            }

            if self.peer_state.borrow().status != PeerStatus::Up {
                tokio::select! {
                    biased;

                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("sender stopping");
                            return;
                        }
                    }

                    changed = self.peer_state.changed() => {
                        if changed.is_err() {
                            // Watchdog gone; only happens during teardown.
                            return;
                        }
                    }
                }
                continue;
            }

            match self.tick().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "sender tick failed"),
            }

            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("sender stopping");
                        return;
                    }
                }

                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
        }
    }

    /// Send at most one due job; returns whether a job was claimed.
    pub async fn tick(&self) -> Result<bool, BridgeError> {
        let Some(job) = self.store.outbox_claim_next_due(Utc::now()).await? else {
            return Ok(false);
        };

        self.dispatch(job).await?;
        Ok(true)
    }

    async fn dispatch(&self, job: OutboxJob) -> Result<(), BridgeError> {
        let url = match reqwest::Url::parse(&job.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => url,
            _ => {
                warn!(job_id = job.id, url = %job.url, "invalid callback URL");
                return self
                    .store
                    .outbox_mark_permanent(job.id, "invalid URL", 0)
                    .await;
            }
        };

        let headers = match job.headers() {
            Ok(headers) => headers,
            Err(e) => {
                warn!(job_id = job.id, error = %e, "unreadable stored headers");
                return self
                    .store
                    .outbox_mark_permanent(job.id, &e.to_string(), 0)
                    .await;
            }
        };

        let method =
            reqwest::Method::from_bytes(job.method.as_bytes()).unwrap_or(reqwest::Method::POST);

        let mut request = self.client.request(method, url);
        for (name, value) in &headers {
            request = request.header(name, value);
        }

        match request.body(job.body.clone()).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    info!(job_id = job.id, status = status.as_u16(), retries = job.retry_count, "callback delivered");
                    self.store.outbox_mark_done(job.id, status.as_u16() as i64).await
                } else if is_permanent_status(status) {
                    warn!(job_id = job.id, status = status.as_u16(), "callback rejected permanently");
                    self.store
                        .outbox_mark_permanent(job.id, &format!("HTTP {status}"), status.as_u16() as i64)
                        .await
                } else {
                    self.reschedule(&job, format!("HTTP {status}"), status.as_u16() as i64)
                        .await
                }
            }
            Err(e) => self.reschedule(&job, e.to_string(), 0).await,
        }
    }

    async fn reschedule(
        &self,
        job: &OutboxJob,
        error: String,
        last_status: i64,
    ) -> Result<(), BridgeError> {
        let retry_count = job.retry_count + 1;
        let delay_s = backoff_delay(retry_count, self.retry_base_s, self.retry_cap_s);
        let next_attempt_ts = Utc::now() + chrono::Duration::milliseconds((delay_s * 1000.0) as i64);

        warn!(
            job_id = job.id,
            retries = retry_count,
            delay_s,
            error = %error,
            "callback failed, rescheduling"
        );

        self.store
            .outbox_reschedule(job.id, retry_count, next_attempt_ts, &error, last_status)
            .await
    }
}

/// Backoff after the nth consecutive failure:
/// `min(cap, base * 2^(n-1))` seconds.
pub fn backoff_delay(retry_count: i64, base_s: f64, cap_s: f64) -> f64 {
    let exponent = (retry_count - 1).clamp(0, 30) as i32;
    (base_s * 2f64.powi(exponent)).min(cap_s)
}

/// 4xx responses are permanent except 408 (request timeout) and
/// 429 (rate limiting), which behave like transient failures.
fn is_permanent_status(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}
