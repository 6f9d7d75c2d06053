// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Router loop: inbox → devices → outbox.
//!
//! Each tick claims the oldest pending inbox row, pulls the command text
//! out of the stored payload, parses and dispatches every sub-command, and
//! enqueues one callback job per reply line. The jobs and the row's `done`
//! transition commit in a single transaction, so a crash mid-row either
//! replays the whole row or delivers all of its replies - never half.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mikrobridge_protocol::{NakReason, nak_reply, parse_line, split_commands};

use crate::config::Config;
use crate::devices::DeviceRegistry;
use crate::error::BridgeError;
use crate::store::{InboxRecord, NewOutboxJob, Store};

/// Payload fields probed for the command text, in order.
const COMMAND_FIELDS: [&str; 4] = ["msg", "line", "text", "cmd"];

/// Source tag stamped on every callback body.
const CALLBACK_SOURCE: &str = "raspi";

/// Idle poll interval when the inbox is empty.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// The inbox-draining loop.
pub struct RouterLoop {
    store: Arc<dyn Store>,
    devices: Arc<DeviceRegistry>,
    peer_inbox_url: String,
    outbound_secret: Option<String>,
}

impl RouterLoop {
    /// Build the loop from config and its collaborators.
    pub fn new(store: Arc<dyn Store>, devices: Arc<DeviceRegistry>, cfg: &Config) -> Self {
        let outbound_secret = match cfg.peer_shared_secret.as_str() {
            "" => None,
            secret => Some(secret.to_string()),
        };

        Self {
            store,
            devices,
            peer_inbox_url: cfg.peer_inbox_url(),
            outbound_secret,
        }
    }

    /// Run until shutdown. Drains back-to-back while rows are pending and
    /// polls briefly when idle.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                debug!("router stopping");
                return;
            }

            match self.tick().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "router tick failed"),
            }

            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("router stopping");
                        return;
                    }
                }

                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
        }
    }

    /// Process at most one inbox row; returns whether a row was claimed.
    pub async fn tick(&self) -> Result<bool, BridgeError> {
        let Some(msg) = self.store.inbox_claim_next().await? else {
            return Ok(false);
        };

        let id = msg.id;
        if let Err(e) = self.process(msg).await {
            warn!(inbox_id = id, error = %e, "processing failed, releasing row");
            self.store.inbox_release(id, &e.to_string()).await?;
        }

        Ok(true)
    }

    async fn process(&self, msg: InboxRecord) -> Result<(), BridgeError> {
        let Some(text) = extract_command_text(&msg.payload) else {
            debug!(inbox_id = msg.id, "no command text in payload");
            return self.store.inbox_mark_done(msg.id).await;
        };

        let correlation = msg.key().to_string();
        let mut replies = Vec::new();

        for raw in split_commands(&text) {
            match parse_line(raw) {
                Ok(cmd) => replies.push(self.devices.dispatch(&cmd).await),
                Err(err) => match err.pkey {
                    Some(pkey) => {
                        warn!(inbox_id = msg.id, line = raw, "unparseable sub-command");
                        replies.push(nak_reply(&pkey, &NakReason::ParseError));
                    }
                    None => {
                        warn!(inbox_id = msg.id, line = raw, "dropping sub-command without recoverable key");
                    }
                },
            }
        }

        if replies.is_empty() {
            return self.store.inbox_mark_done(msg.id).await;
        }

        let jobs: Vec<NewOutboxJob> = replies
            .iter()
            .map(|reply| self.reply_job(reply, &correlation))
            .collect();

        self.store.outbox_complete_inbox(msg.id, &jobs).await?;
        info!(inbox_id = msg.id, replies = jobs.len(), "inbox message routed");
        Ok(())
    }

    fn reply_job(&self, reply: &str, correlation: &str) -> NewOutboxJob {
        let idempotency_key = Uuid::new_v4().to_string();

        let mut headers = HashMap::from([
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-Idempotency-Key".to_string(), idempotency_key.clone()),
        ]);
        if !correlation.is_empty() {
            headers.insert("X-Correlation-Id".to_string(), correlation.to_string());
        }
        if let Some(secret) = &self.outbound_secret {
            headers.insert("X-Shared-Secret".to_string(), secret.clone());
        }

        let body = serde_json::json!({"msg": reply, "source": CALLBACK_SOURCE})
            .to_string()
            .into_bytes();

        NewOutboxJob {
            method: "POST".to_string(),
            url: self.peer_inbox_url.clone(),
            headers,
            body,
            idempotency_key,
            correlation_id: (!correlation.is_empty()).then(|| correlation.to_string()),
            next_attempt_ts: Utc::now(),
        }
    }
}

/// Pull the command text out of a stored payload.
///
/// JSON objects are probed for [`COMMAND_FIELDS`] in order; a bare JSON
/// string is the command itself; anything else is taken as plaintext.
fn extract_command_text(payload: &[u8]) -> Option<String> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => {
            for field in COMMAND_FIELDS {
                if let Some(text) = map.get(field).and_then(Value::as_str) {
                    let text = text.trim();
                    if !text.is_empty() {
                        return Some(text.to_string());
                    }
                }
            }
            plaintext(payload)
        }
        Ok(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() { None } else { Some(s.to_string()) }
        }
        _ => plaintext(payload),
    }
}

fn plaintext(payload: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
