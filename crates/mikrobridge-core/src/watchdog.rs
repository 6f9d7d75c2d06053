// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Peer reachability watchdog.
//!
//! A single periodic probe decides whether the Mikrotom peer is reachable:
//! an ICMP ping to `peer_watchdog_host` (via the system `ping` binary)
//! and/or an HTTP GET of the peer's health endpoint. The probe passes when
//! at least one configured check succeeds.
//!
//! Going down takes `watchdog_down_after` consecutive failures so a single
//! dropped probe does not flap the sender; coming back up happens on the
//! first successful probe to keep delivery latency low after recovery.
//! State is published through a `tokio::sync::watch` channel the sender
//! subscribes to.

use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::Config;

/// Peer reachability as the sender sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    /// No probe has decided yet.
    Unknown,
    /// Last probe passed.
    Up,
    /// `watchdog_down_after` consecutive probes failed.
    Down,
}

/// Published watchdog state.
#[derive(Debug, Clone)]
pub struct PeerState {
    /// Current reachability.
    pub status: PeerStatus,
    /// When `status` last changed.
    pub since: DateTime<Utc>,
    /// When the last probe finished, if any ran yet.
    pub last_probe: Option<DateTime<Utc>>,
    /// Failed probes since the last pass.
    pub consecutive_failures: u32,
}

impl PeerState {
    fn initial() -> Self {
        Self {
            status: PeerStatus::Unknown,
            since: Utc::now(),
            last_probe: None,
            consecutive_failures: 0,
        }
    }

    /// Fold one probe outcome into the state machine.
    pub fn observe(&mut self, pass: bool, down_after: u32, now: DateTime<Utc>) {
        self.last_probe = Some(now);
        if pass {
            self.consecutive_failures = 0;
            if self.status != PeerStatus::Up {
                self.status = PeerStatus::Up;
                self.since = now;
            }
        } else {
            self.consecutive_failures += 1;
            if self.consecutive_failures >= down_after.max(1) && self.status != PeerStatus::Down {
                self.status = PeerStatus::Down;
                self.since = now;
            }
        }
    }
}

/// Periodic peer probe task.
pub struct Watchdog {
    client: reqwest::Client,
    ping_host: Option<String>,
    health_url: Option<String>,
    interval: Duration,
    probe_timeout: Duration,
    down_after: u32,
    tx: watch::Sender<PeerState>,
}

impl Watchdog {
    /// Build the watchdog from config; the reqwest client is the shared
    /// one also used by the sender. Returns the receiver side of the state
    /// channel.
    pub fn new(cfg: &Config, client: reqwest::Client) -> (Self, watch::Receiver<PeerState>) {
        let (tx, rx) = watch::channel(PeerState::initial());
        let ping_host = match cfg.peer_watchdog_host.trim() {
            "" => None,
            host => Some(host.to_string()),
        };

        (
            Self {
                client,
                ping_host,
                health_url: cfg.peer_health_url(),
                interval: cfg.watchdog_interval(),
                probe_timeout: cfg.watchdog_timeout(),
                down_after: cfg.watchdog_down_after,
                tx,
            },
            rx,
        )
    }

    /// Run until shutdown, probing every interval. The first probe runs
    /// immediately so the sender is unblocked quickly after startup.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let pass = self.probe().await;
            self.record(pass);

            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("watchdog stopping");
                        return;
                    }
                }

                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    async fn probe(&self) -> bool {
        let mut any_configured = false;

        if let Some(host) = &self.ping_host {
            any_configured = true;
            if self.ping_ok(host).await {
                return true;
            }
        }

        if let Some(url) = &self.health_url {
            any_configured = true;
            if self.health_ok(url).await {
                return true;
            }
        }

        // Nothing to check: treat the peer as reachable.
        !any_configured
    }

    async fn ping_ok(&self, host: &str) -> bool {
        let timeout_s = self.probe_timeout.as_secs().max(1).to_string();
        tokio::process::Command::new("ping")
            .args(["-c", "1", "-W", &timeout_s, host])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn health_ok(&self, url: &str) -> bool {
        self.client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map(|resp| resp.status().is_success())
            .unwrap_or(false)
    }

    fn record(&self, pass: bool) {
        let now = Utc::now();
        let mut transition = None;
        self.tx.send_modify(|state| {
            let before = state.status;
            state.observe(pass, self.down_after, now);
            if state.status != before {
                transition = Some((before, state.status));
            }
        });

        if let Some((from, to)) = transition {
            info!(?from, ?to, "peer reachability changed");
        }
    }
}
