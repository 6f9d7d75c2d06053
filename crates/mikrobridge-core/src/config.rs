// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed runtime configuration, loaded from a JSON file.
//!
//! Every field has a default so a partial (or absent) file still yields a
//! working configuration. The file path comes from the `MIKROBRIDGE_CONFIG`
//! environment variable, falling back to [`DEFAULT_CONFIG_PATH`].
//!
//! A config change takes effect through an orderly restart of the loops
//! (see `main.rs`); queue contents live in the store and survive it.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Where the config file lives unless `MIKROBRIDGE_CONFIG` says otherwise.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mikrobridge/config.json";

/// Bridge configuration.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file backing the inbox/outbox queues.
    pub db_path: String,

    /// Ingress bind address.
    pub listen_host: String,
    /// Ingress bind port.
    pub listen_port: u16,

    /// Shared secret required in `X-Shared-Secret` on ingress; empty
    /// disables the check.
    pub shared_secret: String,

    /// Base URL of the Mikrotom peer, e.g. `https://192.168.1.10`.
    pub peer_base_url: String,
    /// Health-check path appended to `peer_base_url`; empty disables the
    /// HTTP probe.
    pub peer_health_path: String,
    /// Host pinged by the watchdog; empty disables the ICMP probe.
    pub peer_watchdog_host: String,
    /// Secret sent as `X-Shared-Secret` on outbound callbacks; empty
    /// disables the header.
    pub peer_shared_secret: String,

    /// Verify the peer's TLS certificate.
    pub tls_verify: bool,
    /// Timeout for outbound HTTP requests, in seconds.
    pub http_timeout_s: f64,

    /// Base delay of the outbox retry backoff, in seconds.
    pub retry_base_s: f64,
    /// Ceiling of the outbox retry backoff, in seconds.
    pub retry_cap_s: f64,

    /// Seconds between watchdog probes.
    pub watchdog_interval_s: f64,
    /// Timeout of a single watchdog probe, in seconds.
    pub watchdog_timeout_s: f64,
    /// Consecutive probe failures before the peer is declared down.
    pub watchdog_down_after: u32,

    /// ESP32 controller endpoint.
    pub esp: DeviceConfig,
    /// Videojet 3350 endpoint.
    pub vj3350: DeviceConfig,
    /// Videojet 6530 endpoint.
    pub vj6530: DeviceConfig,
}

/// Endpoint and mode of a single subordinate device.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device host; empty means unconfigured.
    pub host: String,
    /// Device TCP port; 0 means unconfigured.
    pub port: u16,
    /// Answer from the built-in simulation instead of the live device.
    pub simulation: bool,
    /// Seed values for simulation reads, keyed by pkey.
    pub defaults: HashMap<String, String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            simulation: true,
            defaults: HashMap::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "/var/lib/mikrobridge/bridge.db".to_string(),
            listen_host: "0.0.0.0".to_string(),
            listen_port: 8080,
            shared_secret: String::new(),
            peer_base_url: "https://192.168.1.10".to_string(),
            peer_health_path: "/health".to_string(),
            peer_watchdog_host: String::new(),
            peer_shared_secret: String::new(),
            tls_verify: true,
            http_timeout_s: 5.0,
            retry_base_s: 1.0,
            retry_cap_s: 60.0,
            watchdog_interval_s: 2.0,
            watchdog_timeout_s: 1.0,
            watchdog_down_after: 3,
            esp: DeviceConfig::default(),
            vj3350: DeviceConfig::default(),
            vj6530: DeviceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Resolve the config file path from `MIKROBRIDGE_CONFIG`.
    pub fn path_from_env() -> String {
        std::env::var("MIKROBRIDGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// The peer's inbox URL callbacks are POSTed to.
    pub fn peer_inbox_url(&self) -> String {
        format!("{}/api/inbox", self.peer_base_url.trim_end_matches('/'))
    }

    /// The peer's health URL, if a health path is configured.
    pub fn peer_health_url(&self) -> Option<String> {
        if self.peer_health_path.is_empty() {
            return None;
        }
        Some(format!(
            "{}{}",
            self.peer_base_url.trim_end_matches('/'),
            self.peer_health_path
        ))
    }

    /// Outbound HTTP timeout as a [`Duration`].
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.http_timeout_s.max(0.0))
    }

    /// Watchdog probe interval as a [`Duration`].
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs_f64(self.watchdog_interval_s.max(0.0))
    }

    /// Watchdog probe timeout as a [`Duration`].
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.watchdog_timeout_s.max(0.0))
    }
}

// Secrets stay out of logs; everything else is fair game for debugging.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("db_path", &self.db_path)
            .field("listen_host", &self.listen_host)
            .field("listen_port", &self.listen_port)
            .field("shared_secret", &redact(&self.shared_secret))
            .field("peer_base_url", &self.peer_base_url)
            .field("peer_health_path", &self.peer_health_path)
            .field("peer_watchdog_host", &self.peer_watchdog_host)
            .field("peer_shared_secret", &redact(&self.peer_shared_secret))
            .field("tls_verify", &self.tls_verify)
            .field("http_timeout_s", &self.http_timeout_s)
            .field("retry_base_s", &self.retry_base_s)
            .field("retry_cap_s", &self.retry_cap_s)
            .field("watchdog_interval_s", &self.watchdog_interval_s)
            .field("watchdog_timeout_s", &self.watchdog_timeout_s)
            .field("watchdog_down_after", &self.watchdog_down_after)
            .field("esp", &self.esp)
            .field("vj3350", &self.vj3350)
            .field("vj6530", &self.vj6530)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "(unset)" } else { "***" }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`Config`].
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
