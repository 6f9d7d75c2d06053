// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable bridge runtime.
//!
//! [`BridgeRuntime`] wires the four long-lived tasks together - ingress
//! server, router loop, sender loop and watchdog - over a shared store and
//! a shared HTTPS client, and owns their shutdown. Tests and the binary
//! both start the bridge through it; a config change is applied by
//! shutting one runtime down and starting a new one over the same store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::devices::DeviceRegistry;
use crate::ingress::{self, IngressState};
use crate::router::RouterLoop;
use crate::sender::SenderLoop;
use crate::store::Store;
use crate::watchdog::Watchdog;

/// Builder for a [`BridgeRuntime`].
pub struct BridgeRuntimeBuilder {
    config: Config,
    store: Option<Arc<dyn Store>>,
}

impl std::fmt::Debug for BridgeRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeRuntimeBuilder")
            .field("config", &self.config)
            .field("store", &self.store.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Default for BridgeRuntimeBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            store: None,
        }
    }
}

impl BridgeRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the runtime configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the store (required).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Start the runtime, binding the ingress listener and spawning all
    /// tasks.
    pub async fn start(self) -> Result<BridgeRuntime> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let config = self.config;

        // One pooled client for sender and watchdog.
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .danger_accept_invalid_certs(!config.tls_verify)
            .build()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (watchdog, peer_rx) = Watchdog::new(&config, client.clone());
        let devices = Arc::new(DeviceRegistry::from_config(&config));
        let router = RouterLoop::new(store.clone(), devices, &config);
        let sender = SenderLoop::new(store.clone(), client, peer_rx, &config);

        let listener =
            TcpListener::bind((config.listen_host.as_str(), config.listen_port)).await?;
        let local_addr = listener.local_addr()?;
        let ingress_state = IngressState::new(store, &config);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move {
                if let Err(e) = ingress::serve(listener, ingress_state, shutdown).await {
                    error!(error = %e, "ingress server error");
                }
            }
        }));
        tasks.push(tokio::spawn(watchdog.run(shutdown_rx.clone())));
        tasks.push(tokio::spawn(router.run(shutdown_rx.clone())));
        tasks.push(tokio::spawn(sender.run(shutdown_rx)));

        info!(addr = %local_addr, "bridge runtime started");

        Ok(BridgeRuntime {
            shutdown_tx,
            tasks,
            local_addr,
        })
    }
}

/// A running bridge.
#[derive(Debug)]
pub struct BridgeRuntime {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl BridgeRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> BridgeRuntimeBuilder {
        BridgeRuntimeBuilder::new()
    }

    /// The bound ingress address (useful with port 0 in tests).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether any runtime task is still alive.
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Gracefully shut down: each loop finishes its current unit of work
    /// and stops. Outbound requests are bounded by the HTTP timeout, so
    /// this returns promptly.
    pub async fn shutdown(self) -> Result<()> {
        info!("bridge runtime shutting down");
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                error!(error = %e, "runtime task panicked");
                return Err(anyhow::anyhow!("runtime task panicked: {e}"));
            }
        }

        info!("bridge runtime shutdown complete");
        Ok(())
    }
}
