// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mikrobridge - Mikrotom/device bridge daemon.
//!
//! Loads config, opens the durable store, recovers rows a previous process
//! left in flight, and runs the bridge until ctrl-c. SIGHUP restarts the
//! loops with a freshly read config file; queue contents survive because
//! only the store is durable state.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use mikrobridge_core::config::Config;
use mikrobridge_core::runtime::BridgeRuntime;
use mikrobridge_core::store::{SqliteStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mikrobridge_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting Mikrobridge");

    let config_path = Config::path_from_env();
    let config = load_config(&config_path)?;
    info!(config = ?config, "Configuration loaded");

    let store = Arc::new(SqliteStore::from_path(&config.db_path).await?);

    let recovered = store.recover_inflight().await?;
    if recovered > 0 {
        warn!(recovered, "reset in-flight rows from a previous run");
    }
    let counts = store.counts().await?;
    info!(
        inbox_pending = counts.inbox_pending,
        outbox_pending = counts.outbox_pending,
        "queues ready"
    );

    let db_path = config.db_path.clone();
    let mut runtime = BridgeRuntime::builder()
        .config(config)
        .store(store.clone() as Arc<dyn Store>)
        .start()
        .await?;

    #[cfg(unix)]
    {
        let mut hangup =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,

                _ = hangup.recv() => {
                    match load_config(&config_path) {
                        Ok(new_config) => {
                            info!("SIGHUP received, restarting loops with fresh config");
                            if new_config.db_path != db_path {
                                warn!("db_path changed; a full restart is required to move the database");
                            }
                            runtime.shutdown().await?;
                            runtime = BridgeRuntime::builder()
                                .config(new_config)
                                .store(store.clone() as Arc<dyn Store>)
                                .start()
                                .await?;
                        }
                        Err(e) => {
                            error!(error = %e, "config reload failed, keeping current configuration");
                        }
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    runtime.shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}

/// Read the config file; a missing file yields defaults, a malformed one
/// is an error.
fn load_config(path: &str) -> Result<Config> {
    if !std::path::Path::new(path).exists() {
        warn!(path, "config file not found, using defaults");
        return Ok(Config::default());
    }
    Ok(Config::load(path)?)
}
