// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device adapters.
//!
//! The router hands a parsed command to [`DeviceRegistry::dispatch`], which
//! resolves the channel and runs the matching adapter. Adapters always
//! answer with a reply line; device trouble becomes a `NAK_*` reply, never
//! an error, so a broken printer cannot stall the queue.

pub mod line;
pub mod simulation;

pub use self::line::LineDevice;
pub use self::simulation::SimulatedDevice;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use mikrobridge_protocol::{Channel, NakReason, ParamCommand, is_push_only, nak_reply};

use crate::config::{Config, DeviceConfig};

/// Executes a parsed command on one device channel.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Run the command and produce the reply line.
    async fn execute(&self, cmd: &ParamCommand) -> String;
}

/// One adapter per channel, built from config.
pub struct DeviceRegistry {
    vj6530: Arc<dyn DeviceAdapter>,
    vj3350: Arc<dyn DeviceAdapter>,
    esp_plc: Arc<dyn DeviceAdapter>,
    raspi: Arc<dyn DeviceAdapter>,
}

impl DeviceRegistry {
    /// Build adapters from the per-device config blocks. A device in
    /// simulation mode gets the in-memory simulation; otherwise the
    /// line-based TCP client. The `raspi` channel is always simulated.
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            vj6530: adapter_for(Channel::Vj6530, &cfg.vj6530, cfg.http_timeout()),
            vj3350: adapter_for(Channel::Vj3350, &cfg.vj3350, cfg.http_timeout()),
            esp_plc: adapter_for(Channel::EspPlc, &cfg.esp, cfg.http_timeout()),
            raspi: Arc::new(SimulatedDevice::new(Channel::Raspi, Default::default())),
        }
    }

    /// Route the command to its channel adapter and return the reply line.
    ///
    /// Push-only parameter types are answered `NAK_ReadOnly` here, before
    /// any adapter runs.
    pub async fn dispatch(&self, cmd: &ParamCommand) -> String {
        if is_push_only(&cmd.ptype) {
            return nak_reply(&cmd.pkey(), &NakReason::ReadOnly);
        }

        let channel = cmd.channel();
        let adapter = match channel {
            Channel::Vj6530 => &self.vj6530,
            Channel::Vj3350 => &self.vj3350,
            Channel::EspPlc => &self.esp_plc,
            Channel::Raspi => &self.raspi,
        };

        let reply = adapter.execute(cmd).await;
        debug!(%channel, pkey = %cmd.pkey(), %reply, "device reply");
        reply
    }
}

fn adapter_for(
    channel: Channel,
    cfg: &DeviceConfig,
    timeout: std::time::Duration,
) -> Arc<dyn DeviceAdapter> {
    if cfg.simulation {
        Arc::new(SimulatedDevice::new(channel, cfg.defaults.clone()))
    } else {
        Arc::new(LineDevice::new(channel, &cfg.host, cfg.port, timeout))
    }
}
