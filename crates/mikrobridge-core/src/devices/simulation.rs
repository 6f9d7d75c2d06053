// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory device simulation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::trace;

use mikrobridge_protocol::{Channel, Op, ParamCommand, ack_reply, value_reply};

use super::DeviceAdapter;

/// Value a simulated read falls back to when neither a write nor a
/// configured default exists for the key.
const FALLBACK_VALUE: &str = "0";

/// Simulated device channel.
///
/// Reads return the last written value, else the configured per-key
/// default, else `"0"`. Writes always succeed and are remembered for the
/// lifetime of the process; the durable truth lives with the real devices,
/// so simulation state is deliberately not persisted.
pub struct SimulatedDevice {
    channel: Channel,
    defaults: HashMap<String, String>,
    values: Mutex<HashMap<String, String>>,
}

impl SimulatedDevice {
    /// Create a simulation for `channel` seeded with per-key defaults.
    pub fn new(channel: Channel, defaults: HashMap<String, String>) -> Self {
        Self {
            channel,
            defaults,
            values: Mutex::new(HashMap::new()),
        }
    }

    fn read(&self, pkey: &str) -> String {
        let values = self.values.lock().expect("simulation lock poisoned");
        values
            .get(pkey)
            .or_else(|| self.defaults.get(pkey))
            .cloned()
            .unwrap_or_else(|| FALLBACK_VALUE.to_string())
    }

    fn write(&self, pkey: &str, value: &str) {
        let mut values = self.values.lock().expect("simulation lock poisoned");
        values.insert(pkey.to_string(), value.to_string());
    }
}

#[async_trait]
impl DeviceAdapter for SimulatedDevice {
    async fn execute(&self, cmd: &ParamCommand) -> String {
        let pkey = cmd.pkey();
        match &cmd.op {
            Op::Read => {
                let value = self.read(&pkey);
                trace!(channel = %self.channel, %pkey, %value, "simulated read");
                value_reply(&pkey, &value)
            }
            Op::Write(value) => {
                self.write(&pkey, value);
                trace!(channel = %self.channel, %pkey, %value, "simulated write");
                ack_reply(&pkey, value)
            }
        }
    }
}
