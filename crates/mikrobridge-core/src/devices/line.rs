// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Line-based TCP device client.
//!
//! Speaks the newline-terminated `key=value` dialect of the ESP controller:
//! one request line out, one reply line back per exchange. Transport
//! trouble is translated into the `NAK_*` taxonomy instead of propagating,
//! so the router always gets a reply line.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::warn;

use mikrobridge_protocol::{Channel, NakReason, Op, ParamCommand, ack_reply, nak_reply, value_reply};

use super::DeviceAdapter;

/// Live adapter for line-oriented devices.
pub struct LineDevice {
    channel: Channel,
    host: String,
    port: u16,
    timeout: Duration,
}

impl LineDevice {
    /// Create a client for `host:port` with a per-exchange timeout.
    pub fn new(channel: Channel, host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            channel,
            host: host.trim().to_string(),
            port,
            timeout,
        }
    }

    async fn exchange(&self, line: &str) -> std::result::Result<String, NakReason> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let mut stream = match timeout(self.timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(channel = %self.channel, host = %self.host, port = self.port, error = %e, "device connect failed");
                return Err(NakReason::DeviceDown);
            }
            Err(_) => {
                warn!(channel = %self.channel, host = %self.host, port = self.port, "device connect timed out");
                return Err(NakReason::DeviceDown);
            }
        };

        let payload = format!("{line}\n");
        let io = async {
            stream.write_all(payload.as_bytes()).await?;
            let mut reader = BufReader::new(stream);
            let mut response = String::new();
            reader.read_line(&mut response).await?;
            Ok::<_, std::io::Error>(response)
        };

        match timeout(self.timeout, io).await {
            Ok(Ok(response)) => Ok(response.trim().to_string()),
            Ok(Err(e)) => {
                warn!(channel = %self.channel, error = %e, "device exchange failed");
                Err(NakReason::DeviceComm)
            }
            Err(_) => {
                warn!(channel = %self.channel, "device exchange timed out");
                Err(NakReason::DeviceComm)
            }
        }
    }
}

#[async_trait]
impl DeviceAdapter for LineDevice {
    async fn execute(&self, cmd: &ParamCommand) -> String {
        let pkey = cmd.pkey();

        if self.host.is_empty() || self.port == 0 {
            return nak_reply(&pkey, &NakReason::DeviceDown);
        }

        let request = match &cmd.op {
            Op::Read => format!("{pkey}=?"),
            Op::Write(value) => format!("{pkey}={value}"),
        };

        let response = match self.exchange(&request).await {
            Ok(response) => response,
            Err(reason) => return nak_reply(&pkey, &reason),
        };

        match &cmd.op {
            Op::Read => match extract_rhs(&response) {
                Some(rhs) => value_reply(&pkey, rhs),
                None => nak_reply(&pkey, &NakReason::DeviceBadResponse),
            },
            Op::Write(value) => {
                if response.to_uppercase().contains("NAK") {
                    nak_reply(&pkey, &NakReason::DeviceRejected)
                } else {
                    ack_reply(&pkey, value)
                }
            }
        }
    }
}

/// Pull the value out of a `key=value` reply; a reply without `=` counts
/// as the value itself.
fn extract_rhs(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.split_once('=') {
        Some((_, rhs)) => {
            let rhs = rhs.trim();
            if rhs.is_empty() { None } else { Some(rhs) }
        }
        None => Some(trimmed),
    }
}
