// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reply line construction.
//!
//! The reply format is fixed for every adapter: `<pkey>=<value>` for a
//! successful read, `ACK_<pkey>=<value>` for a successful write, and
//! `<pkey>=NAK_<reason>` for any business-level failure. A NAK is a valid
//! business outcome and travels back to Mikrotom verbatim; it is never an
//! infrastructure error.

use std::fmt;

/// Negative-acknowledgement reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NakReason {
    /// Mikrotom tried to write a push-only parameter.
    ReadOnly,
    /// The parameter key is not known to the target.
    UnknownParam,
    /// The written value violates the parameter's range.
    OutOfRange,
    /// The device failed its reachability check.
    DeviceDown,
    /// Transport-level failure talking to the device.
    DeviceComm,
    /// The device answered, but the reply had no usable shape.
    DeviceBadResponse,
    /// The device explicitly refused the write.
    DeviceRejected,
    /// No adapter is registered for the resolved channel.
    UnknownDevice,
    /// The parameter has no device-side address mapping.
    MappingMissing,
    /// ZBC protocol error code from the VJ6530.
    Zbc(u16),
    /// Ultimate protocol error code from the VJ3350.
    Ultimate(String),
    /// The command line did not match the grammar.
    ParseError,
}

impl fmt::Display for NakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NakReason::ReadOnly => f.write_str("NAK_ReadOnly"),
            NakReason::UnknownParam => f.write_str("NAK_UnknownParam"),
            NakReason::OutOfRange => f.write_str("NAK_OutOfRange"),
            NakReason::DeviceDown => f.write_str("NAK_DeviceDown"),
            NakReason::DeviceComm => f.write_str("NAK_DeviceComm"),
            NakReason::DeviceBadResponse => f.write_str("NAK_DeviceBadResponse"),
            NakReason::DeviceRejected => f.write_str("NAK_DeviceRejected"),
            NakReason::UnknownDevice => f.write_str("NAK_UnknownDevice"),
            NakReason::MappingMissing => f.write_str("NAK_MappingMissing"),
            NakReason::Zbc(code) => write!(f, "NAK_ZBC_{code:04X}"),
            NakReason::Ultimate(code) => write!(f, "NAK_Ultimate_{code}"),
            NakReason::ParseError => f.write_str("NAK_ParseError"),
        }
    }
}

/// Read-success reply: `<pkey>=<value>`.
pub fn value_reply(pkey: &str, value: &str) -> String {
    format!("{pkey}={value}")
}

/// Write-success reply: `ACK_<pkey>=<value>`.
pub fn ack_reply(pkey: &str, value: &str) -> String {
    format!("ACK_{pkey}={value}")
}

/// Failure reply: `<pkey>=NAK_<reason>`.
pub fn nak_reply(pkey: &str, reason: &NakReason) -> String {
    format!("{pkey}={reason}")
}
