// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parameter command parsing and PID normalization.

use std::sync::LazyLock;

use regex::Regex;

use crate::channel::Channel;

static LINE_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z]{3})([0-9A-Za-z_]+)\s*=\s*(\?|-?[0-9A-Za-z_.]+)\s*$").unwrap()
});

static KEY_RX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]{3})([0-9A-Za-z_]+)").unwrap());

/// Parameter types the devices push toward the bridge; Mikrotom may not
/// write them, and the bridge answers `NAK_ReadOnly` without consulting a
/// device adapter.
const PUSH_ONLY_TYPES: [&str; 6] = ["TTE", "TTW", "LSE", "LSW", "MAE", "MAW"];

/// What the command asks the device to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// `=?` - return the current value.
    Read,
    /// `=<value>` - store the value.
    Write(String),
}

/// A single parsed parameter command.
///
/// `ptype` is upper-cased and `pid` is already normalized (digit-only PIDs
/// are zero-padded to the width of their parameter type), so `pkey()` is
/// the externally visible business key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamCommand {
    /// Three-letter parameter type, e.g. `TTP`.
    pub ptype: String,
    /// Normalized parameter id, e.g. `00002`.
    pub pid: String,
    /// Read or write, with the value for writes.
    pub op: Op,
}

impl ParamCommand {
    /// The business key `PTYPE || PID`, e.g. `TTP00002`.
    pub fn pkey(&self) -> String {
        format!("{}{}", self.ptype, self.pid)
    }

    /// The device channel this command routes to.
    pub fn channel(&self) -> Channel {
        Channel::for_ptype(&self.ptype)
    }
}

/// A line that did not match the grammar.
///
/// `pkey` carries the best-effort business key recovered from the broken
/// line (the leading `PTYPE PID` token, normalized) so the router can still
/// answer `<pkey>=NAK_ParseError`. When even that much is missing the
/// sub-command is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unparseable parameter line '{line}'")]
pub struct ParseError {
    /// Best-effort normalized pkey, if one was recoverable.
    pub pkey: Option<String>,
    /// The offending input, trimmed.
    pub line: String,
}

/// Zero-pad a digit-only PID to the width of its parameter type.
///
/// | PTYPE | width |
/// |-------|-------|
/// | `TTP` | 5 |
/// | `TTE` `TTW` `MAP` `MAS` `MAE` `MAW` `LSE` `LSW` | 4 |
/// | other | unchanged |
///
/// PIDs containing non-digits pass through untouched.
pub fn normalize_pid(ptype: &str, pid: &str) -> String {
    if !pid.bytes().all(|b| b.is_ascii_digit()) {
        return pid.to_string();
    }
    let width = match ptype {
        "TTP" => 5,
        "TTE" | "TTW" | "MAP" | "MAS" | "MAE" | "MAW" | "LSE" | "LSW" => 4,
        _ => return pid.to_string(),
    };
    // Strip redundant leading zeros first so "00002" and "2" normalize alike.
    let trimmed = pid.trim_start_matches('0');
    let digits = if trimmed.is_empty() { "0" } else { trimmed };
    format!("{digits:0>width$}")
}

/// Whether this parameter type is push-only (device-to-host status/error
/// parameters Mikrotom cannot write).
pub fn is_push_only(ptype: &str) -> bool {
    PUSH_ONLY_TYPES.contains(&ptype)
}

/// Split a multi-command input into individual command strings.
///
/// Separators are `,`, `;` and newlines; empty segments are dropped.
pub fn split_commands(input: &str) -> Vec<&str> {
    input
        .split([',', ';', '\n', '\r'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse one parameter line into a [`ParamCommand`].
pub fn parse_line(line: &str) -> Result<ParamCommand, ParseError> {
    let trimmed = line.trim();
    let Some(caps) = LINE_RX.captures(trimmed) else {
        return Err(ParseError {
            pkey: best_effort_pkey(trimmed),
            line: trimmed.to_string(),
        });
    };

    let ptype = caps[1].to_uppercase();
    let pid = normalize_pid(&ptype, &caps[2]);
    let op = match &caps[3] {
        "?" => Op::Read,
        value => Op::Write(value.to_string()),
    };

    Ok(ParamCommand { ptype, pid, op })
}

/// Recover a normalized pkey from the head of a broken line, if possible.
fn best_effort_pkey(line: &str) -> Option<String> {
    let head = line.split('=').next().unwrap_or("").trim();
    let caps = KEY_RX.captures(head)?;
    let ptype = caps[1].to_uppercase();
    let pid = normalize_pid(&ptype, &caps[2]);
    Some(format!("{ptype}{pid}"))
}
