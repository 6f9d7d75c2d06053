// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mikrobridge Protocol - the Mikrotom parameter-line dialect
//!
//! This crate holds the pure text layer shared by the bridge: the command
//! grammar Mikrotom speaks, PID normalization, the PTYPE-prefix to device
//! channel mapping, and construction of the reply lines sent back.
//!
//! It performs no I/O; everything here is synchronous and deterministic so
//! the routing and device layers in `mikrobridge-core` can be tested
//! without a network or a database.
//!
//! # Command grammar
//!
//! A single command is `PTYPE PID = VALUE`:
//!
//! | Token | Shape |
//! |-------|-------|
//! | `PTYPE` | exactly three ASCII letters (`TTP`, `LSE`, `MAS`, ...) |
//! | `PID` | one or more of `[A-Za-z0-9_]` |
//! | `VALUE` | `?` (read) or an optional `-` followed by `[0-9A-Za-z_.]+` |
//!
//! Whitespace around the `=` separator and the whole line is tolerated;
//! whitespace inside a token rejects the line. Several commands may arrive
//! in one string separated by `,`, `;` or newlines.
//!
//! # Replies
//!
//! | Outcome | Line |
//! |---------|------|
//! | read success | `<pkey>=<value>` |
//! | write success | `ACK_<pkey>=<value>` |
//! | failure | `<pkey>=NAK_<reason>` |

pub mod channel;
pub mod command;
pub mod reply;

pub use channel::Channel;
pub use command::{Op, ParamCommand, ParseError, is_push_only, normalize_pid, parse_line, split_commands};
pub use reply::{NakReason, ack_reply, nak_reply, value_reply};
