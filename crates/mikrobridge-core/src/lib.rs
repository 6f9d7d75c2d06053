// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mikrobridge Core - Reliable Shop-Floor Message Bridge
//!
//! Sits between the Mikrotom host and the subordinate devices (an ESP32
//! controller and two marking printers), accepting textual parameter
//! commands over HTTPS, executing them on the right device channel, and
//! delivering each reply back to the host as an asynchronous callback.
//!
//! The guarantees are at-least-once delivery with at-most-once business
//! effect: both directions carry idempotency keys, both queues are durable,
//! and every callback echoes the originating key as its correlation id.
//!
//! # Architecture
//!
//! ```text
//!                 ┌─────────────────────────────────────────────┐
//!                 │               Mikrotom host                  │
//!                 └─────────────────────────────────────────────┘
//!                     │  POST /api/inbox         ▲  POST {peer}/api/inbox
//!                     ▼                          │  (callback w/ correlation id)
//!  ┌──────────────────────────┐       ┌──────────────────────────┐
//!  │         Ingress          │       │          Sender          │◀── Watchdog
//!  │  auth · idempotency ·    │       │  retry/backoff · gated   │    (peer up?)
//!  │  persist-before-ack      │       │  on peer reachability    │
//!  └──────────────────────────┘       └──────────────────────────┘
//!              │ inbox row                       ▲ outbox jobs
//!              ▼                                 │
//!  ┌─────────────────────────────────────────────────────────────┐
//!  │                     Store (SQLite, sqlx)                     │
//!  │      inbox / outbox queues · atomic claims · dedupe          │
//!  └─────────────────────────────────────────────────────────────┘
//!              │ claim                           ▲ replies
//!              ▼                                 │
//!  ┌──────────────────────────┐       ┌──────────────────────────┐
//!  │          Router          │──────▶│      Device adapters     │
//!  │  parse · prefix-route    │       │  vj6530 vj3350 esp-plc   │
//!  │  atomic reply group      │       │  raspi (sim or live TCP) │
//!  └──────────────────────────┘       └──────────────────────────┘
//! ```
//!
//! # Delivery contract
//!
//! | Step | Guarantee |
//! |------|-----------|
//! | ingress `200 stored=true` | row is durable, survives crashes |
//! | duplicate idempotency key | `200 stored=false`, no new row |
//! | router completes a row | all reply jobs committed atomically with `done` |
//! | sender 2xx | job `done`, never resent |
//! | sender 408/429/5xx/transport error | rescheduled, capped exponential backoff |
//! | sender other 4xx / bad URL | `failed_permanent`, surfaced via counts |
//!
//! The text protocol itself (grammar, PID normalization, channel routing,
//! reply lines) lives in [`mikrobridge_protocol`].

pub mod config;
pub mod devices;
pub mod error;
pub mod ingress;
pub mod router;
pub mod runtime;
pub mod sender;
pub mod store;
pub mod watchdog;

pub use config::Config;
pub use error::BridgeError;
pub use runtime::BridgeRuntime;
pub use store::{SqliteStore, Store};
