// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for mikrobridge-core.
//!
//! Infrastructure failures stay local to the loops and end up in row state
//! plus `last_error`; business failures travel as `NAK_*` reply lines and
//! never surface here.

use std::fmt;

/// Result type using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Infrastructure errors raised by the store and the loops.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum BridgeError {
    /// A store operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A payload or header could not be encoded/decoded.
    Encoding {
        /// What was being encoded or decoded.
        what: String,
        /// Error details.
        details: String,
    },
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
            Self::Encoding { what, details } => {
                write!(f, "Encoding error for {}: {}", what, details)
            }
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<sqlx::Error> for BridgeError {
    fn from(err: sqlx::Error) -> Self {
        BridgeError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Encoding {
            what: "json".to_string(),
            details: err.to_string(),
        }
    }
}
