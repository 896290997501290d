// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for node construction and registration.
//!
//! Socket-level operations never produce these: they report a
//! [`SocketState`](crate::transport::SocketState) instead, and the
//! per-protocol processes recover locally. `Error` is what reaches the
//! caller of the public node API.

use std::fmt;
use std::io;

/// Result type for node operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the public node API
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Setup errors
    // ========================================================================
    /// Underlying I/O error
    Io(io::Error),

    /// A listener or client socket could not be created during node setup
    SocketSetup(String),

    /// Configuration rejected by validation
    InvalidConfig(String),

    /// URI that is not `scheme://host:port[/]`
    InvalidUri(String),

    // ========================================================================
    // Registration errors
    // ========================================================================
    /// Registration table is full
    CapacityExceeded {
        /// Table name (publishers, subscribers, ...)
        table: &'static str,
        /// Fixed table capacity
        capacity: usize,
    },

    /// Slot handle does not name a live registration
    UnknownHandle,

    // ========================================================================
    // Protocol errors
    // ========================================================================
    /// Malformed registry RPC envelope or value
    XmlRpc(String),

    /// Malformed or mismatching connection header
    Header(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::SocketSetup(msg) => write!(f, "socket setup failed: {}", msg),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Self::InvalidUri(uri) => write!(f, "invalid URI: {}", uri),
            Self::CapacityExceeded { table, capacity } => {
                write!(f, "{} table full (capacity {})", table, capacity)
            }
            Self::UnknownHandle => write!(f, "unknown slot handle"),
            Self::XmlRpc(msg) => write!(f, "XML-RPC error: {}", msg),
            Self::Header(msg) => write!(f, "connection header error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

// ============================================================================
// Tests
// ============================================================================
