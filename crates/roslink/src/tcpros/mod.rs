// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Streaming transport (TCPROS) for topic data.
//!
//! # Architecture
//!
//! ```text
//!   subscriber node                          publisher node
//!  +----------------+    header (callerid,   +----------------+
//!  | subscriber::   | -- topic, md5sum, ...) | publisher::    |
//!  | step (client)  | <---- reply header --- | step (server)  |
//!  |                | <== [len][msg] ====== |  timer-gated   |
//!  +----------------+                        +----------------+
//! ```
//!
//! # Modules
//!
//! - `header` - `key=value` connection header codec and matching rules
//! - `process` - `TcprosProcess`, the slot type shared with the service transport
//! - `publisher` - Server role
//! - `subscriber` - Client role

pub mod header;
pub mod process;
pub mod publisher;
pub mod subscriber;

pub use header::ConnectionHeader;
pub use process::{TcprosProcess, TcprosState};
