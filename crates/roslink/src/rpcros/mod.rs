// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service transport (RPCROS): one request/response per cycle over a
//! length-prefixed connection, with one-shot, probe and persistent modes.
//!
//! Slots are [`TcprosProcess`](crate::tcpros::TcprosProcess) instances; only
//! the transitions differ from the streaming transport.
//!
//! # Modules
//!
//! - `server` - Provider role
//! - `client` - Caller role

pub mod client;
pub mod server;
