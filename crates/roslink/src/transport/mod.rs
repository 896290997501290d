// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket layer shared by the three protocols.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |        xmlrpc::process / tcpros / rpcros processes          |
//! |                 (generic over StreamIo)                      |
//! +------------------------------+------------------------------+
//!                                |
//! +------------------------------v------------------------------+
//! |  framing: [len u32 LE][payload], two-phase left_to_recv read |
//! +------------------------------+------------------------------+
//!                                |
//! +------------------------------v------------------------------+
//! |  TcpIpSocket (socket2): open / connect / bind_listen /       |
//! |  accept / write_buffer / read_buffer_ex -> SocketState       |
//! +-------------------------------------------------------------+
//! ```
//!
//! # Modules
//!
//! - `socket` - Non-blocking socket wrapper and errno classification
//! - `stream` - `StreamIo` trait (and the test mock)
//! - `framing` - Length-prefix framing helpers

pub mod framing;
pub mod socket;
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use framing::{decode_len, encode_frame, read_exact_step, ReadStep, FRAME_HEADER_SIZE};
pub use socket::{classify_error, resolve_ipv4, SocketState, TcpIpSocket};
pub use stream::StreamIo;

// ============================================================================
// Tests
// ============================================================================
