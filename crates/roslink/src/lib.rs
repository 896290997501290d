// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # roslink - a single-threaded ROS1 node
//!
//! A ROS1 client node that talks to a master over XML-RPC, streams topics
//! over TCPROS and serves or calls services over RPCROS, all from one
//! non-blocking event loop on the calling thread.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::atomic::AtomicBool;
//! use roslink::{Node, NodeConfig, PublisherSpec, Result, TypeInfo};
//!
//! fn main() -> Result<()> {
//!     let mut node = Node::create(NodeConfig::from_env("/talker"))?;
//!     let info = TypeInfo::new("std_msgs/String", "992ce8a1687cec8c8bd883ec73ca41d1", "string data\n");
//!     let chatter = node.register_publisher(PublisherSpec::new("/chatter", info).with_period_ms(100))?;
//!
//!     node.publish(chatter, b"\x05\0\0\0hello".to_vec())?;
//!     node.run(&AtomicBool::new(false))?;
//!     node.shutdown()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                          Node (node/)                               |
//! |   registration records | slot tables | timers | spin_once / run     |
//! +----------------------+----------------------+-----------------------+
//! |  Control (xmlrpc/,   |  Streaming (tcpros/) |  Services (rpcros/)   |
//! |  api/): master and   |  connection headers, |  probe, one-shot and  |
//! |  peer calls          |  publisher/subscriber|  persistent calls     |
//! +----------------------+----------------------+-----------------------+
//! |            Transport (transport/): sockets, framing, streams        |
//! +---------------------------------------------------------------------+
//! ```
//!
//! Messages are opaque byte strings: serialization belongs to the caller.
//!
//! ## Modules Overview
//!
//! - [`node`] - The node and its event loop (start here)
//! - [`config`] - Limits, timers and `NodeConfig`
//! - [`xmlrpc`] - XML-RPC values, codec and connection process
//! - [`api`] - Master and slave API vocabulary
//! - [`tcpros`] - Topic streaming
//! - [`rpcros`] - Service calls
//! - [`transport`] - Non-blocking sockets and length-prefixed framing

/// Registry and peer API vocabulary: methods, calls and replies.
pub mod api;
/// Growable byte buffer with a send cursor.
pub mod buffer;
/// Millisecond clocks.
pub mod clock;
/// Node configuration, limits and timers.
pub mod config;
/// Crate error type.
pub mod error;
/// The node and its event loop.
pub mod node;
/// Step-function vocabulary shared by every connection process.
pub mod process;
/// Service transport.
pub mod rpcros;
/// Fixed-capacity slot tables.
pub mod slot;
/// Topic transport.
pub mod tcpros;
/// Sockets, stream abstraction and framing.
pub mod transport;
/// Endpoint URIs.
pub mod uri;
/// XML-RPC control protocol.
pub mod xmlrpc;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::{
    Node, PublisherSpec, ServiceCallerSpec, ServiceProviderSpec, ServiceResult, SubscriberSpec,
    TypeInfo,
};
pub use slot::SlotId;
pub use uri::Endpoint;

/// roslink version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
