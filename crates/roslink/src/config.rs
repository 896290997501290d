// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration.
//!
//! All fixed limits and timers live here as constants; [`NodeConfig`]
//! carries the per-node values derived from them.
//!
//! # Layers
//!
//! - **Constants**: table capacities, timers, wire limits
//! - **`NodeConfig`**: defaults, builder methods, environment overrides
//!   (`ROS_MASTER_URI`, `ROS_HOSTNAME`, `ROS_IP`, `ROSLINK_LOOP_TIMEOUT_MS`)
//!   and an optional YAML file (feature `config-file`)
//!
//! # Example
//!
//! ```
//! use roslink::config::NodeConfig;
//!
//! let config = NodeConfig::new("/talker")
//!     .with_master_uri("http://127.0.0.1:11311/")
//!     .with_host("127.0.0.1")
//!     .with_loop_timeout_ms(50);
//! assert!(config.validate().is_ok());
//! ```

use std::net::IpAddr;

use crate::error::{Error, Result};
use crate::uri::Endpoint;

// =======================================================================
// Table capacities
// =======================================================================

/// Max published topics per node
pub const MAX_PUBLISHED_TOPICS: usize = 5;

/// Max subscribed topics per node
pub const MAX_SUBSCRIBED_TOPICS: usize = 5;

/// Max service providers per node
pub const MAX_SERVICE_PROVIDERS: usize = 8;

/// Max service callers per node
pub const MAX_SERVICE_CALLERS: usize = 8;

/// Max concurrent incoming XML-RPC connections
pub const MAX_XMLRPC_SERVER_CONNECTIONS: usize = 5;

/// Max concurrent incoming TCPROS connections
pub const MAX_TCPROS_SERVER_CONNECTIONS: usize = 5;

// =======================================================================
// Timers (milliseconds)
// =======================================================================

/// Master keepalive ping period
pub const PING_PERIOD_MS: u64 = 1000;

/// Ceiling on time spent in one I/O state before the slot is reset
pub const IO_TIMEOUT_MS: u64 = 300_000;

/// Upper bound on the unregister phase of [`Node::shutdown`](crate::node::Node::shutdown)
pub const UNREGISTRATION_TIMEOUT_MS: u64 = 3000;

/// Default publish cycle period for publishers
pub const DEFAULT_PUBLISH_PERIOD_MS: u64 = 1000;

/// Default upper bound for one event loop iteration
pub const DEFAULT_LOOP_TIMEOUT_MS: u64 = 100;

// =======================================================================
// Wire limits
// =======================================================================

/// Per-call read chunk ceiling
pub const READ_CHUNK_SIZE: usize = 2048;

/// Largest accepted frame body (anti-OOM)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Keepalive applied to accepted streaming and service sockets:
/// (idle seconds, probe interval seconds, probe count)
pub const ACCEPT_KEEPALIVE: (u32, u32, u32) = (60, 10, 9);

/// Default master URI when neither config nor environment provides one
pub const DEFAULT_MASTER_URI: &str = "http://127.0.0.1:11311/";

/// Node configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct NodeConfig {
    /// Absolute node name (e.g. `/talker`)
    pub name: String,

    /// Host other nodes use to reach this node (None = primary local IPv4)
    pub host: Option<String>,

    /// Master XML-RPC URI
    pub master_uri: String,

    /// Upper bound for one `spin_once` call when no budget is given
    pub loop_timeout_ms: u64,

    // === Capacities ===
    pub max_publishers: usize,
    pub max_subscribers: usize,
    pub max_service_providers: usize,
    pub max_service_callers: usize,
    pub xmlrpc_server_slots: usize,
    pub tcpros_server_slots: usize,

    // === Timers ===
    pub ping_period_ms: u64,
    pub io_timeout_ms: u64,
    pub unregistration_timeout_ms: u64,

    // === Wire ===
    pub read_chunk_size: usize,
    pub max_frame_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "/roslink".to_string(),
            host: None,
            master_uri: DEFAULT_MASTER_URI.to_string(),
            loop_timeout_ms: DEFAULT_LOOP_TIMEOUT_MS,
            max_publishers: MAX_PUBLISHED_TOPICS,
            max_subscribers: MAX_SUBSCRIBED_TOPICS,
            max_service_providers: MAX_SERVICE_PROVIDERS,
            max_service_callers: MAX_SERVICE_CALLERS,
            xmlrpc_server_slots: MAX_XMLRPC_SERVER_CONNECTIONS,
            tcpros_server_slots: MAX_TCPROS_SERVER_CONNECTIONS,
            ping_period_ms: PING_PERIOD_MS,
            io_timeout_ms: IO_TIMEOUT_MS,
            unregistration_timeout_ms: UNREGISTRATION_TIMEOUT_MS,
            read_chunk_size: READ_CHUNK_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl NodeConfig {
    /// Defaults with the given node name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Defaults overridden by the process environment.
    pub fn from_env(name: &str) -> Self {
        let mut config = Self::new(name);
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply environment-style overrides through `lookup`.
    ///
    /// `ROS_HOSTNAME` wins over `ROS_IP`, as in the reference ROS tools.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup("ROS_MASTER_URI").filter(|v| !v.is_empty()) {
            self.master_uri = uri;
        }
        if let Some(host) = lookup("ROS_HOSTNAME")
            .filter(|v| !v.is_empty())
            .or_else(|| lookup("ROS_IP").filter(|v| !v.is_empty()))
        {
            self.host = Some(host);
        }
        if let Some(ms) = lookup("ROSLINK_LOOP_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.loop_timeout_ms = ms;
        }
    }

    /// Load a YAML file; missing keys keep their defaults.
    #[cfg(feature = "config-file")]
    pub fn load_yaml<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&text)
            .map_err(|e| Error::InvalidConfig(format!("YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn with_master_uri(mut self, uri: &str) -> Self {
        self.master_uri = uri.to_string();
        self
    }

    pub fn with_loop_timeout_ms(mut self, ms: u64) -> Self {
        self.loop_timeout_ms = ms;
        self
    }

    pub fn with_max_publishers(mut self, n: usize) -> Self {
        self.max_publishers = n;
        self
    }

    pub fn with_max_subscribers(mut self, n: usize) -> Self {
        self.max_subscribers = n;
        self
    }

    pub fn with_ping_period_ms(mut self, ms: u64) -> Self {
        self.ping_period_ms = ms;
        self
    }

    /// Check names, URIs and capacities.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("node name is empty".to_string()));
        }
        let master = Endpoint::parse(&self.master_uri)?;
        if master.scheme != "http" {
            return Err(Error::InvalidUri(self.master_uri.clone()));
        }
        let capacities = [
            ("max_publishers", self.max_publishers),
            ("max_subscribers", self.max_subscribers),
            ("max_service_providers", self.max_service_providers),
            ("max_service_callers", self.max_service_callers),
            ("xmlrpc_server_slots", self.xmlrpc_server_slots),
            ("tcpros_server_slots", self.tcpros_server_slots),
        ];
        for (field, value) in capacities {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be > 0", field)));
            }
        }
        if self.read_chunk_size == 0 || self.ping_period_ms == 0 {
            return Err(Error::InvalidConfig(
                "read_chunk_size and ping_period_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Master endpoint (config must be valid).
    pub fn master(&self) -> Result<Endpoint> {
        Endpoint::parse(&self.master_uri)
    }

    /// Host advertised to other nodes.
    pub fn resolved_host(&self) -> String {
        if let Some(host) = self.host.as_ref().filter(|h| !h.is_empty()) {
            return host.clone();
        }
        match local_ip_address::local_ip() {
            Ok(IpAddr::V4(ip)) => ip.to_string(),
            Ok(other) => {
                log::debug!("[node] ignoring non-IPv4 local address {}", other);
                "127.0.0.1".to_string()
            }
            Err(e) => {
                log::debug!("[node] local address lookup failed: {}", e);
                "127.0.0.1".to_string()
            }
        }
    }

    /// Control-client slots: the master slot plus one per subscriber.
    pub fn xmlrpc_client_slots(&self) -> usize {
        1 + self.max_subscribers
    }
}

// ============================================================================
// Tests
// ============================================================================
