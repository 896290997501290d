// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `scheme://host:port/` endpoints used by the master and peer APIs.

use std::fmt;

use crate::error::{Error, Result};

/// Parsed endpoint URI (`http://host:port/`, `rosrpc://host:port`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        }
    }

    /// Parse `scheme://host:port[/path]`. The path is ignored.
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| Error::InvalidUri(uri.to_string()))?;
        let authority = rest.split('/').next().unwrap_or("");
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidUri(uri.to_string()))?;
        if scheme.is_empty() || host.is_empty() {
            return Err(Error::InvalidUri(uri.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidUri(uri.to_string()))?;
        Ok(Self::new(scheme, host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}/", self.scheme, self.host, self.port)
    }
}

// ============================================================================
// Tests
// ============================================================================
