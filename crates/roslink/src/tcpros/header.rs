// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCPROS connection header.
//!
//! ```text
//! +--------------+--------------+-------------+--------------+-----
//! | total (u32)  | len_0 (u32)  | "key=value" | len_1 (u32)  | ...
//! +--------------+--------------+-------------+--------------+-----
//! ```
//!
//! All integers are little-endian. The outer length is the usual frame
//! prefix; [`ConnectionHeader::decode`] takes the body only.

use crate::buffer::DynBuffer;
use crate::error::{Error, Result};
use crate::transport::{decode_len, FRAME_HEADER_SIZE};

/// Ordered `key=value` fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionHeader {
    fields: Vec<(String, String)>,
}

impl ConnectionHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: &str, value: &str) {
        self.fields.push((key.to_string(), value.to_string()));
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `key` is present and equals `"1"`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("1")
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Append the framed header (outer length included) to `out`.
    pub fn encode(&self, out: &mut DynBuffer) {
        let total: usize = self
            .fields
            .iter()
            .map(|(k, v)| FRAME_HEADER_SIZE + k.len() + 1 + v.len())
            .sum();
        out.push_u32_le(total as u32);
        for (key, value) in &self.fields {
            out.push_u32_le((key.len() + 1 + value.len()) as u32);
            out.push_str(key);
            out.push_u8(b'=');
            out.push_str(value);
        }
    }

    /// Decode a header body (without the outer length).
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut fields = Vec::new();
        let mut rest = body;
        while !rest.is_empty() {
            let len = decode_len(rest)
                .ok_or_else(|| Error::Header("truncated field length".to_string()))?
                as usize;
            rest = &rest[FRAME_HEADER_SIZE..];
            let raw = rest
                .get(..len)
                .ok_or_else(|| Error::Header(format!("field of {} bytes overruns header", len)))?;
            rest = &rest[len..];

            let text = std::str::from_utf8(raw)
                .map_err(|_| Error::Header("field is not UTF-8".to_string()))?;
            let (key, value) = text
                .split_once('=')
                .ok_or_else(|| Error::Header(format!("field without '=': {:?}", text)))?;
            fields.push((key.to_string(), value.to_string()));
        }
        Ok(Self { fields })
    }
}

/// Checksums agree, or either side is the `*` wildcard.
pub fn md5_matches(ours: &str, theirs: &str) -> bool {
    ours == "*" || theirs == "*" || ours == theirs
}

/// Type names agree, or either side is the `*` wildcard.
pub fn type_matches(ours: &str, theirs: &str) -> bool {
    ours == "*" || theirs == "*" || ours == theirs
}

// ============================================================================
// Tests
// ============================================================================
