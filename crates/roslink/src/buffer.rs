// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Growable byte buffer with a read cursor.
//!
//! ```text
//!  0            cursor              len          capacity
//!  +-------------+-------------------+---------------+
//!  |  consumed   |  remaining data   |   spare       |
//!  +-------------+-------------------+---------------+
//! ```
//!
//! Invariant: `cursor <= len <= capacity`. [`DynBuffer::clear`] resets
//! cursor and length but keeps the allocation, so a slot reuses the same
//! buffer across connection cycles.

/// Append-only byte buffer with a read cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DynBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl DynBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    /// Append bytes (capacity grows geometrically).
    pub fn push_back(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn push_str(&mut self, text: &str) {
        self.data.extend_from_slice(text.as_bytes());
    }

    pub fn push_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    /// Append a little-endian u32.
    pub fn push_u32_le(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Unread bytes (from the cursor to the end).
    pub fn data(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    /// Everything written, ignoring the cursor.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// Move the cursor forward, clamped to the written length.
    pub fn advance(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.data.len());
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }
}

// ============================================================================
// Tests
// ============================================================================
