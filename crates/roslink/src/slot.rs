// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-capacity slot tables addressed by small typed handles.
//!
//! Connection tables are created full ([`SlotTable::filled`]): every slot
//! exists for the node's lifetime and cycles between Idle and active.
//! Registration tables start empty ([`SlotTable::with_capacity`]) and only
//! grow; inserting past capacity is refused without touching the table.

use std::fmt;

use crate::error::{Error, Result};

/// Handle to one slot of a [`SlotTable`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u16);

impl SlotId {
    /// The master connection: slot 0 of the control-client table.
    pub const MASTER: SlotId = SlotId(0);

    pub fn new(index: usize) -> Self {
        debug_assert!(index <= u16::MAX as usize);
        Self(index as u16)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bounded arena of `T` keyed by [`SlotId`].
#[derive(Debug)]
pub struct SlotTable<T> {
    name: &'static str,
    items: Vec<T>,
    capacity: usize,
}

impl<T> SlotTable<T> {
    /// Empty table that accepts up to `capacity` inserts.
    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Table with every slot created by `init(index)`.
    pub fn filled<F>(name: &'static str, capacity: usize, mut init: F) -> Self
    where
        F: FnMut(SlotId) -> T,
    {
        let items = (0..capacity).map(|i| init(SlotId::new(i))).collect();
        Self {
            name,
            items,
            capacity,
        }
    }

    /// Append an item; fails when the table is full.
    pub fn insert(&mut self, item: T) -> Result<SlotId> {
        if self.items.len() >= self.capacity {
            return Err(Error::CapacityExceeded {
                table: self.name,
                capacity: self.capacity,
            });
        }
        self.items.push(item);
        Ok(SlotId::new(self.items.len() - 1))
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.items.get(id.index())
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.items.get_mut(id.index())
    }

    /// Slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (SlotId::new(i), item))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotId, &mut T)> {
        self.items
            .iter_mut()
            .enumerate()
            .map(|(i, item)| (SlotId::new(i), item))
    }

    /// Lowest-index slot matching `pred`.
    pub fn first_where<P>(&self, mut pred: P) -> Option<SlotId>
    where
        P: FnMut(&T) -> bool,
    {
        self.items.iter().position(|item| pred(item)).map(SlotId::new)
    }

    pub fn ids(&self) -> impl Iterator<Item = SlotId> {
        (0..self.items.len()).map(SlotId::new)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

// ============================================================================
// Tests
// ============================================================================
