// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-slot ownership and cached buffers for the unified slot space.
//!
//! Each unified slot carries exactly one owning [`Source`] and the buffer
//! handle last fetched for it. A cached handle is only meaningful while the
//! owner is unchanged: when a source dequeues a slot the other source owned,
//! [`BufferRecordTable::claim`] hands the slot over and the caller must
//! refresh the buffer before use.

use alloc::vec::Vec;

use crate::buffer::BufferHandle;
use crate::slot::{SlotSpace, Source};

#[derive(Clone, Copy, Debug, Default)]
struct SlotRecord {
    owner: Source,
    buffer: Option<BufferHandle>,
}

/// Ownership tags and cached buffers, indexed by unified slot.
#[derive(Clone, Debug)]
pub struct BufferRecordTable {
    records: Vec<SlotRecord>,
}

impl BufferRecordTable {
    /// Creates a table covering `space`, with every slot owned by
    /// [`Source::Sink`] and no cached buffers.
    #[must_use]
    pub fn new(space: SlotSpace) -> Self {
        Self {
            records: alloc::vec![SlotRecord::default(); space.len()],
        }
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the table has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the source owning `slot`.
    #[must_use]
    pub fn owner(&self, slot: usize) -> Option<Source> {
        self.records.get(slot).map(|r| r.owner)
    }

    /// Records that `source` just dequeued `slot`.
    ///
    /// Returns `true` if ownership moved from the other source, in which case
    /// the cached buffer is dropped and must be refetched.
    pub fn claim(&mut self, slot: usize, source: Source) -> bool {
        let Some(record) = self.records.get_mut(slot) else {
            return false;
        };
        if record.owner == source {
            return false;
        }
        record.owner = source;
        record.buffer = None;
        true
    }

    /// Drops the cached buffer of every slot owned by `source`.
    pub fn clear_owned_by(&mut self, source: Source) {
        for record in self.records.iter_mut().filter(|r| r.owner == source) {
            record.buffer = None;
        }
    }

    /// Returns the cached buffer for `slot`.
    #[must_use]
    pub fn buffer(&self, slot: usize) -> Option<BufferHandle> {
        self.records.get(slot).and_then(|r| r.buffer)
    }

    /// Caches `buffer` for `slot`.
    pub fn set_buffer(&mut self, slot: usize, buffer: BufferHandle) {
        if let Some(record) = self.records.get_mut(slot) {
            record.buffer = Some(buffer);
        }
    }
}
