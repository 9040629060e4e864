// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Buffer sources and the unified producer slot space.
//!
//! The router multiplexes two sources, each with its own native slot
//! numbering, behind one producer-facing slot namespace of
//! [`SlotSpace::len`] entries. Sink slots map to themselves; scratch slots
//! are reflected to the top of the space (`len - slot - 1`). Both sources
//! hand out small native indices, so their unified slots do not collide, and
//! the mapping is its own inverse: [`SlotSpace::to_unified`] and
//! [`SlotSpace::to_source`] are the same function.

use core::fmt;

/// Number of slots in every buffer queue of the ecosystem.
pub const NUM_BUFFER_SLOTS: usize = 32;

/// One of the two buffer sources behind the unified producer interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Source {
    /// The external queue that presents the final output.
    #[default]
    Sink,
    /// The internal pool used as an intermediate render target.
    Scratch,
}

impl Source {
    /// Returns an upper-case name for log lines.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sink => "SINK",
            Self::Scratch => "SCRATCH",
        }
    }
}

/// The unified slot namespace shared by both sources.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotSpace {
    len: usize,
}

impl SlotSpace {
    /// Creates a slot space with `len` slots.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero.
    #[must_use]
    pub const fn new(len: usize) -> Self {
        assert!(len != 0, "slot space must not be empty");
        Self { len }
    }

    /// Returns the number of slots.
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        self.len
    }

    /// Returns `true` if `slot` lies inside this space.
    #[inline]
    #[must_use]
    pub const fn contains(self, slot: usize) -> bool {
        slot < self.len
    }

    /// Maps a slot between `source`'s native numbering and the unified
    /// numbering, in either direction.
    ///
    /// Returns `None` if `slot` is outside the space.
    #[inline]
    #[must_use]
    pub const fn map(self, source: Source, slot: usize) -> Option<usize> {
        if slot >= self.len {
            return None;
        }
        match source {
            Source::Sink => Some(slot),
            Source::Scratch => Some(self.len - slot - 1),
        }
    }

    /// Maps a native slot of `source` to its unified slot.
    #[inline]
    #[must_use]
    pub const fn to_unified(self, source: Source, source_slot: usize) -> Option<usize> {
        self.map(source, source_slot)
    }

    /// Maps a unified slot back to `source`'s native slot.
    #[inline]
    #[must_use]
    pub const fn to_source(self, source: Source, slot: usize) -> Option<usize> {
        self.map(source, slot)
    }
}

impl Default for SlotSpace {
    fn default() -> Self {
        Self::new(NUM_BUFFER_SLOTS)
    }
}

impl fmt::Debug for SlotSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotSpace({})", self.len)
    }
}
