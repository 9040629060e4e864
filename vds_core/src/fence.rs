// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Synchronization fences.
//!
//! A [`Fence`] is an opaque point on a synchronization timeline, always
//! paired with a buffer and handed from the stage that writes the buffer to
//! the stage that reads it next. The router never waits on fences; it only
//! carries them between the renderer, the scratch pool, the hardware
//! compositor, and the sink.

use core::fmt;

/// An opaque synchronization point, or [`Fence::NONE`] for "already
/// signaled".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fence(Option<u64>);

impl Fence {
    /// A fence that is always signaled.
    pub const NONE: Self = Self(None);

    /// Creates a fence that signals when the timeline reaches `point`.
    #[inline]
    #[must_use]
    pub const fn at(point: u64) -> Self {
        Self(Some(point))
    }

    /// Returns `true` if this fence refers to a real timeline point.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0.is_some()
    }

    /// Returns the timeline point, if any.
    #[inline]
    #[must_use]
    pub const fn point(self) -> Option<u64> {
        self.0
    }

    /// Returns a fence that signals once both `self` and `other` have
    /// signaled.
    ///
    /// Points share one timeline, so the later point covers the earlier.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Self(Some(a.max(b))),
            (Some(_), None) => self,
            (None, _) => other,
        }
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(point) => write!(f, "Fence({point})"),
            None => f.write_str("Fence(NONE)"),
        }
    }
}
