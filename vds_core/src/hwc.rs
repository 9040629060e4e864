// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hardware compositor contract.
//!
//! The router drives the hardware compositor directly at
//! [`advance_frame`](crate::router::FrameRouter::advance_frame) and
//! [`on_frame_committed`](crate::router::FrameRouter::on_frame_committed)
//! time. The compositor itself (what it does with the planes it is handed)
//! lives outside this crate.

use core::fmt;

use crate::Error;
use crate::buffer::BufferHandle;
use crate::fence::Fence;

/// Identifies a display known to the hardware compositor.
///
/// The compositor assigns these; the router passes them through without
/// interpreting the value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HwcDisplayId(pub u32);

impl fmt::Debug for HwcDisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HwcDisplayId({})", self.0)
    }
}

/// The calls the router makes on the hardware compositor.
pub trait HardwareComposer {
    /// Hands the compositor the frame's framebuffer (the GPU-rendered
    /// layer) along with the fence that signals when it is ready to read.
    ///
    /// # Errors
    ///
    /// Returns the compositor's failure, typically [`Error::Compositor`].
    fn post_framebuffer(
        &mut self,
        display: HwcDisplayId,
        acquire_fence: Fence,
        buffer: &BufferHandle,
    ) -> Result<(), Error>;

    /// Hands the compositor the buffer to write composited output into,
    /// along with the fence that signals when it is free to write.
    ///
    /// # Errors
    ///
    /// Returns the compositor's failure, typically [`Error::Compositor`].
    fn set_output_buffer(
        &mut self,
        display: HwcDisplayId,
        release_fence: Fence,
        buffer: &BufferHandle,
    ) -> Result<(), Error>;

    /// Returns, and forgets, the fence that signals when the compositor has
    /// finished reading the last posted framebuffer.
    fn take_release_fence(&mut self, display: HwcDisplayId) -> Fence;

    /// Returns the fence that signals when the last composition has been
    /// fully written to the output buffer.
    fn last_retire_fence(&mut self, display: HwcDisplayId) -> Fence;
}
