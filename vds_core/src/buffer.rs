// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Graphic buffer handles and allocation.
//!
//! Graphics memory is allocated outside this crate. A [`BufferHandle`] is
//! the router's view of one allocation: an identity plus the geometry,
//! format, and usage it was allocated with.

use core::fmt;

bitflags::bitflags! {
    /// Usage bits describing which hardware touches a buffer.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Usage: u32 {
        /// Frequent CPU reads.
        const SW_READ_OFTEN = 0x0000_0003;
        /// Frequent CPU writes.
        const SW_WRITE_OFTEN = 0x0000_0030;
        /// Sampled as a GPU texture.
        const HW_TEXTURE = 0x0000_0100;
        /// Rendered into by the GPU.
        const HW_RENDER = 0x0000_0200;
        /// Read by the hardware compositor.
        const HW_COMPOSER = 0x0000_0800;
        /// Read by a video encoder.
        const HW_VIDEO_ENCODER = 0x0001_0000;
    }
}

impl fmt::Debug for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Usage({:#x})", self.bits())
    }
}

/// A pixel format code. `PixelFormat::DEFAULT` lets the queue choose.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    /// Use the queue's default format.
    pub const DEFAULT: Self = Self(0);
    /// 32-bit RGBA, 8 bits per channel.
    pub const RGBA_8888: Self = Self(1);
    /// 32-bit RGB with an ignored alpha byte.
    pub const RGBX_8888: Self = Self(2);
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PixelFormat({})", self.0)
    }
}

/// Identity of one graphics allocation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub u64);

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferId({})", self.0)
    }
}

/// A reference to an externally allocated graphic buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    /// Identity of the allocation.
    pub id: BufferId,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: PixelFormat,
    /// Usage the buffer was allocated for.
    pub usage: Usage,
}

impl BufferHandle {
    /// Returns `true` if this buffer satisfies a request for the given
    /// geometry, format, and usage.
    #[must_use]
    pub fn matches(&self, width: u32, height: u32, format: PixelFormat, usage: Usage) -> bool {
        self.width == width
            && self.height == height
            && (format == PixelFormat::DEFAULT || self.format == format)
            && self.usage.contains(usage)
    }
}

/// Allocates graphics memory on behalf of the scratch pool.
pub trait BufferAllocator {
    /// Allocates a buffer with the given geometry, format, and usage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMemory`](crate::Error::NoMemory) (or another
    /// error) if the allocation fails.
    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: Usage,
    ) -> Result<BufferHandle, crate::Error>;
}
