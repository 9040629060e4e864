// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The producer-side buffer queue contract.
//!
//! [`BufferProducer`] is the capability set every buffer source exposes:
//! the external sink, the internal scratch pool, and the
//! [`FrameRouter`](crate::router::FrameRouter) itself, which presents both
//! sources to the renderer as one producer.
//!
//! All dequeues are non-blocking. A source with no free buffer fails with
//! [`Error::WouldBlock`] rather than waiting.

use kurbo::Rect;

use crate::Error;
use crate::buffer::{BufferHandle, PixelFormat, Usage};
use crate::fence::Fence;
use crate::time::HostTime;

bitflags::bitflags! {
    /// Side conditions reported alongside a successful dequeue.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DequeueFlags: u32 {
        /// The slot's buffer changed; the producer must call
        /// [`BufferProducer::request_buffer`] before using it.
        const NEEDS_REALLOCATION = 0x1;
        /// Every buffer the producer cached from this source is stale.
        const RELEASE_ALL_BUFFERS = 0x2;
    }
}

bitflags::bitflags! {
    /// Flip and rotation applied to a buffer's content.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Transform: u32 {
        /// Mirror horizontally.
        const FLIP_H = 0x1;
        /// Mirror vertically.
        const FLIP_V = 0x2;
        /// Rotate 90 degrees clockwise.
        const ROT_90 = 0x4;
    }
}

/// How the consumer scales a queued buffer that does not match its size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ScalingMode {
    /// Present the buffer as is; no additional scaling.
    #[default]
    Freeze,
    /// Stretch the buffer to the window.
    ScaleToWindow,
    /// Scale preserving aspect ratio, cropping the excess.
    ScaleCrop,
    /// Crop without scaling.
    NoScaleCrop,
}

/// Client API that connects to a producer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientApi {
    /// A GPU driver.
    Egl,
    /// CPU rendering.
    Cpu,
    /// A media decoder.
    Media,
    /// A camera pipeline.
    Camera,
}

/// Keys accepted by [`BufferProducer::query`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Query {
    /// Default buffer width.
    Width,
    /// Default buffer height.
    Height,
    /// Default pixel format.
    Format,
    /// Buffers the consumer may hold that the producer cannot dequeue.
    MinUndequeuedBuffers,
    /// Usage bits the consumer adds to every allocation.
    ConsumerUsageBits,
    /// Transform the consumer prefers producers to pre-apply.
    TransformHint,
}

/// Parameters of a dequeue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DequeueRequest {
    /// Requested width; 0 selects the queue's default.
    pub width: u32,
    /// Requested height; 0 selects the queue's default.
    pub height: u32,
    /// Requested format; [`PixelFormat::DEFAULT`] selects the queue's
    /// default.
    pub format: PixelFormat,
    /// Usage the buffer must support.
    pub usage: Usage,
}

/// Result of a successful dequeue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dequeued {
    /// Slot the producer now owns.
    pub slot: usize,
    /// Fence the producer must wait on before writing.
    pub fence: Fence,
    /// Side conditions.
    pub flags: DequeueFlags,
}

/// Metadata attached to a queued buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueueInput {
    /// Presentation timestamp.
    pub timestamp: HostTime,
    /// Region of the buffer holding valid content, in pixels.
    pub crop: Rect,
    /// Scaling policy for the consumer.
    pub scaling_mode: ScalingMode,
    /// Transform to apply on presentation.
    pub transform: Transform,
    /// Fence that signals when the producer has finished writing.
    pub fence: Fence,
}

impl QueueInput {
    /// Creates input for a `width` x `height` buffer with no scaling or
    /// transform.
    #[must_use]
    pub fn new(timestamp: HostTime, width: u32, height: u32, fence: Fence) -> Self {
        Self {
            timestamp,
            crop: Rect::new(0.0, 0.0, f64::from(width), f64::from(height)),
            scaling_mode: ScalingMode::Freeze,
            transform: Transform::empty(),
            fence,
        }
    }
}

/// Geometry negotiated with a consumer on connect and on every queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueOutput {
    /// Default buffer width.
    pub width: u32,
    /// Default buffer height.
    pub height: u32,
    /// Preferred transform.
    pub transform_hint: Transform,
    /// Buffers queued but not yet acquired by the consumer.
    pub pending_buffers: u32,
}

/// The buffer-producing side of a buffer queue.
pub trait BufferProducer {
    /// Takes ownership of a free slot.
    ///
    /// # Errors
    ///
    /// [`Error::WouldBlock`] if no slot is free, [`Error::Abandoned`] if the
    /// queue is gone, or any allocation failure.
    fn dequeue_buffer(&mut self, request: &DequeueRequest) -> Result<Dequeued, Error>;

    /// Hands a dequeued slot to the consumer.
    ///
    /// # Errors
    ///
    /// [`Error::BadValue`] if `slot` is not dequeued.
    fn queue_buffer(&mut self, slot: usize, input: &QueueInput) -> Result<QueueOutput, Error>;

    /// Returns a dequeued slot unused.
    ///
    /// # Errors
    ///
    /// [`Error::BadValue`] if `slot` is not dequeued.
    fn cancel_buffer(&mut self, slot: usize, fence: Fence) -> Result<(), Error>;

    /// Returns the buffer currently backing `slot`.
    ///
    /// # Errors
    ///
    /// [`Error::BadValue`] if `slot` has no buffer.
    fn request_buffer(&mut self, slot: usize) -> Result<BufferHandle, Error>;

    /// Sets the number of buffers the producer may use.
    ///
    /// # Errors
    ///
    /// [`Error::BadValue`] for an unsupported count.
    fn set_buffer_count(&mut self, count: usize) -> Result<(), Error>;

    /// Connects a client API.
    ///
    /// # Errors
    ///
    /// [`Error::BadValue`] if a client is already connected.
    fn connect(&mut self, api: ClientApi) -> Result<QueueOutput, Error>;

    /// Disconnects a client API.
    ///
    /// # Errors
    ///
    /// [`Error::BadValue`] if `api` is not the connected client.
    fn disconnect(&mut self, api: ClientApi) -> Result<(), Error>;

    /// Reads a queue property.
    ///
    /// # Errors
    ///
    /// [`Error::BadValue`] for an unsupported key.
    fn query(&mut self, what: Query) -> Result<u32, Error>;
}
