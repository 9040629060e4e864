// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Structured instrumentation for the frame protocol.
//!
//! This module provides a [`TraceSink`] trait with one method per routing
//! event. All method bodies default to no-ops, so implementing only the
//! events you care about is fine.
//!
//! [`Tracer`] owns an optional boxed sink. When the `trace` feature is
//! **off**, every `Tracer` method compiles to nothing and installed sinks are
//! dropped. When **on**, each method performs a single `Option` branch
//! before dispatching.
//!
//! Human-readable warnings (out-of-order calls, mismatched slots) go through
//! the `log` facade regardless of this feature.

use alloc::boxed::Box;

use crate::buffer::BufferId;
use crate::fence::Fence;
use crate::hwc::HwcDisplayId;
use crate::router::{Call, CompositionMode, FrameState};
use crate::slot::Source;
use crate::time::HostTime;

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted when a frame is prepared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramePreparedEvent {
    /// Number of frames committed before this one.
    pub frame_index: u64,
    /// Compositor display.
    pub display: HwcDisplayId,
    /// Composition mode of this frame.
    pub mode: CompositionMode,
    /// Composition mode of the previous prepared frame.
    pub previous_mode: CompositionMode,
}

/// Emitted after a buffer is dequeued from either source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDequeuedEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Source the buffer came from.
    pub source: Source,
    /// Slot in the source's own numbering.
    pub source_slot: usize,
    /// Unified slot.
    pub slot: usize,
    /// Fence returned by the source.
    pub fence: Fence,
    /// Whether the cached buffer was refetched.
    pub reallocated: bool,
    /// Whether the source asked for all of its cached buffers to be dropped.
    pub released_all: bool,
}

/// Emitted when the renderer's framebuffer is queued back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramebufferQueuedEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Source holding the framebuffer.
    pub source: Source,
    /// Unified framebuffer slot.
    pub slot: usize,
    /// Fence that signals when rendering is complete.
    pub fence: Fence,
}

/// Emitted after the framebuffer and output buffer reach the compositor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameAdvancedEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Compositor display.
    pub display: HwcDisplayId,
    /// Composition mode.
    pub mode: CompositionMode,
    /// Unified framebuffer slot.
    pub framebuffer_slot: usize,
    /// Framebuffer identity.
    pub framebuffer: BufferId,
    /// Unified output slot.
    pub output_slot: usize,
    /// Output buffer identity.
    pub output: BufferId,
}

/// Emitted when `advance_frame` abandons a frame for lack of buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MissingBufferEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Unified framebuffer slot, if one was produced.
    pub framebuffer_slot: Option<usize>,
    /// Unified output slot, if one was produced.
    pub output_slot: Option<usize>,
}

/// Emitted when a frame is committed and per-frame state is reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCommittedEvent {
    /// Frame counter of the committed frame.
    pub frame_index: u64,
    /// Compositor display.
    pub display: HwcDisplayId,
    /// Composition mode of the committed frame.
    pub mode: CompositionMode,
    /// Timestamp attached to the sink queue.
    pub timestamp: HostTime,
    /// Scratch slot returned to the pool, if any.
    pub released_scratch_slot: Option<usize>,
    /// Sink slot queued for presentation, if any.
    pub queued_sink_slot: Option<usize>,
}

/// Emitted when a call arrives in a state that does not expect it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolViolationEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// The offending call.
    pub call: Call,
    /// The state it arrived in.
    pub state: FrameState,
    /// Whether the call was rejected rather than carried out.
    pub rejected: bool,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the frame router.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called when a frame is prepared.
    fn on_frame_prepared(&mut self, e: &FramePreparedEvent) {
        _ = e;
    }

    /// Called after a buffer is dequeued from either source.
    fn on_buffer_dequeued(&mut self, e: &BufferDequeuedEvent) {
        _ = e;
    }

    /// Called when the renderer's framebuffer is queued back.
    fn on_framebuffer_queued(&mut self, e: &FramebufferQueuedEvent) {
        _ = e;
    }

    /// Called after buffers are handed to the compositor.
    fn on_frame_advanced(&mut self, e: &FrameAdvancedEvent) {
        _ = e;
    }

    /// Called when a frame is abandoned for lack of buffers.
    fn on_missing_buffer(&mut self, e: &MissingBufferEvent) {
        _ = e;
    }

    /// Called when a frame is committed.
    fn on_frame_committed(&mut self, e: &FrameCommittedEvent) {
        _ = e;
    }

    /// Called when a call arrives out of order.
    fn on_protocol_violation(&mut self, e: &ProtocolViolationEvent) {
        _ = e;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Owner of an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing.
/// When **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
#[derive(Default)]
pub struct Tracer {
    #[cfg(feature = "trace")]
    sink: Option<Box<dyn TraceSink + Send>>,
}

impl core::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl Tracer {
    /// Creates a tracer that dispatches to the given sink.
    #[must_use]
    pub fn new(sink: Box<dyn TraceSink + Send>) -> Self {
        let mut tracer = Self::none();
        tracer.set_sink(sink);
        tracer
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Replaces the sink.
    pub fn set_sink(&mut self, sink: Box<dyn TraceSink + Send>) {
        #[cfg(feature = "trace")]
        {
            self.sink = Some(sink);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
        }
    }

    /// Emits a [`FramePreparedEvent`].
    #[inline]
    pub fn frame_prepared(&mut self, e: &FramePreparedEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_frame_prepared(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`BufferDequeuedEvent`].
    #[inline]
    pub fn buffer_dequeued(&mut self, e: &BufferDequeuedEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_buffer_dequeued(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FramebufferQueuedEvent`].
    #[inline]
    pub fn framebuffer_queued(&mut self, e: &FramebufferQueuedEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_framebuffer_queued(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FrameAdvancedEvent`].
    #[inline]
    pub fn frame_advanced(&mut self, e: &FrameAdvancedEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_frame_advanced(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`MissingBufferEvent`].
    #[inline]
    pub fn missing_buffer(&mut self, e: &MissingBufferEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_missing_buffer(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FrameCommittedEvent`].
    #[inline]
    pub fn frame_committed(&mut self, e: &FrameCommittedEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_frame_committed(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`ProtocolViolationEvent`].
    #[inline]
    pub fn protocol_violation(&mut self, e: &ProtocolViolationEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_protocol_violation(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
