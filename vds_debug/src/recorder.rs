// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as little-endian records, each stamped with the recorder's
//! clock. [`decode`] reads them back as an iterator of [`Record`].

use std::fmt;
use std::time::Instant;

use vds_core::buffer::BufferId;
use vds_core::fence::Fence;
use vds_core::hwc::HwcDisplayId;
use vds_core::router::{Call, CompositionMode, FrameState};
use vds_core::slot::Source;
use vds_core::time::HostTime;
use vds_core::trace::{
    BufferDequeuedEvent, FrameAdvancedEvent, FrameCommittedEvent, FramePreparedEvent,
    FramebufferQueuedEvent, MissingBufferEvent, ProtocolViolationEvent, TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_FRAME_PREPARED: u8 = 1;
const TAG_BUFFER_DEQUEUED: u8 = 2;
const TAG_FRAMEBUFFER_QUEUED: u8 = 3;
const TAG_FRAME_ADVANCED: u8 = 4;
const TAG_MISSING_BUFFER: u8 = 5;
const TAG_FRAME_COMMITTED: u8 = 6;
const TAG_PROTOCOL_VIOLATION: u8 = 7;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
pub struct RecorderSink {
    buf: Vec<u8>,
    clock: Box<dyn FnMut() -> HostTime + Send>,
}

impl fmt::Debug for RecorderSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecorderSink")
            .field("len", &self.buf.len())
            .finish_non_exhaustive()
    }
}

impl Default for RecorderSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderSink {
    /// Creates an empty recorder that stamps events with nanoseconds since
    /// its creation.
    #[must_use]
    pub fn new() -> Self {
        let start = Instant::now();
        Self::with_clock(move || {
            HostTime(u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX))
        })
    }

    /// Creates an empty recorder that stamps events with `clock`.
    #[must_use]
    pub fn with_clock(clock: impl FnMut() -> HostTime + Send + 'static) -> Self {
        Self {
            buf: Vec::new(),
            clock: Box::new(clock),
        }
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn begin(&mut self, tag: u8, frame_index: u64) {
        let at = (self.clock)();
        self.write_u8(tag);
        self.write_u64(at.ticks());
        self.write_u64(frame_index);
    }

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_slot(&mut self, slot: usize) {
        self.write_u32(u32::try_from(slot).unwrap_or(u32::MAX));
    }

    fn write_option_slot(&mut self, slot: Option<usize>) {
        match slot {
            Some(s) => {
                self.write_u8(1);
                self.write_slot(s);
            }
            None => {
                self.write_u8(0);
                self.write_u32(0);
            }
        }
    }

    fn write_fence(&mut self, fence: Fence) {
        match fence.point() {
            Some(point) => {
                self.write_u8(1);
                self.write_u64(point);
            }
            None => {
                self.write_u8(0);
                self.write_u64(0);
            }
        }
    }

    fn write_mode(&mut self, mode: CompositionMode) {
        self.write_u8(match mode {
            CompositionMode::Unknown => 0,
            CompositionMode::RenderOnly => 1,
            CompositionMode::CompositeOnly => 2,
            CompositionMode::Mixed => 3,
        });
    }

    fn write_source(&mut self, source: Source) {
        self.write_u8(match source {
            Source::Sink => 0,
            Source::Scratch => 1,
        });
    }
}

impl TraceSink for RecorderSink {
    fn on_frame_prepared(&mut self, e: &FramePreparedEvent) {
        self.begin(TAG_FRAME_PREPARED, e.frame_index);
        self.write_u32(e.display.0);
        self.write_mode(e.mode);
        self.write_mode(e.previous_mode);
    }

    fn on_buffer_dequeued(&mut self, e: &BufferDequeuedEvent) {
        self.begin(TAG_BUFFER_DEQUEUED, e.frame_index);
        self.write_source(e.source);
        self.write_slot(e.source_slot);
        self.write_slot(e.slot);
        self.write_fence(e.fence);
        self.write_bool(e.reallocated);
        self.write_bool(e.released_all);
    }

    fn on_framebuffer_queued(&mut self, e: &FramebufferQueuedEvent) {
        self.begin(TAG_FRAMEBUFFER_QUEUED, e.frame_index);
        self.write_source(e.source);
        self.write_slot(e.slot);
        self.write_fence(e.fence);
    }

    fn on_frame_advanced(&mut self, e: &FrameAdvancedEvent) {
        self.begin(TAG_FRAME_ADVANCED, e.frame_index);
        self.write_u32(e.display.0);
        self.write_mode(e.mode);
        self.write_slot(e.framebuffer_slot);
        self.write_u64(e.framebuffer.0);
        self.write_slot(e.output_slot);
        self.write_u64(e.output.0);
    }

    fn on_missing_buffer(&mut self, e: &MissingBufferEvent) {
        self.begin(TAG_MISSING_BUFFER, e.frame_index);
        self.write_option_slot(e.framebuffer_slot);
        self.write_option_slot(e.output_slot);
    }

    fn on_frame_committed(&mut self, e: &FrameCommittedEvent) {
        self.begin(TAG_FRAME_COMMITTED, e.frame_index);
        self.write_u32(e.display.0);
        self.write_mode(e.mode);
        self.write_u64(e.timestamp.ticks());
        self.write_option_slot(e.released_scratch_slot);
        self.write_option_slot(e.queued_sink_slot);
    }

    fn on_protocol_violation(&mut self, e: &ProtocolViolationEvent) {
        self.begin(TAG_PROTOCOL_VIOLATION, e.frame_index);
        self.write_u8(match e.call {
            Call::PrepareFrame => 0,
            Call::DequeueBuffer => 1,
            Call::QueueBuffer => 2,
            Call::CancelBuffer => 3,
            Call::RequestBuffer => 4,
            Call::AdvanceFrame => 5,
            Call::OnFrameCommitted => 6,
        });
        self.write_u8(match e.state {
            FrameState::Idle => 0,
            FrameState::Prepared => 1,
            FrameState::Rendering => 2,
            FrameState::RenderDone => 3,
            FrameState::Compositing => 4,
        });
        self.write_bool(e.rejected);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedEvent {
    /// A [`FramePreparedEvent`].
    FramePrepared(FramePreparedEvent),
    /// A [`BufferDequeuedEvent`].
    BufferDequeued(BufferDequeuedEvent),
    /// A [`FramebufferQueuedEvent`].
    FramebufferQueued(FramebufferQueuedEvent),
    /// A [`FrameAdvancedEvent`].
    FrameAdvanced(FrameAdvancedEvent),
    /// A [`MissingBufferEvent`].
    MissingBuffer(MissingBufferEvent),
    /// A [`FrameCommittedEvent`].
    FrameCommitted(FrameCommittedEvent),
    /// A [`ProtocolViolationEvent`].
    ProtocolViolation(ProtocolViolationEvent),
}

impl RecordedEvent {
    /// Returns the frame counter the event belongs to.
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        match self {
            Self::FramePrepared(e) => e.frame_index,
            Self::BufferDequeued(e) => e.frame_index,
            Self::FramebufferQueued(e) => e.frame_index,
            Self::FrameAdvanced(e) => e.frame_index,
            Self::MissingBuffer(e) => e.frame_index,
            Self::FrameCommitted(e) => e.frame_index,
            Self::ProtocolViolation(e) => e.frame_index,
        }
    }
}

/// A decoded event and the time it was recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Recorder clock reading when the event arrived.
    pub at: HostTime,
    /// The event.
    pub event: RecordedEvent,
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`Record`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded records.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?.try_into().ok()?;
        self.pos += N;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[v]| v)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_bool(&mut self) -> Option<bool> {
        Some(self.read_u8()? != 0)
    }

    fn read_slot(&mut self) -> Option<usize> {
        usize::try_from(self.read_u32()?).ok()
    }

    fn read_option_slot(&mut self) -> Option<Option<usize>> {
        let present = self.read_u8()?;
        let slot = self.read_slot()?;
        Some((present != 0).then_some(slot))
    }

    fn read_fence(&mut self) -> Option<Fence> {
        let present = self.read_u8()?;
        let point = self.read_u64()?;
        Some(if present != 0 {
            Fence::at(point)
        } else {
            Fence::NONE
        })
    }

    fn read_mode(&mut self) -> Option<CompositionMode> {
        Some(match self.read_u8()? {
            0 => CompositionMode::Unknown,
            1 => CompositionMode::RenderOnly,
            2 => CompositionMode::CompositeOnly,
            _ => CompositionMode::Mixed,
        })
    }

    fn read_source(&mut self) -> Option<Source> {
        Some(match self.read_u8()? {
            0 => Source::Sink,
            _ => Source::Scratch,
        })
    }

    fn read_call(&mut self) -> Option<Call> {
        Some(match self.read_u8()? {
            0 => Call::PrepareFrame,
            1 => Call::DequeueBuffer,
            2 => Call::QueueBuffer,
            3 => Call::CancelBuffer,
            4 => Call::RequestBuffer,
            5 => Call::AdvanceFrame,
            _ => Call::OnFrameCommitted,
        })
    }

    fn read_state(&mut self) -> Option<FrameState> {
        Some(match self.read_u8()? {
            0 => FrameState::Idle,
            1 => FrameState::Prepared,
            2 => FrameState::Rendering,
            3 => FrameState::RenderDone,
            _ => FrameState::Compositing,
        })
    }

    fn decode_event(&mut self, tag: u8, frame_index: u64) -> Option<RecordedEvent> {
        Some(match tag {
            TAG_FRAME_PREPARED => RecordedEvent::FramePrepared(FramePreparedEvent {
                frame_index,
                display: HwcDisplayId(self.read_u32()?),
                mode: self.read_mode()?,
                previous_mode: self.read_mode()?,
            }),
            TAG_BUFFER_DEQUEUED => RecordedEvent::BufferDequeued(BufferDequeuedEvent {
                frame_index,
                source: self.read_source()?,
                source_slot: self.read_slot()?,
                slot: self.read_slot()?,
                fence: self.read_fence()?,
                reallocated: self.read_bool()?,
                released_all: self.read_bool()?,
            }),
            TAG_FRAMEBUFFER_QUEUED => RecordedEvent::FramebufferQueued(FramebufferQueuedEvent {
                frame_index,
                source: self.read_source()?,
                slot: self.read_slot()?,
                fence: self.read_fence()?,
            }),
            TAG_FRAME_ADVANCED => RecordedEvent::FrameAdvanced(FrameAdvancedEvent {
                frame_index,
                display: HwcDisplayId(self.read_u32()?),
                mode: self.read_mode()?,
                framebuffer_slot: self.read_slot()?,
                framebuffer: BufferId(self.read_u64()?),
                output_slot: self.read_slot()?,
                output: BufferId(self.read_u64()?),
            }),
            TAG_MISSING_BUFFER => RecordedEvent::MissingBuffer(MissingBufferEvent {
                frame_index,
                framebuffer_slot: self.read_option_slot()?,
                output_slot: self.read_option_slot()?,
            }),
            TAG_FRAME_COMMITTED => RecordedEvent::FrameCommitted(FrameCommittedEvent {
                frame_index,
                display: HwcDisplayId(self.read_u32()?),
                mode: self.read_mode()?,
                timestamp: HostTime(self.read_u64()?),
                released_scratch_slot: self.read_option_slot()?,
                queued_sink_slot: self.read_option_slot()?,
            }),
            TAG_PROTOCOL_VIOLATION => RecordedEvent::ProtocolViolation(ProtocolViolationEvent {
                frame_index,
                call: self.read_call()?,
                state: self.read_state()?,
                rejected: self.read_bool()?,
            }),
            _ => return None, // unknown tag → stop iteration
        })
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        let at = HostTime(self.read_u64()?);
        let frame_index = self.read_u64()?;
        let event = self.decode_event(tag, frame_index)?;
        Some(Record { at, event })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
