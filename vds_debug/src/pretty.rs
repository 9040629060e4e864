// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Commit
//! timestamps are converted to microseconds using a [`Timebase`].

use std::io::Write;

use vds_core::fence::Fence;
use vds_core::time::Timebase;
use vds_core::trace::{
    BufferDequeuedEvent, FrameAdvancedEvent, FrameCommittedEvent, FramePreparedEvent,
    FramebufferQueuedEvent, MissingBufferEvent, ProtocolViolationEvent, TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write + Send>> {
    writer: W,
    timebase: Timebase,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink")
            .field("timebase", &self.timebase)
            .finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr(timebase: Timebase) -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
            timebase,
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }

    fn ticks_to_us(&self, ticks: u64) -> f64 {
        self.timebase.ticks_to_nanos(ticks) as f64 / 1000.0
    }
}

struct FenceDisplay(Fence);

impl std::fmt::Display for FenceDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.point() {
            Some(point) => write!(f, "{point}"),
            None => f.write_str("-"),
        }
    }
}

fn slot_or_dash(slot: Option<usize>) -> String {
    slot.map_or_else(|| "-".to_owned(), |s| s.to_string())
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_frame_prepared(&mut self, e: &FramePreparedEvent) {
        let _ = writeln!(
            self.writer,
            "[prepare] frame={} display={} mode={}{}",
            e.frame_index,
            e.display.0,
            e.mode.name(),
            if e.mode == e.previous_mode {
                String::new()
            } else {
                format!(" (was {})", e.previous_mode.name())
            },
        );
    }

    fn on_buffer_dequeued(&mut self, e: &BufferDequeuedEvent) {
        let _ = writeln!(
            self.writer,
            "[dequeue] frame={} {} sslot={} pslot={} fence={}{}{}",
            e.frame_index,
            e.source.name(),
            e.source_slot,
            e.slot,
            FenceDisplay(e.fence),
            if e.reallocated { " realloc" } else { "" },
            if e.released_all { " release-all" } else { "" },
        );
    }

    fn on_framebuffer_queued(&mut self, e: &FramebufferQueuedEvent) {
        let _ = writeln!(
            self.writer,
            "[queue] frame={} {} pslot={} fence={}",
            e.frame_index,
            e.source.name(),
            e.slot,
            FenceDisplay(e.fence),
        );
    }

    fn on_frame_advanced(&mut self, e: &FrameAdvancedEvent) {
        let _ = writeln!(
            self.writer,
            "[advance] frame={} fb={}({}) out={}({})",
            e.frame_index, e.framebuffer_slot, e.framebuffer.0, e.output_slot, e.output.0,
        );
    }

    fn on_missing_buffer(&mut self, e: &MissingBufferEvent) {
        let _ = writeln!(
            self.writer,
            "[missing] frame={} fb={} out={}",
            e.frame_index,
            slot_or_dash(e.framebuffer_slot),
            slot_or_dash(e.output_slot),
        );
    }

    fn on_frame_committed(&mut self, e: &FrameCommittedEvent) {
        let _ = writeln!(
            self.writer,
            "[commit] frame={} at {:.1}µs scratch={} sink={}",
            e.frame_index,
            self.ticks_to_us(e.timestamp.ticks()),
            slot_or_dash(e.released_scratch_slot),
            slot_or_dash(e.queued_sink_slot),
        );
    }

    fn on_protocol_violation(&mut self, e: &ProtocolViolationEvent) {
        let verdict = if e.rejected { "REJECTED" } else { "allowed" };
        let _ = writeln!(
            self.writer,
            "[violation] frame={} {}() in {} {verdict}",
            e.frame_index,
            e.call.name(),
            e.state.name(),
        );
    }
}
