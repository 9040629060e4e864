// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! Each frame becomes a duration slice on the router track, from
//! `prepare_frame` to `on_frame_committed`. Dequeues appear as instants on
//! the track of the source they came from.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use vds_core::fence::Fence;
use vds_core::slot::Source;
use vds_core::time::Timebase;

use crate::recorder::{RecordedEvent, decode};

const TID_ROUTER: u32 = 0;
const TID_SINK: u32 = 1;
const TID_SCRATCH: u32 = 2;

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Timestamps are converted to microseconds using the provided [`Timebase`].
pub fn export(bytes: &[u8], timebase: Timebase, writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();

    for record in decode(bytes) {
        let ts = ticks_to_us(record.at.ticks(), timebase);
        match record.event {
            RecordedEvent::FramePrepared(e) => {
                events.push(json!({
                    "ph": "B",
                    "name": format!("Frame {}", e.mode.name()),
                    "cat": "Router",
                    "ts": ts,
                    "pid": e.display.0,
                    "tid": TID_ROUTER,
                    "args": {
                        "frame_index": e.frame_index,
                        "previous_mode": e.previous_mode.name(),
                    }
                }));
            }
            RecordedEvent::BufferDequeued(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Dequeue",
                    "cat": e.source.name(),
                    "ts": ts,
                    "pid": 0,
                    "tid": source_tid(e.source),
                    "s": "t",
                    "args": {
                        "frame_index": e.frame_index,
                        "source_slot": e.source_slot,
                        "slot": e.slot,
                        "fence": fence_arg(e.fence),
                        "reallocated": e.reallocated,
                        "released_all": e.released_all,
                    }
                }));
            }
            RecordedEvent::FramebufferQueued(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "FramebufferQueued",
                    "cat": e.source.name(),
                    "ts": ts,
                    "pid": 0,
                    "tid": source_tid(e.source),
                    "s": "t",
                    "args": {
                        "frame_index": e.frame_index,
                        "slot": e.slot,
                        "fence": fence_arg(e.fence),
                    }
                }));
            }
            RecordedEvent::FrameAdvanced(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Advance",
                    "cat": "Router",
                    "ts": ts,
                    "pid": e.display.0,
                    "tid": TID_ROUTER,
                    "s": "t",
                    "args": {
                        "frame_index": e.frame_index,
                        "framebuffer_slot": e.framebuffer_slot,
                        "framebuffer": e.framebuffer.0,
                        "output_slot": e.output_slot,
                        "output": e.output.0,
                    }
                }));
            }
            RecordedEvent::MissingBuffer(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "MissingBuffer",
                    "cat": "Error",
                    "ts": ts,
                    "pid": 0,
                    "tid": TID_ROUTER,
                    "s": "g",
                    "args": {
                        "frame_index": e.frame_index,
                        "framebuffer_slot": e.framebuffer_slot,
                        "output_slot": e.output_slot,
                    }
                }));
            }
            RecordedEvent::FrameCommitted(e) => {
                events.push(json!({
                    "ph": "E",
                    "name": format!("Frame {}", e.mode.name()),
                    "cat": "Router",
                    "ts": ts,
                    "pid": e.display.0,
                    "tid": TID_ROUTER,
                    "args": {
                        "frame_index": e.frame_index,
                        "present_us": ticks_to_us(e.timestamp.ticks(), timebase),
                        "released_scratch_slot": e.released_scratch_slot,
                        "queued_sink_slot": e.queued_sink_slot,
                    }
                }));
            }
            RecordedEvent::ProtocolViolation(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "ProtocolViolation",
                    "cat": "Error",
                    "ts": ts,
                    "pid": 0,
                    "tid": TID_ROUTER,
                    "s": "g",
                    "args": {
                        "frame_index": e.frame_index,
                        "call": e.call.name(),
                        "state": e.state.name(),
                        "rejected": e.rejected,
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn source_tid(source: Source) -> u32 {
    match source {
        Source::Sink => TID_SINK,
        Source::Scratch => TID_SCRATCH,
    }
}

fn fence_arg(fence: Fence) -> Value {
    fence.point().map_or(Value::Null, Value::from)
}

fn ticks_to_us(ticks: u64, timebase: Timebase) -> f64 {
    timebase.ticks_to_nanos(ticks) as f64 / 1000.0
}
