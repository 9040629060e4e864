// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Buffer routing for virtual displays.
//!
//! `vds_core` sits between a GPU renderer, a hardware compositor, and an
//! external sink queue (a video encoder, a screen recorder, a remote
//! display). It presents the renderer with one ordinary buffer producer and,
//! behind it, decides frame by frame which of two buffer sources backs each
//! buffer. It is `no_std` compatible (with `alloc`).
//!
//! # Architecture
//!
//! ```text
//!   Renderer ──BufferProducer──► FrameRouter ──► HardwareComposer
//!                                 │      │
//!                     Source::Sink│      │Source::Scratch
//!                                 ▼      ▼
//!                          sink queue   ScratchPool
//! ```
//!
//! **[`router`]**: The [`FrameRouter`](router::FrameRouter) state machine.
//! It tracks the per-frame protocol, picks the buffer source for the
//! frame's [`CompositionMode`](router::CompositionMode), and hands buffers
//! to the compositor and back to the sink.
//!
//! **[`slot`]**: The unified slot space. Scratch slots are numbered from
//! the top, sink slots from the bottom, so the two sources never collide in
//! normal operation.
//!
//! **[`record`]**: Which source last dequeued each unified slot, and the
//! buffer handle cached for it.
//!
//! **[`scratch`]**: The internal scratch buffer pool used as the render
//! target of mixed frames.
//!
//! **[`producer`]** and **[`hwc`]**: The contracts the router consumes and
//! exposes. **[`buffer`]** and **[`fence`]** are the values that flow
//! through them.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! routing instrumentation, with a zero-overhead [`Tracer`](trace::Tracer)
//! wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod buffer;
pub mod error;
pub mod fence;
pub mod hwc;
pub mod producer;
pub mod record;
pub mod router;
pub mod scratch;
pub mod slot;
pub mod sources;
pub mod time;
pub mod trace;

#[cfg(test)]
mod testing;

pub use error::Error;
