// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The frame router: one producer interface over two buffer sources, and
//! the per-frame protocol that feeds the hardware compositor.
//!
//! # Frame protocol
//!
//! ```text
//!   Idle ──prepare_frame──► Prepared ──dequeue_buffer──► Rendering
//!    ▲                        │                              │
//!    │                        │ (CompositeOnly)        queue_buffer
//!    │                        ▼                              ▼
//!    └──on_frame_committed── Compositing ◄──advance_frame── RenderDone
//! ```
//!
//! The composition mode chosen at [`FrameRouter::prepare_frame`] decides
//! which source backs each role:
//!
//! | Mode            | Framebuffer            | Output                  |
//! |-----------------|------------------------|-------------------------|
//! | `RenderOnly`    | sink, rendered by GPU  | same sink buffer        |
//! | `CompositeOnly` | sink, dequeued at advance | same sink buffer     |
//! | `Mixed`         | scratch, rendered by GPU | sink, dequeued at advance |
//!
//! Calls that arrive in an unexpected state are logged and carried out
//! under [`ProtocolPolicy::Permissive`], and rejected with
//! [`Error::InvalidOperation`] under [`ProtocolPolicy::Strict`]. A second
//! [`advance_frame`](FrameRouter::advance_frame) before the frame is
//! committed is always rejected, since it would overwrite fences the
//! compositor still holds.
//!
//! Without a compositor display ([`RouterConfig::passthrough`]) the whole
//! protocol is a no-op and [`FrameRouter::producer`] hands out the sink
//! directly.

use alloc::boxed::Box;
use alloc::string::String;

use crate::Error;
use crate::buffer::{BufferAllocator, BufferHandle, PixelFormat, Usage};
use crate::fence::Fence;
use crate::hwc::{HardwareComposer, HwcDisplayId};
use crate::producer::{
    BufferProducer, ClientApi, DequeueFlags, DequeueRequest, Dequeued, Query, QueueInput,
    QueueOutput, Transform,
};
use crate::record::BufferRecordTable;
use crate::scratch::{DEFAULT_SCRATCH_BUFFERS, ScratchPool};
use crate::slot::{NUM_BUFFER_SLOTS, SlotSpace, Source};
use crate::sources::Sources;
use crate::time::HostTime;
use crate::trace::{
    BufferDequeuedEvent, FrameAdvancedEvent, FrameCommittedEvent, FramePreparedEvent,
    FramebufferQueuedEvent, MissingBufferEvent, ProtocolViolationEvent, TraceSink, Tracer,
};

/// Which pipeline stages take part in a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompositionMode {
    /// No frame prepared yet.
    #[default]
    Unknown,
    /// The GPU renders the whole frame into a sink buffer.
    RenderOnly,
    /// The hardware compositor composites every plane straight into a sink
    /// buffer.
    CompositeOnly,
    /// The GPU renders into a scratch buffer that the hardware compositor
    /// composites with other planes into a sink buffer.
    Mixed,
}

impl CompositionMode {
    /// Returns an upper-case name for log lines.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::RenderOnly => "RENDER_ONLY",
            Self::CompositeOnly => "COMPOSITE_ONLY",
            Self::Mixed => "MIXED",
        }
    }

    /// Returns the source that backs the GPU framebuffer in this mode.
    #[must_use]
    pub const fn framebuffer_source(self) -> Source {
        match self {
            Self::Mixed => Source::Scratch,
            _ => Source::Sink,
        }
    }

    /// Returns `true` if the GPU renders in this mode.
    #[must_use]
    pub const fn renders(self) -> bool {
        matches!(self, Self::RenderOnly | Self::Mixed)
    }
}

/// Position in the per-frame protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrameState {
    /// Between frames.
    #[default]
    Idle,
    /// Composition mode chosen, no buffer exchanged yet.
    Prepared,
    /// The renderer holds a dequeued framebuffer.
    Rendering,
    /// The renderer queued its framebuffer back.
    RenderDone,
    /// Buffers are with the hardware compositor.
    Compositing,
}

impl FrameState {
    /// Returns an upper-case name for log lines.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Prepared => "PREPARED",
            Self::Rendering => "RENDERING",
            Self::RenderDone => "RENDER_DONE",
            Self::Compositing => "COMPOSITING",
        }
    }
}

/// Router entry points subject to frame-state checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Call {
    /// [`FrameRouter::prepare_frame`].
    PrepareFrame,
    /// [`BufferProducer::dequeue_buffer`] on the router.
    DequeueBuffer,
    /// [`BufferProducer::queue_buffer`] on the router.
    QueueBuffer,
    /// [`BufferProducer::cancel_buffer`] on the router.
    CancelBuffer,
    /// [`BufferProducer::request_buffer`] on the router.
    RequestBuffer,
    /// [`FrameRouter::advance_frame`].
    AdvanceFrame,
    /// [`FrameRouter::on_frame_committed`].
    OnFrameCommitted,
}

impl Call {
    /// Returns the method name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PrepareFrame => "prepare_frame",
            Self::DequeueBuffer => "dequeue_buffer",
            Self::QueueBuffer => "queue_buffer",
            Self::CancelBuffer => "cancel_buffer",
            Self::RequestBuffer => "request_buffer",
            Self::AdvanceFrame => "advance_frame",
            Self::OnFrameCommitted => "on_frame_committed",
        }
    }
}

/// What the router does with a call that arrives in an unexpected state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProtocolPolicy {
    /// Log a warning and carry the call out.
    #[default]
    Permissive,
    /// Reject the call with [`Error::InvalidOperation`], leaving all state
    /// untouched.
    Strict,
}

/// Configuration for a [`FrameRouter`].
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Display name prefixed to every log line.
    pub name: String,
    /// Hardware compositor display, or `None` to pass the sink straight
    /// through to the renderer.
    pub display: Option<HwcDisplayId>,
    /// Size of the unified slot space.
    pub slot_count: usize,
    /// Buffers in the scratch pool.
    pub scratch_buffer_count: usize,
    /// Handling of out-of-order calls.
    pub protocol: ProtocolPolicy,
}

impl RouterConfig {
    /// Configuration for a display composited by the hardware compositor.
    #[must_use]
    pub fn new(name: impl Into<String>, display: HwcDisplayId) -> Self {
        Self {
            name: name.into(),
            display: Some(display),
            slot_count: NUM_BUFFER_SLOTS,
            scratch_buffer_count: DEFAULT_SCRATCH_BUFFERS,
            protocol: ProtocolPolicy::Permissive,
        }
    }

    /// Configuration for a display the GPU renders straight into the sink.
    #[must_use]
    pub fn passthrough(name: impl Into<String>) -> Self {
        Self {
            display: None,
            ..Self::new(name, HwcDisplayId::default())
        }
    }

    /// Sets the protocol policy.
    #[must_use]
    pub fn with_protocol(mut self, protocol: ProtocolPolicy) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the size of the unified slot space.
    #[must_use]
    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }
}

/// State that lives for exactly one frame.
#[derive(Clone, Copy, Debug, Default)]
struct FrameRecord {
    mode: CompositionMode,
    sink_width: u32,
    sink_height: u32,
    fb_fence: Fence,
    fb_slot: Option<usize>,
    output_slot: Option<usize>,
}

/// Routes buffers between a renderer, a hardware compositor, and a sink
/// queue for one virtual display.
///
/// `S` is the sink queue. `H` is the hardware compositor.
#[derive(Debug)]
pub struct FrameRouter<S, H> {
    name: String,
    display: Option<HwcDisplayId>,
    policy: ProtocolPolicy,
    space: SlotSpace,
    sources: Sources<S>,
    hwc: H,
    records: BufferRecordTable,
    producer_usage: Usage,
    queue_output: QueueOutput,
    state: FrameState,
    last_mode: CompositionMode,
    frame: FrameRecord,
    frame_index: u64,
    tracer: Tracer,
}

impl<S, H> FrameRouter<S, H>
where
    S: BufferProducer,
    H: HardwareComposer,
{
    /// Creates a router over `sink`, driving `hwc`, with a scratch pool that
    /// allocates through `allocator`.
    ///
    /// The sink's current width and height become the scratch pool's default
    /// buffer size.
    ///
    /// # Errors
    ///
    /// [`Error::BadValue`] if `config.slot_count` is zero, or the sink's
    /// error if it cannot be queried.
    pub fn new(
        config: RouterConfig,
        mut sink: S,
        hwc: H,
        allocator: Box<dyn BufferAllocator + Send + Sync>,
    ) -> Result<Self, Error> {
        if config.slot_count == 0 {
            return Err(Error::BadValue);
        }
        let space = SlotSpace::new(config.slot_count);
        let width = sink.query(Query::Width)?;
        let height = sink.query(Query::Height)?;

        let scratch = ScratchPool::new(
            alloc::format!("VDS: {}", config.name),
            allocator,
            config.scratch_buffer_count,
            space.len(),
        );
        scratch.set_consumer_usage(Usage::HW_COMPOSER);
        scratch.set_default_buffer_size(width, height);

        Ok(Self {
            name: config.name,
            display: config.display,
            policy: config.protocol,
            space,
            sources: Sources::new(sink, scratch),
            hwc,
            records: BufferRecordTable::new(space),
            producer_usage: Usage::HW_COMPOSER,
            queue_output: QueueOutput::default(),
            state: FrameState::Idle,
            last_mode: CompositionMode::Unknown,
            frame: FrameRecord::default(),
            frame_index: 0,
            tracer: Tracer::none(),
        })
    }

    /// Returns the producer the renderer should use: this router when a
    /// compositor display is configured, otherwise the sink itself.
    pub fn producer(&mut self) -> &mut dyn BufferProducer {
        if self.display.is_some() {
            self
        } else {
            self.sources.get(Source::Sink)
        }
    }

    /// Starts a frame composed in `mode`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] under the strict policy if a frame is
    /// already in flight.
    pub fn prepare_frame(&mut self, mode: CompositionMode) -> Result<(), Error> {
        let Some(display) = self.display else {
            return Ok(());
        };
        self.check(Call::PrepareFrame, self.state == FrameState::Idle)?;
        self.state = FrameState::Prepared;
        self.frame.mode = mode;

        if mode != self.last_mode {
            log::debug!(
                "[{}] prepare_frame: composition mode changed to {}",
                self.name,
                mode.name()
            );
        }
        self.tracer.frame_prepared(&FramePreparedEvent {
            frame_index: self.frame_index,
            display,
            mode,
            previous_mode: self.last_mode,
        });
        self.last_mode = mode;
        Ok(())
    }

    /// Called once GPU composition for the frame is complete. Does nothing.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn composition_complete(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Hands the frame's framebuffer and output buffer to the hardware
    /// compositor, dequeuing the output buffer from the sink first unless the
    /// frame is `RenderOnly`.
    ///
    /// The frame moves to [`FrameState::Compositing`] even if this fails, so
    /// [`on_frame_committed`](Self::on_frame_committed) can clean it up.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] if the previous advance was not
    ///   committed yet, or under the strict policy in any other wrong state.
    /// - The sink's error if the output dequeue fails.
    /// - [`Error::NoMemory`] if either buffer is missing, or if the sink
    ///   hands out the slot the scratch framebuffer still occupies; the
    ///   compositor is not called.
    /// - The compositor's error if it rejects a buffer.
    pub fn advance_frame(&mut self) -> Result<(), Error> {
        let Some(display) = self.display else {
            return Ok(());
        };
        if self.state == FrameState::Compositing {
            return self.reject(Call::AdvanceFrame);
        }
        let mode = self.frame.mode;
        let expected = if mode == CompositionMode::CompositeOnly {
            FrameState::Prepared
        } else {
            FrameState::RenderDone
        };
        self.check(Call::AdvanceFrame, self.state == expected)?;
        self.state = FrameState::Compositing;

        let mut out_fence = Fence::NONE;
        if mode != CompositionMode::RenderOnly {
            self.frame.sink_width = self.queue_output.width;
            self.frame.sink_height = self.queue_output.height;
            let dequeued = self.dequeue_from(Source::Sink, PixelFormat::DEFAULT)?;
            self.frame.output_slot = Some(dequeued.slot);
            out_fence = dequeued.fence;
        }

        match mode {
            CompositionMode::CompositeOnly => {
                self.frame.fb_slot = self.frame.output_slot;
                self.frame.fb_fence = out_fence;
            }
            CompositionMode::RenderOnly => {
                self.frame.output_slot = self.frame.fb_slot;
                out_fence = self.frame.fb_fence;
            }
            // Framebuffer came from queue_buffer, output from the dequeue above.
            CompositionMode::Mixed | CompositionMode::Unknown => {}
        }

        let buffers = match (self.frame.fb_slot, self.frame.output_slot) {
            (Some(fb), Some(out)) => self
                .records
                .buffer(fb)
                .zip(self.records.buffer(out))
                .map(|(fb_buf, out_buf)| (fb, fb_buf, out, out_buf)),
            _ => None,
        };
        let Some((fb_slot, fb_buf, out_slot, out_buf)) = buffers else {
            // Reachable when an earlier dequeue failed and the caller carried
            // on anyway.
            log::error!("[{}] advance_frame: no buffer, bailing out", self.name);
            self.tracer.missing_buffer(&MissingBufferEvent {
                frame_index: self.frame_index,
                framebuffer_slot: self.frame.fb_slot,
                output_slot: self.frame.output_slot,
            });
            return Err(Error::NoMemory);
        };

        log::trace!(
            "[{}] advance_frame: fb={fb_slot}({:?}) out={out_slot}({:?})",
            self.name,
            fb_buf.id,
            out_buf.id
        );
        self.hwc
            .post_framebuffer(display, self.frame.fb_fence, &fb_buf)?;
        self.hwc.set_output_buffer(display, out_fence, &out_buf)?;

        self.tracer.frame_advanced(&FrameAdvancedEvent {
            frame_index: self.frame_index,
            display,
            mode,
            framebuffer_slot: fb_slot,
            framebuffer: fb_buf.id,
            output_slot: out_slot,
            output: out_buf.id,
        });
        Ok(())
    }

    /// Finishes the frame: returns a mixed frame's scratch buffer to the pool
    /// behind the compositor's release fence, queues the output buffer to the
    /// sink behind the compositor's retire fence, and resets all per-frame
    /// state.
    ///
    /// `now` becomes the presentation timestamp of the queued output.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOperation`] under the strict policy if no frame is
    /// being composited. The frame counter only advances for a frame that
    /// was being composited. Otherwise per-frame state is always reset, and the
    /// first upstream failure, if any, is returned afterwards.
    pub fn on_frame_committed(&mut self, now: HostTime) -> Result<(), Error> {
        let Some(display) = self.display else {
            return Ok(());
        };
        let in_flight = self.state == FrameState::Compositing;
        self.check(Call::OnFrameCommitted, in_flight)?;
        self.state = FrameState::Idle;

        let mut first_error = None;
        let release_fence = self.hwc.take_release_fence(display);

        let mut released_scratch_slot = None;
        if self.frame.mode == CompositionMode::Mixed
            && let Some(sslot) = self
                .frame
                .fb_slot
                .and_then(|fb| self.space.to_source(Source::Scratch, fb))
        {
            log::trace!("[{}] on_frame_committed: release scratch sslot={sslot}", self.name);
            match self.sources.scratch().release(sslot, release_fence) {
                Ok(()) => released_scratch_slot = Some(sslot),
                Err(err) => {
                    log::warn!(
                        "[{}] on_frame_committed: scratch release of sslot={sslot} failed: {err}",
                        self.name
                    );
                    first_error.get_or_insert(err);
                }
            }
        }

        let mut queued_sink_slot = None;
        if let Some(sslot) = self
            .frame
            .output_slot
            .and_then(|out| self.space.to_source(Source::Sink, out))
        {
            let retire_fence = self.hwc.last_retire_fence(display);
            let input = QueueInput::new(
                now,
                self.frame.sink_width,
                self.frame.sink_height,
                retire_fence,
            );
            log::trace!("[{}] on_frame_committed: queue sink sslot={sslot}", self.name);
            match self.sources.get(Source::Sink).queue_buffer(sslot, &input) {
                Ok(output) => {
                    self.update_queue_output(output);
                    queued_sink_slot = Some(sslot);
                }
                Err(err) => {
                    log::warn!(
                        "[{}] on_frame_committed: sink queue of sslot={sslot} failed: {err}",
                        self.name
                    );
                    first_error.get_or_insert(err);
                }
            }
        }

        self.tracer.frame_committed(&FrameCommittedEvent {
            frame_index: self.frame_index,
            display,
            mode: self.frame.mode,
            timestamp: now,
            released_scratch_slot,
            queued_sink_slot,
        });
        self.reset_per_frame_state();
        if in_flight {
            self.frame_index += 1;
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Dequeues from `source`, translates the slot, and refreshes the cached
    /// buffer if the slot changed hands or the source invalidated it.
    fn dequeue_from(&mut self, source: Source, format: PixelFormat) -> Result<Dequeued, Error> {
        let request = DequeueRequest {
            width: self.frame.sink_width,
            height: self.frame.sink_height,
            format,
            usage: self.producer_usage,
        };
        let mut dequeued = self.sources.get(source).dequeue_buffer(&request)?;
        let source_slot = dequeued.slot;
        let Some(slot) = self.space.to_unified(source, source_slot) else {
            log::warn!(
                "[{}] dequeue_buffer({}): sslot={source_slot} outside the slot space",
                self.name,
                source.name()
            );
            self.cancel_to(source, source_slot, dequeued.fence);
            return Err(Error::BadValue);
        };
        // In a mixed frame the scratch framebuffer stays acquired until
        // commit, so its unified slot cannot change hands yet.
        if self.frame.fb_slot == Some(slot) && source != self.frame.mode.framebuffer_source() {
            log::error!(
                "[{}] dequeue_buffer({}): sslot={source_slot} collides with framebuffer pslot={slot}",
                self.name,
                source.name()
            );
            self.cancel_to(source, source_slot, dequeued.fence);
            return Err(Error::NoMemory);
        }

        if self.records.claim(slot, source) {
            dequeued.flags |= DequeueFlags::NEEDS_REALLOCATION;
        }
        let released_all = dequeued.flags.contains(DequeueFlags::RELEASE_ALL_BUFFERS);
        if released_all {
            self.records.clear_owned_by(source);
        }
        if self.records.buffer(slot).is_none() {
            dequeued.flags |= DequeueFlags::NEEDS_REALLOCATION;
        }

        let reallocated = dequeued.flags.contains(DequeueFlags::NEEDS_REALLOCATION);
        if reallocated {
            match self.sources.get(source).request_buffer(source_slot) {
                Ok(buffer) => {
                    log::trace!(
                        "[{}] dequeue_buffer({}): buffers[{slot}]={:?}",
                        self.name,
                        source.name(),
                        buffer.id
                    );
                    self.records.set_buffer(slot, buffer);
                }
                Err(err) => {
                    self.cancel_to(source, source_slot, dequeued.fence);
                    return Err(err);
                }
            }
        }

        log::trace!(
            "[{}] dequeue_buffer({}): sslot={source_slot} pslot={slot} flags={:?}",
            self.name,
            source.name(),
            dequeued.flags
        );
        self.tracer.buffer_dequeued(&BufferDequeuedEvent {
            frame_index: self.frame_index,
            source,
            source_slot,
            slot,
            fence: dequeued.fence,
            reallocated,
            released_all,
        });
        dequeued.slot = slot;
        Ok(dequeued)
    }

    /// Hands a slot the router will not use back to its source.
    fn cancel_to(&mut self, source: Source, source_slot: usize, fence: Fence) {
        if let Err(err) = self.sources.get(source).cancel_buffer(source_slot, fence) {
            log::warn!(
                "[{}] cancel_buffer({}): sslot={source_slot} failed: {err}",
                self.name,
                source.name()
            );
        }
    }
}

impl<S, H> FrameRouter<S, H> {
    /// Installs a sink for structured trace events.
    ///
    /// Events are only delivered when the `trace` feature is enabled.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink + Send>) {
        self.tracer.set_sink(sink);
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the compositor display, or `None` in passthrough.
    #[must_use]
    pub fn display(&self) -> Option<HwcDisplayId> {
        self.display
    }

    /// Returns `true` if buffers bypass the router and the frame protocol is
    /// a no-op.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.display.is_none()
    }

    /// Returns the current frame state.
    #[must_use]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Returns the composition mode of the frame in flight.
    #[must_use]
    pub fn composition_mode(&self) -> CompositionMode {
        self.frame.mode
    }

    /// Returns the unified slot holding this frame's framebuffer.
    #[must_use]
    pub fn framebuffer_slot(&self) -> Option<usize> {
        self.frame.fb_slot
    }

    /// Returns the unified slot holding this frame's output buffer.
    #[must_use]
    pub fn output_slot(&self) -> Option<usize> {
        self.frame.output_slot
    }

    /// Returns the fence guarding this frame's framebuffer.
    #[must_use]
    pub fn framebuffer_fence(&self) -> Fence {
        self.frame.fb_fence
    }

    /// Returns the sink buffer size used for this frame.
    #[must_use]
    pub fn sink_buffer_size(&self) -> (u32, u32) {
        (self.frame.sink_width, self.frame.sink_height)
    }

    /// Returns the output geometry last negotiated with the sink.
    #[must_use]
    pub fn queue_output(&self) -> QueueOutput {
        self.queue_output
    }

    /// Returns the number of frames committed so far.
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Returns the source owning a unified slot.
    #[must_use]
    pub fn slot_owner(&self, slot: usize) -> Option<Source> {
        self.records.owner(slot)
    }

    /// Returns the buffer cached for a unified slot.
    #[must_use]
    pub fn cached_buffer(&self, slot: usize) -> Option<BufferHandle> {
        self.records.buffer(slot)
    }

    /// Returns the unified slot space.
    #[must_use]
    pub fn slot_space(&self) -> SlotSpace {
        self.space
    }

    /// Returns the sink.
    #[must_use]
    pub fn sink(&self) -> &S {
        self.sources.sink()
    }

    /// Returns the sink mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        self.sources.sink_mut()
    }

    /// Returns the hardware compositor.
    #[must_use]
    pub fn hwc(&self) -> &H {
        &self.hwc
    }

    /// Returns the hardware compositor mutably.
    pub fn hwc_mut(&mut self) -> &mut H {
        &mut self.hwc
    }

    /// Returns the scratch pool.
    #[must_use]
    pub fn scratch(&self) -> &ScratchPool {
        self.sources.scratch()
    }

    /// Logs an out-of-order call and, under the strict policy, rejects it.
    fn check(&mut self, call: Call, allowed: bool) -> Result<(), Error> {
        if allowed {
            return Ok(());
        }
        if self.policy == ProtocolPolicy::Strict {
            return self.reject(call);
        }
        log::warn!(
            "[{}] Unexpected {}() in {} state for {} frame",
            self.name,
            call.name(),
            self.state.name(),
            self.frame.mode.name()
        );
        self.tracer.protocol_violation(&ProtocolViolationEvent {
            frame_index: self.frame_index,
            call,
            state: self.state,
            rejected: false,
        });
        Ok(())
    }

    fn reject(&mut self, call: Call) -> Result<(), Error> {
        log::warn!(
            "[{}] Rejected {}() in {} state",
            self.name,
            call.name(),
            self.state.name()
        );
        self.tracer.protocol_violation(&ProtocolViolationEvent {
            frame_index: self.frame_index,
            call,
            state: self.state,
            rejected: true,
        });
        Err(Error::InvalidOperation {
            call,
            state: self.state,
        })
    }

    fn update_queue_output(&mut self, output: QueueOutput) {
        self.queue_output = QueueOutput {
            transform_hint: Transform::empty(),
            ..output
        };
    }

    fn reset_per_frame_state(&mut self) {
        self.frame = FrameRecord::default();
    }
}

impl<S, H> BufferProducer for FrameRouter<S, H>
where
    S: BufferProducer,
    H: HardwareComposer,
{
    fn dequeue_buffer(&mut self, request: &DequeueRequest) -> Result<Dequeued, Error> {
        let mode = self.frame.mode;
        self.check(
            Call::DequeueBuffer,
            self.state == FrameState::Prepared && mode != CompositionMode::CompositeOnly,
        )?;
        self.state = FrameState::Rendering;
        log::trace!(
            "[{}] dequeue_buffer {}x{} fmt={:?} usage={:?}",
            self.name,
            request.width,
            request.height,
            request.format,
            request.usage
        );

        self.producer_usage = request.usage | Usage::HW_COMPOSER;
        let source = mode.framebuffer_source();
        if source == Source::Sink {
            self.frame.sink_width = request.width;
            self.frame.sink_height = request.height;
        }
        self.dequeue_from(source, request.format)
    }

    fn queue_buffer(&mut self, slot: usize, input: &QueueInput) -> Result<QueueOutput, Error> {
        if !self.space.contains(slot) {
            return Err(Error::BadValue);
        }
        let mode = self.frame.mode;
        self.check(
            Call::QueueBuffer,
            self.state == FrameState::Rendering && mode.renders(),
        )?;
        self.state = FrameState::RenderDone;
        log::trace!("[{}] queue_buffer pslot={slot}", self.name);

        if mode == CompositionMode::Mixed {
            let sslot = self
                .space
                .to_source(Source::Scratch, slot)
                .ok_or(Error::BadValue)?;
            self.sources
                .get(Source::Scratch)
                .queue_buffer(sslot, input)?;

            // The pool should hand back the buffer just queued.
            let item = self.sources.scratch().acquire()?;
            if item.slot != sslot {
                log::warn!(
                    "[{}] queue_buffer: acquired sslot {} from SCRATCH after queueing sslot {sslot}",
                    self.name,
                    item.slot
                );
            }
            self.frame.fb_slot = self.space.to_unified(Source::Scratch, item.slot);
            self.frame.fb_fence = item.fence;
        } else {
            self.frame.fb_slot = Some(slot);
            self.frame.fb_fence = input.fence;
        }

        if let Some(fb_slot) = self.frame.fb_slot {
            self.tracer.framebuffer_queued(&FramebufferQueuedEvent {
                frame_index: self.frame_index,
                source: mode.framebuffer_source(),
                slot: fb_slot,
                fence: self.frame.fb_fence,
            });
        }
        Ok(self.queue_output)
    }

    fn cancel_buffer(&mut self, slot: usize, fence: Fence) -> Result<(), Error> {
        self.check(Call::CancelBuffer, self.state == FrameState::Rendering)?;
        log::trace!("[{}] cancel_buffer pslot={slot}", self.name);
        let source = self.frame.mode.framebuffer_source();
        let sslot = self.space.to_source(source, slot).ok_or(Error::BadValue)?;
        self.sources.get(source).cancel_buffer(sslot, fence)
    }

    fn request_buffer(&mut self, slot: usize) -> Result<BufferHandle, Error> {
        self.check(Call::RequestBuffer, self.state == FrameState::Rendering)?;
        self.records.buffer(slot).ok_or(Error::BadValue)
    }

    fn set_buffer_count(&mut self, count: usize) -> Result<(), Error> {
        self.sources.get(Source::Sink).set_buffer_count(count)
    }

    fn connect(&mut self, api: ClientApi) -> Result<QueueOutput, Error> {
        let output = self.sources.get(Source::Sink).connect(api)?;
        self.update_queue_output(output);
        Ok(self.queue_output)
    }

    fn disconnect(&mut self, api: ClientApi) -> Result<(), Error> {
        self.sources.get(Source::Sink).disconnect(api)
    }

    fn query(&mut self, what: Query) -> Result<u32, Error> {
        self.sources.get(Source::Sink).query(what)
    }
}

impl<S, H> Drop for FrameRouter<S, H> {
    fn drop(&mut self) {
        self.sources.scratch().abandon();
    }
}

#[cfg(test)]
mod tests {
    use kurbo::Rect;

    use super::*;
    use crate::buffer::BufferId;
    use crate::producer::ScalingMode;
    use crate::scratch::SlotState;
    use crate::testing::{CountingAllocator, FakeHwc, FakeSink, SinkCall};

    const DISPLAY: HwcDisplayId = HwcDisplayId(7);

    type Router = FrameRouter<FakeSink, FakeHwc>;

    fn build(config: RouterConfig, sink_slots: usize) -> (Router, CountingAllocator) {
        let allocator = CountingAllocator::default();
        let mut router = FrameRouter::new(
            config,
            FakeSink::new(320, 240, sink_slots),
            FakeHwc::default(),
            Box::new(allocator.clone()),
        )
        .unwrap();
        router.connect(ClientApi::Egl).unwrap();
        (router, allocator)
    }

    fn config() -> RouterConfig {
        RouterConfig::new("virtual", DISPLAY).with_slot_count(4)
    }

    fn router() -> (Router, CountingAllocator) {
        build(config(), 3)
    }

    fn render_request() -> DequeueRequest {
        DequeueRequest {
            width: 320,
            height: 240,
            format: PixelFormat::RGBA_8888,
            usage: Usage::HW_RENDER,
        }
    }

    fn input(fence: Fence) -> QueueInput {
        QueueInput::new(HostTime(0), 320, 240, fence)
    }

    fn run_mixed_frame(router: &mut Router) -> usize {
        router.prepare_frame(CompositionMode::Mixed).unwrap();
        let slot = router.dequeue_buffer(&render_request()).unwrap().slot;
        router.queue_buffer(slot, &input(Fence::NONE)).unwrap();
        router.advance_frame().unwrap();
        router.on_frame_committed(HostTime(0)).unwrap();
        slot
    }

    fn run_composite_frame(router: &mut Router, sink_slot: usize) {
        router.prepare_frame(CompositionMode::CompositeOnly).unwrap();
        router.sink_mut().force_slot = Some(sink_slot);
        router.advance_frame().unwrap();
        router.on_frame_committed(HostTime(0)).unwrap();
    }

    fn sink_dequeues(router: &Router) -> usize {
        router
            .sink()
            .calls
            .iter()
            .filter(|c| matches!(c, SinkCall::Dequeue(_)))
            .count()
    }

    fn assert_frame_reset(router: &Router) {
        assert_eq!(router.state(), FrameState::Idle);
        assert_eq!(router.composition_mode(), CompositionMode::Unknown);
        assert_eq!(router.framebuffer_slot(), None);
        assert_eq!(router.output_slot(), None);
        assert_eq!(router.framebuffer_fence(), Fence::NONE);
        assert_eq!(router.sink_buffer_size(), (0, 0));
    }

    #[test]
    fn mixed_frame_composites_scratch_framebuffer_into_sink() {
        let (mut router, _) = router();
        // Another producer holds scratch slot 0, so the renderer gets slot 1.
        let mut other = router.scratch().clone();
        assert_eq!(other.dequeue_buffer(&DequeueRequest::default()).unwrap().slot, 0);

        router.prepare_frame(CompositionMode::Mixed).unwrap();
        let dequeued = router.dequeue_buffer(&render_request()).unwrap();
        assert_eq!(dequeued.slot, 2, "scratch slot 1 reflects to unified 2");
        assert!(dequeued.flags.contains(DequeueFlags::NEEDS_REALLOCATION));
        assert_eq!(router.slot_owner(2), Some(Source::Scratch));
        assert_eq!(router.state(), FrameState::Rendering);
        let fb = router.request_buffer(2).unwrap();
        assert_eq!(fb.id, BufferId(102));

        let output = router.queue_buffer(2, &input(Fence::at(11))).unwrap();
        assert_eq!(output, router.queue_output());
        assert_eq!(router.state(), FrameState::RenderDone);
        assert_eq!(router.framebuffer_slot(), Some(2));
        assert_eq!(router.framebuffer_fence(), Fence::at(11));
        assert_eq!(router.scratch().slot_state(1), Some(SlotState::Acquired));

        router.sink_mut().dequeue_fence = Fence::at(3);
        router.advance_frame().unwrap();
        assert_eq!(router.state(), FrameState::Compositing);
        assert_eq!(router.output_slot(), Some(0));
        assert_eq!(router.slot_owner(0), Some(Source::Sink));
        let out = router.cached_buffer(0).unwrap();
        assert_eq!(out.id, BufferId(1));
        assert_eq!(router.hwc().framebuffers, [(DISPLAY, Fence::at(11), fb)]);
        assert_eq!(router.hwc().outputs, [(DISPLAY, Fence::at(3), out)]);

        router.hwc_mut().release_fence = Fence::at(20);
        router.hwc_mut().retire_fence = Fence::at(21);
        router.on_frame_committed(HostTime(99)).unwrap();
        assert_eq!(router.hwc().release_fence_takes, 1);
        assert_eq!(router.scratch().slot_state(1), Some(SlotState::Free));
        let (slot, queued) = router.sink().queued[0];
        assert_eq!(slot, 0);
        assert_eq!(queued.timestamp, HostTime(99));
        assert_eq!(queued.fence, Fence::at(21));
        assert_eq!(queued.crop, Rect::new(0.0, 0.0, 320.0, 240.0));
        assert_eq!(queued.scaling_mode, ScalingMode::Freeze);
        assert_eq!(queued.transform, Transform::empty());
        assert_frame_reset(&router);
        assert_eq!(router.frame_index(), 1);

        // The compositor's release fence guards the slot's next use.
        router.prepare_frame(CompositionMode::Mixed).unwrap();
        let again = router.dequeue_buffer(&render_request()).unwrap();
        assert_eq!(again.slot, 2);
        assert_eq!(again.fence, Fence::at(20));
        assert!(!again.flags.contains(DequeueFlags::NEEDS_REALLOCATION));
    }

    #[test]
    fn composite_only_uses_output_as_framebuffer() {
        let (mut router, allocator) = router();
        router.prepare_frame(CompositionMode::CompositeOnly).unwrap();
        router.sink_mut().dequeue_fence = Fence::at(4);
        router.advance_frame().unwrap();

        assert_eq!(router.framebuffer_slot(), Some(0));
        assert_eq!(router.output_slot(), Some(0));
        let buf = router.cached_buffer(0).unwrap();
        assert_eq!((buf.width, buf.height), (320, 240));
        assert_eq!(router.hwc().framebuffers, [(DISPLAY, Fence::at(4), buf)]);
        assert_eq!(router.hwc().outputs, [(DISPLAY, Fence::at(4), buf)]);

        router.on_frame_committed(HostTime(1)).unwrap();
        assert_eq!(router.sink().queued.len(), 1);
        assert_eq!(allocator.count(), 0, "scratch pool untouched");
        assert_frame_reset(&router);
    }

    #[test]
    fn render_only_sends_rendered_buffer_as_output() {
        let (mut router, _) = router();
        router.prepare_frame(CompositionMode::RenderOnly).unwrap();
        let dequeued = router.dequeue_buffer(&render_request()).unwrap();
        assert_eq!(dequeued.slot, 0);
        router.queue_buffer(0, &input(Fence::at(8))).unwrap();
        router.advance_frame().unwrap();

        assert_eq!(sink_dequeues(&router), 1, "no second sink dequeue");
        let buf = router.cached_buffer(0).unwrap();
        assert_eq!(router.hwc().framebuffers, [(DISPLAY, Fence::at(8), buf)]);
        assert_eq!(router.hwc().outputs, [(DISPLAY, Fence::at(8), buf)]);

        router.on_frame_committed(HostTime(10)).unwrap();
        assert_eq!(
            router.sink().calls,
            [
                SinkCall::Connect(ClientApi::Egl),
                SinkCall::Dequeue(0),
                SinkCall::Request(0),
                SinkCall::Queue(0),
            ]
        );
        let (_, queued) = router.sink().queued[0];
        assert_eq!(queued.crop, Rect::new(0.0, 0.0, 320.0, 240.0));
    }

    #[test]
    fn passthrough_hands_out_sink() {
        let (mut router, _) = build(RouterConfig::passthrough("direct").with_slot_count(4), 3);
        assert!(router.is_passthrough());

        router.prepare_frame(CompositionMode::RenderOnly).unwrap();
        let dequeued = router.producer().dequeue_buffer(&render_request()).unwrap();
        router
            .producer()
            .queue_buffer(dequeued.slot, &input(Fence::NONE))
            .unwrap();
        router.advance_frame().unwrap();
        router.on_frame_committed(HostTime(2)).unwrap();

        assert_eq!(router.state(), FrameState::Idle);
        assert_eq!(router.frame_index(), 0);
        assert!(router.hwc().framebuffers.is_empty());
        assert_eq!(router.sink().queued.len(), 1);
        assert_eq!(router.cached_buffer(dequeued.slot), None);
    }

    #[test]
    fn missing_buffers_skip_compositor_and_still_reset() {
        let (mut router, _) = router();
        router.sink_mut().fail_dequeue = Some(Error::WouldBlock);
        router.prepare_frame(CompositionMode::RenderOnly).unwrap();
        assert_eq!(
            router.dequeue_buffer(&render_request()),
            Err(Error::WouldBlock)
        );

        assert_eq!(router.advance_frame(), Err(Error::NoMemory));
        assert!(router.hwc().framebuffers.is_empty());
        assert!(router.hwc().outputs.is_empty());
        assert_eq!(router.state(), FrameState::Compositing);

        router.on_frame_committed(HostTime(3)).unwrap();
        assert!(router.sink().queued.is_empty());
        assert_frame_reset(&router);
    }

    #[test]
    fn strict_policy_rejects_without_state_change() {
        let (mut router, _) = build(config().with_protocol(ProtocolPolicy::Strict), 3);
        assert_eq!(
            router.queue_buffer(0, &input(Fence::NONE)),
            Err(Error::InvalidOperation {
                call: Call::QueueBuffer,
                state: FrameState::Idle,
            })
        );
        assert_eq!(
            router.advance_frame(),
            Err(Error::InvalidOperation {
                call: Call::AdvanceFrame,
                state: FrameState::Idle,
            })
        );
        assert_eq!(
            router.on_frame_committed(HostTime(0)),
            Err(Error::InvalidOperation {
                call: Call::OnFrameCommitted,
                state: FrameState::Idle,
            })
        );
        assert_eq!(router.frame_index(), 0);

        router.prepare_frame(CompositionMode::CompositeOnly).unwrap();
        assert_eq!(
            router.dequeue_buffer(&render_request()),
            Err(Error::InvalidOperation {
                call: Call::DequeueBuffer,
                state: FrameState::Prepared,
            })
        );
        assert_eq!(
            router.prepare_frame(CompositionMode::Mixed),
            Err(Error::InvalidOperation {
                call: Call::PrepareFrame,
                state: FrameState::Prepared,
            })
        );
        assert_eq!(router.state(), FrameState::Prepared);
        assert_eq!(router.composition_mode(), CompositionMode::CompositeOnly);
        assert_eq!(sink_dequeues(&router), 0);
    }

    #[test]
    fn permissive_policy_carries_out_unexpected_calls() {
        let (mut router, _) = router();
        router.prepare_frame(CompositionMode::RenderOnly).unwrap();
        router.prepare_frame(CompositionMode::CompositeOnly).unwrap();
        assert_eq!(router.composition_mode(), CompositionMode::CompositeOnly);

        router.advance_frame().unwrap();
        assert_eq!(router.hwc().framebuffers.len(), 1);
        router.on_frame_committed(HostTime(0)).unwrap();
        assert_frame_reset(&router);
    }

    #[test]
    fn second_advance_is_rejected_under_either_policy() {
        for protocol in [ProtocolPolicy::Permissive, ProtocolPolicy::Strict] {
            let (mut router, _) = build(config().with_protocol(protocol), 3);
            router.prepare_frame(CompositionMode::CompositeOnly).unwrap();
            router.advance_frame().unwrap();
            assert_eq!(
                router.advance_frame(),
                Err(Error::InvalidOperation {
                    call: Call::AdvanceFrame,
                    state: FrameState::Compositing,
                }),
                "{protocol:?}"
            );
            assert_eq!(router.hwc().framebuffers.len(), 1);
            assert_eq!(sink_dequeues(&router), 1);
            router.on_frame_committed(HostTime(0)).unwrap();
        }
    }

    #[test]
    fn sink_failure_at_advance_is_returned_unchanged() {
        let (mut router, _) = router();
        router.sink_mut().fail_dequeue = Some(Error::Abandoned);
        router.prepare_frame(CompositionMode::CompositeOnly).unwrap();
        assert_eq!(router.advance_frame(), Err(Error::Abandoned));
        assert_eq!(router.state(), FrameState::Compositing);

        router.on_frame_committed(HostTime(0)).unwrap();
        assert_frame_reset(&router);
    }

    #[test]
    fn failed_buffer_request_cancels_slot() {
        let (mut router, _) = router();
        router.sink_mut().fail_request = Some(Error::NoMemory);
        router.prepare_frame(CompositionMode::RenderOnly).unwrap();
        assert_eq!(
            router.dequeue_buffer(&render_request()),
            Err(Error::NoMemory)
        );
        assert!(router.sink().calls.contains(&SinkCall::Cancel(0)));
        assert!(!router.sink().is_dequeued(0));
        assert_eq!(router.cached_buffer(0), None);
    }

    #[test]
    fn negotiated_output_drops_transform_hint() {
        let (mut router, _) = router();
        let negotiated = router.queue_output();
        assert_eq!((negotiated.width, negotiated.height), (320, 240));
        assert_eq!(negotiated.transform_hint, Transform::empty());

        router.prepare_frame(CompositionMode::RenderOnly).unwrap();
        let slot = router.dequeue_buffer(&render_request()).unwrap().slot;
        assert_eq!(
            router.queue_buffer(slot, &input(Fence::NONE)),
            Ok(negotiated)
        );
    }

    #[test]
    fn commit_failure_still_resets_frame() {
        let (mut router, _) = router();
        router.sink_mut().fail_queue = Some(Error::Abandoned);
        router.prepare_frame(CompositionMode::CompositeOnly).unwrap();
        router.advance_frame().unwrap();

        assert_eq!(router.on_frame_committed(HostTime(0)), Err(Error::Abandoned));
        assert_eq!(router.hwc().release_fence_takes, 1);
        assert_frame_reset(&router);
        assert_eq!(router.frame_index(), 1);
    }

    #[test]
    fn sink_slot_colliding_with_scratch_framebuffer_is_refused() {
        let (mut router, _) = router();
        let mut other = router.scratch().clone();
        other.dequeue_buffer(&DequeueRequest::default()).unwrap();

        router.prepare_frame(CompositionMode::Mixed).unwrap();
        let slot = router.dequeue_buffer(&render_request()).unwrap().slot;
        assert_eq!(slot, 2);
        router.queue_buffer(slot, &input(Fence::at(6))).unwrap();
        let rendered = router.cached_buffer(2).unwrap();

        // Sink slot 2 maps onto the same unified slot.
        router.sink_mut().force_slot = Some(2);
        assert_eq!(router.advance_frame(), Err(Error::NoMemory));
        assert!(router.hwc().framebuffers.is_empty());
        assert!(router.hwc().outputs.is_empty());
        assert!(router.sink().calls.contains(&SinkCall::Cancel(2)));
        assert!(!router.sink().is_dequeued(2));
        assert_eq!(router.slot_owner(2), Some(Source::Scratch));
        assert_eq!(router.cached_buffer(2), Some(rendered));
        assert_eq!(router.output_slot(), None);

        router.on_frame_committed(HostTime(0)).unwrap();
        assert_eq!(router.scratch().slot_state(1), Some(SlotState::Free));
        assert!(router.sink().queued.is_empty());
        assert_frame_reset(&router);
    }

    #[test]
    fn mixed_frame_releases_scratch_when_sink_dequeue_fails() {
        let (mut router, _) = router();
        router.prepare_frame(CompositionMode::Mixed).unwrap();
        let slot = router.dequeue_buffer(&render_request()).unwrap().slot;
        let sslot = router.slot_space().to_source(Source::Scratch, slot).unwrap();
        router.queue_buffer(slot, &input(Fence::NONE)).unwrap();
        assert_eq!(router.scratch().slot_state(sslot), Some(SlotState::Acquired));

        router.sink_mut().fail_dequeue = Some(Error::WouldBlock);
        assert_eq!(router.advance_frame(), Err(Error::WouldBlock));
        assert!(router.hwc().framebuffers.is_empty());

        router.hwc_mut().release_fence = Fence::at(9);
        router.on_frame_committed(HostTime(0)).unwrap();
        assert_eq!(router.scratch().slot_state(sslot), Some(SlotState::Free));
        assert!(router.sink().queued.is_empty());
        assert_frame_reset(&router);
        assert_eq!(router.frame_index(), 1);
    }

    #[test]
    fn commit_without_frame_keeps_frame_index() {
        let (mut router, _) = router();
        router.on_frame_committed(HostTime(0)).unwrap();
        assert_eq!(router.frame_index(), 0);
        assert_eq!(router.hwc().release_fence_takes, 1);

        run_composite_frame(&mut router, 0);
        assert_eq!(router.frame_index(), 1);
    }

    #[test]
    fn compositor_rejection_propagates() {
        let (mut router, _) = router();
        router.hwc_mut().fail_post = Some(Error::Compositor(-22));
        router.prepare_frame(CompositionMode::CompositeOnly).unwrap();
        assert_eq!(router.advance_frame(), Err(Error::Compositor(-22)));
        assert!(router.hwc().outputs.is_empty());

        // The output buffer still goes back to the sink.
        router.on_frame_committed(HostTime(0)).unwrap();
        assert_eq!(router.sink().queued.len(), 1);
    }

    #[test]
    fn slot_handover_refetches_buffer_once() {
        let (mut router, allocator) = build(config(), 4);
        assert_eq!(run_mixed_frame(&mut router), 3, "scratch slot 0 reflects to 3");
        assert_eq!(router.slot_owner(3), Some(Source::Scratch));
        let requests = router.sink().request_count();

        run_composite_frame(&mut router, 3);
        assert_eq!(router.slot_owner(3), Some(Source::Sink));
        assert_eq!(router.sink().request_count(), requests + 1);
        assert_eq!(router.cached_buffer(3), router.sink().buffer(3));

        run_composite_frame(&mut router, 3);
        assert_eq!(router.sink().request_count(), requests + 1, "same owner");

        assert_eq!(run_mixed_frame(&mut router), 3);
        assert_eq!(router.slot_owner(3), Some(Source::Scratch));
        assert_eq!(router.cached_buffer(3).map(|b| b.id), Some(BufferId(101)));
        assert_eq!(allocator.count(), 1, "pool kept its buffer");
    }

    #[test]
    fn release_all_drops_only_that_sources_buffers() {
        let (mut router, _) = router();
        run_mixed_frame(&mut router);
        run_composite_frame(&mut router, 1);
        assert!(router.cached_buffer(0).is_some());
        assert!(router.cached_buffer(1).is_some());
        assert!(router.cached_buffer(3).is_some());
        let requests = router.sink().request_count();

        router.sink_mut().extra_flags = DequeueFlags::RELEASE_ALL_BUFFERS;
        run_composite_frame(&mut router, 0);
        assert_eq!(router.sink().request_count(), requests + 1);
        assert!(router.cached_buffer(0).is_some(), "refetched");
        assert_eq!(router.cached_buffer(1), None);
        assert!(router.cached_buffer(3).is_some(), "scratch record kept");
    }

    #[test]
    fn mismatched_acquire_follows_pool() {
        let (mut router, _) = router();
        let mut other = router.scratch().clone();
        let early = other.dequeue_buffer(&DequeueRequest::default()).unwrap();
        other.queue_buffer(early.slot, &input(Fence::at(1))).unwrap();

        router.prepare_frame(CompositionMode::Mixed).unwrap();
        let slot = router.dequeue_buffer(&render_request()).unwrap().slot;
        assert_eq!(slot, 2);
        router.queue_buffer(slot, &input(Fence::at(2))).unwrap();

        assert_eq!(router.framebuffer_slot(), Some(3));
        assert_eq!(router.framebuffer_fence(), Fence::at(1));
        assert_eq!(router.scratch().slot_state(1), Some(SlotState::Queued));
    }

    #[test]
    fn exhausted_scratch_pool_would_block() {
        let (mut router, _) = router();
        let mut other = router.scratch().clone();
        other.dequeue_buffer(&DequeueRequest::default()).unwrap();
        other.dequeue_buffer(&DequeueRequest::default()).unwrap();

        router.prepare_frame(CompositionMode::Mixed).unwrap();
        assert_eq!(
            router.dequeue_buffer(&render_request()),
            Err(Error::WouldBlock)
        );
    }

    #[test]
    fn cancel_goes_to_framebuffer_source() {
        let (mut mixed, _) = router();
        mixed.prepare_frame(CompositionMode::Mixed).unwrap();
        let slot = mixed.dequeue_buffer(&render_request()).unwrap().slot;
        mixed.cancel_buffer(slot, Fence::at(5)).unwrap();
        assert_eq!(mixed.scratch().slot_state(0), Some(SlotState::Free));
        assert!(!mixed.sink().calls.contains(&SinkCall::Cancel(0)));

        let (mut render_only, _) = router();
        render_only.prepare_frame(CompositionMode::RenderOnly).unwrap();
        let slot = render_only.dequeue_buffer(&render_request()).unwrap().slot;
        render_only.cancel_buffer(slot, Fence::NONE).unwrap();
        assert!(render_only.sink().calls.contains(&SinkCall::Cancel(0)));
    }

    #[test]
    fn request_buffer_needs_cached_slot() {
        let (mut router, _) = router();
        router.prepare_frame(CompositionMode::RenderOnly).unwrap();
        router.dequeue_buffer(&render_request()).unwrap();
        assert!(router.request_buffer(0).is_ok());
        assert_eq!(router.request_buffer(1), Err(Error::BadValue));
        assert_eq!(router.request_buffer(9), Err(Error::BadValue));
    }

    #[test]
    fn plain_calls_forward_to_sink() {
        let (mut router, _) = router();
        assert_eq!(router.query(Query::Width), Ok(320));
        assert_eq!(router.query(Query::Height), Ok(240));
        router.set_buffer_count(3).unwrap();
        router.disconnect(ClientApi::Egl).unwrap();
        assert!(router.composition_complete().is_ok());
        assert_eq!(
            router.sink().calls[1..],
            [SinkCall::SetBufferCount(3), SinkCall::Disconnect(ClientApi::Egl)]
        );
    }

    #[test]
    fn construction_checks_config_and_sink() {
        let zero = FrameRouter::new(
            config().with_slot_count(0),
            FakeSink::new(320, 240, 3),
            FakeHwc::default(),
            Box::new(CountingAllocator::default()),
        );
        assert_eq!(zero.err(), Some(Error::BadValue));

        let mut sink = FakeSink::new(320, 240, 3);
        sink.fail_query = Some(Error::Abandoned);
        let unqueryable = FrameRouter::new(
            config(),
            sink,
            FakeHwc::default(),
            Box::new(CountingAllocator::default()),
        );
        assert_eq!(unqueryable.err(), Some(Error::Abandoned));
    }

    #[test]
    fn dropping_router_abandons_scratch_pool() {
        let (router, _) = router();
        let pool = router.scratch().clone();
        drop(router);
        assert!(pool.is_abandoned());
    }

    #[cfg(feature = "trace")]
    #[test]
    fn frame_events_are_traced_in_order() {
        use alloc::sync::Arc;
        use alloc::vec::Vec;

        use crate::trace::{
            BufferDequeuedEvent, FrameAdvancedEvent, FrameCommittedEvent, FramePreparedEvent,
            FramebufferQueuedEvent,
        };

        #[derive(Default)]
        struct Recorder {
            events: Arc<spin::Mutex<Vec<&'static str>>>,
        }
        impl TraceSink for Recorder {
            fn on_frame_prepared(&mut self, _: &FramePreparedEvent) {
                self.events.lock().push("prepared");
            }
            fn on_buffer_dequeued(&mut self, e: &BufferDequeuedEvent) {
                self.events.lock().push(e.source.name());
            }
            fn on_framebuffer_queued(&mut self, _: &FramebufferQueuedEvent) {
                self.events.lock().push("queued");
            }
            fn on_frame_advanced(&mut self, _: &FrameAdvancedEvent) {
                self.events.lock().push("advanced");
            }
            fn on_frame_committed(&mut self, _: &FrameCommittedEvent) {
                self.events.lock().push("committed");
            }
        }

        let (mut router, _) = router();
        let recorder = Recorder::default();
        let events = recorder.events.clone();
        router.set_trace_sink(Box::new(recorder));
        run_mixed_frame(&mut router);

        assert_eq!(
            *events.lock(),
            ["prepared", "SCRATCH", "queued", "SINK", "advanced", "committed"]
        );
    }
}
