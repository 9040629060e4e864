// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory stand-ins for the sink queue, the hardware compositor, and the
//! graphics allocator.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::Error;
use crate::buffer::{BufferAllocator, BufferHandle, BufferId, PixelFormat, Usage};
use crate::fence::Fence;
use crate::hwc::{HardwareComposer, HwcDisplayId};
use crate::producer::{
    BufferProducer, ClientApi, DequeueFlags, DequeueRequest, Dequeued, Query, QueueInput,
    QueueOutput, Transform,
};

/// Allocator that hands out sequential ids starting at 101.
#[derive(Clone, Debug, Default)]
pub(crate) struct CountingAllocator {
    count: Arc<AtomicU64>,
    fail_next: Arc<AtomicBool>,
}

impl CountingAllocator {
    pub(crate) fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Makes the next allocation fail with [`Error::NoMemory`].
    pub(crate) fn fail_next(&self) {
        self.fail_next.store(true, Ordering::Relaxed);
    }
}

impl BufferAllocator for CountingAllocator {
    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: Usage,
    ) -> Result<BufferHandle, Error> {
        if self.fail_next.swap(false, Ordering::Relaxed) {
            return Err(Error::NoMemory);
        }
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(BufferHandle {
            id: BufferId(100 + n),
            width,
            height,
            format,
            usage,
        })
    }
}

/// A call observed by [`FakeSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SinkCall {
    Dequeue(usize),
    Queue(usize),
    Cancel(usize),
    Request(usize),
    SetBufferCount(usize),
    Connect(ClientApi),
    Disconnect(ClientApi),
}

#[derive(Clone, Copy, Debug, Default)]
struct FakeSlot {
    dequeued: bool,
    buffer: Option<BufferHandle>,
}

/// A sink queue whose consumer takes every queued buffer immediately.
///
/// Buffer ids start at 1. Failure knobs stay armed until cleared.
#[derive(Debug)]
pub(crate) struct FakeSink {
    pub(crate) width: u32,
    pub(crate) height: u32,
    slots: Vec<FakeSlot>,
    next_id: u64,
    pub(crate) calls: Vec<SinkCall>,
    pub(crate) queued: Vec<(usize, QueueInput)>,
    pub(crate) dequeue_fence: Fence,
    pub(crate) transform_hint: Transform,
    /// Slot the next dequeue returns, if free.
    pub(crate) force_slot: Option<usize>,
    /// Flags added to the next dequeue.
    pub(crate) extra_flags: DequeueFlags,
    pub(crate) fail_dequeue: Option<Error>,
    pub(crate) fail_queue: Option<Error>,
    pub(crate) fail_request: Option<Error>,
    pub(crate) fail_query: Option<Error>,
}

impl FakeSink {
    pub(crate) fn new(width: u32, height: u32, buffer_count: usize) -> Self {
        Self {
            width,
            height,
            slots: alloc::vec![FakeSlot::default(); buffer_count],
            next_id: 1,
            calls: Vec::new(),
            queued: Vec::new(),
            dequeue_fence: Fence::NONE,
            transform_hint: Transform::ROT_90,
            force_slot: None,
            extra_flags: DequeueFlags::empty(),
            fail_dequeue: None,
            fail_queue: None,
            fail_request: None,
            fail_query: None,
        }
    }

    pub(crate) fn buffer(&self, slot: usize) -> Option<BufferHandle> {
        self.slots.get(slot).and_then(|s| s.buffer)
    }

    pub(crate) fn is_dequeued(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|s| s.dequeued)
    }

    pub(crate) fn request_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, SinkCall::Request(_)))
            .count()
    }

    fn output(&self) -> QueueOutput {
        QueueOutput {
            width: self.width,
            height: self.height,
            transform_hint: self.transform_hint,
            pending_buffers: 0,
        }
    }
}

impl BufferProducer for FakeSink {
    fn dequeue_buffer(&mut self, request: &DequeueRequest) -> Result<Dequeued, Error> {
        if let Some(err) = self.fail_dequeue {
            return Err(err);
        }
        let slot = match self.force_slot.take() {
            Some(slot) if self.slots.get(slot).is_some_and(|s| !s.dequeued) => slot,
            _ => self
                .slots
                .iter()
                .position(|s| !s.dequeued)
                .ok_or(Error::WouldBlock)?,
        };
        self.calls.push(SinkCall::Dequeue(slot));

        let (width, height) = match (request.width, request.height) {
            (0, 0) => (self.width, self.height),
            size => size,
        };
        let mut flags = core::mem::take(&mut self.extra_flags);
        let entry = &mut self.slots[slot];
        entry.dequeued = true;
        if !entry
            .buffer
            .is_some_and(|b| b.width == width && b.height == height)
        {
            entry.buffer = Some(BufferHandle {
                id: BufferId(self.next_id),
                width,
                height,
                format: request.format,
                usage: request.usage,
            });
            self.next_id += 1;
            flags |= DequeueFlags::NEEDS_REALLOCATION;
        }
        Ok(Dequeued {
            slot,
            fence: self.dequeue_fence,
            flags,
        })
    }

    fn queue_buffer(&mut self, slot: usize, input: &QueueInput) -> Result<QueueOutput, Error> {
        self.calls.push(SinkCall::Queue(slot));
        if let Some(err) = self.fail_queue {
            return Err(err);
        }
        if !self.is_dequeued(slot) {
            return Err(Error::BadValue);
        }
        self.slots[slot].dequeued = false;
        self.queued.push((slot, *input));
        Ok(self.output())
    }

    fn cancel_buffer(&mut self, slot: usize, _fence: Fence) -> Result<(), Error> {
        self.calls.push(SinkCall::Cancel(slot));
        if !self.is_dequeued(slot) {
            return Err(Error::BadValue);
        }
        self.slots[slot].dequeued = false;
        Ok(())
    }

    fn request_buffer(&mut self, slot: usize) -> Result<BufferHandle, Error> {
        self.calls.push(SinkCall::Request(slot));
        if let Some(err) = self.fail_request {
            return Err(err);
        }
        if !self.is_dequeued(slot) {
            return Err(Error::BadValue);
        }
        self.buffer(slot).ok_or(Error::BadValue)
    }

    fn set_buffer_count(&mut self, count: usize) -> Result<(), Error> {
        self.calls.push(SinkCall::SetBufferCount(count));
        Ok(())
    }

    fn connect(&mut self, api: ClientApi) -> Result<QueueOutput, Error> {
        self.calls.push(SinkCall::Connect(api));
        Ok(self.output())
    }

    fn disconnect(&mut self, api: ClientApi) -> Result<(), Error> {
        self.calls.push(SinkCall::Disconnect(api));
        Ok(())
    }

    fn query(&mut self, what: Query) -> Result<u32, Error> {
        if let Some(err) = self.fail_query {
            return Err(err);
        }
        Ok(match what {
            Query::Width => self.width,
            Query::Height => self.height,
            Query::Format => PixelFormat::RGBA_8888.0,
            Query::MinUndequeuedBuffers => 1,
            Query::ConsumerUsageBits => Usage::HW_VIDEO_ENCODER.bits(),
            Query::TransformHint => self.transform_hint.bits(),
        })
    }
}

/// A hardware compositor that records what it is handed.
#[derive(Debug, Default)]
pub(crate) struct FakeHwc {
    pub(crate) framebuffers: Vec<(HwcDisplayId, Fence, BufferHandle)>,
    pub(crate) outputs: Vec<(HwcDisplayId, Fence, BufferHandle)>,
    /// Returned, then reset, by the next `take_release_fence`.
    pub(crate) release_fence: Fence,
    pub(crate) retire_fence: Fence,
    pub(crate) release_fence_takes: usize,
    pub(crate) fail_post: Option<Error>,
}

impl HardwareComposer for FakeHwc {
    fn post_framebuffer(
        &mut self,
        display: HwcDisplayId,
        acquire_fence: Fence,
        buffer: &BufferHandle,
    ) -> Result<(), Error> {
        if let Some(err) = self.fail_post {
            return Err(err);
        }
        self.framebuffers.push((display, acquire_fence, *buffer));
        Ok(())
    }

    fn set_output_buffer(
        &mut self,
        display: HwcDisplayId,
        release_fence: Fence,
        buffer: &BufferHandle,
    ) -> Result<(), Error> {
        self.outputs.push((display, release_fence, *buffer));
        Ok(())
    }

    fn take_release_fence(&mut self, _display: HwcDisplayId) -> Fence {
        self.release_fence_takes += 1;
        core::mem::take(&mut self.release_fence)
    }

    fn last_retire_fence(&mut self, _display: HwcDisplayId) -> Fence {
        self.retire_fence
    }
}
