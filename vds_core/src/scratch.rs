// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The internal scratch buffer pool.
//!
//! [`ScratchPool`] is a small bounded buffer queue owned by the router and
//! used as the intermediate render target of mixed-composition frames. The
//! renderer fills it through the producer side ([`BufferProducer`]); the
//! router drains it through the consumer side ([`ScratchPool::acquire`] and
//! [`ScratchPool::release`]).
//!
//! All slot bookkeeping sits behind one lock. Handles are cheap to clone
//! and share the same pool, so a release can arrive from another execution
//! context than the one driving the frame protocol.
//!
//! Every operation completes against the current pool state: a dequeue with
//! nothing free fails with [`Error::WouldBlock`] instead of waiting.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use crate::Error;
use crate::buffer::{BufferAllocator, BufferHandle, PixelFormat, Usage};
use crate::fence::Fence;
use crate::producer::{
    BufferProducer, ClientApi, DequeueFlags, DequeueRequest, Dequeued, Query, QueueInput,
    QueueOutput, Transform,
};

/// Buffers the pool holds unless told otherwise.
pub const DEFAULT_SCRATCH_BUFFERS: usize = 2;

/// Ownership state of one pool slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Available to the producer.
    #[default]
    Free,
    /// Owned by the producer.
    Dequeued,
    /// Waiting for the consumer.
    Queued,
    /// Owned by the consumer.
    Acquired,
}

/// A buffer handed to the consumer by [`ScratchPool::acquire`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferItem {
    /// Native pool slot.
    pub slot: usize,
    /// The buffer in that slot.
    pub buffer: BufferHandle,
    /// Fence that signals when the producer has finished writing.
    pub fence: Fence,
    /// Metadata the producer queued with the buffer.
    pub input: QueueInput,
}

#[derive(Clone, Copy, Debug, Default)]
struct PoolSlot {
    state: SlotState,
    buffer: Option<BufferHandle>,
    fence: Fence,
    input: Option<QueueInput>,
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<PoolSlot>,
    queued: VecDeque<usize>,
    max_slots: usize,
    default_width: u32,
    default_height: u32,
    default_format: PixelFormat,
    consumer_usage: Usage,
    connected: Option<ClientApi>,
    buffers_freed: bool,
    abandoned: bool,
}

impl PoolState {
    fn check_alive(&self) -> Result<(), Error> {
        if self.abandoned {
            Err(Error::Abandoned)
        } else {
            Ok(())
        }
    }

    fn slot_in(&mut self, slot: usize, state: SlotState) -> Result<&mut PoolSlot, Error> {
        match self.slots.get_mut(slot) {
            Some(s) if s.state == state => Ok(s),
            _ => Err(Error::BadValue),
        }
    }

    fn free_all_buffers(&mut self) {
        for slot in &mut self.slots {
            *slot = PoolSlot::default();
        }
        self.queued.clear();
        self.buffers_freed = true;
    }

    fn queue_output(&self) -> QueueOutput {
        QueueOutput {
            width: self.default_width,
            height: self.default_height,
            transform_hint: Transform::empty(),
            pending_buffers: u32::try_from(self.queued.len()).unwrap_or(u32::MAX),
        }
    }
}

struct Shared {
    name: String,
    state: Mutex<PoolState>,
    allocator: Box<dyn BufferAllocator + Send + Sync>,
}

/// Handle to a bounded scratch buffer pool.
#[derive(Clone)]
pub struct ScratchPool {
    shared: Arc<Shared>,
}

impl fmt::Debug for ScratchPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScratchPool")
            .field("name", &self.shared.name)
            .field("state", &*self.shared.state.lock())
            .finish_non_exhaustive()
    }
}

impl ScratchPool {
    /// Creates a pool of `buffer_count` slots allocating through
    /// `allocator`.
    ///
    /// `max_slots` bounds later [`set_buffer_count`](BufferProducer::set_buffer_count)
    /// calls; it is the size of the unified slot space the pool's slots are
    /// mapped into.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        allocator: Box<dyn BufferAllocator + Send + Sync>,
        buffer_count: usize,
        max_slots: usize,
    ) -> Self {
        let count = buffer_count.clamp(1, max_slots.max(1));
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(PoolState {
                    slots: alloc::vec![PoolSlot::default(); count],
                    queued: VecDeque::with_capacity(count),
                    max_slots: max_slots.max(1),
                    default_width: 1,
                    default_height: 1,
                    default_format: PixelFormat::RGBA_8888,
                    consumer_usage: Usage::empty(),
                    connected: None,
                    buffers_freed: false,
                    abandoned: false,
                }),
                allocator,
            }),
        }
    }

    /// Returns the pool's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Sets the size used when a dequeue asks for width and height 0.
    pub fn set_default_buffer_size(&self, width: u32, height: u32) {
        let mut state = self.shared.state.lock();
        state.default_width = width.max(1);
        state.default_height = height.max(1);
    }

    /// Sets the format used when a dequeue asks for
    /// [`PixelFormat::DEFAULT`].
    pub fn set_default_format(&self, format: PixelFormat) {
        self.shared.state.lock().default_format = format;
    }

    /// Sets usage bits added to every allocation.
    pub fn set_consumer_usage(&self, usage: Usage) {
        self.shared.state.lock().consumer_usage = usage;
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.shared.state.lock().slots.len()
    }

    /// Returns the state of a native slot.
    #[must_use]
    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.shared.state.lock().slots.get(slot).map(|s| s.state)
    }

    /// Returns `true` once the pool has been abandoned.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.shared.state.lock().abandoned
    }

    /// Takes the oldest queued buffer.
    ///
    /// # Errors
    ///
    /// [`Error::WouldBlock`] if nothing is queued, [`Error::Abandoned`]
    /// after [`abandon`](Self::abandon).
    pub fn acquire(&self) -> Result<BufferItem, Error> {
        let mut state = self.shared.state.lock();
        state.check_alive()?;
        let slot = state.queued.pop_front().ok_or(Error::WouldBlock)?;
        let entry = state.slot_in(slot, SlotState::Queued)?;
        let (Some(buffer), Some(input)) = (entry.buffer, entry.input) else {
            return Err(Error::BadValue);
        };
        entry.state = SlotState::Acquired;
        let fence = core::mem::take(&mut entry.fence);
        log::debug!("{}: acquire slot={slot}", self.shared.name);
        Ok(BufferItem {
            slot,
            buffer,
            fence,
            input,
        })
    }

    /// Returns an acquired buffer to the pool.
    ///
    /// `fence` signals when the consumer has finished reading; the producer
    /// receives it (merged with any fence already attached) on the slot's
    /// next dequeue.
    ///
    /// # Errors
    ///
    /// [`Error::BadValue`] if `slot` is not acquired, [`Error::Abandoned`]
    /// after [`abandon`](Self::abandon).
    pub fn release(&self, slot: usize, fence: Fence) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        state.check_alive()?;
        let entry = state.slot_in(slot, SlotState::Acquired)?;
        entry.state = SlotState::Free;
        entry.fence = entry.fence.merge(fence);
        entry.input = None;
        log::debug!("{}: release slot={slot} fence={fence:?}", self.shared.name);
        Ok(())
    }

    /// Frees every buffer and fails all later calls with
    /// [`Error::Abandoned`].
    pub fn abandon(&self) {
        let mut state = self.shared.state.lock();
        if !state.abandoned {
            state.free_all_buffers();
            state.abandoned = true;
            log::debug!("{}: abandoned", self.shared.name);
        }
    }
}

impl BufferProducer for ScratchPool {
    fn dequeue_buffer(&mut self, request: &DequeueRequest) -> Result<Dequeued, Error> {
        let (slot, width, height, format, usage, mut flags, current) = {
            let mut state = self.shared.state.lock();
            state.check_alive()?;
            let (width, height) = match (request.width, request.height) {
                (0, 0) => (state.default_width, state.default_height),
                (0, _) | (_, 0) => return Err(Error::BadValue),
                size => size,
            };
            let format = if request.format == PixelFormat::DEFAULT {
                state.default_format
            } else {
                request.format
            };
            let usage = request.usage | state.consumer_usage;
            let slot = state
                .slots
                .iter()
                .position(|s| s.state == SlotState::Free)
                .ok_or(Error::WouldBlock)?;
            let mut flags = DequeueFlags::empty();
            if core::mem::take(&mut state.buffers_freed) {
                flags |= DequeueFlags::RELEASE_ALL_BUFFERS;
            }
            let entry = &mut state.slots[slot];
            entry.state = SlotState::Dequeued;
            let current = entry
                .buffer
                .filter(|b| b.matches(width, height, format, usage));
            (slot, width, height, format, usage, flags, current)
        };

        if current.is_none() {
            // Allocation happens outside the lock; the slot is already
            // marked dequeued so no other caller can take it.
            let allocated = self.shared.allocator.allocate(width, height, format, usage);
            let mut state = self.shared.state.lock();
            if state.abandoned {
                return Err(Error::Abandoned);
            }
            let entry = &mut state.slots[slot];
            match allocated {
                Ok(buffer) => {
                    entry.buffer = Some(buffer);
                    entry.fence = Fence::NONE;
                    flags |= DequeueFlags::NEEDS_REALLOCATION;
                }
                Err(err) => {
                    entry.state = SlotState::Free;
                    return Err(err);
                }
            }
        }

        let fence = {
            let mut state = self.shared.state.lock();
            core::mem::take(&mut state.slots[slot].fence)
        };
        log::debug!(
            "{}: dequeue slot={slot} {width}x{height} flags={flags:?}",
            self.shared.name
        );
        Ok(Dequeued { slot, fence, flags })
    }

    fn queue_buffer(&mut self, slot: usize, input: &QueueInput) -> Result<QueueOutput, Error> {
        let mut state = self.shared.state.lock();
        state.check_alive()?;
        let entry = state.slot_in(slot, SlotState::Dequeued)?;
        entry.state = SlotState::Queued;
        entry.fence = input.fence;
        entry.input = Some(*input);
        state.queued.push_back(slot);
        log::debug!("{}: queue slot={slot}", self.shared.name);
        Ok(state.queue_output())
    }

    fn cancel_buffer(&mut self, slot: usize, fence: Fence) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        state.check_alive()?;
        let entry = state.slot_in(slot, SlotState::Dequeued)?;
        entry.state = SlotState::Free;
        entry.fence = fence;
        log::debug!("{}: cancel slot={slot}", self.shared.name);
        Ok(())
    }

    fn request_buffer(&mut self, slot: usize) -> Result<BufferHandle, Error> {
        let mut state = self.shared.state.lock();
        state.check_alive()?;
        state
            .slot_in(slot, SlotState::Dequeued)?
            .buffer
            .ok_or(Error::BadValue)
    }

    fn set_buffer_count(&mut self, count: usize) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        state.check_alive()?;
        let count = if count == 0 {
            DEFAULT_SCRATCH_BUFFERS
        } else {
            count
        };
        if count > state.max_slots {
            return Err(Error::BadValue);
        }
        if state.slots.iter().any(|s| s.state == SlotState::Dequeued) {
            return Err(Error::BadValue);
        }
        state.free_all_buffers();
        state.slots.resize(count, PoolSlot::default());
        Ok(())
    }

    fn connect(&mut self, api: ClientApi) -> Result<QueueOutput, Error> {
        let mut state = self.shared.state.lock();
        state.check_alive()?;
        if state.connected.is_some() {
            return Err(Error::BadValue);
        }
        state.connected = Some(api);
        Ok(state.queue_output())
    }

    fn disconnect(&mut self, api: ClientApi) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        state.check_alive()?;
        if state.connected != Some(api) {
            return Err(Error::BadValue);
        }
        state.connected = None;
        Ok(())
    }

    fn query(&mut self, what: Query) -> Result<u32, Error> {
        let state = self.shared.state.lock();
        state.check_alive()?;
        Ok(match what {
            Query::Width => state.default_width,
            Query::Height => state.default_height,
            Query::Format => state.default_format.0,
            Query::MinUndequeuedBuffers => 1,
            Query::ConsumerUsageBits => state.consumer_usage.bits(),
            Query::TransformHint => 0,
        })
    }
}
