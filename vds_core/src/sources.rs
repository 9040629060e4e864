// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The two buffer sources behind one capability interface.

use crate::producer::BufferProducer;
use crate::scratch::ScratchPool;
use crate::slot::Source;

/// Holds the sink and the scratch pool, selected per call by [`Source`].
#[derive(Debug)]
pub struct Sources<S> {
    sink: S,
    scratch: ScratchPool,
}

impl<S: BufferProducer> Sources<S> {
    /// Returns the producer interface of `source`.
    pub fn get(&mut self, source: Source) -> &mut dyn BufferProducer {
        match source {
            Source::Sink => &mut self.sink,
            Source::Scratch => &mut self.scratch,
        }
    }
}

impl<S> Sources<S> {
    /// Pairs an external sink with an internally owned scratch pool.
    pub fn new(sink: S, scratch: ScratchPool) -> Self {
        Self { sink, scratch }
    }

    /// Returns the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Returns the sink mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Returns the scratch pool.
    pub fn scratch(&self) -> &ScratchPool {
        &self.scratch
    }
}
