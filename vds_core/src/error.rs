// Copyright 2026 the VDS Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type shared by buffer sources, the hardware compositor contract,
//! and the frame router.
//!
//! Sources and the compositor report failures with the same [`Error`] the
//! router returns, so the router hands upstream failures back to its caller
//! unchanged.

use core::fmt;

use crate::router::{Call, FrameState};

/// Errors from buffer-queue, compositor, and frame-protocol operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// No buffer is available and the call does not wait for one.
    WouldBlock,
    /// The queue has been abandoned or was never initialized.
    Abandoned,
    /// An argument was invalid, or a slot was not in the state the call
    /// requires.
    BadValue,
    /// A required buffer is missing (resource exhaustion).
    NoMemory,
    /// A frame-protocol call arrived in a state that does not accept it.
    InvalidOperation {
        /// The rejected call.
        call: Call,
        /// The frame state at the time of the call.
        state: FrameState,
    },
    /// The hardware compositor refused a submission.
    Compositor(i32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldBlock => f.write_str("no buffer available without blocking"),
            Self::Abandoned => f.write_str("buffer queue abandoned"),
            Self::BadValue => f.write_str("invalid argument or slot state"),
            Self::NoMemory => f.write_str("required buffer is missing"),
            Self::InvalidOperation { call, state } => {
                write!(f, "{} not allowed in {} state", call.name(), state.name())
            }
            Self::Compositor(code) => write!(f, "hardware compositor rejected buffer ({code})"),
        }
    }
}

impl core::error::Error for Error {}
