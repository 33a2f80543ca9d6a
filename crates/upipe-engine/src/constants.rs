// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Default capacities for the channels and FIFOs the scheduler wires up.
//!
//! One constant per hop, with the trade-off documented inline rather than
//! left as a magic number at the call site.

/// Default bound on a pipe's internal input FIFO (`max_urefs`): once full,
/// the scheduler installs a blocker on the originating pump instead of
/// growing the queue further.
pub const DEFAULT_MAX_UREFS: usize = 256;

/// Default channel capacity between a [`crate::pump::PumpMgr`] timer tick
/// and the pipe it drives.
pub const DEFAULT_TIMER_CHANNEL_CAPACITY: usize = 16;

/// Default capacity of the worker bin's main-to-worker input queue.
pub const DEFAULT_WORKER_INPUT_CAPACITY: usize = 128;

/// Default capacity of the worker bin's worker-to-main output queue.
///
/// Smaller than the input queue: a worker that falls behind should make
/// backpressure visible on its output rather than buffer unboundedly
/// in the direction the main loop is waiting on.
pub const DEFAULT_WORKER_OUTPUT_CAPACITY: usize = 64;
