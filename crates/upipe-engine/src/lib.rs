// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The event-loop crate: pump/scheduler plumbing, bounded-FIFO
//! backpressure, and the cross-thread worker bin.
//!
//! Everything in `upipe-core` is transport- and runtime-agnostic on
//! purpose; this is the one crate in the workspace allowed to know about
//! `tokio`, because it is the crate that actually owns an event loop.

pub mod blocker;
pub mod constants;
pub mod error;
pub mod pump;
pub mod worker;

pub use blocker::{BoundedFifo, Blocker, PushOutcome};
pub use error::EngineError;
pub use pump::{IoSource, Pump, PumpCallback, PumpMgr, TokioPumpMgr};
pub use worker::{SpawnPolicy, WorkerBin};
