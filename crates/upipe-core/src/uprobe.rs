// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `uprobe`: the event-handler chain attached to each pipe.

use std::sync::Arc;

/// Identifies the pipe throwing an event, for logging and for probes that
/// need to tell instances of the same family apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(pub u64);

/// Events a pipe can throw on its probe chain.
///
/// Pipe-family-specific events (HTTP redirect, stream-switcher enter/leave,
/// `TS_SPLIT_ADD_PID`/`DEL_PID`, `HTTP_SRC_SCHEME_HOOK`, …) are carried by
/// `Local` rather than given their own variants — modeled here as a family
/// tag plus an opaque payload rather than a global flat enum, so `upipe-ts`
/// and `upipe-http` can add their own vocabularies without upipe-core
/// knowing about them.
#[derive(Debug, Clone)]
pub enum UprobeEvent {
    Ready,
    Dead,
    SourceEnd,
    SinkEnd,
    Stalled,
    Fatal(FatalCode),
    Error(String),
    NewFlowDef(String),
    NeedOutput(String),
    SplitUpdate,
    NewRap(u64),
    ClockRef { uref_pts: u64, discontinuity: bool },
    ClockTs(u64),
    ClockUtc(u64),
    SyncAcquired,
    SyncLost,
    ProvideRequest(String),
    /// A family-specific event: `(family_name, event_name, payload)`.
    Local(&'static str, &'static str, Arc<dyn std::any::Any + Send + Sync>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalCode {
    Alloc,
    Upump,
    External,
}

/// Outcome of one probe's handling of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// This probe consumed the event; the chain stops here.
    Handled,
    /// Pass the event to the next probe.
    Unhandled,
}

/// One node in the probe chain.
pub trait Uprobe: Send + Sync {
    fn throw(&self, pipe: PipeId, event: &UprobeEvent) -> ProbeStatus;
}

/// An owned list of probes, walked front-to-back: each pipe owns a strong
/// reference to its own chain, and sharing a chain across pipes is
/// expressed by cloning the `Arc`s inside, not by aliasing the list itself.
#[derive(Clone, Default)]
pub struct UprobeChain {
    probes: Vec<Arc<dyn Uprobe>>,
}

impl UprobeChain {
    #[must_use]
    pub fn new() -> Self {
        Self { probes: Vec::new() }
    }

    #[must_use]
    pub fn with(mut self, probe: Arc<dyn Uprobe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn push(&mut self, probe: Arc<dyn Uprobe>) {
        self.probes.push(probe);
    }

    /// `upipe_throw`: walk the chain front-to-back; the first non-unhandled
    /// result wins. Returns `Unhandled` if every probe passed, or the chain
    /// is empty.
    pub fn throw(&self, pipe: PipeId, event: &UprobeEvent) -> ProbeStatus {
        for probe in &self.probes {
            if probe.throw(pipe, event) == ProbeStatus::Handled {
                return ProbeStatus::Handled;
            }
        }
        ProbeStatus::Unhandled
    }
}

impl std::fmt::Debug for UprobeChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UprobeChain").field("len", &self.probes.len()).finish()
    }
}

/// A probe built from a closure, for ad hoc handlers and tests.
pub struct FnProbe<F>(pub F)
where
    F: Fn(PipeId, &UprobeEvent) -> ProbeStatus + Send + Sync;

impl<F> Uprobe for FnProbe<F>
where
    F: Fn(PipeId, &UprobeEvent) -> ProbeStatus + Send + Sync,
{
    fn throw(&self, pipe: PipeId, event: &UprobeEvent) -> ProbeStatus {
        (self.0)(pipe, event)
    }
}

/// A probe that logs every event at the appropriate `tracing` level and
/// always passes it on — the default tail of most chains.
pub struct LogProbe;

impl Uprobe for LogProbe {
    fn throw(&self, pipe: PipeId, event: &UprobeEvent) -> ProbeStatus {
        match event {
            UprobeEvent::Fatal(_) => tracing::error!(pipe = pipe.0, ?event, "fatal event"),
            UprobeEvent::Error(_) => tracing::warn!(pipe = pipe.0, ?event, "error event"),
            UprobeEvent::Ready | UprobeEvent::Dead => {
                tracing::info!(pipe = pipe.0, ?event, "lifecycle event");
            }
            _ => tracing::debug!(pipe = pipe.0, ?event, "event"),
        }
        ProbeStatus::Unhandled
    }
}
