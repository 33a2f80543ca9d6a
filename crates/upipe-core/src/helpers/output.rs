// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! OUTPUT helper: single output pointer, stored flow-def, buffered early
//! output state, outstanding request bookkeeping.

use std::collections::VecDeque;

use crate::upipe::SharedUpipe;
use crate::uprobe::PipeId;
use crate::uref::Uref;
use crate::urequest::Urequest;

/// Tri-state describing what a pipe has established about its output so
/// far: nothing yet, a flow def but no confirmed downstream acceptance, or
/// a fully negotiated, deliverable link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    None,
    FlowDef,
    Valid,
}

/// A pipe's single-output plumbing: where data goes, what flow def was
/// last announced, and urefs produced before the link was ready.
pub struct OutputHelper {
    output: Option<(PipeId, SharedUpipe)>,
    flow_def: Option<Uref>,
    state: OutputState,
    early: VecDeque<Uref>,
    requests: Vec<Urequest>,
}

impl Default for OutputHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputHelper {
    #[must_use]
    pub fn new() -> Self {
        Self { output: None, flow_def: None, state: OutputState::None, early: VecDeque::new(), requests: Vec::new() }
    }

    #[must_use]
    pub fn state(&self) -> OutputState {
        self.state
    }

    #[must_use]
    pub fn output(&self) -> Option<&(PipeId, SharedUpipe)> {
        self.output.as_ref()
    }

    /// `SET_OUTPUT`: bind the downstream pipe. Does not by itself flush
    /// buffered urefs — a flow def must also have been announced. Returns
    /// `true` when this transitioned the state straight to `Valid`, so
    /// callers know to immediately follow up with [`Self::drain`] and
    /// deliver the result, rather than silently stranding urefs that
    /// arrived before the output was connected.
    pub fn set_output(&mut self, id: PipeId, pipe: SharedUpipe) -> bool {
        self.output = Some((id, pipe));
        self.recompute_state();
        self.state == OutputState::Valid
    }

    /// Record the flow def this pipe last announced to its output.
    /// Returns `true` when this transitioned the state straight to
    /// `Valid` (see [`Self::set_output`]).
    pub fn store_flow_def(&mut self, def: Uref) -> bool {
        self.flow_def = Some(def);
        self.recompute_state();
        self.state == OutputState::Valid
    }

    #[must_use]
    pub fn flow_def(&self) -> Option<&Uref> {
        self.flow_def.as_ref()
    }

    fn recompute_state(&mut self) {
        self.state = match (self.output.is_some(), self.flow_def.is_some()) {
            (true, true) => OutputState::Valid,
            (false, true) => OutputState::FlowDef,
            _ => OutputState::None,
        };
    }

    /// Enqueue a uref for delivery once the output becomes valid, or
    /// deliver it immediately if it already is. Returns the uref back if
    /// there is nowhere to send it and nowhere to buffer it either — the
    /// caller should drop it, since urefs still in transit at teardown are
    /// dropped rather than held indefinitely.
    pub fn output_uref(&mut self, uref: Uref) -> OutputAction {
        if self.state == OutputState::Valid {
            OutputAction::Deliver(uref)
        } else {
            self.early.push_back(uref);
            OutputAction::Buffered
        }
    }

    /// Drain buffered urefs once the output link becomes valid. Caller is
    /// responsible for actually calling `input` on the bound output pipe
    /// for each returned uref, in order.
    pub fn drain(&mut self) -> Vec<Uref> {
        if self.state != OutputState::Valid {
            return Vec::new();
        }
        self.early.drain(..).collect()
    }

    pub fn register_request(&mut self, req: Urequest) {
        self.requests.push(req);
    }

    pub fn unregister_requests(&mut self) -> Vec<Urequest> {
        let mut reqs = std::mem::take(&mut self.requests);
        reqs.reverse();
        reqs
    }
}

pub enum OutputAction {
    Deliver(Uref),
    Buffered,
}
