// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `setflowdef`: rewrites the flow definition a uref carries by merging in
//! a configured set of override attributes, leaving data urefs untouched.
//! General-purpose plumbing for injecting attributes (e.g. service
//! metadata) into a flow def at one point in a chain so everything
//! downstream of it inherits them without each stage needing to know
//! where the attributes originally came from.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use upipe_core::error::{UpipeError, UpipeResult};
use upipe_core::helpers::output::{OutputAction, OutputHelper};
use upipe_core::udict::Udict;
use upipe_core::upipe::{downcast_family, family_command, SharedUpipe, Upipe, UpipeCommand, UpipeMgr, UpipeResponse};
use upipe_core::uprobe::{PipeId, UprobeChain};
use upipe_core::uref::Uref;

pub enum SetFlowDefCommand {
    /// Replace the attribute overrides merged into every incoming flow def.
    SetDict(Udict),
}

#[must_use]
pub fn set_dict(dict: Udict) -> UpipeCommand {
    family_command(SetFlowDefCommand::SetDict(dict))
}

fn next_pipe_id() -> PipeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    PipeId(NEXT.fetch_add(1, Ordering::Relaxed))
}

pub struct SetFlowDefPipe {
    id: PipeId,
    probes: UprobeChain,
    output: OutputHelper,
    overrides: Udict,
}

impl SetFlowDefPipe {
    #[must_use]
    pub fn new(probes: UprobeChain) -> Self {
        let pipe = Self { id: next_pipe_id(), probes, output: OutputHelper::new(), overrides: Udict::new() };
        pipe.throw_ready();
        pipe
    }

    /// Merge the configured overrides into `def`, keeping the original
    /// `flow.def` string (only additional attributes are injected).
    fn merged(&self, mut def: Uref) -> Uref {
        def.attrs_mut().merge(&self.overrides);
        def
    }

    /// Bind this pipe's single output.
    pub fn set_output(&mut self, id: PipeId, pipe: SharedUpipe) {
        if self.output.set_output(id, pipe) {
            for uref in self.output.drain() {
                if let Some((_, out)) = self.output.output() {
                    out.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref);
                }
            }
        }
    }
}

impl Upipe for SetFlowDefPipe {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "setflowdef"
    }

    fn probes(&self) -> &UprobeChain {
        &self.probes
    }

    fn probes_mut(&mut self) -> &mut UprobeChain {
        &mut self.probes
    }

    fn control(&mut self, cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
        match cmd {
            UpipeCommand::SetFlowDef(def) => {
                let merged = self.merged(def);
                let became_valid = self.output.store_flow_def(merged.clone());
                if let Some((_, out)) = self.output.output() {
                    let mut guard = out.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    guard.control(UpipeCommand::SetFlowDef(merged))?;
                }
                if became_valid {
                    let pending = self.output.drain();
                    for uref in pending {
                        if let Some((_, out)) = self.output.output() {
                            out.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref);
                        }
                    }
                }
                Ok(UpipeResponse::Unit)
            }
            UpipeCommand::GetFlowDef => self
                .output
                .flow_def()
                .cloned()
                .map(UpipeResponse::FlowDef)
                .ok_or(UpipeError::Invalid("no flow def yet".into())),
            UpipeCommand::Family(boxed) => match downcast_family::<SetFlowDefCommand>(UpipeCommand::Family(boxed))? {
                SetFlowDefCommand::SetDict(dict) => {
                    self.overrides = dict;
                    Ok(UpipeResponse::Unit)
                }
            },
            _ => Err(UpipeError::Unhandled),
        }
    }

    fn input(&mut self, uref: Uref) {
        match self.output.output_uref(uref) {
            OutputAction::Deliver(uref) => {
                if let Some((_, out)) = self.output.output() {
                    out.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref);
                }
            }
            OutputAction::Buffered => {}
        }
    }
}

pub struct SetFlowDefMgr;

impl UpipeMgr for SetFlowDefMgr {
    fn name(&self) -> &'static str {
        "setflowdef"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(std::sync::Mutex::new(SetFlowDefPipe::new(probes))))
    }
}
