// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `idem`: the identity pipe, forwarding every uref and control command
//! unchanged. Used as the no-op member of the input-stage choice
//! (`input → [sync|check|idem] → setrap`) when the input flow def is
//! already `block.mpegts.` — synchronized and aligned — and no
//! sync-search or alignment check is needed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use upipe_core::error::{UpipeError, UpipeResult};
use upipe_core::helpers::output::{OutputAction, OutputHelper};
use upipe_core::upipe::{SharedUpipe, Upipe, UpipeCommand, UpipeMgr, UpipeResponse};
use upipe_core::uprobe::{PipeId, UprobeChain};
use upipe_core::uref::Uref;

fn next_pipe_id() -> PipeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    PipeId(NEXT.fetch_add(1, Ordering::Relaxed))
}

pub struct IdemPipe {
    id: PipeId,
    probes: UprobeChain,
    output: OutputHelper,
}

impl IdemPipe {
    #[must_use]
    pub fn new(probes: UprobeChain) -> Self {
        let pipe = Self { id: next_pipe_id(), probes, output: OutputHelper::new() };
        pipe.throw_ready();
        pipe
    }

    pub fn set_output(&mut self, id: PipeId, pipe: SharedUpipe) {
        if self.output.set_output(id, pipe) {
            for uref in self.output.drain() {
                Self::deliver(&self.output, uref);
            }
        }
    }

    fn deliver(output: &OutputHelper, uref: Uref) {
        if let Some((_, out)) = output.output() {
            out.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref);
        }
    }
}

impl Upipe for IdemPipe {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "idem"
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
                if self.output.store_flow_def(def) {
                    let pending = self.output.drain();
                    for uref in pending {
                        Self::deliver(&self.output, uref);
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
            _ => Err(UpipeError::Unhandled),
        }
    }

    fn input(&mut self, uref: Uref) {
        if let OutputAction::Deliver(uref) = self.output.output_uref(uref) {
            if let Some((_, out)) = self.output.output() {
                out.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref);
            }
        }
    }
}

pub struct IdemMgr;

impl UpipeMgr for IdemMgr {
    fn name(&self) -> &'static str {
        "idem"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(std::sync::Mutex::new(IdemPipe::new(probes))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Vec<Uref>);
    impl Upipe for Recorder {
        fn id(&self) -> PipeId {
            PipeId(9)
        }
        fn mgr_name(&self) -> &'static str {
            "recorder"
        }
        fn probes(&self) -> &UprobeChain {
            unimplemented!()
        }
        fn probes_mut(&mut self) -> &mut UprobeChain {
            unimplemented!()
        }
        fn control(&mut self, _cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
            Ok(UpipeResponse::Unit)
        }
        fn input(&mut self, uref: Uref) {
            self.0.push(uref);
        }
    }

    #[test]
    fn forwards_urefs_unchanged() {
        let mut pipe = IdemPipe::new(UprobeChain::new());
        pipe.control(UpipeCommand::SetFlowDef(Uref::new_control())).unwrap();
        let sink: SharedUpipe = Arc::new(std::sync::Mutex::new(Recorder(Vec::new())));
        pipe.output.set_output(PipeId(9), Arc::clone(&sink));

        let mut uref = Uref::new_control();
        uref.set_pts_orig(7);
        pipe.input(uref);
        assert_eq!(sink.lock().unwrap().0[0].pts_orig(), Some(7));
    }
}
