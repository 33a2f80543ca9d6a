// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `setrap`: stamps the current random-access-point system timestamp onto
//! every uref that passes through.
//!
//! The demux bin keeps one `setrap` per ES output in sync with the owning
//! program's PMT `rap_sys`; outside the demux it is a generally useful
//! plumbing pipe for any source that needs to inject a random-access
//! marker of its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use upipe_core::error::{UpipeError, UpipeResult};
use upipe_core::helpers::output::{OutputAction, OutputHelper};
use upipe_core::upipe::{family_command, downcast_family, SharedUpipe, Upipe, UpipeCommand, UpipeMgr, UpipeResponse};
use upipe_core::uprobe::{PipeId, UprobeChain};
use upipe_core::uref::Uref;

/// Family-private commands for `setrap`, unreachable by any other pipe
/// family's command construction: the type system stands in for a
/// runtime signature check here.
pub enum SetrapCommand {
    /// Set the `rap_sys` value stamped on every uref from now on.
    SetRap(u64),
}

fn next_pipe_id() -> PipeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    PipeId(NEXT.fetch_add(1, Ordering::Relaxed))
}

pub struct SetrapPipe {
    id: PipeId,
    probes: UprobeChain,
    output: OutputHelper,
    rap_sys: u64,
}

impl SetrapPipe {
    #[must_use]
    pub fn new(probes: UprobeChain) -> Self {
        let pipe = Self { id: next_pipe_id(), probes, output: OutputHelper::new(), rap_sys: 0 };
        pipe.throw_ready();
        pipe
    }

    #[must_use]
    pub fn rap_sys(&self) -> u64 {
        self.rap_sys
    }

    /// Bind this pipe's single output, the way every other pipe in this
    /// repo does — exposed as an inherent method rather than a generic
    /// `control` command since callers that build a
    /// `setrap` to splice into a chain already hold the concrete handle it
    /// feeds.
    pub fn set_output(&mut self, id: PipeId, pipe: SharedUpipe) {
        if self.output.set_output(id, pipe) {
            for uref in self.output.drain() {
                deliver(&self.output, uref);
            }
        }
    }
}

impl Upipe for SetrapPipe {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "setrap"
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
                        deliver(&self.output, uref);
                    }
                }
                Ok(UpipeResponse::Unit)
            }
            UpipeCommand::GetFlowDef => {
                self.output.flow_def().cloned().map(UpipeResponse::FlowDef).ok_or(UpipeError::Invalid("no flow def yet".into()))
            }
            UpipeCommand::SetOutput(_) => Err(UpipeError::Unhandled),
            UpipeCommand::Family(boxed) => match downcast_family::<SetrapCommand>(UpipeCommand::Family(boxed))? {
                SetrapCommand::SetRap(rap) => {
                    self.rap_sys = rap;
                    Ok(UpipeResponse::Unit)
                }
            },
            _ => Err(UpipeError::Unhandled),
        }
    }

    fn input(&mut self, mut uref: Uref) {
        uref.set_rap_sys(self.rap_sys);
        match self.output.output_uref(uref) {
            OutputAction::Deliver(uref) => deliver(&self.output, uref),
            OutputAction::Buffered => {}
        }
    }
}

fn deliver(output: &OutputHelper, uref: Uref) {
    if let Some((_, pipe)) = output.output() {
        pipe.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref);
    }
}

/// Build a `SetrapCommand` for use with [`upipe_core::upipe::family_command`].
#[must_use]
pub fn set_rap(rap: u64) -> UpipeCommand {
    family_command(SetrapCommand::SetRap(rap))
}

pub struct SetrapMgr;

impl UpipeMgr for SetrapMgr {
    fn name(&self) -> &'static str {
        "setrap"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(std::sync::Mutex::new(SetrapPipe::new(probes))))
    }
}
