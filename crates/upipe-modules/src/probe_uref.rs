// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `probe_uref`: calls a user hook on every uref as it passes through,
//! without otherwise altering the dataflow. Used by the demux bin's ES
//! output chain for teletext PTS repair, an optional stage that
//! synthesizes a `pts_orig`/`dts_orig` for frames that carry none.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use upipe_core::error::{UpipeError, UpipeResult};
use upipe_core::helpers::output::{OutputAction, OutputHelper};
use upipe_core::upipe::{SharedUpipe, Upipe, UpipeCommand, UpipeMgr, UpipeResponse};
use upipe_core::uprobe::{PipeId, UprobeChain};
use upipe_core::uref::Uref;

/// A hook invoked on every uref before it is forwarded, allowed to mutate
/// it in place.
pub trait UrefHook: Send + Sync {
    fn visit(&self, uref: &mut Uref);
}

impl<F: Fn(&mut Uref) + Send + Sync> UrefHook for F {
    fn visit(&self, uref: &mut Uref) {
        self(uref);
    }
}

fn next_pipe_id() -> PipeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    PipeId(NEXT.fetch_add(1, Ordering::Relaxed))
}

pub struct ProbeUrefPipe {
    id: PipeId,
    probes: UprobeChain,
    output: OutputHelper,
    hook: Arc<dyn UrefHook>,
}

impl ProbeUrefPipe {
    #[must_use]
    pub fn new(probes: UprobeChain, hook: Arc<dyn UrefHook>) -> Self {
        let pipe = Self { id: next_pipe_id(), probes, output: OutputHelper::new(), hook };
        pipe.throw_ready();
        pipe
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

impl Upipe for ProbeUrefPipe {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "probe_uref"
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
            _ => Err(UpipeError::Unhandled),
        }
    }

    fn input(&mut self, mut uref: Uref) {
        self.hook.visit(&mut uref);
        if let OutputAction::Deliver(uref) = self.output.output_uref(uref) {
            if let Some((_, out)) = self.output.output() {
                out.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref);
            }
        }
    }
}

/// Allocator for a `probe_uref` bound to one hook; `upipe_mgr::alloc` takes
/// no per-pipe arguments in this crate's command model, so the hook is
/// configured on the manager instead (mirroring `mgr_control` setting a
/// sub-manager dependency shared by every pipe the manager will allocate).
pub struct ProbeUrefMgr {
    hook: Arc<dyn UrefHook>,
}

impl ProbeUrefMgr {
    #[must_use]
    pub fn new(hook: Arc<dyn UrefHook>) -> Self {
        Self { hook }
    }

    /// A hook that synthesizes a 25fps-spaced PTS anchored on the last
    /// observed PCR, for teletext frames carrying no timestamp of their
    /// own.
    #[must_use]
    pub fn telx(anchor_pcr: Arc<AtomicU64>) -> Self {
        Self::new(Arc::new(move |uref: &mut Uref| telx_hook(&anchor_pcr, uref)))
    }
}

/// Synthesize a 25fps-spaced `pts_orig` anchored on `anchor_pcr` for a
/// uref that carries none. Exposed standalone so it can be exercised
/// directly, without routing a uref through the pipe's (unconnected, in
/// a unit test) output link.
const TELX_FPS: u64 = 25;

pub fn telx_hook(anchor_pcr: &AtomicU64, uref: &mut Uref) {
    if uref.pts_orig().is_none() {
        let pcr = anchor_pcr.load(Ordering::Relaxed);
        let frame_duration = upipe_core::uclock::UCLOCK_FREQ / TELX_FPS;
        uref.set_pts_orig(pcr + frame_duration);
    }
}

impl UpipeMgr for ProbeUrefMgr {
    fn name(&self) -> &'static str {
        "probe_uref"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(std::sync::Mutex::new(ProbeUrefPipe::new(probes, Arc::clone(&self.hook)))))
    }
}
