// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `null`: a sink pipe that discards every uref, for wiring an output
//! nobody wants to consume yet (e.g. a program sub-pipe before the
//! application has selected any ES).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use upipe_core::error::UpipeResult;
use upipe_core::upipe::{SharedUpipe, Upipe, UpipeCommand, UpipeMgr, UpipeResponse};
use upipe_core::uprobe::{PipeId, UprobeChain};
use upipe_core::uref::Uref;

fn next_pipe_id() -> PipeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    PipeId(NEXT.fetch_add(1, Ordering::Relaxed))
}

pub struct NullPipe {
    id: PipeId,
    probes: UprobeChain,
    dropped: AtomicU64,
}

impl NullPipe {
    #[must_use]
    pub fn new(probes: UprobeChain) -> Self {
        let pipe = Self { id: next_pipe_id(), probes, dropped: AtomicU64::new(0) };
        pipe.throw_ready();
        pipe
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Upipe for NullPipe {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "null"
    }

    fn probes(&self) -> &UprobeChain {
        &self.probes
    }

    fn probes_mut(&mut self) -> &mut UprobeChain {
        &mut self.probes
    }

    fn control(&mut self, _cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
        Ok(UpipeResponse::Unit)
    }

    fn input(&mut self, _uref: Uref) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(pipe = self.id.0, "null pipe dropped a uref");
    }
}

pub struct NullMgr;

impl UpipeMgr for NullMgr {
    fn name(&self) -> &'static str {
        "null"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(std::sync::Mutex::new(NullPipe::new(probes))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_dropped_urefs() {
        let mut pipe = NullPipe::new(UprobeChain::new());
        pipe.input(Uref::new_control());
        pipe.input(Uref::new_control());
        assert_eq!(pipe.dropped_count(), 2);
    }
}
