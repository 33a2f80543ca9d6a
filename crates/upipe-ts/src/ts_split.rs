// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `ts_split`: PID-keyed fan-out from a TS stream.
//!
//! Accepts aligned 188-byte packets and delivers each one to every
//! sub-output whose flow def carries a matching `ts.pid`. A sub-output is
//! allocated with `upipe_flow_alloc_sub` supplying its desired flow def;
//! adding/removing a PID throws `TS_SPLIT_ADD_PID`/`DEL_PID` so an upstream
//! hardware filter could be updated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use upipe_core::error::{UpipeError, UpipeResult};
use upipe_core::upipe::{family_command, downcast_family, SharedUpipe, Upipe, UpipeCommand, UpipeMgr, UpipeResponse};
use upipe_core::uprobe::{PipeId, ProbeStatus, UprobeChain, UprobeEvent};
use upipe_core::uref::Uref;

use crate::flowdef::TS_PID_ATTR;
use crate::packet::parse_header;

pub const FAMILY: &str = "ts_split";

/// Family-private event payload for `TS_SPLIT_ADD_PID`/`DEL_PID`.
#[derive(Debug, Clone, Copy)]
pub struct PidChange {
    pub pid: u16,
}

fn add_pid_event(pid: u16) -> UprobeEvent {
    UprobeEvent::Local(FAMILY, "ADD_PID", Arc::new(PidChange { pid }))
}

fn del_pid_event(pid: u16) -> UprobeEvent {
    UprobeEvent::Local(FAMILY, "DEL_PID", Arc::new(PidChange { pid }))
}

pub enum TsSplitCommand {
    /// Allocate a sub-output bound to `pid`, delivering its `SharedUpipe`
    /// for the caller to wire further downstream.
    AllocSub { pid: u16, output: SharedUpipe },
    FreeSub { pid: u16 },
}

#[must_use]
pub fn alloc_sub(pid: u16, output: SharedUpipe) -> UpipeCommand {
    family_command(TsSplitCommand::AllocSub { pid, output })
}

#[must_use]
pub fn free_sub(pid: u16) -> UpipeCommand {
    family_command(TsSplitCommand::FreeSub { pid })
}

fn next_pipe_id() -> PipeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    PipeId(NEXT.fetch_add(1, Ordering::Relaxed))
}

struct SubOutput {
    pid: u16,
    pipe: SharedUpipe,
}

pub struct TsSplitPipe {
    id: PipeId,
    probes: UprobeChain,
    subs: Vec<SubOutput>,
}

impl TsSplitPipe {
    #[must_use]
    pub fn new(probes: UprobeChain) -> Self {
        let pipe = Self { id: next_pipe_id(), probes, subs: Vec::new() };
        pipe.throw_ready();
        pipe
    }

    /// Number of sub-outputs currently bound to `pid` — always 0 or 1 in
    /// practice (one allocation per PID per caller), but callers that
    /// share a PID across decoders go through `psi_pid` instead of calling
    /// `alloc_sub` twice for the same PID.
    #[must_use]
    pub fn sub_count(&self) -> usize {
        self.subs.len()
    }
}

impl Upipe for TsSplitPipe {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "ts_split"
    }

    fn probes(&self) -> &UprobeChain {
        &self.probes
    }

    fn probes_mut(&mut self) -> &mut UprobeChain {
        &mut self.probes
    }

    fn control(&mut self, cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
        match cmd {
            UpipeCommand::Family(boxed) => match downcast_family::<TsSplitCommand>(UpipeCommand::Family(boxed))? {
                TsSplitCommand::AllocSub { pid, output } => {
                    self.subs.push(SubOutput { pid, pipe: output });
                    let status = self.throw(&add_pid_event(pid));
                    debug_assert!(status == ProbeStatus::Handled || status == ProbeStatus::Unhandled);
                    Ok(UpipeResponse::Unit)
                }
                TsSplitCommand::FreeSub { pid } => {
                    self.subs.retain(|s| s.pid != pid);
                    let status = self.throw(&del_pid_event(pid));
                    debug_assert!(status == ProbeStatus::Handled || status == ProbeStatus::Unhandled);
                    Ok(UpipeResponse::Unit)
                }
            },
            _ => Err(UpipeError::Unhandled),
        }
    }

    fn input(&mut self, uref: Uref) {
        let Some(block) = uref.ubuf().and_then(|u| u.as_block()) else {
            tracing::warn!(pipe = self.id.0, "ts_split received a non-block uref, dropping");
            return;
        };
        let size = block.size();
        let Some(bytes) = block.read(0, size) else {
            return;
        };
        let Some(header) = parse_header(&bytes) else {
            tracing::warn!(pipe = self.id.0, "ts_split received a malformed TS packet, dropping");
            return;
        };
        for sub in &self.subs {
            if sub.pid == header.pid {
                let mut guard = sub.pipe.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                guard.input(uref.clone());
            }
        }
    }
}

pub struct TsSplitMgr;

impl UpipeMgr for TsSplitMgr {
    fn name(&self) -> &'static str {
        "ts_split"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(std::sync::Mutex::new(TsSplitPipe::new(probes))))
    }
}

/// Build a flow def uref requesting packets for one PID, carrying `ts.pid`
/// as the attribute a sub-output binds against.
#[must_use]
pub fn flow_def_for_pid(pid: u16) -> Uref {
    let mut def = Uref::new_control();
    def.set_flow_def("block.mpegtsaligned.");
    def.attrs_mut().set(TS_PID_ATTR, upipe_core::udict::UdictValue::U64(u64::from(pid)));
    def
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{TS_PACKET_SIZE, TS_SYNC_BYTE};
    use upipe_core::ubuf::{BlockUbuf, Ubuf};

    fn packet_with_pid(pid: u16) -> Uref {
        let mut p = [0u8; TS_PACKET_SIZE];
        p[0] = TS_SYNC_BYTE;
        p[1] = ((pid >> 8) as u8) & 0x1F;
        p[2] = (pid & 0xFF) as u8;
        p[3] = 0x10;
        Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(p.to_vec())))
    }

    struct Recorder(Vec<Uref>);
    impl Upipe for Recorder {
        fn id(&self) -> PipeId {
            PipeId(100)
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
    fn delivers_exactly_one_copy_to_each_matching_sub_output() {
        let mut split = TsSplitPipe::new(UprobeChain::new());
        let pat_concrete = Arc::new(std::sync::Mutex::new(Recorder(Vec::new())));
        let pmt_concrete = Arc::new(std::sync::Mutex::new(Recorder(Vec::new())));
        let pat_sink: SharedUpipe = pat_concrete.clone();
        let pmt_sink: SharedUpipe = pmt_concrete.clone();
        split.control(alloc_sub(0, pat_sink)).unwrap();
        split.control(alloc_sub(256, pmt_sink)).unwrap();

        split.input(packet_with_pid(0));
        split.input(packet_with_pid(256));
        split.input(packet_with_pid(999)); // unmatched, dropped silently

        assert_eq!(pat_concrete.lock().unwrap().0.len(), 1);
        assert_eq!(pmt_concrete.lock().unwrap().0.len(), 1);
    }

    #[test]
    fn free_sub_stops_delivery() {
        let mut split = TsSplitPipe::new(UprobeChain::new());
        let sink: SharedUpipe = Arc::new(std::sync::Mutex::new(Recorder(Vec::new())));
        split.control(alloc_sub(10, Arc::clone(&sink))).unwrap();
        assert_eq!(split.sub_count(), 1);
        split.control(free_sub(10)).unwrap();
        assert_eq!(split.sub_count(), 0);
        split.input(packet_with_pid(10));
    }
}
