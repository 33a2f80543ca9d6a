// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `ts_sync` and `ts_check`: turn an arbitrary byte stream into aligned,
//! verified 188-byte TS packets.
//!
//! `ts_sync` searches an unaligned byte stream for the repeating sync byte
//! and slices out aligned packets once alignment is confirmed; `ts_check`
//! takes packets already believed aligned, rejects ones that have lost
//! sync, and flags a continuity-counter discontinuity per PID.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use upipe_core::error::{UpipeError, UpipeResult};
use upipe_core::helpers::output::{OutputAction, OutputHelper};
use upipe_core::helpers::sync::SyncHelper;
use upipe_core::ubuf::{BlockUbuf, Ubuf};
use upipe_core::upipe::{SharedUpipe, Upipe, UpipeCommand, UpipeMgr, UpipeResponse};
use upipe_core::uprobe::{PipeId, UprobeChain};
use upipe_core::uref::Uref;

use crate::flowdef::{FLOW_DEF_MPEGTS, FLOW_DEF_MPEGTS_ALIGNED};
use crate::packet::{TS_PACKET_SIZE, TS_PID_NULL, TS_SYNC_BYTE};

fn next_pipe_id() -> PipeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    PipeId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Number of consecutive sync bytes 188 bytes apart required before a
/// candidate offset is accepted as real alignment, guarding against an
/// `0x47` byte occurring by chance inside payload data.
const SYNC_CONFIRM_PACKETS: usize = 3;

/// `ts_sync`: accumulates raw bytes, finds the 188-byte-periodic sync
/// pattern, and emits one uref per aligned packet.
pub struct TsSyncPipe {
    id: PipeId,
    probes: UprobeChain,
    output: OutputHelper,
    buffer: Vec<u8>,
    resyncs: u64,
    /// Throws `SYNC_ACQUIRED`/`SYNC_LOST` on transitions only.
    sync: SyncHelper,
}

impl TsSyncPipe {
    #[must_use]
    pub fn new(probes: UprobeChain) -> Self {
        let mut pipe =
            Self { id: next_pipe_id(), probes, output: OutputHelper::new(), buffer: Vec::new(), resyncs: 0, sync: SyncHelper::new() };
        pipe.output.store_flow_def({
            let mut def = Uref::new_control();
            def.set_flow_def(FLOW_DEF_MPEGTS_ALIGNED);
            def
        });
        pipe.throw_ready();
        pipe
    }

    #[must_use]
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    pub fn set_output(&mut self, id: PipeId, pipe: SharedUpipe) {
        if self.output.set_output(id, pipe) {
            for uref in self.output.drain() {
                self.deliver_uref(uref);
            }
        }
    }

    fn find_sync(&self) -> Option<usize> {
        let needed = TS_PACKET_SIZE * SYNC_CONFIRM_PACKETS;
        if self.buffer.len() < needed {
            return None;
        }
        (0..=self.buffer.len() - needed).find(|&start| {
            (0..SYNC_CONFIRM_PACKETS).all(|k| self.buffer[start + k * TS_PACKET_SIZE] == TS_SYNC_BYTE)
        })
    }

    fn deliver(&mut self, packet: Vec<u8>) {
        let uref = Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(packet)));
        self.deliver_uref(uref);
    }

    fn deliver_uref(&mut self, uref: Uref) {
        if let OutputAction::Deliver(uref) = self.output.output_uref(uref) {
            if let Some((_, out)) = self.output.output() {
                out.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref);
            }
        }
    }

    fn process(&mut self) {
        let Some(start) = self.find_sync() else {
            self.sync.update(self.id, &self.probes, false);
            // Keep only enough of the tail to detect alignment once more
            // data arrives; anything older can never be part of a still
            // undetected sync window.
            let keep = TS_PACKET_SIZE * SYNC_CONFIRM_PACKETS;
            if self.buffer.len() > keep {
                let drop_to = self.buffer.len() - keep + 1;
                self.buffer.drain(..drop_to);
            }
            return;
        };
        self.sync.update(self.id, &self.probes, true);
        if start > 0 {
            self.resyncs += 1;
            tracing::debug!(pipe = self.id.0, skipped = start, "ts_sync found sync after skipping garbage bytes");
            self.buffer.drain(..start);
        }
        while self.buffer.len() >= TS_PACKET_SIZE && self.buffer[0] == TS_SYNC_BYTE {
            let packet: Vec<u8> = self.buffer.drain(..TS_PACKET_SIZE).collect();
            self.deliver(packet);
        }
    }
}

impl Upipe for TsSyncPipe {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "ts_sync"
    }

    fn probes(&self) -> &UprobeChain {
        &self.probes
    }

    fn probes_mut(&mut self) -> &mut UprobeChain {
        &mut self.probes
    }

    fn control(&mut self, cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
        match cmd {
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
        let Some(block) = uref.ubuf().and_then(Ubuf::as_block) else {
            tracing::warn!(pipe = self.id.0, "ts_sync received a non-block uref, dropping");
            return;
        };
        let size = block.size();
        if let Some(bytes) = block.read(0, size) {
            self.buffer.extend_from_slice(&bytes);
        }
        self.process();
    }
}

pub struct TsSyncMgr;

impl UpipeMgr for TsSyncMgr {
    fn name(&self) -> &'static str {
        "ts_sync"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(Mutex::new(TsSyncPipe::new(probes))))
    }
}

/// `ts_check`: validates packets believed already aligned (flow def
/// `block.mpegts.`), rejecting any whose sync byte is missing and flagging
/// a discontinuity uref attribute whenever a PID's continuity counter
/// skips.
pub struct TsCheckPipe {
    id: PipeId,
    probes: UprobeChain,
    output: OutputHelper,
    expected_cc: HashMap<u16, u8>,
    rejected: u64,
    /// Throws `SYNC_ACQUIRED`/`SYNC_LOST` on transitions only.
    sync: SyncHelper,
}

impl TsCheckPipe {
    #[must_use]
    pub fn new(probes: UprobeChain) -> Self {
        let mut pipe = Self {
            id: next_pipe_id(),
            probes,
            output: OutputHelper::new(),
            expected_cc: HashMap::new(),
            rejected: 0,
            sync: SyncHelper::new(),
        };
        pipe.output.store_flow_def({
            let mut def = Uref::new_control();
            def.set_flow_def(FLOW_DEF_MPEGTS_ALIGNED);
            def
        });
        pipe.throw_ready();
        pipe
    }

    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn set_output(&mut self, id: PipeId, pipe: SharedUpipe) {
        if self.output.set_output(id, pipe) {
            for uref in self.output.drain() {
                self.deliver(uref);
            }
        }
    }

    fn deliver(&mut self, uref: Uref) {
        if let OutputAction::Deliver(uref) = self.output.output_uref(uref) {
            if let Some((_, out)) = self.output.output() {
                out.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref);
            }
        }
    }
}

impl Upipe for TsCheckPipe {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "ts_check"
    }

    fn probes(&self) -> &UprobeChain {
        &self.probes
    }

    fn probes_mut(&mut self) -> &mut UprobeChain {
        &mut self.probes
    }

    fn control(&mut self, cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
        match cmd {
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
        let Some(header) = uref.ubuf().and_then(Ubuf::as_block).and_then(|block| {
            let size = block.size();
            block.read(0, size).and_then(|bytes| crate::packet::parse_header(&bytes))
        }) else {
            self.rejected += 1;
            self.sync.update(self.id, &self.probes, false);
            tracing::warn!(pipe = self.id.0, "ts_check rejected a packet with no valid TS header");
            return;
        };
        self.sync.update(self.id, &self.probes, true);

        if header.pid != TS_PID_NULL && header.payload_present {
            let expected = self.expected_cc.get(&header.pid).copied();
            if let Some(expected) = expected {
                if expected != header.continuity_counter {
                    uref.set_discontinuity();
                    tracing::debug!(pipe = self.id.0, pid = header.pid, "continuity counter discontinuity");
                }
            }
            self.expected_cc.insert(header.pid, (header.continuity_counter + 1) & 0x0F);
        }

        self.deliver(uref);
    }
}

pub struct TsCheckMgr;

impl UpipeMgr for TsCheckMgr {
    fn name(&self) -> &'static str {
        "ts_check"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(Mutex::new(TsCheckPipe::new(probes))))
    }
}

#[must_use]
pub fn raw_flow_def() -> Uref {
    let mut def = Uref::new_control();
    def.set_flow_def(FLOW_DEF_MPEGTS);
    def
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use upipe_core::uprobe::{FnProbe, ProbeStatus, UprobeEvent};

    struct Recorder(Vec<Uref>);
    impl Upipe for Recorder {
        fn id(&self) -> PipeId {
            PipeId(300)
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

    fn packet(pid: u16, cc: u8) -> Vec<u8> {
        let mut p = vec![0xFFu8; TS_PACKET_SIZE];
        p[0] = TS_SYNC_BYTE;
        p[1] = ((pid >> 8) as u8) & 0x1F;
        p[2] = (pid & 0xFF) as u8;
        p[3] = 0x10 | (cc & 0x0F);
        p
    }

    #[test]
    fn finds_alignment_after_leading_garbage() {
        let mut sync = TsSyncPipe::new(UprobeChain::new());
        let sink = Arc::new(Mutex::new(Recorder(Vec::new())));
        sync.output.set_output(PipeId(1), sink.clone());

        let mut raw = vec![0xAA, 0xBB, 0xCC]; // garbage before alignment
        raw.extend(packet(0, 0));
        raw.extend(packet(0, 1));
        raw.extend(packet(0, 2));
        sync.input(Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(raw))));

        assert_eq!(sync.resyncs(), 1);
        assert_eq!(sink.lock().unwrap().0.len(), 3);
    }

    #[test]
    fn flags_discontinuity_on_continuity_counter_jump() {
        let mut check = TsCheckPipe::new(UprobeChain::new());
        let sink = Arc::new(Mutex::new(Recorder(Vec::new())));
        check.output.set_output(PipeId(1), sink.clone());

        check.input(Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(packet(100, 0)))));
        check.input(Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(packet(100, 5))))); // skipped ahead

        let urefs = &sink.lock().unwrap().0;
        assert!(!urefs[0].has_discontinuity());
        assert!(urefs[1].has_discontinuity());
    }

    fn sync_transition_probe() -> (UprobeChain, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let acquired = Arc::new(AtomicUsize::new(0));
        let lost = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&acquired);
        let l = Arc::clone(&lost);
        let chain = UprobeChain::new().with(Arc::new(FnProbe(move |_pipe, event: &UprobeEvent| {
            match event {
                UprobeEvent::SyncAcquired => {
                    a.fetch_add(1, Ordering::SeqCst);
                }
                UprobeEvent::SyncLost => {
                    l.fetch_add(1, Ordering::SeqCst);
                }
                _ => return ProbeStatus::Unhandled,
            }
            ProbeStatus::Handled
        })));
        (chain, acquired, lost)
    }

    #[test]
    fn ts_sync_throws_sync_acquired_once_alignment_is_found() {
        let (probes, acquired, lost) = sync_transition_probe();
        let mut sync = TsSyncPipe::new(probes);
        let sink = Arc::new(Mutex::new(Recorder(Vec::new())));
        sync.output.set_output(PipeId(1), sink.clone());

        let mut raw = vec![0xAA, 0xBB, 0xCC];
        raw.extend(packet(0, 0));
        sync.input(Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(raw))));

        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(lost.load(Ordering::SeqCst), 0);

        // Further aligned input shouldn't re-fire the transition event.
        sync.input(Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(packet(0, 1)))));
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ts_sync_throws_sync_lost_while_garbage_has_no_confirmed_alignment() {
        let (probes, acquired, lost) = sync_transition_probe();
        let mut sync = TsSyncPipe::new(probes);
        let sink = Arc::new(Mutex::new(Recorder(Vec::new())));
        sync.output.set_output(PipeId(1), sink.clone());

        sync.input(Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(vec![0xAA, 0xBB, 0xCC]))));

        assert_eq!(lost.load(Ordering::SeqCst), 1);
        assert_eq!(acquired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ts_check_throws_sync_lost_on_a_packet_with_no_valid_header() {
        let (probes, acquired, lost) = sync_transition_probe();
        let mut check = TsCheckPipe::new(probes);
        let sink = Arc::new(Mutex::new(Recorder(Vec::new())));
        check.output.set_output(PipeId(1), sink.clone());

        check.input(Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(packet(100, 0)))));
        assert_eq!(acquired.load(Ordering::SeqCst), 1);

        check.input(Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(vec![0x00; TS_PACKET_SIZE]))));
        assert_eq!(lost.load(Ordering::SeqCst), 1);
    }
}
