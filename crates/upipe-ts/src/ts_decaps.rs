// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `ts_decaps`: reassembles one elementary stream's PES packets from its
//! TS packets and hands the raw PES bytes to `pes_decaps`, which strips
//! the PES header and stamps PTS/DTS.
//!
//! Both stages are exposed as one pipe here since a PES packet's payload
//! never needs to be observed before its header is stripped — keeping them
//! separate would only add an extra `Arc<Mutex<_>>` hop per ES packet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use upipe_core::error::{UpipeError, UpipeResult};
use upipe_core::helpers::output::{OutputAction, OutputHelper};
use upipe_core::ubuf::{BlockUbuf, Ubuf};
use upipe_core::upipe::{SharedUpipe, Upipe, UpipeCommand, UpipeMgr, UpipeResponse};
use upipe_core::uprobe::{PipeId, UprobeChain, UprobeEvent};
use upipe_core::uref::Uref;

use crate::clock::ProgramClock;
use crate::flowdef::FLOW_DEF_MPEGTSPES;
use crate::packet::{parse_header, payload_offset, read_pcr};
use crate::pes::parse_pes_header;

fn next_pipe_id() -> PipeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    PipeId(NEXT.fetch_add(1, Ordering::Relaxed))
}

pub struct TsDecapsPipe {
    id: PipeId,
    probes: UprobeChain,
    output: OutputHelper,
    clock: Arc<Mutex<ProgramClock>>,
    pending: Vec<u8>,
    started: bool,
    /// Per-ES override of the DTS trust window; defaults to 1 s if unset.
    max_delay: Option<u64>,
    /// Latest `rap_sys` seen on an input TS packet (stamped upstream by a
    /// `setrap` kept in sync with the program's PMT), carried forward onto
    /// each reassembled PES access unit since building it from raw bytes
    /// would otherwise drop every uref attribute the input packets carried.
    rap_sys: Option<u64>,
    /// Set by the demux bin when the program's PMT carries no PCR pid
    /// (`pcr_pid == 8191`): this ES's own DTS then drives the program
    /// clock the way a real PCR would (spec.md §4.7 program sub-pipe step
    /// 2, "if absent/8191, treats DTS as PCR").
    treat_dts_as_pcr: bool,
}

impl TsDecapsPipe {
    #[must_use]
    pub fn new(probes: UprobeChain, clock: Arc<Mutex<ProgramClock>>) -> Self {
        let mut pipe = Self {
            id: next_pipe_id(),
            probes,
            output: OutputHelper::new(),
            clock,
            pending: Vec::new(),
            started: false,
            max_delay: None,
            rap_sys: None,
            treat_dts_as_pcr: false,
        };
        pipe.output.store_flow_def({
            let mut def = Uref::new_control();
            def.set_flow_def(FLOW_DEF_MPEGTSPES);
            def
        });
        pipe.throw_ready();
        pipe
    }

    /// Override the default DTS trust window for this ES.
    pub fn set_max_delay(&mut self, max_delay: u64) {
        self.max_delay = Some(max_delay);
    }

    /// Set by the demux bin for every ES of a program whose PMT carries no
    /// PCR pid (`pcr_pid == 8191`): this ES's DTS then drives the program
    /// clock via [`ProgramClock::update_pcr`], the way
    /// `upipe_ts_demux_output_clock_ts` treats `program->pcr_pid == 8191`
    /// in the original.
    pub fn set_treat_dts_as_pcr(&mut self, treat: bool) {
        self.treat_dts_as_pcr = treat;
    }

    /// Bind this pipe's single output, the way every other `upipe-ts` pipe
    /// does via its `OUTPUT` helper — exposed as an inherent method, not a
    /// generic `control` command, since a demux bin wires its ES outputs
    /// to concrete `TsDecapsPipe` handles it already holds.
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

    fn finalize_pending(&mut self) {
        if !self.started || self.pending.is_empty() {
            return;
        }
        let bytes = std::mem::take(&mut self.pending);
        let Some(header) = parse_pes_header(&bytes) else {
            tracing::warn!(pipe = self.id.0, "pes_decaps dropped a packet with a malformed PES header");
            return;
        };
        if header.payload_offset > bytes.len() {
            return;
        }
        let payload = bytes[header.payload_offset..].to_vec();
        let mut uref = Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(payload)));
        uref.set_flow_def(FLOW_DEF_MPEGTSPES);
        if let Some(rap_sys) = self.rap_sys {
            uref.set_rap_sys(rap_sys);
        }
        let mut clock = self.clock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(pts) = header.pts {
            uref.set_pts_orig(clock.reconstruct(pts));
        }
        let mut clock_ref = None;
        if let Some(dts) = header.dts {
            let dts_orig = clock.reconstruct(dts);
            uref.set_dts_orig(dts_orig);
            if self.treat_dts_as_pcr {
                clock_ref = Some(clock.update_pcr(dts_orig, false));
            }
            if let Some(dts_prog) = clock.dts_prog(dts_orig, self.max_delay) {
                uref.set_dts_prog(dts_prog);
            }
        }
        drop(clock);
        if let Some(clock_ref) = clock_ref {
            if clock_ref.discontinuity {
                tracing::debug!(pipe = self.id.0, "PCR discontinuity on this program's reference PID (DTS-as-PCR)");
            }
            self.throw(&UprobeEvent::ClockRef { uref_pts: clock_ref.program_time, discontinuity: clock_ref.discontinuity });
        }
        self.deliver(uref);
    }
}

impl Upipe for TsDecapsPipe {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "ts_decaps"
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
        if let Some(rap_sys) = uref.rap_sys() {
            self.rap_sys = Some(rap_sys);
        }
        let Some(block) = uref.ubuf().and_then(Ubuf::as_block) else {
            tracing::warn!(pipe = self.id.0, "ts_decaps received a non-block uref, dropping");
            return;
        };
        let size = block.size();
        let Some(bytes) = block.read(0, size) else { return };
        let Some(header) = parse_header(&bytes) else {
            tracing::warn!(pipe = self.id.0, "ts_decaps received a malformed TS packet, dropping");
            return;
        };
        if let Some(pcr) = read_pcr(&bytes, &header) {
            let clock_ref = self
                .clock
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .update_pcr(pcr, header.discontinuity_indicator);
            if clock_ref.discontinuity {
                tracing::debug!(pipe = self.id.0, "PCR discontinuity on this program's reference PID");
            }
            self.throw(&UprobeEvent::ClockRef { uref_pts: clock_ref.program_time, discontinuity: clock_ref.discontinuity });
        }
        let Some(offset) = payload_offset(&bytes, &header) else { return };
        if !header.payload_present {
            return;
        }
        let payload = &bytes[offset..];

        if header.payload_unit_start {
            self.finalize_pending();
            self.started = true;
            self.pending.clear();
        }
        if self.started {
            self.pending.extend_from_slice(payload);
        }
    }
}

pub struct TsDecapsMgr {
    pub clock: Arc<Mutex<ProgramClock>>,
}

impl UpipeMgr for TsDecapsMgr {
    fn name(&self) -> &'static str {
        "ts_decaps"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(Mutex::new(TsDecapsPipe::new(probes, Arc::clone(&self.clock)))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{TS_PACKET_SIZE, TS_SYNC_BYTE};

    struct Recorder(Vec<Uref>);
    impl Upipe for Recorder {
        fn id(&self) -> PipeId {
            PipeId(400)
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

    fn pes_packet_with_pts(pts: u64, payload: &[u8]) -> Vec<u8> {
        let mut pes = vec![0, 0, 1, 0xE0, 0, 0, 0x80, 0x80, 5];
        let b0 = 0x20 | (((pts >> 29) & 0x0E) as u8) | 1;
        let b1 = ((pts >> 22) & 0xFF) as u8;
        let b2 = ((((pts >> 14) & 0xFE) as u8)) | 1;
        let b3 = ((pts >> 7) & 0xFF) as u8;
        let b4 = (((pts << 1) & 0xFE) as u8) | 1;
        pes.extend_from_slice(&[b0, b1, b2, b3, b4]);
        pes.extend_from_slice(payload);
        pes
    }

    fn encode_timestamp(marker: u8, value: u64) -> [u8; 5] {
        let b0 = (marker << 4) | (((value >> 29) & 0x0E) as u8) | 1;
        let b1 = ((value >> 22) & 0xFF) as u8;
        let b2 = ((((value >> 14) & 0xFE) as u8)) | 1;
        let b3 = ((value >> 7) & 0xFF) as u8;
        let b4 = (((value << 1) & 0xFE) as u8) | 1;
        [b0, b1, b2, b3, b4]
    }

    fn pes_packet_with_pts_and_dts(pts: u64, dts: u64, payload: &[u8]) -> Vec<u8> {
        let mut pes = vec![0, 0, 1, 0xE0, 0, 0, 0x80, 0xC0, 10];
        pes.extend_from_slice(&encode_timestamp(0b0011, pts));
        pes.extend_from_slice(&encode_timestamp(0b0001, dts));
        pes.extend_from_slice(payload);
        pes
    }

    fn ts_packet(pid: u16, pusi: bool, payload: &[u8]) -> Uref {
        let mut p = vec![0xFFu8; TS_PACKET_SIZE];
        p[0] = TS_SYNC_BYTE;
        p[1] = (if pusi { 0x40 } else { 0 }) | (((pid >> 8) as u8) & 0x1F);
        p[2] = (pid & 0xFF) as u8;
        p[3] = 0x10;
        let n = payload.len().min(184);
        p[4..4 + n].copy_from_slice(&payload[..n]);
        Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(p)))
    }

    #[test]
    fn reassembles_one_pes_packet_spanning_two_ts_packets_and_stamps_pts() {
        let clock = Arc::new(Mutex::new(ProgramClock::new()));
        let mut decaps = TsDecapsPipe::new(UprobeChain::new(), clock);
        let sink = Arc::new(Mutex::new(Recorder(Vec::new())));
        decaps.output.set_output(PipeId(1), sink.clone());

        let pes = pes_packet_with_pts(180_000, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let (first, second) = pes.split_at(14);

        decaps.input(ts_packet(256, true, first));
        decaps.input(ts_packet(256, false, second));
        // next PUSI packet flushes the previous PES packet
        decaps.input(ts_packet(256, true, &[0, 0, 1, 0xE0, 0, 0, 0x80, 0x00, 0]));

        let urefs = &sink.lock().unwrap().0;
        assert_eq!(urefs.len(), 1);
        assert_eq!(urefs[0].pts_orig(), Some(180_000));
    }

    #[test]
    fn carries_the_latest_rap_sys_onto_the_reassembled_pes_packet() {
        let clock = Arc::new(Mutex::new(ProgramClock::new()));
        let mut decaps = TsDecapsPipe::new(UprobeChain::new(), clock);
        let sink = Arc::new(Mutex::new(Recorder(Vec::new())));
        decaps.output.set_output(PipeId(1), sink.clone());

        let pes = pes_packet_with_pts(180_000, &[1, 2, 3, 4]);
        let mut first = ts_packet(256, true, &pes);
        first.set_rap_sys(42);
        decaps.input(first);
        decaps.input(ts_packet(256, true, &[0, 0, 1, 0xE0, 0, 0, 0x80, 0x00, 0]));

        let urefs = &sink.lock().unwrap().0;
        assert_eq!(urefs.len(), 1);
        assert_eq!(urefs[0].rap_sys(), Some(42));
    }

    #[test]
    fn treat_dts_as_pcr_drives_the_program_clock_from_this_ess_own_dts() {
        let clock = Arc::new(Mutex::new(ProgramClock::new()));
        let mut decaps = TsDecapsPipe::new(UprobeChain::new(), Arc::clone(&clock));
        decaps.set_treat_dts_as_pcr(true);
        let sink = Arc::new(Mutex::new(Recorder(Vec::new())));
        decaps.output.set_output(PipeId(1), sink.clone());

        assert!(clock.lock().unwrap().last_pcr().is_none());

        let pes = pes_packet_with_pts_and_dts(180_000, 180_000, &[1, 2, 3, 4]);
        decaps.input(ts_packet(256, true, &pes));
        decaps.input(ts_packet(256, true, &[0, 0, 1, 0xE0, 0, 0, 0x80, 0x00, 0]));

        assert!(clock.lock().unwrap().last_pcr().is_some());
        let urefs = &sink.lock().unwrap().0;
        assert_eq!(urefs.len(), 1);
        assert_eq!(urefs[0].dts_orig(), Some(180_000));
    }
}
