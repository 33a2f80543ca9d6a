// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `ts_demux`: the bin that wires `ts_split`, `psi_pid`-shared PSI chains,
//! and per-program/per-ES decapsulation into one program-aware demuxer.
//!
//! PSI decoders run inside small sink pipes that push a [`DemuxEvent`]
//! onto a shared queue instead of calling back into the bin directly: the
//! bin's own `Mutex` is already held by whichever thread is inside
//! `DemuxBin::input`, and a PSI sink's `input()` runs on that same call
//! stack (through `ts_split` → `ts_psi_merge` → `ts_psi_split`), so a
//! direct callback would self-deadlock. Draining the queue after the
//! forwarding call returns avoids that without any unsafe re-entrancy
//! tricks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use upipe_core::error::{UpipeError, UpipeResult};
use upipe_core::helpers::bin::BinHelper;
use upipe_core::upipe::{SharedUpipe, Upipe, UpipeCommand, UpipeMgr, UpipeResponse};
use upipe_core::udict::Udict;
use upipe_core::uprobe::{PipeId, UprobeChain, UprobeEvent};
use upipe_core::uref::Uref;

use crate::ca::{SharedEmmDecoder, CA_SYSTEM_BISS};
use crate::clock::ProgramClock;
use crate::psi::{filter_table_id, psi_split_alloc_sub, section_from_uref, PsiMergeMgr, PsiPidTable, PsiSplitMgr};
use crate::tables::{
    decode_cat, decode_eit, decode_nit, decode_pat, decode_pmt, decode_sdt, decode_tdt, find_ca_descriptors, guess_conformance,
    CaDescriptor, Conformance, DvbTime, Eit, NitTransportStream, PatEntry, Pmt, SdtService,
};
use crate::flowdef::{pmt_stream_flow_def, FLOW_DEF_MPEGTS, FLOW_DEF_MPEGTS_ALIGNED};
use crate::sync::{TsCheckPipe, TsSyncPipe};
use crate::packet::TS_PID_NULL;
use crate::ts_decaps::TsDecapsPipe;
use crate::ts_split::{alloc_sub, flow_def_for_pid, free_sub, TsSplitMgr};
use upipe_core::uclock::Uclock;
use upipe_modules::idem::IdemPipe;
use upipe_modules::null::NullPipe;
use upipe_modules::setrap::{set_rap, SetrapPipe};

pub const FAMILY: &str = "ts_demux";

const TABLE_ID_PAT: u8 = 0x00;
const TABLE_ID_CAT: u8 = 0x01;
const TABLE_ID_PMT: u8 = 0x02;
const TABLE_ID_SDT_ACTUAL: u8 = 0x42;
const TABLE_ID_TDT: u8 = 0x70;
const TABLE_ID_EIT_PRESENT_FOLLOWING_ACTUAL: u8 = 0x4E;
const TABLE_ID_EIT_SCHEDULE_ACTUAL_BASE: u8 = 0x50;
const TABLE_ID_NIT_ACTUAL: u8 = 0x40;
const PID_CAT: u16 = 0x01;
const PID_SDT: u16 = 0x11;
const PID_EIT: u16 = 0x12;
const PID_TDT: u16 = 0x14;
const PID_NIT: u16 = 0x10;
/// Number of `eitsd[n]` schedule sub-decoders, one per `table_id`
/// `0x50 + n` (spec.md §4.7 inner topology: `0 ≤ n < 16`).
const EIT_SCHEDULE_COUNT: u8 = 16;

fn next_pipe_id() -> PipeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    PipeId(NEXT.fetch_add(1, Ordering::Relaxed))
}

enum DemuxEvent {
    Pat(Vec<PatEntry>),
    Cat(Vec<CaDescriptor>),
    Pmt { program_number: u16, pmt: Pmt },
    Sdt(Vec<SdtService>),
    Tdt(DvbTime),
    Nit { network_id: u16, entries: Vec<NitTransportStream> },
    Eit(Eit),
    EitSchedule(Eit),
    Emm(Vec<u8>),
    Ecm { program_number: u16, section: Vec<u8> },
    SourceEnd,
}

/// Family-private event payload announcing a newly decoded program.
#[derive(Debug, Clone, Copy)]
pub struct NewProgram {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// Family-private event announcing a newly available elementary stream,
/// carrying the `ts_decaps` handle the application wires its sink onto.
pub struct NewEsStream {
    pub program_number: u16,
    pub pid: u16,
    pub stream_type: u8,
    pub decaps: Arc<Mutex<TsDecapsPipe>>,
}

fn new_program_event(program_number: u16, pmt_pid: u16) -> UprobeEvent {
    UprobeEvent::Local(FAMILY, "NEW_PROGRAM", Arc::new(NewProgram { program_number, pmt_pid }))
}

fn new_es_event(es: NewEsStream) -> UprobeEvent {
    UprobeEvent::Local(FAMILY, "NEW_ES", Arc::new(es))
}

/// A queue-pushing sink used for every PSI table this bin decodes itself;
/// generic over what it decodes into a [`DemuxEvent`].
struct PsiSink<F> {
    id: PipeId,
    events: Arc<Mutex<VecDeque<DemuxEvent>>>,
    decode: F,
}

impl<F> Upipe for PsiSink<F>
where
    F: Fn(&crate::psi::Section) -> Option<DemuxEvent> + Send,
{
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "ts_demux_psi_sink"
    }

    fn probes(&self) -> &UprobeChain {
        unimplemented!("internal sink, never consulted for probes")
    }

    fn probes_mut(&mut self) -> &mut UprobeChain {
        unimplemented!("internal sink, never consulted for probes")
    }

    fn control(&mut self, _cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
        Ok(UpipeResponse::Unit)
    }

    fn input(&mut self, uref: Uref) {
        let Some(section) = section_from_uref(&uref) else { return };
        if let Some(event) = (self.decode)(&section) {
            self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push_back(event);
        }
    }
}

struct ProgramState {
    pmt_pid: u16,
    clock: Arc<Mutex<ProgramClock>>,
    es_streams: HashMap<u16, NewEsStream>,
    /// One `setrap` spliced ahead of each ES's `ts_decaps`, restamped on
    /// every PMT update so each output packet's `rap_sys` tracks the
    /// program's current random-access point rather than going stale.
    setraps: HashMap<u16, Arc<Mutex<SetrapPipe>>>,
    /// ECM pid currently subscribed for this program's CA descriptor, if
    /// scrambled.
    ecm_pid: Option<u16>,
    /// This program's PMT's `pcr_pid`, as of the last PMT seen.
    /// `TS_PID_NULL` means absent (spec.md §4.7 program sub-pipe step 2).
    pcr_pid: u16,
    /// A dedicated `ts_decaps` wired on `pcr_pid`, feeding only this
    /// program's clock and discarding its own payload via `null`; only
    /// allocated when `pcr_pid` carries no ES of its own (otherwise that
    /// ES's own decaps already reads the same PCR).
    pcr_decaps: Option<SharedUpipe>,
}

/// The demux bin itself: wires `ts_split`, a `psi_pid`-keyed PAT/PMT/SDT
/// chain, and per-program ES decapsulation into one pipe.
pub struct DemuxBin {
    id: PipeId,
    probes: UprobeChain,
    bin: BinHelper,
    ts_split: SharedUpipe,
    psi_pid: PsiPidTable,
    psi_merge_mgr: PsiMergeMgr,
    psi_split_mgr: PsiSplitMgr,
    events: Arc<Mutex<VecDeque<DemuxEvent>>>,
    programs: HashMap<u16, ProgramState>,
    conformance: Conformance,
    sdt_subscribed: bool,
    tdt_subscribed: bool,
    nit_subscribed: bool,
    eit_psi_split: Option<SharedUpipe>,
    /// The shared `psi_pid(EIT)` handle all 16 `eitsd[n]` schedule
    /// sub-decoders are registered on, `None` until
    /// [`DemuxBin::enable_eits`] is called.
    eits_psi_split: Option<SharedUpipe>,
    current_time: Option<DvbTime>,
    services: HashMap<u16, SdtService>,
    /// Latest present/following EIT decoded per service id.
    eit: HashMap<u16, Eit>,
    /// Latest schedule EIT decoded per service id, merged across whichever
    /// `eitsd[n]` last reported that service (schedule tables are not
    /// ordered by service, only by segment).
    eit_schedule: HashMap<u16, Eit>,
    /// Latest NIT decoded: `(network_id, transport streams)`.
    nit: Option<(u16, Vec<NitTransportStream>)>,
    /// Set once a caller calls [`DemuxBin::set_conformance`]; disables
    /// further auto-detection from the PAT's NIT pid field.
    conformance_manual: bool,
    /// Pluggable key-recovery backend; `None` means sections are routed
    /// but nothing acts on them.
    emm_decoder: Option<SharedEmmDecoder>,
    /// EMM pid currently subscribed from the CAT's BISS-CA descriptor.
    emm_pid: Option<u16>,
    /// Source of each ES's `rap_sys` stamp.
    clock: Uclock,
    /// The input-stage pipe chosen from the first `SET_FLOW_DEF` this bin
    /// receives. `None` until then, in which case `input()` feeds
    /// `ts_split` directly — the same behavior as `idem`, for callers that
    /// never negotiate a flow def and simply push already-aligned packets.
    front: Option<SharedUpipe>,
}

impl DemuxBin {
    /// Builds the bin and immediately subscribes PAT (PID 0), the one
    /// table every conformance (ISO, DVB, ATSC) carries.
    #[must_use]
    pub fn new(probes: UprobeChain) -> Self {
        let ts_split: SharedUpipe = TsSplitMgr.alloc(UprobeChain::new()).expect("ts_split never fails to allocate");
        let mut bin = BinHelper::new();
        bin.set_first_inner(Arc::clone(&ts_split));

        let mut demux = Self {
            id: next_pipe_id(),
            probes,
            bin,
            ts_split,
            psi_pid: PsiPidTable::new(Arc::clone(&Self::placeholder())),
            psi_merge_mgr: PsiMergeMgr,
            psi_split_mgr: PsiSplitMgr,
            events: Arc::new(Mutex::new(VecDeque::new())),
            programs: HashMap::new(),
            conformance: Conformance::DvbNoTables,
            sdt_subscribed: false,
            tdt_subscribed: false,
            nit_subscribed: false,
            eit_psi_split: None,
            eits_psi_split: None,
            current_time: None,
            services: HashMap::new(),
            eit: HashMap::new(),
            eit_schedule: HashMap::new(),
            nit: None,
            conformance_manual: false,
            emm_decoder: None,
            emm_pid: None,
            clock: Uclock::monotonic(),
            front: None,
        };
        // psi_pid needs the real ts_split handle, which only exists once
        // `demux` itself is constructed; fix it up now that both exist.
        demux.psi_pid = PsiPidTable::new(Arc::clone(&demux.ts_split));
        demux.subscribe_pat();
        demux.subscribe_cat();
        demux.throw_ready();
        demux
    }

    /// Configure the key-recovery backend BISS-CA sections are routed to.
    /// Sections already observed before this call are not replayed.
    pub fn set_emm_decoder(&mut self, decoder: SharedEmmDecoder) {
        self.emm_decoder = Some(decoder);
    }

    /// Override the clock each ES's `setrap` reads `rap_sys` from —
    /// offline (file-to-file) pipelines want a manual clock tracking the
    /// stream's own reconstructed time rather than wall time.
    pub fn set_clock(&mut self, clock: Uclock) {
        self.clock = clock;
    }

    /// Never actually used as a `ts_split`: only exists so `PsiPidTable`
    /// can be constructed once before the bin's real one is ready, and is
    /// immediately replaced. Kept as a tiny named helper rather than
    /// `unsafe` uninitialized memory or an `Option` threaded through every
    /// field access.
    fn placeholder() -> SharedUpipe {
        TsSplitMgr.alloc(UprobeChain::new()).expect("ts_split never fails to allocate")
    }

    fn subscribe_pat(&mut self) {
        let psi_split = self
            .psi_pid
            .use_pid(0, &self.psi_merge_mgr, &self.psi_split_mgr)
            .expect("PID 0 is always available for subscription");
        let (filter, mask) = filter_table_id(TABLE_ID_PAT);
        let events = Arc::clone(&self.events);
        let sink: SharedUpipe = Arc::new(Mutex::new(PsiSink {
            id: next_pipe_id(),
            events,
            decode: |section: &crate::psi::Section| decode_pat(section).ok().map(DemuxEvent::Pat),
        }));
        psi_split
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .control(psi_split_alloc_sub(filter, mask, sink))
            .expect("psi_split always accepts AllocSub");
    }

    fn subscribe_cat(&mut self) {
        let psi_split = self
            .psi_pid
            .use_pid(PID_CAT, &self.psi_merge_mgr, &self.psi_split_mgr)
            .expect("PID 1 is always available for subscription");
        let (filter, mask) = filter_table_id(TABLE_ID_CAT);
        let events = Arc::clone(&self.events);
        let sink: SharedUpipe = Arc::new(Mutex::new(PsiSink {
            id: next_pipe_id(),
            events,
            decode: |section: &crate::psi::Section| decode_cat(section).ok().map(DemuxEvent::Cat),
        }));
        let _ = psi_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(psi_split_alloc_sub(filter, mask, sink));
    }

    fn subscribe_sdt(&mut self) {
        if self.sdt_subscribed {
            return;
        }
        self.sdt_subscribed = true;
        let Ok(psi_split) = self.psi_pid.use_pid(PID_SDT, &self.psi_merge_mgr, &self.psi_split_mgr) else { return };
        let (filter, mask) = filter_table_id(TABLE_ID_SDT_ACTUAL);
        let events = Arc::clone(&self.events);
        let sink: SharedUpipe = Arc::new(Mutex::new(PsiSink {
            id: next_pipe_id(),
            events,
            decode: |section: &crate::psi::Section| decode_sdt(section).ok().map(DemuxEvent::Sdt),
        }));
        let _ = psi_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(psi_split_alloc_sub(filter, mask, sink));
    }

    fn subscribe_tdt(&mut self) {
        if self.tdt_subscribed {
            return;
        }
        self.tdt_subscribed = true;
        let Ok(psi_split) = self.psi_pid.use_pid(PID_TDT, &self.psi_merge_mgr, &self.psi_split_mgr) else { return };
        let (filter, mask) = filter_table_id(TABLE_ID_TDT);
        let events = Arc::clone(&self.events);
        let sink: SharedUpipe = Arc::new(Mutex::new(PsiSink {
            id: next_pipe_id(),
            events,
            decode: |section: &crate::psi::Section| decode_tdt(section).ok().map(DemuxEvent::Tdt),
        }));
        let _ = psi_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(psi_split_alloc_sub(filter, mask, sink));
    }

    fn subscribe_nit(&mut self) {
        if self.nit_subscribed {
            return;
        }
        self.nit_subscribed = true;
        let Ok(psi_split) = self.psi_pid.use_pid(PID_NIT, &self.psi_merge_mgr, &self.psi_split_mgr) else { return };
        let (filter, mask) = filter_table_id(TABLE_ID_NIT_ACTUAL);
        let events = Arc::clone(&self.events);
        let sink: SharedUpipe = Arc::new(Mutex::new(PsiSink {
            id: next_pipe_id(),
            events,
            decode: |section: &crate::psi::Section| decode_nit(section).ok().map(|(network_id, entries)| DemuxEvent::Nit { network_id, entries }),
        }));
        let _ = psi_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(psi_split_alloc_sub(filter, mask, sink));
    }

    /// Turn EIT present/following decoding on. Idle until called — most
    /// applications never need EPG data, and it is one PID's worth of
    /// traffic not worth parsing unconditionally.
    pub fn enable_eit(&mut self) {
        if self.eit_psi_split.is_some() {
            return;
        }
        let Ok(psi_split) = self.psi_pid.use_pid(PID_EIT, &self.psi_merge_mgr, &self.psi_split_mgr) else { return };
        let (filter, mask) = filter_table_id(TABLE_ID_EIT_PRESENT_FOLLOWING_ACTUAL);
        let events = Arc::clone(&self.events);
        let sink: SharedUpipe = Arc::new(Mutex::new(PsiSink {
            id: next_pipe_id(),
            events,
            decode: |section: &crate::psi::Section| decode_eit(section).ok().map(DemuxEvent::Eit),
        }));
        let _ = psi_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(psi_split_alloc_sub(filter, mask, sink));
        self.eit_psi_split = Some(psi_split);
    }

    pub fn disable_eit(&mut self) {
        if self.eit_psi_split.take().is_some() {
            let _ = self.psi_pid.release_pid(PID_EIT);
        }
    }

    /// Turn EIT schedule decoding on: one `eitsd[n]` sub-decoder per
    /// `table_id` `0x50 + n`, `0 ≤ n < 16` (spec.md §4.7 inner topology),
    /// all sharing the EIT pid's `psi_pid` filter chain via `psi_pid_use`.
    pub fn enable_eits(&mut self) {
        if self.eits_psi_split.is_some() {
            return;
        }
        let Ok(shared_psi_split) = self.psi_pid.use_pid(PID_EIT, &self.psi_merge_mgr, &self.psi_split_mgr) else { return };
        for n in 0..EIT_SCHEDULE_COUNT {
            let (filter, mask) = filter_table_id(TABLE_ID_EIT_SCHEDULE_ACTUAL_BASE + n);
            let events = Arc::clone(&self.events);
            let sink: SharedUpipe = Arc::new(Mutex::new(PsiSink {
                id: next_pipe_id(),
                events,
                decode: |section: &crate::psi::Section| decode_eit(section).ok().map(DemuxEvent::EitSchedule),
            }));
            let _ =
                shared_psi_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(psi_split_alloc_sub(filter, mask, sink));
        }
        self.eits_psi_split = Some(shared_psi_split);
    }

    pub fn disable_eits(&mut self) {
        if self.eits_psi_split.take().is_some() {
            let _ = self.psi_pid.release_pid(PID_EIT);
        }
    }

    #[must_use]
    pub fn conformance(&self) -> Conformance {
        self.conformance
    }

    #[must_use]
    pub fn current_time(&self) -> Option<DvbTime> {
        self.current_time
    }

    #[must_use]
    pub fn programs(&self) -> Vec<u16> {
        self.programs.keys().copied().collect()
    }

    #[must_use]
    pub fn service(&self, program_number: u16) -> Option<&SdtService> {
        self.services.get(&program_number)
    }

    /// Latest present/following EIT decoded for `service_id`, if any
    /// (requires [`DemuxBin::enable_eit`] to have been called).
    #[must_use]
    pub fn eit(&self, service_id: u16) -> Option<&Eit> {
        self.eit.get(&service_id)
    }

    /// Latest schedule EIT decoded for `service_id`, if any (requires
    /// [`DemuxBin::enable_eits`] to have been called).
    #[must_use]
    pub fn eit_schedule(&self, service_id: u16) -> Option<&Eit> {
        self.eit_schedule.get(&service_id)
    }

    /// Latest decoded NIT: `(network_id, transport streams)`. Only
    /// populated once conformance is [`Conformance::Dvb`], which subscribes
    /// it alongside SDT/TDT.
    #[must_use]
    pub fn nit(&self) -> Option<&(u16, Vec<NitTransportStream>)> {
        self.nit.as_ref()
    }

    /// Manually pin the conformance and stop auto-detecting it from the PAT.
    pub fn set_conformance(&mut self, conformance: Conformance) {
        self.conformance_manual = true;
        self.apply_conformance(conformance);
    }

    fn apply_conformance(&mut self, conformance: Conformance) {
        if self.conformance == conformance {
            return;
        }
        self.conformance = conformance;
        if conformance == Conformance::Dvb {
            self.subscribe_sdt();
            self.subscribe_tdt();
            self.subscribe_nit();
        }
    }

    fn drain_events(&mut self) {
        loop {
            let event = { self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).pop_front() };
            let Some(event) = event else { break };
            match event {
                DemuxEvent::Pat(entries) => self.handle_pat(entries),
                DemuxEvent::Pmt { program_number, pmt } => self.handle_pmt(program_number, pmt),
                DemuxEvent::Sdt(services) => self.handle_sdt(services),
                DemuxEvent::Tdt(time) => self.current_time = Some(time),
                DemuxEvent::Nit { network_id, entries } => self.nit = Some((network_id, entries)),
                DemuxEvent::Eit(eit) => {
                    self.eit.insert(eit.service_id, eit);
                }
                DemuxEvent::EitSchedule(eit) => {
                    self.eit_schedule.insert(eit.service_id, eit);
                }
                DemuxEvent::Cat(descriptors) => self.handle_cat(descriptors),
                DemuxEvent::Emm(section) => {
                    if let Some(decoder) = &self.emm_decoder {
                        let _ = decoder.lock().unwrap_or_else(std::sync::PoisonError::into_inner).handle_emm(&section);
                    }
                }
                DemuxEvent::Ecm { program_number, section } => {
                    if let Some(decoder) = &self.emm_decoder {
                        let _ =
                            decoder.lock().unwrap_or_else(std::sync::PoisonError::into_inner).handle_ecm(program_number, &section);
                    }
                }
                DemuxEvent::SourceEnd => self.handle_source_end(),
            }
        }
    }

    fn handle_pat(&mut self, entries: Vec<PatEntry>) {
        for entry in entries {
            if entry.program_number == 0 {
                // Not a program: `pid` here is the stream's NIT pid, which
                // drives conformance auto-detection.
                if !self.conformance_manual {
                    self.apply_conformance(guess_conformance(entry.pid));
                }
                continue;
            }
            if self.programs.contains_key(&entry.program_number) {
                continue;
            }
            let Ok(psi_split) = self.psi_pid.use_pid(entry.pid, &self.psi_merge_mgr, &self.psi_split_mgr) else { continue };
            let (filter, mask) = filter_table_id(TABLE_ID_PMT);
            let events = Arc::clone(&self.events);
            let program_number = entry.program_number;
            let sink: SharedUpipe = Arc::new(Mutex::new(PsiSink {
                id: next_pipe_id(),
                events,
                decode: move |section: &crate::psi::Section| {
                    decode_pmt(section).ok().map(|pmt| DemuxEvent::Pmt { program_number, pmt })
                },
            }));
            let _ = psi_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(psi_split_alloc_sub(filter, mask, sink));

            self.programs.insert(
                entry.program_number,
                ProgramState {
                    pmt_pid: entry.pid,
                    clock: Arc::new(Mutex::new(ProgramClock::new())),
                    es_streams: HashMap::new(),
                    setraps: HashMap::new(),
                    ecm_pid: None,
                    pcr_pid: TS_PID_NULL,
                    pcr_decaps: None,
                },
            );
            self.throw(&new_program_event(entry.program_number, entry.pid));
        }
    }

    /// Locate the BISS-CA EMM pid from the CAT's CA descriptors and
    /// subscribe its sections. Re-subscribing on every CAT update is
    /// idempotent: [`PsiPidTable::use_pid`] bumps a refcount
    /// rather than duplicating the filter chain when the pid is unchanged,
    /// but switching to a genuinely new EMM pid still needs an explicit
    /// release of the old one first.
    fn handle_cat(&mut self, descriptors: Vec<CaDescriptor>) {
        let Some(biss) = descriptors.into_iter().find(|d| d.ca_system_id == CA_SYSTEM_BISS && d.dvb_cissa) else { return };
        if self.emm_pid == Some(biss.ca_pid) {
            return;
        }
        if let Some(old_pid) = self.emm_pid.take() {
            let _ = self.psi_pid.release_pid(old_pid);
        }
        let Ok(psi_split) = self.psi_pid.use_pid(biss.ca_pid, &self.psi_merge_mgr, &self.psi_split_mgr) else { return };
        let (filter, mask) = ([0u8; 6], [0u8; 6]); // match every EMM section on this pid, any table_id
        let events = Arc::clone(&self.events);
        let sink: SharedUpipe = Arc::new(Mutex::new(PsiSink {
            id: next_pipe_id(),
            events,
            decode: |section: &crate::psi::Section| Some(DemuxEvent::Emm((*section.bytes).clone())),
        }));
        let _ = psi_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(psi_split_alloc_sub(filter, mask, sink));
        self.emm_pid = Some(biss.ca_pid);
    }

    /// Diffs the previous ES set against a freshly decoded PMT. An ES is
    /// torn down — `SourceEnd` thrown on its own `decaps` pipe, then
    /// dropped — when its PID is no longer listed at all, or when it is
    /// still listed but under a `stream_type` whose derived flow def no
    /// longer matches the one it was created with (so a PMT update that
    /// swaps an ES's codec without changing its PID doesn't silently keep
    /// feeding old-format packets to an output built for the old codec).
    /// An ES whose PID and flow def both carry over just gets its `setrap`
    /// restamped with the program's current `rap_sys`.
    fn handle_pmt(&mut self, program_number: u16, pmt: Pmt) {
        let Some(state) = self.programs.get_mut(&program_number) else { return };
        let new_streams: HashMap<u16, u8> = pmt.streams.iter().map(|s| (s.pid, s.stream_type)).collect();
        let stale: Vec<u16> = state
            .es_streams
            .iter()
            .filter(|(pid, es)| match new_streams.get(pid) {
                None => true,
                Some(&new_stream_type) => {
                    let mut old_def = Udict::new();
                    old_def.set_flow_def(pmt_stream_flow_def(es.stream_type));
                    !old_def.flow_def_matches(&pmt_stream_flow_def(new_stream_type))
                }
            })
            .map(|(&pid, _)| pid)
            .collect();
        for pid in stale {
            if let Some(es) = state.es_streams.remove(&pid) {
                es.decaps.lock().unwrap_or_else(std::sync::PoisonError::into_inner).throw(&UprobeEvent::SourceEnd);
            }
            state.setraps.remove(&pid);
            let _ = self.ts_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(free_sub(pid));
        }

        let rap_sys = self.clock.now();
        for stream in pmt.streams {
            if state.es_streams.contains_key(&stream.pid) {
                // Still present and flow-def-compatible: just reconfigure
                // its setrap rather than tearing the ES down.
                if let Some(setrap) = state.setraps.get(&stream.pid) {
                    let _ = setrap.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(set_rap(rap_sys));
                }
                continue;
            }
            let decaps = Arc::new(Mutex::new(TsDecapsPipe::new(UprobeChain::new(), Arc::clone(&state.clock))));
            let decaps_shared: SharedUpipe = Arc::clone(&decaps) as SharedUpipe;

            let setrap = Arc::new(Mutex::new(SetrapPipe::new(UprobeChain::new())));
            {
                let mut guard = setrap.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let _ = guard.control(set_rap(rap_sys));
                guard.set_output(PipeId(0), Arc::clone(&decaps_shared));
            }
            let setrap_shared: SharedUpipe = Arc::clone(&setrap) as SharedUpipe;
            let _ = self
                .ts_split
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .control(alloc_sub(stream.pid, setrap_shared));

            let es = NewEsStream { program_number, pid: stream.pid, stream_type: stream.stream_type, decaps: Arc::clone(&decaps) };
            state.es_streams.insert(stream.pid, NewEsStream { program_number, pid: stream.pid, stream_type: stream.stream_type, decaps });
            state.setraps.insert(stream.pid, setrap);
            self.throw(&new_es_event(es));
        }

        // PCR pid (spec.md §4.7 program sub-pipe step 2): if the PMT names
        // no PCR pid (8191/absent), every ES's own DTS drives this
        // program's clock, the way `upipe_ts_demux_output_clock_ts` treats
        // `program->pcr_pid == 8191` in the original. Otherwise, if the
        // named pid isn't already one of this program's ES, a dedicated
        // decaps is wired on it purely to keep the clock moving.
        let treat_dts_as_pcr = pmt.pcr_pid == TS_PID_NULL;
        for es in state.es_streams.values() {
            es.decaps.lock().unwrap_or_else(std::sync::PoisonError::into_inner).set_treat_dts_as_pcr(treat_dts_as_pcr);
        }
        let pcr_pid_is_es = state.es_streams.contains_key(&pmt.pcr_pid);
        if treat_dts_as_pcr || pcr_pid_is_es {
            if let Some(old_decaps) = state.pcr_decaps.take() {
                old_decaps.lock().unwrap_or_else(std::sync::PoisonError::into_inner).throw(&UprobeEvent::SourceEnd);
                let _ = self.ts_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(free_sub(state.pcr_pid));
            }
        } else if state.pcr_decaps.is_none() || state.pcr_pid != pmt.pcr_pid {
            if let Some(old_decaps) = state.pcr_decaps.take() {
                old_decaps.lock().unwrap_or_else(std::sync::PoisonError::into_inner).throw(&UprobeEvent::SourceEnd);
                let _ = self.ts_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(free_sub(state.pcr_pid));
            }
            let decaps = Arc::new(Mutex::new(TsDecapsPipe::new(UprobeChain::new(), Arc::clone(&state.clock))));
            {
                let mut guard = decaps.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let null_sink: SharedUpipe = Arc::new(Mutex::new(NullPipe::new(UprobeChain::new())));
                guard.set_output(PipeId(0), null_sink);
            }
            let decaps_shared: SharedUpipe = Arc::clone(&decaps) as SharedUpipe;
            let _ = self
                .ts_split
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .control(alloc_sub(pmt.pcr_pid, Arc::clone(&decaps_shared)));
            state.pcr_decaps = Some(decaps_shared);
        }
        state.pcr_pid = pmt.pcr_pid;

        // BISS-CA: a program descriptor naming the shared CA system means
        // this program is scrambled; subscribe its ECM pid. Re-checked on
        // every PMT update since a program can start, stop, or change
        // scrambling across a PMT version bump.
        let desired_ecm_pid = find_ca_descriptors(&pmt.program_descriptors)
            .into_iter()
            .find(|d| d.ca_system_id == CA_SYSTEM_BISS && d.dvb_cissa)
            .map(|d| d.ca_pid);
        if desired_ecm_pid != state.ecm_pid {
            if let Some(old_pid) = state.ecm_pid.take() {
                let _ = self.psi_pid.release_pid(old_pid);
            }
            if let Some(new_pid) = desired_ecm_pid {
                if let Ok(psi_split) = self.psi_pid.use_pid(new_pid, &self.psi_merge_mgr, &self.psi_split_mgr) {
                    let (filter, mask) = ([0u8; 6], [0u8; 6]); // any table_id on the ECM pid
                    let events = Arc::clone(&self.events);
                    let sink: SharedUpipe = Arc::new(Mutex::new(PsiSink {
                        id: next_pipe_id(),
                        events,
                        decode: move |section: &crate::psi::Section| {
                            Some(DemuxEvent::Ecm { program_number, section: (*section.bytes).clone() })
                        },
                    }));
                    let _ =
                        psi_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).control(psi_split_alloc_sub(filter, mask, sink));
                    state.ecm_pid = Some(new_pid);
                }
            }
        }
    }

    fn handle_sdt(&mut self, services: Vec<SdtService>) {
        for service in services {
            self.services.insert(service.service_id, service);
        }
    }

    /// Chooses the input-stage pipe from the proposed input flow def,
    /// wires its output onto `ts_split`, and makes it the bin's first
    /// inner pipe so control commands aimed at the bin's input edge
    /// forward there.
    fn select_front(&mut self, flow_def: &str) {
        let front: SharedUpipe = if flow_def.starts_with(FLOW_DEF_MPEGTS_ALIGNED) {
            let mut check = TsCheckPipe::new(UprobeChain::new());
            check.set_output(PipeId(0), Arc::clone(&self.ts_split));
            Arc::new(Mutex::new(check))
        } else if flow_def.starts_with(FLOW_DEF_MPEGTS) {
            // Already synchronized and aligned: no sync search or check
            // needed, `idem` just forwards.
            let mut idem = IdemPipe::new(UprobeChain::new());
            idem.set_output(PipeId(0), Arc::clone(&self.ts_split));
            Arc::new(Mutex::new(idem))
        } else {
            let mut sync = TsSyncPipe::new(UprobeChain::new());
            sync.set_output(PipeId(0), Arc::clone(&self.ts_split));
            Arc::new(Mutex::new(sync))
        };
        self.bin.set_first_inner(Arc::clone(&front));
        self.front = Some(front);
    }

    /// A `SourceEnd` observed on the bin's own input is *not* mechanically
    /// replayed onto every ES output — this bin has no synthetic "end of
    /// stream" `input()` primitive to send, and doing so silently would
    /// hide the asymmetry from the application. Instead the bin only
    /// re-throws `SourceEnd` on its own probe chain; the
    /// application (which already holds every ES's `decaps` handle from
    /// [`NewEsStream`]) decides what, if anything, each output pipe should
    /// do about it.
    fn handle_source_end(&self) {
        self.throw(&UprobeEvent::SourceEnd);
    }
}

impl Upipe for DemuxBin {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "ts_demux"
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
                self.select_front(def.flow_def().unwrap_or_default());
                Ok(UpipeResponse::Unit)
            }
            UpipeCommand::GetFlowDef => self.bin.forward_to_first(UpipeCommand::GetFlowDef).or(Err(UpipeError::Unhandled)),
            _ => Err(UpipeError::Unhandled),
        }
    }

    fn input(&mut self, uref: Uref) {
        match &self.front {
            Some(front) => front.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref),
            // No `SET_FLOW_DEF` negotiated yet: behave like `idem` and
            // feed `ts_split` directly, for callers that push
            // already-aligned packets without negotiating a flow def.
            None => self.ts_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref),
        }
        self.drain_events();
    }
}

pub struct DemuxBinMgr;

impl UpipeMgr for DemuxBinMgr {
    fn name(&self) -> &'static str {
        "ts_demux"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(Mutex::new(DemuxBin::new(probes))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc32::crc32_mpeg;
    use crate::packet::{TS_PACKET_SIZE, TS_SYNC_BYTE};
    use upipe_core::ubuf::{BlockUbuf, Ubuf};
    use upipe_core::uprobe::{FnProbe, ProbeStatus};

    fn section(table_id: u8, ext: u16, body: &[u8]) -> Vec<u8> {
        let mut bytes = vec![table_id, 0, 0, (ext >> 8) as u8, (ext & 0xFF) as u8, 0, 0, 0];
        bytes.extend_from_slice(body);
        let len = bytes.len() - 3 + 4;
        bytes[1] = ((len >> 8) as u8) & 0x0F;
        bytes[2] = (len & 0xFF) as u8;
        let crc = crc32_mpeg(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());
        bytes
    }

    fn packets_for_section(pid: u16, section: &[u8]) -> Vec<Uref> {
        let mut payload = vec![0u8]; // pointer_field
        payload.extend_from_slice(section);
        let mut packets = Vec::new();
        let mut first = true;
        for chunk in payload.chunks(184) {
            let mut p = vec![0xFFu8; TS_PACKET_SIZE];
            p[0] = TS_SYNC_BYTE;
            p[1] = (if first { 0x40 } else { 0 }) | (((pid >> 8) as u8) & 0x1F);
            p[2] = (pid & 0xFF) as u8;
            p[3] = 0x10;
            p[4..4 + chunk.len()].copy_from_slice(chunk);
            packets.push(Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(p))));
            first = false;
        }
        packets
    }

    fn es_packet(pid: u16, pusi: bool, payload: &[u8]) -> Uref {
        let mut p = vec![0xFFu8; TS_PACKET_SIZE];
        p[0] = TS_SYNC_BYTE;
        p[1] = (if pusi { 0x40 } else { 0 }) | (((pid >> 8) as u8) & 0x1F);
        p[2] = (pid & 0xFF) as u8;
        p[3] = 0x10;
        let n = payload.len().min(184);
        p[4..4 + n].copy_from_slice(&payload[..n]);
        Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(p)))
    }

    struct Recorder(Vec<Uref>);
    impl Upipe for Recorder {
        fn id(&self) -> PipeId {
            PipeId(9999)
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
    fn discovers_program_and_es_streams_from_pat_and_pmt() {
        let mut demux = DemuxBin::new(UprobeChain::new());

        let pat_body = [0u8, 1, 0xE1, 0x00]; // program 1 -> PMT pid 0x100
        for pkt in packets_for_section(0, &section(TABLE_ID_PAT, 1, &pat_body)) {
            demux.input(pkt);
        }
        assert_eq!(demux.programs(), vec![1]);

        let mut pmt_body = vec![0xE1, 0x01, 0xF0, 0x00]; // pcr_pid=0x101
        pmt_body.extend_from_slice(&[0x1B, 0xE1, 0x02, 0xF0, 0x00]); // video pid 0x102
        for pkt in packets_for_section(0x100, &section(TABLE_ID_PMT, 1, &pmt_body)) {
            demux.input(pkt);
        }

        let state = demux.programs.get(&1).unwrap();
        assert_eq!(state.es_streams.len(), 1);
        assert!(state.es_streams.contains_key(&0x102));
    }

    #[test]
    fn a_pmt_update_dropping_an_es_throws_source_end_and_keeps_surviving_pids() {
        let mut demux = DemuxBin::new(UprobeChain::new());

        let pat_body = [0u8, 1, 0xE1, 0x00]; // program 1 -> PMT pid 0x100
        for pkt in packets_for_section(0, &section(TABLE_ID_PAT, 1, &pat_body)) {
            demux.input(pkt);
        }

        let mut pmt1 = vec![0xE1, 0x01, 0xF0, 0x00]; // pcr_pid=0x101
        pmt1.extend_from_slice(&[0x1B, 0xE0, 100, 0xF0, 0x00]); // ES pid 100
        pmt1.extend_from_slice(&[0x0F, 0xE0, 200, 0xF0, 0x00]); // ES pid 200
        for pkt in packets_for_section(0x100, &section(TABLE_ID_PMT, 1, &pmt1)) {
            demux.input(pkt);
        }

        let state = demux.programs.get(&1).unwrap();
        assert_eq!(state.es_streams.len(), 2);
        let source_ended = Arc::new(Mutex::new(false));
        {
            let flag = Arc::clone(&source_ended);
            let decaps = Arc::clone(&state.es_streams.get(&200).unwrap().decaps);
            decaps.lock().unwrap().probes_mut().push(Arc::new(FnProbe(move |_pipe, event: &UprobeEvent| {
                if matches!(event, UprobeEvent::SourceEnd) {
                    *flag.lock().unwrap() = true;
                }
                ProbeStatus::Unhandled
            })));
        }

        // PMT #2: pid 100 carries over unchanged, pid 200 drops out, pid
        // 300 is newly listed.
        let mut pmt2 = vec![0xE1, 0x01, 0xF0, 0x00];
        pmt2.extend_from_slice(&[0x1B, 0xE0, 100, 0xF0, 0x00]);
        pmt2.extend_from_slice(&[0x1B, 0xE1, 0x2C, 0xF0, 0x00]); // ES pid 300
        for pkt in packets_for_section(0x100, &section(TABLE_ID_PMT, 2, &pmt2)) {
            demux.input(pkt);
        }

        assert!(*source_ended.lock().unwrap(), "PID 200's own decaps pipe should have seen SourceEnd");
        let state = demux.programs.get(&1).unwrap();
        assert_eq!(state.es_streams.len(), 2);
        assert!(state.es_streams.contains_key(&100));
        assert!(!state.es_streams.contains_key(&200));
        assert!(state.es_streams.contains_key(&300));
    }

    #[test]
    fn es_chain_stamps_rap_sys_from_the_setrap_spliced_ahead_of_decaps() {
        let mut demux = DemuxBin::new(UprobeChain::new());
        let (clock, manual) = Uclock::manual();
        manual.set(123_456);
        demux.set_clock(clock);

        let pat_body = [0u8, 1, 0xE1, 0x00]; // program 1 -> PMT pid 0x100
        for pkt in packets_for_section(0, &section(TABLE_ID_PAT, 1, &pat_body)) {
            demux.input(pkt);
        }
        let mut pmt_body = vec![0xE1, 0x01, 0xF0, 0x00]; // pcr_pid=0x101
        pmt_body.extend_from_slice(&[0x1B, 0xE1, 0x02, 0xF0, 0x00]); // video pid 0x102
        for pkt in packets_for_section(0x100, &section(TABLE_ID_PMT, 1, &pmt_body)) {
            demux.input(pkt);
        }

        let sink = Arc::new(Mutex::new(Recorder(Vec::new())));
        {
            let state = demux.programs.get(&1).unwrap();
            let es = state.es_streams.get(&0x102).unwrap();
            es.decaps.lock().unwrap_or_else(std::sync::PoisonError::into_inner).set_output(PipeId(1), sink.clone());
        }

        let pes = [0u8, 0, 1, 0xE0, 0, 0, 0x80, 0x00, 0, 1, 2, 3, 4];
        demux.input(es_packet(0x102, true, &pes));
        demux.input(es_packet(0x102, true, &[0, 0, 1, 0xE0, 0, 0, 0x80, 0x00, 0]));

        let urefs = &sink.lock().unwrap().0;
        assert_eq!(urefs.len(), 1);
        assert_eq!(urefs[0].rap_sys(), Some(123_456));
    }

    #[test]
    fn pat_nit_pid_16_switches_conformance_to_dvb() {
        let mut demux = DemuxBin::new(UprobeChain::new());
        assert_eq!(demux.conformance(), Conformance::DvbNoTables);
        let pat_body = [0u8, 0, 0xE0, 16]; // program 0 (NIT entry) -> pid 16
        for pkt in packets_for_section(0, &section(TABLE_ID_PAT, 1, &pat_body)) {
            demux.input(pkt);
        }
        assert_eq!(demux.conformance(), Conformance::Dvb);
    }

    #[test]
    fn enabled_eit_decodes_present_following_events() {
        let mut demux = DemuxBin::new(UprobeChain::new());
        demux.enable_eit();
        assert!(demux.eit(5).is_none());

        let mut body = vec![0, 0, 0, 0, 0, 0]; // ts_id, onid, seg_last, last_table_id
        body.extend_from_slice(&[0, 99]); // event_id = 99
        body.extend_from_slice(&[0, 0, 0, 0, 0]); // start_time (mjd + bcd)
        body.extend_from_slice(&[0, 0, 0]); // duration (bcd)
        body.extend_from_slice(&[0, 0]); // running_status/free_ca/desc_len
        for pkt in packets_for_section(PID_EIT, &section(TABLE_ID_EIT_PRESENT_FOLLOWING_ACTUAL, 5, &body)) {
            demux.input(pkt);
        }

        let eit = demux.eit(5).expect("EIT for service 5 should have been decoded");
        assert_eq!(eit.events.len(), 1);
        assert_eq!(eit.events[0].event_id, 99);
    }

    #[test]
    fn enabled_eits_decodes_schedule_events_across_all_sixteen_table_ids() {
        let mut demux = DemuxBin::new(UprobeChain::new());
        demux.enable_eits();
        assert!(demux.eit_schedule(7).is_none());

        let mut body = vec![0, 0, 0, 0, 0, 0];
        body.extend_from_slice(&[0, 42]); // event_id = 42
        body.extend_from_slice(&[0, 0, 0, 0, 0]);
        body.extend_from_slice(&[0, 0, 0]);
        body.extend_from_slice(&[0, 0]);
        // table_id 0x5F is the 16th (n = 15) schedule sub-table; verifies
        // the fan-out covers the whole 0x50..=0x5F range, not just the
        // first entry.
        for pkt in packets_for_section(PID_EIT, &section(TABLE_ID_EIT_SCHEDULE_ACTUAL_BASE + 15, 7, &body)) {
            demux.input(pkt);
        }

        let eit = demux.eit_schedule(7).expect("schedule EIT for service 7 should have been decoded");
        assert_eq!(eit.events.len(), 1);
        assert_eq!(eit.events[0].event_id, 42);
        // present/following decoding stays off; enabling schedule does not
        // imply enabling the other EIT table range.
        assert!(demux.eit(7).is_none());
    }

    #[test]
    fn dvb_conformance_subscribes_nit_and_decodes_transport_stream_entries() {
        let mut demux = DemuxBin::new(UprobeChain::new());
        demux.set_conformance(Conformance::Dvb);
        assert!(demux.nit().is_none());

        let mut body = vec![0xF0, 0x00]; // network_descriptors_length = 0
        body.extend_from_slice(&[0xF0, 6]); // transport_stream_loop_length = 6
        body.extend_from_slice(&[0, 1, 0, 2, 0xF0, 0]); // ts_id=1, onid=2, no descriptors
        for pkt in packets_for_section(PID_NIT, &section(TABLE_ID_NIT_ACTUAL, 0xABCD, &body)) {
            demux.input(pkt);
        }

        let (network_id, entries) = demux.nit().expect("NIT should have been decoded");
        assert_eq!(*network_id, 0xABCD);
        assert_eq!(entries, &[NitTransportStream { transport_stream_id: 1, original_network_id: 2 }]);
    }

    #[test]
    fn biss_ca_routes_cat_emm_and_pmt_ecm_sections_to_the_configured_decoder() {
        let mut demux = DemuxBin::new(UprobeChain::new());
        let decoder = Arc::new(Mutex::new(crate::ca::NullEmmDecoder::default()));
        demux.set_emm_decoder(decoder.clone());

        let pat_body = [0u8, 1, 0xE1, 0x00]; // program 1 -> PMT pid 0x100
        for pkt in packets_for_section(0, &section(TABLE_ID_PAT, 1, &pat_body)) {
            demux.input(pkt);
        }

        let mut cat_descriptor = vec![0x09, 4, 0x26, 0x10, 0x03, 0x00]; // CA sys 0x2610, EMM pid 0x300
        cat_descriptor.extend_from_slice(&[0x65, 1, 0x10]); // scrambling descriptor: DVB-CISSA
        for pkt in packets_for_section(PID_CAT, &section(TABLE_ID_CAT, 0, &cat_descriptor)) {
            demux.input(pkt);
        }
        for pkt in packets_for_section(0x300, &section(0x82, 0, &[1, 2, 3, 4])) {
            demux.input(pkt);
        }
        assert_eq!(decoder.lock().unwrap().emm_count, 1);

        let mut pmt_body = vec![0xE1, 0x01, 0xF0, 9]; // pcr_pid=0x101, program_info_length=9
        pmt_body.extend_from_slice(&[0x09, 4, 0x26, 0x10, 0x02, 0x00]); // CA descriptor -> ECM pid 0x200
        pmt_body.extend_from_slice(&[0x65, 1, 0x10]); // scrambling descriptor: DVB-CISSA
        pmt_body.extend_from_slice(&[0x1B, 0xE1, 0x02, 0xF0, 0x00]); // video pid 0x102
        for pkt in packets_for_section(0x100, &section(TABLE_ID_PMT, 1, &pmt_body)) {
            demux.input(pkt);
        }

        for pkt in packets_for_section(0x200, &section(0x80, 0, &[5, 6, 7, 8])) {
            demux.input(pkt);
        }
        assert_eq!(decoder.lock().unwrap().ecm_count, 1);
    }

    #[test]
    fn a_ca_descriptor_with_no_dvb_cissa_scrambling_descriptor_is_not_treated_as_biss_ca() {
        let mut demux = DemuxBin::new(UprobeChain::new());
        let decoder = Arc::new(Mutex::new(crate::ca::NullEmmDecoder::default()));
        demux.set_emm_decoder(decoder.clone());

        let pat_body = [0u8, 1, 0xE1, 0x00]; // program 1 -> PMT pid 0x100
        for pkt in packets_for_section(0, &section(TABLE_ID_PAT, 1, &pat_body)) {
            demux.input(pkt);
        }

        let mut pmt_body = vec![0xE1, 0x01, 0xF0, 6]; // pcr_pid=0x101, program_info_length=6
        pmt_body.extend_from_slice(&[0x09, 4, 0x26, 0x10, 0x02, 0x00]); // CA descriptor, no scrambling descriptor
        pmt_body.extend_from_slice(&[0x1B, 0xE1, 0x02, 0xF0, 0x00]); // video pid 0x102
        for pkt in packets_for_section(0x100, &section(TABLE_ID_PMT, 1, &pmt_body)) {
            demux.input(pkt);
        }

        for pkt in packets_for_section(0x200, &section(0x80, 0, &[5, 6, 7, 8])) {
            demux.input(pkt);
        }
        assert_eq!(decoder.lock().unwrap().ecm_count, 0);
    }

    /// With no flow def negotiated, unaligned bytes fed straight to
    /// `ts_split` would simply misparse; negotiating
    /// `block.mpegtsaligned.` (the "check" stage, which happens to also
    /// tolerate the garbage-free packets this test constructs) should let
    /// the PAT through via the demux bin's chosen front stage rather than
    /// `ts_split` directly.
    #[test]
    fn set_flow_def_wires_the_check_stage_ahead_of_ts_split() {
        let mut demux = DemuxBin::new(UprobeChain::new());
        let mut def = Uref::new_control();
        def.set_flow_def(FLOW_DEF_MPEGTS_ALIGNED);
        demux.control(UpipeCommand::SetFlowDef(def)).unwrap();

        let pat_body = [0u8, 1, 0xE1, 0x00]; // program 1 -> PMT pid 0x100
        for pkt in packets_for_section(0, &section(TABLE_ID_PAT, 1, &pat_body)) {
            demux.input(pkt);
        }
        assert_eq!(demux.programs(), vec![1]);
    }

    /// Same, but via the raw byte-stream path: concatenating every packet
    /// into one unaligned blob should still resync and decode once fed
    /// through the `ts_sync` front stage chosen for an unrecognized flow
    /// def.
    #[test]
    fn set_flow_def_wires_the_sync_stage_for_an_unrecognized_flow_def() {
        let mut demux = DemuxBin::new(UprobeChain::new());
        let mut def = Uref::new_control();
        def.set_flow_def("block.raw.");
        demux.control(UpipeCommand::SetFlowDef(def)).unwrap();

        let pat_body = [0u8, 1, 0xE1, 0x00]; // program 1 -> PMT pid 0x100
        let mut blob = Vec::new();
        for pkt in packets_for_section(0, &section(TABLE_ID_PAT, 1, &pat_body)) {
            let block = pkt.ubuf().and_then(Ubuf::as_block).unwrap();
            blob.extend_from_slice(&block.read(0, block.size()).unwrap());
        }
        demux.input(Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(blob))));
        assert_eq!(demux.programs(), vec![1]);
    }

    fn pcr_packet(pid: u16, pcr_27mhz: u64) -> Uref {
        let base = pcr_27mhz / 300;
        let extension = pcr_27mhz % 300;
        let mut p = vec![0xFFu8; TS_PACKET_SIZE];
        p[0] = TS_SYNC_BYTE;
        p[1] = ((pid >> 8) as u8) & 0x1F;
        p[2] = (pid & 0xFF) as u8;
        p[3] = 0x30; // adaptation field + payload
        p[4] = 7; // adaptation_field_length
        p[5] = 0x10; // PCR_flag
        p[6] = ((base >> 25) & 0xFF) as u8;
        p[7] = ((base >> 17) & 0xFF) as u8;
        p[8] = ((base >> 9) & 0xFF) as u8;
        p[9] = ((base >> 1) & 0xFF) as u8;
        p[10] = (((base & 1) << 7) as u8) | 0x7E | (((extension >> 8) & 1) as u8);
        p[11] = (extension & 0xFF) as u8;
        Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(p)))
    }

    #[test]
    fn a_pcr_pid_distinct_from_every_es_gets_its_own_decaps_wired_to_the_program_clock() {
        let mut demux = DemuxBin::new(UprobeChain::new());

        let pat_body = [0u8, 1, 0xE1, 0x00]; // program 1 -> PMT pid 0x100
        for pkt in packets_for_section(0, &section(TABLE_ID_PAT, 1, &pat_body)) {
            demux.input(pkt);
        }
        let mut pmt_body = vec![0xE1, 0x01, 0xF0, 0x00]; // pcr_pid=0x101, carried by no ES
        pmt_body.extend_from_slice(&[0x1B, 0xE1, 0x02, 0xF0, 0x00]); // video pid 0x102
        for pkt in packets_for_section(0x100, &section(TABLE_ID_PMT, 1, &pmt_body)) {
            demux.input(pkt);
        }

        let clock = Arc::clone(&demux.programs.get(&1).unwrap().clock);
        assert!(clock.lock().unwrap().last_pcr().is_none());

        demux.input(pcr_packet(0x101, 27_000_000));
        assert!(clock.lock().unwrap().last_pcr().is_some());
    }

    #[test]
    fn pcr_pid_8191_treats_every_ess_dts_as_the_program_clocks_pcr() {
        let mut demux = DemuxBin::new(UprobeChain::new());

        let pat_body = [0u8, 1, 0xE1, 0x00]; // program 1 -> PMT pid 0x100
        for pkt in packets_for_section(0, &section(TABLE_ID_PAT, 1, &pat_body)) {
            demux.input(pkt);
        }
        let mut pmt_body = vec![0xFF, 0xFF, 0xF0, 0x00]; // pcr_pid=8191 (absent)
        pmt_body.extend_from_slice(&[0x1B, 0xE1, 0x02, 0xF0, 0x00]); // video pid 0x102
        for pkt in packets_for_section(0x100, &section(TABLE_ID_PMT, 1, &pmt_body)) {
            demux.input(pkt);
        }

        let clock = Arc::clone(&demux.programs.get(&1).unwrap().clock);
        assert!(clock.lock().unwrap().last_pcr().is_none());

        let mut pes = vec![0, 0, 1, 0xE0, 0, 0, 0x80, 0xC0, 10];
        let encode = |marker: u8, value: u64| -> [u8; 5] {
            let b0 = (marker << 4) | (((value >> 29) & 0x0E) as u8) | 1;
            let b1 = ((value >> 22) & 0xFF) as u8;
            let b2 = (((value >> 14) & 0xFE) as u8) | 1;
            let b3 = ((value >> 7) & 0xFF) as u8;
            let b4 = (((value << 1) & 0xFE) as u8) | 1;
            [b0, b1, b2, b3, b4]
        };
        pes.extend_from_slice(&encode(0b0011, 180_000));
        pes.extend_from_slice(&encode(0b0001, 180_000));
        demux.input(es_packet(0x102, true, &pes));
        // flush with a second PUSI packet
        demux.input(es_packet(0x102, true, &[0, 0, 1, 0xE0, 0, 0, 0x80, 0x00, 0]));

        assert!(clock.lock().unwrap().last_pcr().is_some());
    }
}
