// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! PSI section reassembly (`ts_psi_merge`) and table-filtered fan-out
//! (`ts_psi_split`), plus the `psi_pid` bookkeeping object that lets many
//! decoders share one filter chain on a single PID.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use upipe_core::error::{UpipeError, UpipeResult};
use upipe_core::helpers::output::{OutputAction, OutputHelper};
use upipe_core::udict::UdictValue;
use upipe_core::upipe::{downcast_family, family_command, SharedUpipe, Upipe, UpipeCommand, UpipeMgr, UpipeResponse};
use upipe_core::uprobe::{PipeId, UprobeChain};
use upipe_core::uref::Uref;

use crate::crc32::verify_section_crc;
use crate::flowdef::{FLOW_DEF_MPEGTSPSI, TS_PSIFILTER_FILTER_ATTR, TS_PSIFILTER_MASK_ATTR};
use crate::packet::{parse_header, payload_offset};
use crate::ts_split::{alloc_sub, flow_def_for_pid, TsSplitMgr};

fn next_pipe_id() -> PipeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    PipeId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// A reassembled, CRC-validated PSI section plus its `table_id` byte
/// (first byte of the section).
#[derive(Debug, Clone)]
pub struct Section {
    pub table_id: u8,
    pub bytes: Arc<Vec<u8>>,
}

impl Section {
    /// Up to the first five bytes after the table_id, for `psi_psifilter`
    /// matching: a sub-table filter on up to the first five post-header
    /// bytes.
    #[must_use]
    pub fn filter_prefix(&self) -> [u8; 5] {
        let mut out = [0u8; 5];
        let body = &self.bytes[1.min(self.bytes.len())..];
        let n = body.len().min(5);
        out[..n].copy_from_slice(&body[..n]);
        out
    }
}

pub const TS_TABLE_ID_ATTR: &str = "ts.table_id";
pub const TS_SECTION_ATTR: &str = "ts.section";

/// Attach a reassembled section to a uref as a control attribute carrying
/// the raw bytes, the way a psi pipe would store an opaque payload rather
/// than going through `Ubuf` (PSI sections are typically tiny and fully
/// buffered, not streamed in segments).
fn section_to_uref(section: &Section) -> Uref {
    let mut uref = Uref::new_control();
    uref.set_flow_def(FLOW_DEF_MPEGTSPSI);
    uref.attrs_mut().set(TS_TABLE_ID_ATTR, UdictValue::SmallUnsigned(section.table_id));
    uref.attrs_mut().set(TS_SECTION_ATTR, UdictValue::Opaque((*section.bytes).clone()));
    uref
}

/// Pull the section bytes back out of a uref built by [`section_to_uref`].
#[must_use]
pub fn section_from_uref(uref: &Uref) -> Option<Section> {
    let UdictValue::Opaque(bytes) = uref.attrs().get(TS_SECTION_ATTR)? else { return None };
    let table_id = *bytes.first()?;
    Some(Section { table_id, bytes: Arc::new(bytes.clone()) })
}

/// `ts_psi_merge`: reassembles whole PSI sections from one PID's TS packet
/// payloads, honoring the pointer field and validating CRC-32 before
/// emitting.
pub struct PsiMergePipe {
    id: PipeId,
    probes: UprobeChain,
    output: OutputHelper,
    pending: Vec<u8>,
    sections_ok: u64,
    sections_dropped: u64,
}

impl PsiMergePipe {
    #[must_use]
    pub fn new(probes: UprobeChain) -> Self {
        let pipe = Self {
            id: next_pipe_id(),
            probes,
            output: OutputHelper::new(),
            pending: Vec::new(),
            sections_ok: 0,
            sections_dropped: 0,
        };
        pipe.throw_ready();
        pipe
    }

    #[must_use]
    pub fn sections_ok(&self) -> u64 {
        self.sections_ok
    }

    #[must_use]
    pub fn sections_dropped(&self) -> u64 {
        self.sections_dropped
    }

    fn deliver(&mut self, uref: Uref) {
        if let OutputAction::Deliver(uref) = self.output.output_uref(uref) {
            let Some((_, out)) = self.output.output() else { return };
            out.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref);
        }
    }

    /// Extract as many complete sections as `pending` currently holds,
    /// validating and emitting each one; leaves a partial trailing section
    /// (if any) in `pending` for the next packet.
    fn flush_complete_sections(&mut self) {
        loop {
            if self.pending.len() < 3 || self.pending[0] == 0xFF {
                self.pending.clear();
                return;
            }
            let section_length = (usize::from(self.pending[1] & 0x0F) << 8) | usize::from(self.pending[2]);
            let total = 3 + section_length;
            if self.pending.len() < total {
                return;
            }
            let section_bytes = self.pending[..total].to_vec();
            self.pending.drain(..total);

            if verify_section_crc(&section_bytes) {
                self.sections_ok += 1;
                let table_id = section_bytes[0];
                let section = Section { table_id, bytes: Arc::new(section_bytes) };
                let uref = section_to_uref(&section);
                self.deliver(uref);
            } else {
                self.sections_dropped += 1;
                tracing::warn!(pipe = self.id.0, "dropping PSI section with invalid CRC-32");
            }
        }
    }
}

impl Upipe for PsiMergePipe {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "ts_psi_merge"
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
                        self.deliver(uref);
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
        let Some(block) = uref.ubuf().and_then(|u| u.as_block()) else {
            tracing::warn!(pipe = self.id.0, "ts_psi_merge received a non-block uref, dropping");
            return;
        };
        let size = block.size();
        let Some(packet) = block.read(0, size) else { return };
        let Some(header) = parse_header(&packet) else {
            tracing::warn!(pipe = self.id.0, "ts_psi_merge received a malformed TS packet, dropping");
            return;
        };
        let Some(offset) = payload_offset(&packet, &header) else {
            self.sections_dropped += 1;
            tracing::warn!(pipe = self.id.0, "truncated adaptation field, dropping packet");
            return;
        };
        let payload = &packet[offset..];
        if payload.is_empty() {
            return;
        }

        if header.payload_unit_start {
            let pointer = usize::from(payload[0]);
            if pointer > 0 && pointer <= payload.len().saturating_sub(1) {
                self.pending.extend_from_slice(&payload[1..1 + pointer]);
            }
            self.flush_complete_sections();
            self.pending.clear();
            if pointer + 1 <= payload.len() {
                self.pending.extend_from_slice(&payload[1 + pointer..]);
            }
        } else {
            self.pending.extend_from_slice(payload);
        }
        self.flush_complete_sections();
    }
}

pub struct PsiMergeMgr;

impl UpipeMgr for PsiMergeMgr {
    fn name(&self) -> &'static str {
        "ts_psi_merge"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(Mutex::new(PsiMergePipe::new(probes))))
    }
}

/// One sub-output of a `ts_psi_split`, selected by `(filter, mask)` applied
/// to the section's `(table_id, filter_prefix)` bytes, matching per byte:
/// `(byte & mask) == (filter & mask)`.
struct PsiSubOutput {
    filter: [u8; 6],
    mask: [u8; 6],
    pipe: SharedUpipe,
}

impl PsiSubOutput {
    fn matches(&self, section: &Section) -> bool {
        let mut bytes = [0u8; 6];
        bytes[0] = section.table_id;
        bytes[1..].copy_from_slice(&section.filter_prefix());
        bytes.iter().zip(self.filter.iter()).zip(self.mask.iter()).all(|((b, f), m)| b & m == f & m)
    }
}

/// `ts_psi_split`: fans reassembled sections to sub-outputs selected by a
/// `(table_id, filter, mask)` tuple.
pub struct PsiSplitPipe {
    id: PipeId,
    probes: UprobeChain,
    subs: Vec<PsiSubOutput>,
}

impl PsiSplitPipe {
    #[must_use]
    pub fn new(probes: UprobeChain) -> Self {
        let pipe = Self { id: next_pipe_id(), probes, subs: Vec::new() };
        pipe.throw_ready();
        pipe
    }
}

pub enum PsiSplitCommand {
    AllocSub { filter: [u8; 6], mask: [u8; 6], output: SharedUpipe },
}

#[must_use]
pub fn psi_split_alloc_sub(filter: [u8; 6], mask: [u8; 6], output: SharedUpipe) -> UpipeCommand {
    family_command(PsiSplitCommand::AllocSub { filter, mask, output })
}

/// Build the `ts.psifilter` flow-def attributes a sub-output's allocation
/// flow def would carry.
#[must_use]
pub fn psifilter_flow_def(filter: [u8; 6], mask: [u8; 6]) -> Uref {
    let mut def = Uref::new_control();
    def.set_flow_def(FLOW_DEF_MPEGTSPSI);
    def.attrs_mut().set(TS_PSIFILTER_FILTER_ATTR, UdictValue::Opaque(filter.to_vec()));
    def.attrs_mut().set(TS_PSIFILTER_MASK_ATTR, UdictValue::Opaque(mask.to_vec()));
    def
}

impl Upipe for PsiSplitPipe {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "ts_psi_split"
    }

    fn probes(&self) -> &UprobeChain {
        &self.probes
    }

    fn probes_mut(&mut self) -> &mut UprobeChain {
        &mut self.probes
    }

    fn control(&mut self, cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
        match cmd {
            UpipeCommand::Family(boxed) => match downcast_family::<PsiSplitCommand>(UpipeCommand::Family(boxed))? {
                PsiSplitCommand::AllocSub { filter, mask, output } => {
                    self.subs.push(PsiSubOutput { filter, mask, pipe: output });
                    Ok(UpipeResponse::Unit)
                }
            },
            _ => Err(UpipeError::Unhandled),
        }
    }

    fn input(&mut self, uref: Uref) {
        let Some(section) = section_from_uref(&uref) else {
            tracing::warn!(pipe = self.id.0, "ts_psi_split received a uref with no section payload");
            return;
        };
        for sub in &self.subs {
            if sub.matches(&section) {
                sub.pipe.lock().unwrap_or_else(std::sync::PoisonError::into_inner).input(uref.clone());
            }
        }
    }
}

pub struct PsiSplitMgr;

impl UpipeMgr for PsiSplitMgr {
    fn name(&self) -> &'static str {
        "ts_psi_split"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(Mutex::new(PsiSplitPipe::new(probes))))
    }
}

/// Filter/mask pair matching table id `id` exactly and ignoring the
/// post-header bytes (current/next and sub-table filtering left to the
/// specific table decoder).
#[must_use]
pub fn filter_table_id(id: u8) -> ([u8; 6], [u8; 6]) {
    let mut filter = [0u8; 6];
    let mut mask = [0u8; 6];
    filter[0] = id;
    mask[0] = 0xFF;
    (filter, mask)
}

/// `psi_pid`: bookkeeping object multiplexing PSI consumers on one PID.
/// The first caller of [`PsiPidTable::use_pid`] creates
/// the PID's `ts_split` sub-output, `ts_psi_merge`, and `ts_psi_split`;
/// subsequent callers bump a refcount; the chain is torn down on last
/// release.
struct PsiPidEntry {
    refcount: usize,
    psi_split: SharedUpipe,
}

pub struct PsiPidTable {
    ts_split: SharedUpipe,
    entries: HashMap<u16, PsiPidEntry>,
}

impl PsiPidTable {
    #[must_use]
    pub fn new(ts_split: SharedUpipe) -> Self {
        Self { ts_split, entries: HashMap::new() }
    }

    /// `psi_pid_use(pid)`: return the shared `ts_psi_split` for `pid`,
    /// building the PID's filter chain (`ts_split` sub-output → merge →
    /// split) on first use.
    pub fn use_pid(&mut self, pid: u16, merge_mgr: &PsiMergeMgr, split_mgr: &PsiSplitMgr) -> UpipeResult<SharedUpipe> {
        if let Some(entry) = self.entries.get_mut(&pid) {
            entry.refcount += 1;
            return Ok(Arc::clone(&entry.psi_split));
        }

        let _ = merge_mgr;
        // Built concretely (not through `PsiMergeMgr::alloc`) so its
        // `OutputHelper` can be wired straight to `split` without a runtime
        // downcast: `ts_psi_merge` and `ts_psi_split` are always paired by
        // this table and never mixed with a third-party output.
        let merge = Arc::new(Mutex::new(PsiMergePipe::new(UprobeChain::new())));
        let split = split_mgr.alloc(UprobeChain::new())?;
        {
            let mut guard = merge.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.control(UpipeCommand::SetFlowDef(flow_def_for_pid(pid)))?;
            guard.output.set_output(PipeId(0), Arc::clone(&split));
        }
        let merge_dyn: SharedUpipe = merge;
        {
            let mut ts_split = self.ts_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            ts_split.control(alloc_sub(pid, merge_dyn))?;
        }
        self.entries.insert(pid, PsiPidEntry { refcount: 1, psi_split: Arc::clone(&split) });
        Ok(split)
    }

    /// `psi_pid_release`: drop one reference; tears down the PID's filter
    /// chain on the last release.
    pub fn release_pid(&mut self, pid: u16) -> UpipeResult<()> {
        let Some(entry) = self.entries.get_mut(&pid) else { return Ok(()) };
        entry.refcount -= 1;
        if entry.refcount == 0 {
            self.entries.remove(&pid);
            let mut ts_split = self.ts_split.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            ts_split.control(crate::ts_split::free_sub(pid))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn refcount(&self, pid: u16) -> usize {
        self.entries.get(&pid).map_or(0, |e| e.refcount)
    }
}

#[must_use]
pub fn make_ts_split() -> UpipeResult<SharedUpipe> {
    TsSplitMgr.alloc(UprobeChain::new())
}
