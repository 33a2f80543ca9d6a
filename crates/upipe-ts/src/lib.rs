// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! MPEG-TS / DVB demultiplexing: packet parsing, PID fan-out, PSI section
//! reassembly and table decoding, PES depacketization, and the demux bin
//! that wires them into one program-aware pipeline.

pub mod ca;
pub mod clock;
pub mod crc32;
pub mod demux;
pub mod flowdef;
pub mod packet;
pub mod pes;
pub mod psi;
pub mod sync;
pub mod tables;
pub mod ts_decaps;
pub mod ts_split;

pub use ca::{EmmDecoder, NullEmmDecoder, SharedEmmDecoder, CA_SYSTEM_BISS, SCRAMBLING_MODE_DVB_CISSA};
pub use clock::{ProgramClock, TS_CLOCK_MAX};
pub use demux::{DemuxBin, DemuxBinMgr};
pub use flowdef::{
    table_flow_def, FLOW_DEF_MPEGTS, FLOW_DEF_MPEGTSPES, FLOW_DEF_MPEGTSPSI, FLOW_DEF_MPEGTS_ALIGNED,
};
pub use packet::{parse_header, payload_offset, read_pcr, TsHeader, TS_HEADER_SIZE, TS_PACKET_SIZE, TS_PID_NULL, TS_SYNC_BYTE};
pub use psi::{filter_table_id, psi_split_alloc_sub, psifilter_flow_def, PsiMergeMgr, PsiMergePipe, PsiPidTable, PsiSplitMgr, PsiSplitPipe, Section};
pub use sync::{raw_flow_def, TsCheckMgr, TsCheckPipe, TsSyncMgr, TsSyncPipe};
pub use tables::{guess_conformance, Conformance};
pub use ts_decaps::{TsDecapsMgr, TsDecapsPipe};
pub use ts_split::{alloc_sub, flow_def_for_pid, free_sub, TsSplitMgr, TsSplitPipe};
