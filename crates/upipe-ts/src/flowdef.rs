// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Flow-def string constants and TS-specific udict attribute keys shared
//! across the split/merge/decaps pipes.

/// Prefix for a synchronized, aligned TS byte stream — bypasses sync
/// search entirely.
pub const FLOW_DEF_MPEGTS: &str = "block.mpegts.";
/// Prefix for an aligned-but-not-necessarily-synced stream, requiring only
/// the "check" alignment filter.
pub const FLOW_DEF_MPEGTS_ALIGNED: &str = "block.mpegtsaligned.";
/// Prefix for a reassembled PSI section, with the table name appended
/// (e.g. `block.mpegtspsi.pat.`).
pub const FLOW_DEF_MPEGTSPSI: &str = "block.mpegtspsi.";
/// Prefix for a demultiplexed PES packet.
pub const FLOW_DEF_MPEGTSPES: &str = "block.mpegtspes.";

pub const TS_PID_ATTR: &str = "ts.pid";
/// `(filter, mask)` pair selecting sections on one PID by table id and the
/// first five post-header bytes.
pub const TS_PSIFILTER_FILTER_ATTR: &str = "ts.psifilter.filter";
pub const TS_PSIFILTER_MASK_ATTR: &str = "ts.psifilter.mask";
pub const TS_PROGRAM_NUMBER_ATTR: &str = "ts.program_number";
pub const TS_PMT_PID_ATTR: &str = "ts.pmt_pid";
pub const TS_PCR_PID_ATTR: &str = "ts.pcr_pid";
pub const TS_SERVICE_NAME_ATTR: &str = "dvb.service_name";
pub const TS_SERVICE_PROVIDER_ATTR: &str = "dvb.service_provider";

#[must_use]
pub fn table_flow_def(table: &str) -> String {
    format!("{FLOW_DEF_MPEGTSPSI}{table}.")
}

/// Flow def an ES with a given PMT `stream_type` would negotiate once its
/// framer inspects the stream. No codec-specific framer lives in this
/// workspace, so this stays at the generic PES prefix qualified by the raw
/// `stream_type` byte — just specific enough that a PMT update swapping an
/// ES's codec mid-stream (same PID, different `stream_type`) is detectable
/// as an incompatible flow def rather than silently reusing the old output.
#[must_use]
pub fn pmt_stream_flow_def(stream_type: u8) -> String {
    format!("{FLOW_DEF_MPEGTSPES}{stream_type:02x}.")
}
