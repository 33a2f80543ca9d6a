// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! PSI/SI table decoders: PAT, CAT, PMT, NIT, SDT, TDT, EIT, and a minimal
//! SCTE-35 `splice_info_section` command reader (ISO/IEC 13818-1 §2.4.4 and
//! ETSI EN 300 468).
//!
//! Every decoder takes the whole, CRC-already-validated [`Section`] bytes
//! (table_id through the byte before the trailing CRC) and returns a typed
//! view; malformed input yields [`UpipeError::Invalid`] rather than a
//! panic, matching the rest of the crate's error-return convention.

use upipe_core::error::{UpipeError, UpipeResult};

use crate::ca::SCRAMBLING_MODE_DVB_CISSA;
use crate::psi::Section;

/// Offset of the byte following `last_section_number`, where table-specific
/// data begins, common to every "long form" PSI table (PAT, PMT, SDT, NIT,
/// EIT all share this 8-byte common header: table_id, 2-byte length,
/// 2-byte table_id_extension, version/current_next, section_number,
/// last_section_number).
const TABLE_DATA_OFFSET: usize = 8;

fn table_data(section: &Section) -> UpipeResult<&[u8]> {
    let bytes = &section.bytes[..];
    if bytes.len() < TABLE_DATA_OFFSET + 4 {
        return Err(UpipeError::Invalid("PSI section too short for a long-form table header".into()));
    }
    Ok(&bytes[TABLE_DATA_OFFSET..bytes.len() - 4])
}

fn table_id_extension(section: &Section) -> UpipeResult<u16> {
    let bytes = &section.bytes[..];
    if bytes.len() < 5 {
        return Err(UpipeError::Invalid("PSI section too short for table_id_extension".into()));
    }
    Ok((u16::from(bytes[3]) << 8) | u16::from(bytes[4]))
}

// --- PAT (table_id 0x00) ----------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    /// The NIT PID when `program_number == 0`, otherwise the program's PMT PID.
    pub pid: u16,
}

/// Decode a PAT section's program loop into `(program_number, pid)` pairs,
/// where a `program_number` of 0 denotes the NIT pid rather than a PMT pid.
pub fn decode_pat(section: &Section) -> UpipeResult<Vec<PatEntry>> {
    let data = table_data(section)?;
    if data.len() % 4 != 0 {
        return Err(UpipeError::Invalid("PAT program loop is not a multiple of 4 bytes".into()));
    }
    Ok(data
        .chunks_exact(4)
        .map(|e| PatEntry {
            program_number: (u16::from(e[0]) << 8) | u16::from(e[1]),
            pid: (u16::from(e[2] & 0x1F) << 8) | u16::from(e[3]),
        })
        .collect())
}

#[must_use]
pub fn pat_transport_stream_id(section: &Section) -> UpipeResult<u16> {
    table_id_extension(section)
}

// --- PMT (table_id 0x02) -----------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub pid: u16,
    pub descriptors: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub program_number: u16,
    pub pcr_pid: u16,
    pub program_descriptors: Vec<u8>,
    pub streams: Vec<PmtStream>,
}

pub fn decode_pmt(section: &Section) -> UpipeResult<Pmt> {
    let program_number = table_id_extension(section)?;
    let data = table_data(section)?;
    if data.len() < 4 {
        return Err(UpipeError::Invalid("PMT section too short for its fixed fields".into()));
    }
    let pcr_pid = (u16::from(data[0] & 0x1F) << 8) | u16::from(data[1]);
    let program_info_length = (usize::from(data[2] & 0x0F) << 8) | usize::from(data[3]);
    let mut offset = 4;
    if offset + program_info_length > data.len() {
        return Err(UpipeError::Invalid("PMT program_info_length overruns the section".into()));
    }
    let program_descriptors = data[offset..offset + program_info_length].to_vec();
    offset += program_info_length;

    let mut streams = Vec::new();
    while offset + 5 <= data.len() {
        let stream_type = data[offset];
        let pid = (u16::from(data[offset + 1] & 0x1F) << 8) | u16::from(data[offset + 2]);
        let es_info_length = (usize::from(data[offset + 3] & 0x0F) << 8) | usize::from(data[offset + 4]);
        offset += 5;
        if offset + es_info_length > data.len() {
            return Err(UpipeError::Invalid("PMT ES_info_length overruns the section".into()));
        }
        let descriptors = data[offset..offset + es_info_length].to_vec();
        offset += es_info_length;
        streams.push(PmtStream { stream_type, pid, descriptors });
    }

    Ok(Pmt { program_number, pcr_pid, program_descriptors, streams })
}

// --- CAT (table_id 0x01) ------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaDescriptor {
    pub ca_system_id: u16,
    pub ca_pid: u16,
    /// Whether a scrambling descriptor (tag 0x65) naming
    /// [`SCRAMBLING_MODE_DVB_CISSA`] was also present in the same
    /// descriptor loop — a CA descriptor alone only names the EMM/ECM
    /// pid, not the scrambling algorithm actually in use.
    pub dvb_cissa: bool,
}

const DESCRIPTOR_TAG_CA: u8 = 0x09;
const DESCRIPTOR_TAG_SCRAMBLING: u8 = 0x65;

/// Whether a scrambling descriptor (tag 0x65) naming DVB-CISSA version 1
/// is present anywhere in a descriptor loop.
fn has_dvb_cissa_scrambling(data: &[u8]) -> bool {
    let mut found = false;
    each_descriptor(data, |tag, body| {
        if tag == DESCRIPTOR_TAG_SCRAMBLING && body.first() == Some(&SCRAMBLING_MODE_DVB_CISSA) {
            found = true;
        }
    });
    found
}

fn each_descriptor(data: &[u8], mut f: impl FnMut(u8, &[u8])) {
    let mut offset = 0;
    while offset + 2 <= data.len() {
        let tag = data[offset];
        let len = usize::from(data[offset + 1]);
        let end = (offset + 2 + len).min(data.len());
        f(tag, &data[offset + 2..end]);
        offset = end;
    }
}

/// Scan a raw descriptor loop (CAT table data, or a PMT's program/ES
/// descriptor loop) for CA descriptors: BISS-CA/EMM plumbing needs to
/// locate the EMM/ECM PID per `ca_system_id`, with no concrete decryption
/// implementation here.
#[must_use]
pub fn find_ca_descriptors(data: &[u8]) -> Vec<CaDescriptor> {
    let dvb_cissa = has_dvb_cissa_scrambling(data);
    let mut descriptors = Vec::new();
    each_descriptor(data, |tag, body| {
        if tag == DESCRIPTOR_TAG_CA && body.len() >= 4 {
            descriptors.push(CaDescriptor {
                ca_system_id: (u16::from(body[0]) << 8) | u16::from(body[1]),
                ca_pid: (u16::from(body[2] & 0x1F) << 8) | u16::from(body[3]),
                dvb_cissa,
            });
        }
    });
    descriptors
}

/// Decode a CAT's CA descriptors.
pub fn decode_cat(section: &Section) -> UpipeResult<Vec<CaDescriptor>> {
    let data = table_data(section)?;
    Ok(find_ca_descriptors(data))
}

// --- SDT (table_id 0x42 actual / 0x46 other) -----------------------------

const DESCRIPTOR_TAG_SERVICE: u8 = 0x48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdtService {
    pub service_id: u16,
    pub eit_schedule: bool,
    pub eit_present_following: bool,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub provider_name: Option<String>,
    pub service_name: Option<String>,
}

fn decode_service_descriptor(body: &[u8]) -> Option<(String, String)> {
    if body.len() < 3 {
        return None;
    }
    let provider_len = usize::from(body[1]);
    let provider_bytes = body.get(2..2 + provider_len)?;
    let name_len_offset = 2 + provider_len;
    let name_len = usize::from(*body.get(name_len_offset)?);
    let name_bytes = body.get(name_len_offset + 1..name_len_offset + 1 + name_len)?;
    Some((String::from_utf8_lossy(provider_bytes).into_owned(), String::from_utf8_lossy(name_bytes).into_owned()))
}

pub fn decode_sdt(section: &Section) -> UpipeResult<Vec<SdtService>> {
    let data = table_data(section)?;
    if data.len() < 3 {
        return Err(UpipeError::Invalid("SDT section too short for original_network_id".into()));
    }
    let mut offset = 3; // original_network_id(2) + reserved(1)
    let mut services = Vec::new();
    while offset + 5 <= data.len() {
        let service_id = (u16::from(data[offset]) << 8) | u16::from(data[offset + 1]);
        let flags = data[offset + 2];
        let eit_schedule = flags & 0x02 != 0;
        let eit_present_following = flags & 0x01 != 0;
        let running_status = (data[offset + 3] & 0xE0) >> 5;
        let free_ca_mode = data[offset + 3] & 0x10 != 0;
        let descriptors_loop_length = (usize::from(data[offset + 3] & 0x0F) << 8) | usize::from(data[offset + 4]);
        offset += 5;
        if offset + descriptors_loop_length > data.len() {
            return Err(UpipeError::Invalid("SDT descriptors_loop_length overruns the section".into()));
        }
        let descriptors = &data[offset..offset + descriptors_loop_length];
        let mut provider_name = None;
        let mut service_name = None;
        each_descriptor(descriptors, |tag, body| {
            if tag == DESCRIPTOR_TAG_SERVICE {
                if let Some((provider, name)) = decode_service_descriptor(body) {
                    provider_name = Some(provider);
                    service_name = Some(name);
                }
            }
        });
        offset += descriptors_loop_length;
        services.push(SdtService {
            service_id,
            eit_schedule,
            eit_present_following,
            running_status,
            free_ca_mode,
            provider_name,
            service_name,
        });
    }
    Ok(services)
}

// --- TDT (table_id 0x70) / TOT share the MJD+BCD time encoding ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DvbTime {
    pub year: u32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

fn bcd_to_decimal(byte: u8) -> u32 {
    u32::from((byte >> 4) * 10 + (byte & 0x0F))
}

/// Decode a 5-byte MJD + 3-byte-BCD UTC timestamp (ETSI EN 300 468 Annex C).
pub fn decode_dvb_time(bytes: &[u8]) -> UpipeResult<DvbTime> {
    if bytes.len() < 5 {
        return Err(UpipeError::Invalid("DVB time field is shorter than 5 bytes".into()));
    }
    let mjd = (u32::from(bytes[0]) << 8) | u32::from(bytes[1]);
    let y = ((f64::from(mjd) - 15078.2) / 365.25) as u32;
    let m = ((f64::from(mjd) - 14956.1 - f64::from((f64::from(y) * 365.25) as u32)) / 30.6001) as u32;
    let day = mjd - 14956 - (f64::from(y) * 365.25) as u32 - (f64::from(m) * 30.6001) as u32;
    let k = u32::from(m == 14 || m == 15);
    let year = 1900 + y + k;
    let month = m - 1 - k * 12;

    Ok(DvbTime {
        year,
        month,
        day,
        hour: bcd_to_decimal(bytes[2]),
        minute: bcd_to_decimal(bytes[3]),
        second: bcd_to_decimal(bytes[4]),
    })
}

/// TDT/TOT have no `table_id_extension`/version/current_next/section
/// fields — just `table_id(1) + section_length(2) + utc_time(5)` — so
/// this re-anchors at byte 3 instead of sharing [`TABLE_DATA_OFFSET`].
pub fn decode_tdt(section: &Section) -> UpipeResult<DvbTime> {
    let bytes = &section.bytes[..];
    let data = bytes.get(3..bytes.len() - 4).ok_or_else(|| UpipeError::Invalid("TDT section too short".into()))?;
    decode_dvb_time(data)
}

// --- NIT (table_id 0x40 actual / 0x41 other) -----------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NitTransportStream {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
}

pub fn decode_nit(section: &Section) -> UpipeResult<(u16, Vec<NitTransportStream>)> {
    let network_id = table_id_extension(section)?;
    let data = table_data(section)?;
    if data.len() < 2 {
        return Err(UpipeError::Invalid("NIT section too short for network_descriptors_length".into()));
    }
    let network_descriptors_length = (usize::from(data[0] & 0x0F) << 8) | usize::from(data[1]);
    let mut offset = 2 + network_descriptors_length;
    if offset + 2 > data.len() {
        return Err(UpipeError::Invalid("NIT network_descriptors_length overruns the section".into()));
    }
    let ts_loop_length = (usize::from(data[offset] & 0x0F) << 8) | usize::from(data[offset + 1]);
    offset += 2;
    let end = (offset + ts_loop_length).min(data.len());
    let mut entries = Vec::new();
    while offset + 6 <= end {
        let transport_stream_id = (u16::from(data[offset]) << 8) | u16::from(data[offset + 1]);
        let original_network_id = (u16::from(data[offset + 2]) << 8) | u16::from(data[offset + 3]);
        let descriptors_length = (usize::from(data[offset + 4] & 0x0F) << 8) | usize::from(data[offset + 5]);
        offset += 6 + descriptors_length;
        entries.push(NitTransportStream { transport_stream_id, original_network_id });
    }
    Ok((network_id, entries))
}

// --- EIT (table_id 0x4E/0x4F present-following, 0x50-0x6F schedule) ------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EitEvent {
    pub event_id: u16,
    pub start: DvbTime,
    pub duration_seconds: u32,
    pub running_status: u8,
    pub free_ca_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eit {
    pub service_id: u16,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub events: Vec<EitEvent>,
}

pub fn decode_eit(section: &Section) -> UpipeResult<Eit> {
    let service_id = table_id_extension(section)?;
    let data = table_data(section)?;
    if data.len() < 6 {
        return Err(UpipeError::Invalid("EIT section too short for its fixed fields".into()));
    }
    let transport_stream_id = (u16::from(data[0]) << 8) | u16::from(data[1]);
    let original_network_id = (u16::from(data[2]) << 8) | u16::from(data[3]);
    // data[4] = segment_last_section_number, data[5] = last_table_id
    let mut offset = 6;
    let mut events = Vec::new();
    while offset + 12 <= data.len() {
        let event_id = (u16::from(data[offset]) << 8) | u16::from(data[offset + 1]);
        let start = decode_dvb_time(&data[offset + 2..offset + 7])?;
        let duration_seconds = bcd_to_decimal(data[offset + 7]) * 3600
            + bcd_to_decimal(data[offset + 8]) * 60
            + bcd_to_decimal(data[offset + 9]);
        let running_status = (data[offset + 10] & 0xE0) >> 5;
        let free_ca_mode = data[offset + 10] & 0x10 != 0;
        let descriptors_loop_length = (usize::from(data[offset + 10] & 0x0F) << 8) | usize::from(data[offset + 11]);
        offset += 12 + descriptors_loop_length;
        events.push(EitEvent { event_id, start, duration_seconds, running_status, free_ca_mode });
    }
    Ok(Eit { service_id, transport_stream_id, original_network_id, events })
}

/// `true` for any present/following table_id (actual or other TS), as
/// opposed to the `0x50..=0x6F` schedule range.
#[must_use]
pub fn eit_is_present_following(table_id: u8) -> bool {
    matches!(table_id, 0x4E | 0x4F)
}

// --- SCTE-35 splice_info_section (table_id 0xFC) -------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceCommand {
    SpliceNull,
    SpliceSchedule,
    SpliceInsert,
    TimeSignal,
    BandwidthReservation,
    PrivateCommand,
    Unknown(u8),
}

fn splice_command_from_type(t: u8) -> SpliceCommand {
    match t {
        0x00 => SpliceCommand::SpliceNull,
        0x04 => SpliceCommand::SpliceSchedule,
        0x05 => SpliceCommand::SpliceInsert,
        0x06 => SpliceCommand::TimeSignal,
        0x07 => SpliceCommand::BandwidthReservation,
        0xFF => SpliceCommand::PrivateCommand,
        other => SpliceCommand::Unknown(other),
    }
}

/// Decode only the `splice_command_type` of an SCTE-35 `splice_info_section`;
/// this is the probe surface a downstream splicer pipe would filter on, with
/// no action taken on the command here. `section.bytes` must be the whole
/// section, table_id through the byte before the trailing CRC.
pub fn decode_splice_command(section: &Section) -> UpipeResult<SpliceCommand> {
    let bytes = &section.bytes[..];
    // table_id(1) + section_length(2) + protocol_version(1) +
    // encrypted_packet_flag/pts_adjustment hi bits(1) + pts_adjustment
    // low(4) + cw_index(1) + tier(2, 12 bits used) + splice_command_length(2)
    // + splice_command_type(1)
    const SPLICE_COMMAND_TYPE_OFFSET: usize = 13;
    let byte = bytes
        .get(SPLICE_COMMAND_TYPE_OFFSET)
        .ok_or_else(|| UpipeError::Invalid("splice_info_section too short for splice_command_type".into()))?;
    Ok(splice_command_from_type(*byte))
}

/// Auto-detected flavor of a transport stream's service information layout.
/// ISDB reuses the DVB table_ids but is never chosen by auto-detection —
/// only set explicitly by a caller that knows it is demuxing an ISDB stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conformance {
    Iso,
    Dvb,
    DvbNoTables,
    Atsc,
    Isdb,
}

/// Guess the stream's conformance from the NIT pid carried in the PAT's
/// `program_number == 0` entry: pid 0 means no NIT is signalled at all
/// (`DVB_NO_TABLES`); pid 16 is the conventional DVB NIT location (`DVB` —
/// it could also be ISDB, but that is never auto-chosen); anything else
/// falls back to bare ISO/IEC 13818-1.
#[must_use]
pub fn guess_conformance(nit_pid: u16) -> Conformance {
    match nit_pid {
        0 => Conformance::DvbNoTables,
        16 => Conformance::Dvb,
        _ => Conformance::Iso,
    }
}
