// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A thin binary exercising the demux bin core end to end: a TS file (or,
//! with no file given, a small synthesized stream) feeds a [`DemuxBin`],
//! a probe logs every discovered program and elementary stream, and the
//! resulting pipeline shape is optionally dumped to Graphviz `dot`. A
//! small CLI on top of the library crates, with no logic of its own
//! beyond argument parsing and wiring.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use upipe_core::{BlockUbuf, FnProbe, PipeId, ProbeStatus, SharedUpipe, Ubuf, Upipe, UpipeCommand, Uref, UprobeChain, UprobeEvent};
use upipe_modules::dump::{dump_dot, DumpEdge, DumpGraph, DumpNode};
use upipe_modules::null::NullPipe;
use upipe_ts::demux::{DemuxBin, NewEsStream, NewProgram, FAMILY as DEMUX_FAMILY};
use upipe_ts::{FLOW_DEF_MPEGTS_ALIGNED, TS_PACKET_SIZE};

#[derive(Parser, Debug)]
#[command(author, version, about = "Upipe-rs TS demux demonstration", long_about = None)]
struct Cli {
    /// Path to an MPEG-TS file. With none given, a small synthesized
    /// single-program stream is demuxed instead.
    input: Option<PathBuf>,
    /// Write the discovered pipeline shape as Graphviz `dot` to this path.
    #[arg(long)]
    dot: Option<PathBuf>,
    /// Decode present/following EIT service schedule data.
    #[arg(long)]
    eit: bool,
}

/// Pipeline-shape bookkeeping fed by the demux bin's `NEW_PROGRAM`/`NEW_ES`
/// events, turned into a [`DumpGraph`] at the end of the run: the dump
/// utility renders a caller-supplied description, it does not walk live
/// pipe objects itself.
#[derive(Default)]
struct GraphRecorder {
    graph: Mutex<DumpGraph>,
}

impl GraphRecorder {
    fn record_program(&self, program: &NewProgram) {
        let mut graph = self.graph.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = u64::from(program.program_number) << 16;
        graph.nodes.push(DumpNode { id, label: format!("program {}", program.program_number) });
        graph.edges.push(DumpEdge { from: 0, to: id, flow_def: Some(format!("ts.pmt_pid={}", program.pmt_pid)) });
    }

    fn record_es(&self, es: &NewEsStream) {
        let mut graph = self.graph.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let program_id = u64::from(es.program_number) << 16;
        let es_id = program_id | u64::from(es.pid);
        graph.nodes.push(DumpNode { id: es_id, label: format!("pid 0x{:x} (stream_type 0x{:02x})", es.pid, es.stream_type) });
        graph.edges.push(DumpEdge { from: program_id, to: es_id, flow_def: None });
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let recorder = Arc::new(GraphRecorder::default());
    let recorder_for_probe = Arc::clone(&recorder);
    let probe = FnProbe(move |_pipe, event: &UprobeEvent| {
        let UprobeEvent::Local(family, name, payload) = event else { return ProbeStatus::Unhandled };
        if *family != DEMUX_FAMILY {
            return ProbeStatus::Unhandled;
        }
        match *name {
            "NEW_PROGRAM" => {
                if let Some(program) = payload.downcast_ref::<NewProgram>() {
                    info!(program_number = program.program_number, pmt_pid = program.pmt_pid, "discovered program");
                    recorder_for_probe.record_program(program);
                }
            }
            "NEW_ES" => {
                if let Some(es) = payload.downcast_ref::<NewEsStream>() {
                    info!(program_number = es.program_number, pid = es.pid, stream_type = es.stream_type, "discovered elementary stream");
                    recorder_for_probe.record_es(es);
                    // No real sink is in scope here; wire a `null` sink so
                    // the ES's setrap/decaps chain has somewhere to deliver
                    // access units instead of silently warning on drop.
                    let sink: SharedUpipe = Arc::new(Mutex::new(NullPipe::new(UprobeChain::new())));
                    es.decaps.lock().unwrap_or_else(std::sync::PoisonError::into_inner).set_output(PipeId(0), sink);
                }
            }
            _ => return ProbeStatus::Unhandled,
        }
        ProbeStatus::Unhandled
    });

    let mut demux = DemuxBin::new(UprobeChain::new().with(Arc::new(probe)));
    if cli.eit {
        demux.enable_eit();
    }

    let mut aligned = Uref::new_control();
    aligned.set_flow_def(FLOW_DEF_MPEGTS_ALIGNED);
    demux.control(UpipeCommand::SetFlowDef(aligned)).expect("demux bin always accepts SET_FLOW_DEF");

    let bytes = match &cli.input {
        Some(path) => fs::read(path).with_context(|| format!("reading {}", path.display()))?,
        None => synthesized_stream(),
    };
    for packet in bytes.chunks(TS_PACKET_SIZE) {
        if packet.len() < TS_PACKET_SIZE {
            break;
        }
        demux.input(Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(packet.to_vec()))));
    }

    info!(conformance = ?demux.conformance(), programs = ?demux.programs(), "demux finished");

    if let Some(path) = cli.dot {
        let graph = recorder.graph.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut graph = graph.clone();
        graph.nodes.insert(0, DumpNode { id: 0, label: "ts_demux".to_string() });
        fs::write(&path, dump_dot(&graph)).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "wrote pipeline graph");
    }

    Ok(())
}

/// A minimal single-program, single-ES TS stream (PAT + PMT + one bare
/// video PID), just enough to exercise the demo without requiring a
/// sample file on disk.
fn synthesized_stream() -> Vec<u8> {
    use upipe_ts::crc32::crc32_mpeg;

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

    fn packets_for_section(pid: u16, section: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8]; // pointer_field
        payload.extend_from_slice(section);
        let mut out = Vec::new();
        let mut first = true;
        for chunk in payload.chunks(184) {
            let mut p = vec![0xFFu8; TS_PACKET_SIZE];
            p[0] = 0x47;
            p[1] = (if first { 0x40 } else { 0 }) | (((pid >> 8) as u8) & 0x1F);
            p[2] = (pid & 0xFF) as u8;
            p[3] = 0x10;
            p[4..4 + chunk.len()].copy_from_slice(chunk);
            out.extend_from_slice(&p);
            first = false;
        }
        out
    }

    let mut stream = Vec::new();
    let pat_body = [0u8, 1, 0xE1, 0x00]; // program 1 -> PMT pid 0x100
    stream.extend(packets_for_section(0, &section(0x00, 1, &pat_body)));

    let mut pmt_body = vec![0xE1, 0x01, 0xF0, 0x00]; // pcr_pid = 0x101
    pmt_body.extend_from_slice(&[0x1B, 0xE1, 0x02, 0xF0, 0x00]); // H.264 video, pid 0x102
    stream.extend(packets_for_section(0x100, &section(0x02, 1, &pmt_body)));

    // One bare PES-bearing packet on the video pid, payload-unit-start
    // set, just enough for `ts_decaps`/the PES header parser to chew on.
    let pes = [0u8, 0, 1, 0xE0, 0, 0, 0x80, 0x00, 0, 1, 2, 3, 4];
    let mut p = vec![0xFFu8; TS_PACKET_SIZE];
    p[0] = 0x47;
    p[1] = 0x40 | (((0x102u16 >> 8) as u8) & 0x1F);
    p[2] = (0x102u16 & 0xFF) as u8;
    p[3] = 0x10;
    p[4..4 + pes.len()].copy_from_slice(&pes);
    stream.extend_from_slice(&p);

    stream
}
