// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Wires `setrap` into `setflowdef` into `null` using concrete handles
//! (so each hop's inherent `set_output` can be called directly), and
//! separately checks that the same three pipe families are reachable by
//! name through the public manager registry, the way an application
//! builder assembles a pipeline from a textual description rather than
//! hard-coded types.

use std::sync::Arc;

use upipe_core::udict::{Udict, UdictValue};
use upipe_core::registry::UpipeMgrRegistry;
use upipe_core::upipe::{SharedUpipe, Upipe, UpipeCommand, UpipeMgr};
use upipe_core::uprobe::{PipeId, UprobeChain};
use upipe_core::uref::Uref;

use upipe_modules::null::{NullMgr, NullPipe};
use upipe_modules::setflowdef::{set_dict, SetFlowDefMgr, SetFlowDefPipe};
use upipe_modules::setrap::{set_rap, SetrapMgr, SetrapPipe};

#[test]
fn every_pipe_family_is_reachable_by_name_through_the_registry() {
    let mut reg = UpipeMgrRegistry::new();
    reg.register(Arc::new(SetrapMgr)).unwrap();
    reg.register(Arc::new(SetFlowDefMgr)).unwrap();
    reg.register(Arc::new(NullMgr)).unwrap();

    for name in ["setrap", "setflowdef", "null"] {
        let mgr = reg.require(name).expect("registered manager");
        assert_eq!(mgr.name(), name);
        mgr.alloc(UprobeChain::new()).expect("manager allocates a pipe");
    }
    assert!(reg.require("does_not_exist").is_err());
}

#[test]
fn rap_sys_stamp_and_flow_def_override_both_reach_the_sink_through_a_three_hop_chain() {
    let mut setrap = SetrapPipe::new(UprobeChain::new());
    setrap.control(set_rap(99)).unwrap();

    let mut setflowdef = SetFlowDefPipe::new(UprobeChain::new());
    let mut overrides = Udict::new();
    overrides.set("dvb.service_name", UdictValue::String("Demo Service".into()));
    setflowdef.control(set_dict(overrides)).unwrap();

    let sink = Arc::new(std::sync::Mutex::new(NullPipe::new(UprobeChain::new())));
    setflowdef.set_output(PipeId(2), Arc::clone(&sink) as SharedUpipe);

    let mut def = Uref::new_control();
    def.set_flow_def("block.mpegtspsi.pmt.");
    setflowdef.control(UpipeCommand::SetFlowDef(def)).unwrap();

    let setflowdef: SharedUpipe = Arc::new(std::sync::Mutex::new(setflowdef));
    setrap.set_output(PipeId(1), Arc::clone(&setflowdef));
    setrap.control(UpipeCommand::SetFlowDef(Uref::new_control())).unwrap();

    let mut uref = Uref::new_control();
    uref.set_pts_orig(7);
    setrap.input(uref);

    assert_eq!(sink.lock().unwrap().dropped_count(), 1);
}
