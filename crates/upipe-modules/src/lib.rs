// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Small utility pipes used for plumbing (setrap, setflowdef, idem, null,
//! probe-uref) and the pipeline DOT dump utility.

pub mod dump;
pub mod idem;
pub mod null;
pub mod probe_uref;
pub mod setflowdef;
pub mod setrap;

pub use dump::dump_dot;
pub use idem::{IdemMgr, IdemPipe};
pub use null::{NullMgr, NullPipe};
pub use probe_uref::{ProbeUrefMgr, ProbeUrefPipe};
pub use setflowdef::{SetFlowDefMgr, SetFlowDefPipe};
pub use setrap::{SetrapMgr, SetrapPipe};
