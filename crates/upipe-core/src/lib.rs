// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core pipe, buffer, and reference-counting model for a modular
//! multimedia streaming pipeline.
//!
//! This crate carries no I/O and no codec logic: it is the dataflow and
//! negotiation substrate that concrete pipes (in `upipe-modules`,
//! `upipe-ts`, `upipe-http`) build on.

pub mod config;
pub mod error;
pub mod helpers;
pub mod refcount;
pub mod registry;
pub mod ubuf;
pub mod ubuf_mgr;
pub mod uclock;
pub mod udict;
pub mod upipe;
pub mod uprobe;
pub mod uref;
pub mod uref_mgr;
pub mod urequest;

pub use error::{UpipeError, UpipeResult};
pub use refcount::Urefcount;
pub use ubuf::{BlockUbuf, PictureUbuf, SoundUbuf, Ubuf};
pub use ubuf_mgr::UbufMgr;
pub use uclock::{Uclock, UCLOCK_FREQ};
pub use udict::{Udict, UdictValue};
pub use upipe::{SharedUpipe, Upipe, UpipeCommand, UpipeMgr, UpipeResponse};
pub use uprobe::{PipeId, ProbeStatus, Uprobe, UprobeChain, UprobeEvent};
pub use uref::Uref;
pub use uref_mgr::UrefMgr;
pub use urequest::{ProvideArgs, RequestKind, Urequest};
