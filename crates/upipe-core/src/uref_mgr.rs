// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `uref_mgr`: pool handing out [`Uref`]s, paired with a [`UbufMgr`] for
//! their payloads.

use crate::ubuf_mgr::UbufMgr;
use crate::uref::Uref;

/// Immutable-after-construction uref allocator. Allocating a control uref
/// never touches the ubuf pool; allocating a block uref pulls its storage
/// from `ubuf_mgr`.
#[derive(Clone)]
pub struct UrefMgr {
    ubuf_mgr: UbufMgr,
}

impl UrefMgr {
    #[must_use]
    pub fn new(ubuf_mgr: UbufMgr) -> Self {
        Self { ubuf_mgr }
    }

    #[must_use]
    pub fn alloc_control(&self) -> Uref {
        Uref::new_control()
    }

    #[must_use]
    pub fn alloc_block(&self, len: usize) -> Uref {
        Uref::with_ubuf(crate::ubuf::Ubuf::Block(self.ubuf_mgr.alloc_block(len)))
    }

    #[must_use]
    pub fn ubuf_mgr(&self) -> &UbufMgr {
        &self.ubuf_mgr
    }
}
