// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `uref`: the pipeline's unit of flow — a ubuf (possibly absent, for
//! "control" urefs) plus an attribute dictionary.

use std::sync::Arc;

use crate::ubuf::Ubuf;
use crate::udict::{Udict, UdictValue, K_DISCONTINUITY, K_DTS_ORIG, K_DTS_PROG, K_PTS_ORIG, K_RAP_SYS};

/// One uref. Cloning is shallow: the ubuf's `Arc` is bumped and the udict
/// is copied.
#[derive(Debug, Clone)]
pub struct Uref {
    ubuf: Option<Arc<Ubuf>>,
    attrs: Udict,
}

impl Uref {
    /// A control uref: no payload, attributes only (e.g. a flow-def change
    /// or a program descriptor).
    #[must_use]
    pub fn new_control() -> Self {
        Self { ubuf: None, attrs: Udict::new() }
    }

    #[must_use]
    pub fn with_ubuf(ubuf: Ubuf) -> Self {
        Self { ubuf: Some(Arc::new(ubuf)), attrs: Udict::new() }
    }

    #[must_use]
    pub fn ubuf(&self) -> Option<&Ubuf> {
        self.ubuf.as_deref()
    }

    /// `writable(mgr, &ubuf)`: mutable access to the payload, duplicating
    /// it first if this uref does not hold the sole reference.
    pub fn writable_ubuf(&mut self) -> Option<&mut Ubuf> {
        let arc = self.ubuf.as_mut()?;
        Some(Arc::make_mut(arc))
    }

    pub fn set_ubuf(&mut self, ubuf: Ubuf) {
        self.ubuf = Some(Arc::new(ubuf));
    }

    #[must_use]
    pub fn attrs(&self) -> &Udict {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut Udict {
        &mut self.attrs
    }

    #[must_use]
    pub fn flow_def(&self) -> Option<&str> {
        self.attrs.flow_def()
    }

    pub fn set_flow_def(&mut self, def: impl Into<String>) {
        self.attrs.set_flow_def(def);
    }

    #[must_use]
    pub fn pts_orig(&self) -> Option<u64> {
        match self.attrs.get(K_PTS_ORIG) {
            Some(UdictValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn set_pts_orig(&mut self, v: u64) {
        self.attrs.set(K_PTS_ORIG, UdictValue::U64(v));
    }

    #[must_use]
    pub fn dts_orig(&self) -> Option<u64> {
        match self.attrs.get(K_DTS_ORIG) {
            Some(UdictValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn set_dts_orig(&mut self, v: u64) {
        self.attrs.set(K_DTS_ORIG, UdictValue::U64(v));
    }

    /// The reconstructed, unwrapped program-time DTS, distinct from
    /// [`Self::dts_orig`]'s raw 33-bit wire value.
    #[must_use]
    pub fn dts_prog(&self) -> Option<u64> {
        match self.attrs.get(K_DTS_PROG) {
            Some(UdictValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn set_dts_prog(&mut self, v: u64) {
        self.attrs.set(K_DTS_PROG, UdictValue::U64(v));
    }

    #[must_use]
    pub fn rap_sys(&self) -> Option<u64> {
        match self.attrs.get(K_RAP_SYS) {
            Some(UdictValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn set_rap_sys(&mut self, v: u64) {
        self.attrs.set(K_RAP_SYS, UdictValue::U64(v));
    }

    /// Set the `discontinuity` flag on the next downstream uref after a
    /// continuity loss, rather than throwing an event for every one.
    pub fn set_discontinuity(&mut self) {
        self.attrs.set(K_DISCONTINUITY, UdictValue::Void);
    }

    #[must_use]
    pub fn has_discontinuity(&self) -> bool {
        self.attrs.get(K_DISCONTINUITY).is_some()
    }

    /// True when no other `Uref` shares this payload, i.e. an in-place
    /// mutation would not need to duplicate.
    #[must_use]
    pub fn has_unique_ubuf(&self) -> bool {
        self.ubuf.as_ref().is_none_or(|u| Arc::strong_count(u) == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ubuf::BlockUbuf;

    #[test]
    fn clone_shares_ubuf_until_written() {
        let mut a = Uref::with_ubuf(Ubuf::Block(BlockUbuf::from_vec(vec![1, 2, 3])));
        let b = a.clone();
        assert!(!a.has_unique_ubuf());
        let block = a.writable_ubuf().unwrap().as_block_mut().unwrap();
        block.write(0, 1).unwrap()[0] = 9;
        assert_eq!(b.ubuf().unwrap().as_block().unwrap().read(0, 1).unwrap()[0], 1);
        assert_eq!(a.ubuf().unwrap().as_block().unwrap().read(0, 1).unwrap()[0], 9);
    }

    #[test]
    fn control_uref_has_no_payload() {
        let u = Uref::new_control();
        assert!(u.ubuf().is_none());
        assert!(u.has_unique_ubuf());
    }
}
