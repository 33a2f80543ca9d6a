// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Typed attribute dictionary embedded in a [`crate::uref::Uref`].

use indexmap::IndexMap;

/// One typed attribute value.
///
/// Numeric variants mirror the wire-level type vocabulary (opaque blob,
/// UTF-8 string, void/presence, bool, small signed/unsigned 8-bit, 64-bit
/// unsigned/signed, rational, IEEE-754 double) rather than collapsing
/// everything into `serde_json::Value`: udict's contract is that every
/// attribute has one fixed declared type, and `get_T`/`set_T` pairs must
/// round-trip exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum UdictValue {
    Opaque(Vec<u8>),
    String(String),
    /// Presence-only flag; carries no payload.
    Void,
    Bool(bool),
    Small(i8),
    SmallUnsigned(u8),
    U64(u64),
    /// `i64::MIN` is never constructed here; see [`UdictValue::signed64`].
    I64(i64),
    Rational { num: i64, den: u64 },
    Float(f64),
}

/// Error returned by attribute setters that validate their input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UdictError {
    /// `i64::MIN` has no sign-and-magnitude representation in the wire
    /// format and is rejected rather than silently truncated.
    #[error("i64::MIN is not representable as a signed udict attribute")]
    UnrepresentableMinInt,
}

impl UdictValue {
    /// Construct a signed-64 value, rejecting the one value the wire format
    /// cannot carry.
    pub fn signed64(v: i64) -> Result<Self, UdictError> {
        if v == i64::MIN {
            return Err(UdictError::UnrepresentableMinInt);
        }
        Ok(Self::I64(v))
    }
}

/// Typed key/value store. Ordering is not a guaranteed part of the
/// contract even though the backing map happens to preserve insertion
/// order; callers must not depend on iteration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Udict {
    attrs: IndexMap<String, UdictValue>,
}

impl Udict {
    #[must_use]
    pub fn new() -> Self {
        Self { attrs: IndexMap::new() }
    }

    /// `uref_attr_get_*`: present+value or absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&UdictValue> {
        self.attrs.get(key)
    }

    /// `set_*`: insert or overwrite. Conceptually this "may reallocate the
    /// uref to grow storage"; here that's just `IndexMap` growth, which
    /// `&mut self` already models without a pointer-to-pointer dance.
    pub fn set(&mut self, key: impl Into<String>, value: UdictValue) {
        self.attrs.insert(key.into(), value);
    }

    /// `delete_*`: remove one attribute. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.attrs.shift_remove(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// `copy_list`: copy every attribute named in `keys` from `src` into
    /// `self`, overwriting any existing value.
    pub fn copy_list(&mut self, src: &Self, keys: &[&str]) {
        for &key in keys {
            if let Some(v) = src.attrs.get(key) {
                self.attrs.insert(key.to_string(), v.clone());
            }
        }
    }

    /// `delete_list`: remove every attribute named in `keys`.
    pub fn delete_list(&mut self, keys: &[&str]) {
        for &key in keys {
            self.attrs.shift_remove(key);
        }
    }

    /// Copy every attribute from `src` into `self`, overwriting existing
    /// values on key collision. Used by pipes that splice a whole
    /// attribute set into another uref's dictionary (e.g. `setflowdef`
    /// injecting SDT attributes into a PMT flow def) without needing to
    /// name each key up front the way `copy_list` does.
    pub fn merge(&mut self, src: &Self) {
        for (key, value) in &src.attrs {
            self.attrs.insert(key.clone(), value.clone());
        }
    }

    /// The well-known `flow.def` attribute, if any.
    #[must_use]
    pub fn flow_def(&self) -> Option<&str> {
        match self.attrs.get(FLOW_DEF) {
            Some(UdictValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn set_flow_def(&mut self, def: impl Into<String>) {
        self.set(FLOW_DEF, UdictValue::String(def.into()));
    }

    /// Prefix-based flow-def matching: `self`'s flow def must start with
    /// `prefix` for the attached ubuf to be considered compatible with a
    /// pipe expecting `prefix`.
    #[must_use]
    pub fn flow_def_matches(&self, prefix: &str) -> bool {
        self.flow_def().is_some_and(|def| def.starts_with(prefix))
    }
}

/// Well-known attribute keys.
pub const FLOW_DEF: &str = "flow.def";
pub const FLOW_ID: &str = "flow.id";
pub const FLOW_RAW_DEF: &str = "flow.raw_def";
pub const FLOW_HEADERS: &str = "flow.headers";
pub const FLOW_LATENCY: &str = "flow.latency";

pub const K_PTS_ORIG: &str = "k.pts_orig";
pub const K_DTS_ORIG: &str = "k.dts_orig";
pub const K_PTS_PROG: &str = "k.pts_prog";
pub const K_DTS_PROG: &str = "k.dts_prog";
pub const K_PTS_SYS: &str = "k.pts_sys";
pub const K_DTS_SYS: &str = "k.dts_sys";
pub const K_RAP_SYS: &str = "k.rap_sys";
pub const K_DTS_PTS_DELAY: &str = "k.dts_pts_delay";
pub const K_CR_DTS_DELAY: &str = "k.cr_dts_delay";

/// `discontinuity` flag set on the next downstream uref when continuity is
/// lost.
pub const K_DISCONTINUITY: &str = "k.discontinuity";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_round_trip() {
        let mut d = Udict::new();
        d.set("k.pts_orig", UdictValue::U64(12345));
        assert_eq!(d.get("k.pts_orig"), Some(&UdictValue::U64(12345)));
        assert_eq!(d.get("missing"), None);
    }

    #[test]
    fn signed64_rejects_min() {
        assert_eq!(UdictValue::signed64(i64::MIN), Err(UdictError::UnrepresentableMinInt));
        assert!(UdictValue::signed64(i64::MIN + 1).is_ok());
        assert!(UdictValue::signed64(-1).is_ok());
    }

    #[test]
    fn copy_then_delete_list_clears_named_attributes() {
        let mut src = Udict::new();
        src.set("a", UdictValue::Bool(true));
        src.set("b", UdictValue::Small(-1));
        src.set("c", UdictValue::Void);

        let mut dst = Udict::new();
        dst.copy_list(&src, &["a", "b"]);
        assert_eq!(dst.len(), 2);

        dst.delete_list(&["a", "b"]);
        assert!(dst.is_empty());
    }

    #[test]
    fn merge_overwrites_on_key_collision() {
        let mut src = Udict::new();
        src.set("a", UdictValue::Bool(true));
        src.set_flow_def("block.mpegtspsi.pmt.");

        let mut dst = Udict::new();
        dst.set("a", UdictValue::Bool(false));
        dst.set("b", UdictValue::Void);
        dst.merge(&src);

        assert_eq!(dst.get("a"), Some(&UdictValue::Bool(true)));
        assert_eq!(dst.get("b"), Some(&UdictValue::Void));
        assert_eq!(dst.flow_def(), Some("block.mpegtspsi.pmt."));
    }

    #[test]
    fn flow_def_prefix_match() {
        let mut d = Udict::new();
        d.set_flow_def("block.mpegts.");
        assert!(d.flow_def_matches("block."));
        assert!(d.flow_def_matches("block.mpegts."));
        assert!(!d.flow_def_matches("pic."));
    }
}
