// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! SUBPIPE / SUB_SUPER helper: a super-pipe owns a list of sub-pipes, and
//! each sub-pipe can find its super.
//!
//! Addresses the bin back-reference problem directly: a naive `Arc` cycle
//! (super holds subs, sub holds super) never frees. This splits "what the
//! outside world holds" from "what the
//! super holds" by having the super own strong references to its subs and
//! each sub hold only a [`Weak`] back-reference; the super's teardown (on
//! its own external refcount reaching zero) drops its strong list first,
//! which is what actually releases the subs.

use std::sync::{Arc, Mutex, Weak};

use crate::upipe::SharedUpipe;
use crate::uprobe::PipeId;

/// Owned by a super-pipe: the list of its sub-pipes.
pub struct SubpipeList {
    subs: Vec<(PipeId, SharedUpipe)>,
}

impl Default for SubpipeList {
    fn default() -> Self {
        Self::new()
    }
}

impl SubpipeList {
    #[must_use]
    pub fn new() -> Self {
        Self { subs: Vec::new() }
    }

    pub fn add(&mut self, id: PipeId, pipe: SharedUpipe) {
        self.subs.push((id, pipe));
    }

    pub fn remove(&mut self, id: PipeId) -> Option<SharedUpipe> {
        let idx = self.subs.iter().position(|(sid, _)| *sid == id)?;
        Some(self.subs.remove(idx).1)
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &(PipeId, SharedUpipe)> {
        self.subs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Drop every sub-pipe's strong reference, as happens when the super's
    /// own external refcount reaches zero.
    pub fn clear(&mut self) {
        self.subs.clear();
    }
}

/// Owned by a sub-pipe: a non-owning handle back to its super, so holding
/// a sub-pipe never keeps its super alive.
#[derive(Clone)]
pub struct SuperHandle {
    super_pipe: Weak<Mutex<dyn crate::upipe::Upipe>>,
}

impl SuperHandle {
    #[must_use]
    pub fn new(super_pipe: &SharedUpipe) -> Self {
        Self { super_pipe: Arc::downgrade(super_pipe) }
    }

    /// Resolve the super-pipe, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<SharedUpipe> {
        self.super_pipe.upgrade()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpipeResult;
    use crate::upipe::{Upipe, UpipeCommand, UpipeResponse};
    use crate::uprobe::UprobeChain;

    struct Stub(PipeId);
    impl Upipe for Stub {
        fn id(&self) -> PipeId {
            self.0
        }
        fn mgr_name(&self) -> &'static str {
            "stub"
        }
        fn probes(&self) -> &UprobeChain {
            unimplemented!()
        }
        fn probes_mut(&mut self) -> &mut UprobeChain {
            unimplemented!()
        }
        fn control(&mut self, _cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
            Ok(UpipeResponse::Unit)
        }
    }

    #[test]
    fn dropping_super_breaks_the_cycle() {
        let super_pipe: SharedUpipe = Arc::new(Mutex::new(Stub(PipeId(1))));
        let handle = SuperHandle::new(&super_pipe);
        assert!(handle.upgrade().is_some());
        drop(super_pipe);
        assert!(handle.upgrade().is_none());
    }

    #[test]
    fn subpipe_list_add_remove() {
        let mut list = SubpipeList::new();
        let sub: SharedUpipe = Arc::new(Mutex::new(Stub(PipeId(2))));
        list.add(PipeId(2), sub);
        assert_eq!(list.len(), 1);
        assert!(list.remove(PipeId(2)).is_some());
        assert!(list.is_empty());
    }
}
