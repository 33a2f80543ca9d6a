// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! SYNC helper: tri-state sync-acquired flag, throwing `SYNC_ACQUIRED` /
//! `SYNC_LOST` on transitions.

use crate::uprobe::{ProbeStatus, UprobeChain, UprobeEvent};
use crate::uprobe::PipeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Unknown,
    Acquired,
    Lost,
}

/// Debounces repeated observations of the same sync state so that
/// `SYNC_ACQUIRED`/`SYNC_LOST` only fire on an actual transition, never on
/// every packet.
pub struct SyncHelper {
    state: SyncState,
}

impl Default for SyncHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncHelper {
    #[must_use]
    pub fn new() -> Self {
        Self { state: SyncState::Unknown }
    }

    #[must_use]
    pub fn is_acquired(&self) -> bool {
        self.state == SyncState::Acquired
    }

    /// Update the observed sync state, throwing the matching event on
    /// `probes` exactly when the state actually changes.
    pub fn update(&mut self, pipe: PipeId, probes: &UprobeChain, acquired: bool) {
        let new_state = if acquired { SyncState::Acquired } else { SyncState::Lost };
        if new_state == self.state {
            return;
        }
        self.state = new_state;
        let event = if acquired { UprobeEvent::SyncAcquired } else { UprobeEvent::SyncLost };
        let status = probes.throw(pipe, &event);
        debug_assert!(status == ProbeStatus::Handled || status == ProbeStatus::Unhandled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use crate::uprobe::FnProbe;

    #[test]
    fn fires_only_on_transition() {
        let acquired_count = Arc::new(AtomicUsize::new(0));
        let lost_count = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&acquired_count);
        let l = Arc::clone(&lost_count);

        let chain = UprobeChain::new().with(Arc::new(FnProbe(move |_pipe, event| {
            match event {
                UprobeEvent::SyncAcquired => {
                    a.fetch_add(1, Ordering::SeqCst);
                }
                UprobeEvent::SyncLost => {
                    l.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }
            ProbeStatus::Handled
        })));

        let mut sync = SyncHelper::new();
        sync.update(PipeId(1), &chain, true);
        sync.update(PipeId(1), &chain, true);
        sync.update(PipeId(1), &chain, true);
        assert_eq!(acquired_count.load(Ordering::SeqCst), 1);

        sync.update(PipeId(1), &chain, false);
        sync.update(PipeId(1), &chain, false);
        assert_eq!(lost_count.load(Ordering::SeqCst), 1);
    }
}
