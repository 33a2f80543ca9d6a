// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! BIN_INPUT / BIN_OUTPUT helper: a composite pipe's control surface is
//! inherited from its first and last inner pipes.

use crate::error::{UpipeError, UpipeResult};
use crate::upipe::{SharedUpipe, UpipeCommand, UpipeResponse};

/// Tracks a bin's first and last inner pipe. Requests and `SET_FLOW_DEF`
/// are forwarded to `first`; downstream control (`GET_OUTPUT`, etc.) to
/// `last`. A bin with no inner pipes yet simply reports `Unhandled` for
/// anything it would otherwise forward — matching a bin that has not
/// finished building its inner topology.
#[derive(Default)]
pub struct BinHelper {
    first_inner: Option<SharedUpipe>,
    last_inner: Option<SharedUpipe>,
}

impl BinHelper {
    #[must_use]
    pub fn new() -> Self {
        Self { first_inner: None, last_inner: None }
    }

    pub fn set_first_inner(&mut self, pipe: SharedUpipe) {
        self.first_inner = Some(pipe);
    }

    pub fn set_last_inner(&mut self, pipe: SharedUpipe) {
        self.last_inner = Some(pipe);
    }

    #[must_use]
    pub fn first_inner(&self) -> Option<&SharedUpipe> {
        self.first_inner.as_ref()
    }

    #[must_use]
    pub fn last_inner(&self) -> Option<&SharedUpipe> {
        self.last_inner.as_ref()
    }

    /// Forward a command that belongs at the bin's input edge
    /// (`SET_FLOW_DEF`, `REGISTER_REQUEST`, …) to the first inner pipe.
    pub fn forward_to_first(&self, cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
        let Some(first) = &self.first_inner else {
            return Err(UpipeError::Unhandled);
        };
        let mut guard = first.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.control(cmd)
    }

    /// Forward a command that belongs at the bin's output edge
    /// (`GET_OUTPUT`, `GET_FLOW_DEF` on the outward side, …) to the last
    /// inner pipe.
    pub fn forward_to_last(&self, cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
        let Some(last) = &self.last_inner else {
            return Err(UpipeError::Unhandled);
        };
        let mut guard = last.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.control(cmd)
    }
}
