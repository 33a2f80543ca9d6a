// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Control-command return codes and event severities.

use thiserror::Error;

/// Result of a pipe control command.
///
/// Mirrors the upipe return-code vocabulary: a pipe answers every control
/// command with one of these, never a raw `Result<(), io::Error>` — callers
/// (including bins climbing to an inner pipe) need to distinguish "I don't
/// know this command" from "I know it and it failed".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpipeError {
    /// This command is unknown to this pipe; a bin may retry on an inner pipe.
    #[error("unhandled control command")]
    Unhandled,
    /// Arguments are valid in type but not in value or in the pipe's current state.
    #[error("invalid argument or state: {0}")]
    Invalid(String),
    /// Allocation failed while servicing this call.
    #[error("allocation failure")]
    Alloc,
    /// The pump manager could not create or arm a pump.
    #[error("pump manager error: {0}")]
    Upump(String),
    /// An external (OS) call failed.
    #[error("external error: {0}")]
    External(String),
    /// The setting cannot change because live resources depend on it.
    #[error("busy")]
    Busy,
}

/// Result alias used throughout the control surface.
pub type UpipeResult<T> = Result<T, UpipeError>;

impl UpipeError {
    /// True for errors that should cause the caller to throw `FATAL` and
    /// tear down the subtree.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Alloc)
    }
}
