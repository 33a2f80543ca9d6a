// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Errors specific to pump/scheduler plumbing, convertible to the shared
//! control-command return codes.

use thiserror::Error;
use upipe_core::error::UpipeError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pump manager could not create a pump: {0}")]
    Upump(String),
    #[error("worker bin's peer task has already exited")]
    WorkerGone,
}

impl From<EngineError> for UpipeError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Upump(msg) => Self::Upump(msg),
            EngineError::WorkerGone => Self::External("worker task gone".into()),
        }
    }
}
