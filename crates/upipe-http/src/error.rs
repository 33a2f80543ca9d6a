// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Errors specific to the HTTP source pipe and its SSL hooks.

use thiserror::Error;
use upipe_core::error::UpipeError;

#[derive(Debug, Error)]
pub enum HttpHookError {
    #[error("no probe provided an SSL hook for scheme {0:?}")]
    NoHookForScheme(String),
    #[error("hook refused to read: {0}")]
    ReadRefused(String),
    #[error("hook refused to write: {0}")]
    WriteRefused(String),
}

impl From<HttpHookError> for UpipeError {
    fn from(e: HttpHookError) -> Self {
        Self::External(e.to_string())
    }
}
