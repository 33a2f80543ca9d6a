// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! HTTP source scaffolding and its pluggable SSL hook abstraction, kept
//! as a separate crate from `upipe-core` to keep transport-specific
//! pipes out of the engine core.

pub mod error;
pub mod hook;
pub mod source;

pub use error::HttpHookError;
pub use hook::{HookFlags, PlainHook, PlaceholderTlsHook, SslHook};
pub use source::{HttpSrcMgr, HttpSrcPipe, SchemeHookRequest};
