// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! UREF_MGR / UBUF_MGR / UCLOCK / UPUMP_MGR request-holders: each needed
//! upstream resource is a persistent request registered once on the input,
//! with a `check()` hook re-evaluated as dependencies arrive.

use crate::urequest::{ProvideArgs, RequestKind, Urequest};

/// Holds the result of one persistent upstream resource request, plus the
/// request itself so it can be reissued (e.g. after a flow-def change
/// invalidates a previously negotiated `ubuf_mgr`).
pub struct RequestHolder<T> {
    kind: RequestKind,
    request: Option<Urequest>,
    value: Option<T>,
}

impl<T> RequestHolder<T> {
    #[must_use]
    pub fn new(kind: RequestKind) -> Self {
        Self { kind, request: None, value: None }
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.request.is_some()
    }

    /// Build and record the persistent request, to be registered on the
    /// pipe's input by the caller (which owns the actual propagation path).
    pub fn register(&mut self, on_provide: impl Fn(ProvideArgs) + Send + Sync + 'static) -> Urequest {
        let req = Urequest::new(self.kind.clone(), None, on_provide);
        self.request = Some(req.clone());
        req
    }

    pub fn unregister(&mut self) {
        self.request = None;
        self.value = None;
    }

    /// `check()`: accept a newly provided value, e.g. once an upstream
    /// dependency (such as a flow format) has been resolved and this
    /// holder's request can finally be answered.
    pub fn set_value(&mut self, value: T) {
        self.value = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uclock::Uclock;
    use std::sync::{Arc, Mutex};

    #[test]
    fn holder_tracks_registration_and_value() {
        let mut holder: RequestHolder<Uclock> = RequestHolder::new(RequestKind::Uclock);
        assert!(!holder.is_registered());

        let received = Arc::new(Mutex::new(None));
        let received_clone = Arc::clone(&received);
        let req = holder.register(move |args| {
            if let ProvideArgs::Uclock(c) = args {
                *received_clone.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(c);
            }
        });
        assert!(holder.is_registered());

        req.provide(ProvideArgs::Uclock(Uclock::monotonic()));
        assert!(received.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_some());

        holder.set_value(Uclock::monotonic());
        assert!(holder.value().is_some());

        holder.unregister();
        assert!(!holder.is_registered());
        assert!(holder.value().is_none());
    }
}
