// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Atomic reference counting primitive.
//!
//! Every shared object in upipe (pipe, manager, probe, uref_mgr, ubuf_mgr,
//! uclock, request) embeds one of these. Rust's `Arc` already gives us
//! atomic use/release and a destructor-on-zero guarantee for free, so
//! `Urefcount` wraps an `Arc<()>` rather than reimplementing atomics: the
//! handle's clone count *is* the refcount, and dropping the last handle runs
//! `T::drop` exactly once, by construction instead of by discipline.

use std::sync::Arc;

/// A refcounted handle around a value, modeling the `use`/`release`/`single`
/// trio every shared pipeline object needs.
#[derive(Debug)]
pub struct Urefcount<T> {
    inner: Arc<T>,
}

impl<T> Urefcount<T> {
    /// `init`: wrap `value` with an initial count of 1.
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(value) }
    }

    /// `use(r)`: bump the count and hand back an equivalent handle.
    #[must_use]
    pub fn acquire(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }

    /// `single(r)`: true if this is the only outstanding handle.
    ///
    /// As in the original, this is a snapshot: callers that gate an
    /// exclusive mutation on it must already hold the only reference by
    /// construction (e.g. having just taken it out of a mutex), not merely
    /// observe this return value under contention.
    #[must_use]
    pub fn single(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Current strong count, for diagnostics only.
    #[must_use]
    pub fn count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    #[must_use]
    pub fn get(&self) -> &T {
        &self.inner
    }
}

impl<T> Clone for Urefcount<T> {
    /// `release` happens implicitly when a clone is dropped; `T`'s own
    /// `Drop` impl is the "type-specific destructor" and runs exactly once,
    /// on the transition to zero handles, regardless of drop order.
    fn clone(&self) -> Self {
        self.acquire()
    }
}

/// A manager whose destructor is null is statically allocated and ignores
/// `use`/`release`. Modeled as a marker: managers that should
/// behave this way simply never wrap themselves in `Urefcount` and are held
/// behind a plain `Arc<dyn Trait>` with no teardown hook, which is exactly
/// what "ignore use/release" means once refcounting is `Arc`-based.
pub trait ImmortalManager {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting<'a>(&'a AtomicUsize);
    impl Drop for Counting<'_> {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn destructor_runs_exactly_once_on_last_release() {
        let dtor_calls = AtomicUsize::new(0);
        let rc = Urefcount::new(Counting(&dtor_calls));
        let a = rc.acquire();
        let b = rc.acquire();
        assert_eq!(rc.count(), 3);
        assert!(!rc.single());
        drop(rc);
        assert_eq!(dtor_calls.load(Ordering::SeqCst), 0);
        drop(a);
        assert_eq!(dtor_calls.load(Ordering::SeqCst), 0);
        assert!(b.single());
        drop(b);
        assert_eq!(dtor_calls.load(Ordering::SeqCst), 1);
    }
}
