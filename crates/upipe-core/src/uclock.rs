// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `uclock`: monotonic wall clock in 27 MHz ticks.

use std::sync::Arc;
use std::time::Instant;

/// MPEG program clock frequency: 27 MHz.
pub const UCLOCK_FREQ: u64 = 27_000_000;

/// `UINT64_MAX`-as-"disabled" sentinel for timeouts.
pub const TIMEOUT_DISABLED: u64 = u64::MAX;
/// Zero means "no timeout".
pub const TIMEOUT_NONE: u64 = 0;

trait ClockSource: Send + Sync {
    fn now_ticks(&self) -> u64;
}

struct MonotonicSource {
    epoch: Instant,
}

impl ClockSource for MonotonicSource {
    fn now_ticks(&self) -> u64 {
        let elapsed = self.epoch.elapsed();
        #[allow(clippy::cast_possible_truncation)]
        let ticks = (elapsed.as_secs_f64() * UCLOCK_FREQ as f64) as u64;
        ticks
    }
}

/// A manual clock for tests and offline (file-to-file) pipelines, where
/// "wall time" should instead track the stream's own reconstructed
/// timestamps.
struct ManualSource {
    ticks: std::sync::atomic::AtomicU64,
}

impl ClockSource for ManualSource {
    fn now_ticks(&self) -> u64 {
        self.ticks.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Shared, immutable-after-construction clock handle.
#[derive(Clone)]
pub struct Uclock {
    source: Arc<dyn ClockSource>,
}

impl Uclock {
    #[must_use]
    pub fn monotonic() -> Self {
        Self { source: Arc::new(MonotonicSource { epoch: Instant::now() }) }
    }

    /// A clock whose `now` is advanced explicitly via [`ManualClock::advance`].
    #[must_use]
    pub fn manual() -> (Self, ManualClock) {
        let inner = Arc::new(ManualSource { ticks: std::sync::atomic::AtomicU64::new(0) });
        let clock = Self { source: inner.clone() };
        (clock, ManualClock { inner })
    }

    #[must_use]
    pub fn now(&self) -> u64 {
        self.source.now_ticks()
    }
}

impl std::fmt::Debug for Uclock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Uclock(now={})", self.now())
    }
}

/// Handle for advancing a [`Uclock::manual`] clock.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<ManualSource>,
}

impl ManualClock {
    pub fn set(&self, ticks: u64) {
        self.inner.ticks.store(ticks, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn advance(&self, delta: u64) {
        self.inner.ticks.fetch_add(delta, std::sync::atomic::Ordering::Relaxed);
    }
}
