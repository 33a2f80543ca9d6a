// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `upump` / `upump_mgr`: the abstract event-loop handle.
//!
//! A pump is a registration for either a timer or a readiness source; the
//! manager is whatever owns the event loop that drives those callbacks.
//! Concrete transport readiness (a UDP socket, a file descriptor) is out of
//! this crate's scope — every concrete transport sink/source is treated
//! only as an external collaborator via its interface contract.
//! [`IoSource`] is that interface contract; this crate only drives it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

/// Something a pump can wait on for readiness — the abstract stand-in for
/// "a file descriptor has data" without this crate knowing what kind of
/// transport it is.
#[async_trait]
pub trait IoSource: Send {
    /// Waits until the source is ready, or returns an error meaning the
    /// source is gone and its pump should stop driving it.
    async fn ready(&mut self) -> std::io::Result<()>;
}

/// The callback a pump invokes on every tick/readiness event. An `Arc`,
/// not a `Box`, so the same callback can back more than one registration
/// (e.g. a split pipe's PID-keyed fan-out re-arming a shared timer).
pub type PumpCallback = Arc<dyn Fn() + Send + Sync>;

/// A live registration. Dropping it deregisters the pump and stops its
/// callback from firing again — there is no separate `upump_free` call.
pub struct Pump {
    handle: Option<JoinHandle<()>>,
}

impl Drop for Pump {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// `upump_mgr`: owns the event loop that `Pump`s run under.
pub trait PumpMgr: Send + Sync {
    /// Arm a periodic timer; `callback` fires once per `period`.
    fn register_timer(&self, period: Duration, callback: PumpCallback) -> Pump;

    /// Drive `source` until it errors, calling `callback` each time it
    /// reports readiness.
    fn register_io(&self, source: Box<dyn IoSource>, callback: PumpCallback) -> Pump;
}

/// The pump manager backing every pipe in this workspace: a `tokio`
/// runtime's task spawner. `tokio::spawn` onto a current-thread runtime
/// gives a single-threaded cooperative event loop; a multi-thread runtime
/// is also valid, since the only real requirement is that callbacks on one
/// pipe never run concurrently with each other, which the pipe's own
/// `Mutex` already guarantees.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPumpMgr;

impl PumpMgr for TokioPumpMgr {
    fn register_timer(&self, period: Duration, callback: PumpCallback) -> Pump {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                callback();
            }
        });
        Pump { handle: Some(handle) }
    }

    fn register_io(&self, mut source: Box<dyn IoSource>, callback: PumpCallback) -> Pump {
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = source.ready().await {
                    tracing::debug!(%err, "io pump source reported an error, deregistering");
                    break;
                }
                callback();
            }
        });
        Pump { handle: Some(handle) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn timer_pump_fires_callback_each_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let mgr = TokioPumpMgr;
        let pump = mgr.register_timer(Duration::from_millis(10), Arc::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::advance(Duration::from_millis(35)).await;
        tokio::task::yield_now().await;
        assert!(count.load(Ordering::SeqCst) >= 3);
        drop(pump);
    }

    struct OneShotSource(bool);
    #[async_trait]
    impl IoSource for OneShotSource {
        async fn ready(&mut self) -> std::io::Result<()> {
            if self.0 {
                self.0 = false;
                Ok(())
            } else {
                Err(std::io::Error::other("source exhausted"))
            }
        }
    }

    #[tokio::test]
    async fn io_pump_stops_once_source_errors() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let mgr = TokioPumpMgr;
        let pump = mgr.register_io(Box::new(OneShotSource(true)), Arc::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(pump);
    }
}
