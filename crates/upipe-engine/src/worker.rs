// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The worker bin: a composite pipe that hands a sub-pipeline to a
//! dedicated OS thread behind a pair of queues.
//!
//! Built on a `spawn_blocking`-plus-`mpsc`-channel-pair handoff pattern,
//! generalized from "one blocking call" to "a whole migrated
//! sub-pipeline" and extended with a realtime-scheduling request (the
//! AES67 sink's pthread/SCHED_FIFO spawn): modeled as a [`SpawnPolicy`]
//! with a logged, best-effort fallback rather than unsafe pthread
//! attribute calls.

use std::thread;

use tokio::sync::mpsc;
use upipe_core::uref::Uref;

use crate::constants::{DEFAULT_WORKER_INPUT_CAPACITY, DEFAULT_WORKER_OUTPUT_CAPACITY};

/// How the worker bin would like its thread scheduled. Only `Default` can
/// actually be honored without OS-specific, `unsafe` pthread attribute
/// calls; `RealtimeFifo` is accepted and recorded but always falls back to
/// a normal thread, logged once at `warn!` — a runtime fallback to
/// best-effort, except here the OS is never even asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnPolicy {
    Default,
    RealtimeFifo { priority: u8 },
}

/// Spawn `body` on a plain OS thread, logging a fallback notice if a
/// realtime policy was requested.
fn spawn_with_policy<F>(policy: SpawnPolicy, name: &str, body: F) -> thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    if let SpawnPolicy::RealtimeFifo { priority } = policy {
        tracing::warn!(
            thread = name,
            priority,
            "realtime scheduling was requested but this build has no realtime backend; falling back to a best-effort thread"
        );
    }
    thread::Builder::new().name(name.to_string()).spawn(body).unwrap_or_else(|err| {
        tracing::error!(%err, thread = name, "failed to spawn worker thread, retrying with default builder");
        thread::spawn(body)
    })
}

/// A pipeline migrated onto its own thread: consumes from `input`, and
/// whatever it produces must be sent on `output`. Ordinary `upipe-core`
/// pipes are synchronous function calls, so the migrated body is any
/// closure that drains `input` and pushes to `output` — the worker bin
/// itself only owns the channel endpoints and the thread handle.
pub struct WorkerBin {
    input_tx: Option<mpsc::Sender<Uref>>,
    output_rx: mpsc::Receiver<Uref>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WorkerBin {
    /// Spawn `run` (the migrated sub-pipeline's driving loop) on a
    /// dedicated thread. `run` receives the worker-side input receiver and
    /// output sender; ordering from queue to output is preserved FIFO
    /// end-to-end, since neither channel reorders.
    pub fn spawn<F>(policy: SpawnPolicy, name: &str, run: F) -> Self
    where
        F: FnOnce(mpsc::Receiver<Uref>, mpsc::Sender<Uref>) + Send + 'static,
    {
        let (input_tx, worker_input_rx) = mpsc::channel(DEFAULT_WORKER_INPUT_CAPACITY);
        let (worker_output_tx, output_rx) = mpsc::channel(DEFAULT_WORKER_OUTPUT_CAPACITY);
        let owned_name = name.to_string();
        let handle = spawn_with_policy(policy, name, move || {
            tracing::info!(thread = %owned_name, "worker bin thread started");
            run(worker_input_rx, worker_output_tx);
            tracing::info!(thread = %owned_name, "worker bin thread exiting");
        });
        Self { input_tx: Some(input_tx), output_rx, handle: Some(handle) }
    }

    /// Main-loop-side input: send a uref across to the worker thread.
    /// Fails only once the worker has exited.
    pub async fn send(&self, uref: Uref) -> Result<(), crate::error::EngineError> {
        let Some(input_tx) = self.input_tx.as_ref() else {
            return Err(crate::error::EngineError::WorkerGone);
        };
        input_tx.send(uref).await.map_err(|_| crate::error::EngineError::WorkerGone)
    }

    /// Main-loop-side output: receive the next uref the worker produced,
    /// in the order it was produced.
    pub async fn recv(&mut self) -> Option<Uref> {
        self.output_rx.recv().await
    }
}

impl Drop for WorkerBin {
    fn drop(&mut self) {
        // Drop the sender explicitly, *before* joining: a struct's custom
        // `Drop::drop` runs before its fields' own destructors, so without
        // this the worker thread's `blocking_recv` loop would never see
        // its last sender go away and `join` below would hang forever. No
        // queues are drained on this path: closing a pipe drains no queues.
        drop(self.input_tx.take());
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.join() {
                tracing::warn!(?err, "worker bin thread panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn worker_echoes_input_to_output_preserving_order() {
        let mut worker = WorkerBin::spawn(SpawnPolicy::Default, "test-worker", |mut rx, tx| {
            while let Some(uref) = rx.blocking_recv() {
                if tx.blocking_send(uref).is_err() {
                    break;
                }
            }
        });

        for i in 0..5u64 {
            let mut uref = Uref::new_control();
            uref.set_pts_orig(i);
            worker.send(uref).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(worker.recv().await.unwrap().pts_orig().unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn dropping_the_worker_closes_its_input_and_joins_the_thread_without_hanging() {
        let worker = WorkerBin::spawn(SpawnPolicy::Default, "shutdown-test-worker", |mut rx, tx| {
            while let Some(uref) = rx.blocking_recv() {
                if tx.blocking_send(uref).is_err() {
                    break;
                }
            }
        });
        drop(worker);
    }

    #[test]
    fn realtime_policy_falls_back_without_panicking() {
        let handle = spawn_with_policy(SpawnPolicy::RealtimeFifo { priority: 80 }, "rt-test", || {});
        handle.join().unwrap();
    }
}
