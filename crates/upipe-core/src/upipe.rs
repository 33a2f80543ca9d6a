// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `upipe` / `upipe_mgr`: the pipe instance and its factory/vtable.
//!
//! A pipe family elsewhere in this lineage dispatches control commands
//! through a `va_list` authenticated by a four-character manager signature.
//! Here that becomes a sum type: [`UpipeCommand`] carries the handful of
//! commands every
//! pipe family understands (flow-def, requests, generic options) plus one
//! `Family` slot for a family-specific command object. A family's "signature"
//! becomes its own private command type — e.g. `upipe-ts`'s `TsSplitCommand`
//! — which nothing outside that crate can construct, so a command meant for
//! `ts_split` simply cannot be mistaken for one meant for `psi_split`: the
//! type system rejects it at the call site that builds `UpipeCommand::Family`,
//! not at a runtime signature check.

use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::error::{UpipeError, UpipeResult};
use crate::uprobe::{PipeId, ProbeStatus, UprobeChain, UprobeEvent};
use crate::uref::Uref;
use crate::urequest::{RequestKind, Urequest};

/// Commands common to every pipe family: the generic options
/// (`SET_OPTION`, `SET_URI`, `SET_FD`) plus request register/unregister.
pub enum UpipeCommand {
    SetFlowDef(Uref),
    GetFlowDef,
    SetOption { key: String, value: String },
    SetUri(String),
    SetFd(i32),
    RegisterRequest(Urequest),
    UnregisterRequest(RequestKind),
    GetOutput,
    SetOutput(PipeId),
    /// A command private to one pipe family, type-erased at this boundary
    /// and downcast back to its concrete type by the pipe that receives it.
    Family(Box<dyn Any + Send>),
}

/// Response to a control command.
pub enum UpipeResponse {
    Unit,
    FlowDef(Uref),
    Output(PipeId),
    Family(Box<dyn Any + Send>),
}

/// Helper for family crates: build a `Family` command from a concrete,
/// family-private command type.
pub fn family_command<T: Send + 'static>(cmd: T) -> UpipeCommand {
    UpipeCommand::Family(Box::new(cmd))
}

/// Helper for family crates: downcast a `Family` command back to the
/// concrete type, returning `Unhandled` on a family mismatch (the
/// type-system-enforced analogue of a signature check failing).
pub fn downcast_family<T: 'static>(cmd: UpipeCommand) -> UpipeResult<T> {
    match cmd {
        UpipeCommand::Family(boxed) => boxed.downcast::<T>().map(|b| *b).map_err(|_| UpipeError::Unhandled),
        _ => Err(UpipeError::Unhandled),
    }
}

/// Object-safe pipe interface. Every concrete pipe (in `upipe-core`,
/// `upipe-modules`, `upipe-ts`, `upipe-http`) implements this so that
/// generic plumbing — bins, the dump utility, the engine's scheduler — can
/// hold a heterogeneous graph of `Arc<Mutex<dyn Upipe>>` without knowing
/// each pipe's concrete type.
pub trait Upipe: Send {
    fn id(&self) -> PipeId;

    /// Name of the manager that allocated this pipe, for logging and dump
    /// labels.
    fn mgr_name(&self) -> &'static str;

    fn probes(&self) -> &UprobeChain;
    fn probes_mut(&mut self) -> &mut UprobeChain;

    /// `control(pipe, command, va_args)`.
    fn control(&mut self, cmd: UpipeCommand) -> UpipeResult<UpipeResponse>;

    /// `input(pipe, uref, upump_ref)`, for pipes that consume urefs. Pipes
    /// with no input (sources) may leave this unimplemented; the default
    /// rejects input as a programming error made visible rather than
    /// silently dropped.
    fn input(&mut self, _uref: Uref) {
        tracing::warn!(pipe = self.id().0, "input() received by a pipe that does not accept one");
    }

    /// Throw an event on this pipe's own probe chain, logging the outcome
    /// at `trace` level (most events are expected to be unhandled by any
    /// given probe).
    fn throw(&self, event: &UprobeEvent) -> ProbeStatus {
        let status = self.probes().throw(self.id(), event);
        tracing::trace!(pipe = self.id().0, ?status, "threw event");
        status
    }

    /// Throw `READY` exactly once when the pipe can accept input.
    fn throw_ready(&self) {
        self.throw(&UprobeEvent::Ready);
    }

    /// Throw `DEAD` on release-to-zero.
    fn throw_dead(&self) {
        self.throw(&UprobeEvent::Dead);
    }
}

/// A shared, mutex-guarded pipe handle. Control commands and input urefs on
/// one pipe are serialized with respect to each other — the mutex is
/// exactly that serialization boundary; it is not meant to be held across
/// an `.await` and pipes do not guard against reentrancy within a single
/// instance beyond what holding the lock already provides.
pub type SharedUpipe = Arc<Mutex<dyn Upipe>>;

/// `upipe_mgr`: class object plus factory for one pipe family.
pub trait UpipeMgr: Send + Sync {
    fn name(&self) -> &'static str;

    /// `alloc(mgr, probe, signature, va_args)`. The manager is responsible
    /// for throwing `READY` once the returned pipe can accept input.
    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe>;

    /// `mgr_control`: configure sub-manager dependencies before any pipe is
    /// created (e.g. wiring a shared `UbufMgr` into every pipe this manager
    /// will later allocate). Most managers have nothing to configure at
    /// this level.
    fn mgr_control(&self, _cmd: UpipeCommand) -> UpipeResult<()> {
        Err(UpipeError::Unhandled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        id: PipeId,
        probes: UprobeChain,
    }

    impl Upipe for Echo {
        fn id(&self) -> PipeId {
            self.id
        }
        fn mgr_name(&self) -> &'static str {
            "echo"
        }
        fn probes(&self) -> &UprobeChain {
            &self.probes
        }
        fn probes_mut(&mut self) -> &mut UprobeChain {
            &mut self.probes
        }
        fn control(&mut self, cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
            match cmd {
                UpipeCommand::SetOption { key, value } if key == "label" => {
                    Ok(UpipeResponse::Family(Box::new(value)))
                }
                _ => Err(UpipeError::Unhandled),
            }
        }
    }

    struct NotEcho;

    #[test]
    fn family_command_roundtrip_across_mismatched_type_fails() {
        let cmd = family_command(42u32);
        let ok: UpipeResult<u32> = downcast_family(cmd);
        assert_eq!(ok, Ok(42));

        let cmd2 = family_command(NotEcho);
        let mismatched: UpipeResult<u32> = downcast_family(cmd2);
        assert_eq!(mismatched, Err(UpipeError::Unhandled));
    }

    #[test]
    fn unhandled_command_is_reported_not_panicked() {
        let mut pipe = Echo { id: PipeId(1), probes: UprobeChain::new() };
        let res = pipe.control(UpipeCommand::GetOutput);
        assert_eq!(res.err(), Some(UpipeError::Unhandled));
    }
}
