// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The HTTP source pipe shell: enough of `upipe_http_src` to exercise its
//! pluggable SSL hook dispatch. Opening a real socket is out of scope —
//! HTTP is one of the transports treated only as an external collaborator
//! — so this pipe reads from an in-memory byte source instead, which is
//! sufficient to drive the hook and exercise the scheme dispatch through
//! a real probe chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use upipe_core::error::{UpipeError, UpipeResult};
use upipe_core::uprobe::{PipeId, UprobeChain, UprobeEvent};
use upipe_core::upipe::{SharedUpipe, Upipe, UpipeCommand, UpipeMgr, UpipeResponse};

use crate::error::HttpHookError;
use crate::hook::{PlainHook, SslHook};

pub const FAMILY: &str = "http_src";

/// Family-private event payload for `HTTP_SRC_SCHEME_HOOK`: the HTTP pipe
/// asks a probe for the right hook by throwing this with the flow def;
/// the probe inspects the URI scheme and returns an allocated hook or
/// declines. The slot is filled in by whichever probe claims the scheme;
/// `Mutex` because `Uprobe::throw` takes `&self`, not `&mut self`.
pub struct SchemeHookRequest {
    pub scheme: String,
    hook: Mutex<Option<Box<dyn SslHook>>>,
}

impl SchemeHookRequest {
    #[must_use]
    pub fn new(scheme: String) -> Self {
        Self { scheme, hook: Mutex::new(None) }
    }

    /// Called by a probe that claims this scheme.
    pub fn provide(&self, hook: Box<dyn SslHook>) {
        *self.hook.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(hook);
    }

    fn take(&self) -> Option<Box<dyn SslHook>> {
        self.hook.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take()
    }
}

fn scheme_hook_event(req: &Arc<SchemeHookRequest>) -> UprobeEvent {
    UprobeEvent::Local(FAMILY, "SCHEME_HOOK", req.clone())
}

fn next_pipe_id() -> PipeId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    PipeId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Extract the scheme prefix of a URI (`"https://host/path"` → `"https"`).
/// No validation beyond finding `://`: malformed URIs fall through to
/// `PlainHook`, same as an unclaimed scheme.
fn scheme_of(uri: &str) -> Option<&str> {
    uri.split_once("://").map(|(scheme, _)| scheme)
}

pub struct HttpSrcPipe {
    id: PipeId,
    probes: UprobeChain,
    uri: Option<String>,
    hook: Box<dyn SslHook>,
}

impl HttpSrcPipe {
    #[must_use]
    pub fn new(probes: UprobeChain) -> Self {
        let pipe = Self { id: next_pipe_id(), probes, uri: None, hook: Box::new(PlainHook::new()) };
        pipe.throw_ready();
        pipe
    }

    /// Set the URI and resolve its hook by throwing `HTTP_SRC_SCHEME_HOOK`
    /// on the probe chain. Falls back to [`PlainHook`] if no probe claims
    /// the scheme (e.g. plain `"http"`, where the probe declines).
    pub fn set_uri(&mut self, uri: String) {
        let scheme = scheme_of(&uri).unwrap_or("").to_string();
        let request = Arc::new(SchemeHookRequest::new(scheme.clone()));
        self.throw(&scheme_hook_event(&request));
        self.hook = request.take().unwrap_or_else(|| {
            tracing::debug!(pipe = self.id.0, scheme, "no probe claimed this scheme, using the plain hook");
            Box::new(PlainHook::new())
        });
        self.uri = Some(uri);
    }

    /// Feed bytes as if they had just arrived off the transport, and drain
    /// whatever the hook now has ready for the application. A stand-in for
    /// the real pipe's pump-driven socket read loop.
    pub fn feed_transport_bytes(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>, HttpHookError> {
        self.hook.transport_read(bytes)?;
        Ok(self.hook.data_read())
    }
}

impl Upipe for HttpSrcPipe {
    fn id(&self) -> PipeId {
        self.id
    }

    fn mgr_name(&self) -> &'static str {
        "http_src"
    }

    fn probes(&self) -> &UprobeChain {
        &self.probes
    }

    fn probes_mut(&mut self) -> &mut UprobeChain {
        &mut self.probes
    }

    fn control(&mut self, cmd: UpipeCommand) -> UpipeResult<UpipeResponse> {
        match cmd {
            UpipeCommand::SetUri(uri) => {
                self.set_uri(uri);
                Ok(UpipeResponse::Unit)
            }
            _ => Err(UpipeError::Unhandled),
        }
    }
}

pub struct HttpSrcMgr;

impl UpipeMgr for HttpSrcMgr {
    fn name(&self) -> &'static str {
        "http_src"
    }

    fn alloc(&self, probes: UprobeChain) -> UpipeResult<SharedUpipe> {
        Ok(Arc::new(Mutex::new(HttpSrcPipe::new(probes))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upipe_core::uprobe::{FnProbe, ProbeStatus};

    use crate::hook::PlaceholderTlsHook;

    #[test]
    fn https_scheme_gets_the_hook_the_probe_provides() {
        let probe = FnProbe(|_pipe, event: &UprobeEvent| {
            if let UprobeEvent::Local(family, name, payload) = event {
                if *family == FAMILY && *name == "SCHEME_HOOK" {
                    if let Some(req) = payload.downcast_ref::<SchemeHookRequest>() {
                        if req.scheme == "https" {
                            req.provide(Box::new(PlaceholderTlsHook::new()));
                            return ProbeStatus::Handled;
                        }
                    }
                }
            }
            ProbeStatus::Unhandled
        });
        let probes = UprobeChain::new().with(Arc::new(probe));
        let mut pipe = HttpSrcPipe::new(probes);
        pipe.set_uri("https://example.invalid/stream".to_string());

        let out = pipe.feed_transport_bytes(b"ciphertext").unwrap();
        assert_eq!(out.unwrap(), b"ciphertext");
    }

    #[test]
    fn http_scheme_is_declined_and_falls_back_to_plain_hook() {
        let probe = FnProbe(|_pipe, _event: &UprobeEvent| ProbeStatus::Unhandled);
        let probes = UprobeChain::new().with(Arc::new(probe));
        let mut pipe = HttpSrcPipe::new(probes);
        pipe.set_uri("http://example.invalid/stream".to_string());

        let out = pipe.feed_transport_bytes(b"plaintext").unwrap();
        assert_eq!(out.unwrap(), b"plaintext");
    }
}
