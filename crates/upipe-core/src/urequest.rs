// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `urequest`: an upstream resource demand threaded through outputs.

use std::fmt;
use std::sync::Arc;

use crate::uref::Uref;
use crate::uclock::Uclock;
use crate::ubuf_mgr::UbufMgr;

/// The resource kinds a pipe can request from upstream.
#[derive(Debug, Clone)]
pub enum RequestKind {
    UrefMgr,
    FlowFormat,
    UbufMgr { flow_format: String },
    Uclock,
    SinkLatency,
}

/// What `provide` hands back for each request kind.
#[derive(Clone)]
pub enum ProvideArgs {
    UrefMgr,
    FlowFormat(String),
    UbufMgr(UbufMgr),
    Uclock(Uclock),
    SinkLatency(u64),
}

impl fmt::Debug for ProvideArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UrefMgr => write!(f, "UrefMgr"),
            Self::FlowFormat(s) => write!(f, "FlowFormat({s})"),
            Self::UbufMgr(_) => write!(f, "UbufMgr"),
            Self::Uclock(_) => write!(f, "Uclock"),
            Self::SinkLatency(v) => write!(f, "SinkLatency({v})"),
        }
    }
}

/// A pending resource demand.
///
/// `provide_cb` is an `Arc`, not a `Box`: each hop registers an
/// *identity-preserving* proxy of the same request, so that
/// `provide` trampolines all the way back to the pipe that originated it
/// without any intermediate pipe needing to know how many hops it is from
/// the source. Cloning a `Urequest` therefore clones this `Arc`, not the
/// callback's behavior.
#[derive(Clone)]
pub struct Urequest {
    pub kind: RequestKind,
    pub arg: Option<Uref>,
    provide_cb: Arc<dyn Fn(ProvideArgs) + Send + Sync>,
}

impl fmt::Debug for Urequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Urequest").field("kind", &self.kind).finish()
    }
}

impl Urequest {
    pub fn new(kind: RequestKind, arg: Option<Uref>, provide_cb: impl Fn(ProvideArgs) + Send + Sync + 'static) -> Self {
        Self { kind, arg, provide_cb: Arc::new(provide_cb) }
    }

    /// `provide(request, args…)`: called by whichever pipe can satisfy the
    /// request. Must not be called during the originating pipe's own
    /// `input`/`control` processing, to avoid reentering it mid-call.
    pub fn provide(&self, args: ProvideArgs) {
        (self.provide_cb)(args);
    }

    /// `init_<type>`/proxy allocation: duplicate this request for
    /// registration one hop further upstream. The returned `Urequest`
    /// shares this one's `provide_cb`, so satisfying it anywhere downstream
    /// resolves all the way back to the original caller.
    #[must_use]
    pub fn proxy(&self) -> Self {
        self.clone()
    }
}

/// Bookkeeping for a request that has been proxied through a chain of
/// pipes: each pipe along the way pushes its registration token here so
/// that `UPIPE_UNREGISTER_REQUEST` can unwind them in reverse order.
#[derive(Debug, Default)]
pub struct RequestChain {
    hops: Vec<PipeId>,
}

use crate::uprobe::PipeId;

impl RequestChain {
    #[must_use]
    pub fn new() -> Self {
        Self { hops: Vec::new() }
    }

    /// Record that `pipe` registered a proxy of this request with its own
    /// upstream output.
    pub fn register_hop(&mut self, pipe: PipeId) {
        self.hops.push(pipe);
    }

    /// Unregister every hop in reverse (LIFO) order, returning the pipes in
    /// the order their proxies should be torn down.
    pub fn unregister(&mut self) -> Vec<PipeId> {
        let mut order = std::mem::take(&mut self.hops);
        order.reverse();
        order
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.hops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn provide_reaches_original_callback_through_proxies() {
        let received = Arc::new(Mutex::new(None));
        let received_clone = Arc::clone(&received);

        let original = Urequest::new(RequestKind::FlowFormat, None, move |args| {
            *received_clone.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(args);
        });

        let mut chain = RequestChain::new();
        let mut current = original.clone();
        for hop in 1..=3u64 {
            chain.register_hop(PipeId(hop));
            current = current.proxy();
        }

        current.provide(ProvideArgs::FlowFormat("block.mpegts.".to_string()));

        let got = received.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match &*got {
            Some(ProvideArgs::FlowFormat(s)) => assert_eq!(s, "block.mpegts."),
            other => panic!("unexpected provide args: {other:?}"),
        }
        assert_eq!(chain.depth(), 3);
    }

    #[test]
    fn unregister_reverses_hop_order() {
        let mut chain = RequestChain::new();
        chain.register_hop(PipeId(1));
        chain.register_hop(PipeId(2));
        chain.register_hop(PipeId(3));
        assert_eq!(chain.unregister(), vec![PipeId(3), PipeId(2), PipeId(1)]);
        assert_eq!(chain.depth(), 0);
    }
}
