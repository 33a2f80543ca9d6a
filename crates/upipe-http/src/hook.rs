// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The HTTP source's SSL hook interface.
//!
//! Two half-duplex paths, each read/write: "transport" moves bytes
//! between the hook and the underlying socket, "data" moves bytes between
//! the hook and the application. A real TLS hook decrypts on the
//! transport-read path and hands plaintext out on data-read, and the
//! mirror image for writes; [`PlainHook`] just copies straight through,
//! which is also exactly what an HTTP (non-`https`) source wants.

use crate::error::HttpHookError;

/// Readiness bitmask a hook reports after being driven, telling the
/// source pipe which of its four queues still have work pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookFlags {
    pub transport_read: bool,
    pub transport_write: bool,
    pub data_read: bool,
    pub data_write: bool,
}

impl HookFlags {
    #[must_use]
    pub const fn none() -> Self {
        Self { transport_read: false, transport_write: false, data_read: false, data_write: false }
    }

    #[must_use]
    pub const fn is_idle(self) -> bool {
        !self.transport_read && !self.transport_write && !self.data_read && !self.data_write
    }
}

/// A pluggable engine sitting between an HTTP source's socket and its
/// output: BearSSL, OpenSSL, or a plain pass-through. Operates on byte
/// buffers rather than a raw socket so this crate never needs to know
/// what kind of transport (TCP, a mock, anything else) sits underneath —
/// concrete transports stay out of the core either way.
pub trait SslHook: Send {
    /// Feed bytes the hook read off the transport (the encrypted wire, for
    /// a real TLS hook). Returns the hook's new readiness flags.
    fn transport_read(&mut self, bytes: &[u8]) -> Result<HookFlags, HttpHookError>;

    /// Bytes the hook wants written to the transport next, if any.
    fn transport_write(&mut self) -> Option<Vec<u8>>;

    /// Plaintext the hook has ready for the application.
    fn data_read(&mut self) -> Option<Vec<u8>>;

    /// Feed plaintext the application wants sent; the hook is responsible
    /// for queuing it (encrypted, for a real TLS hook) onto the transport
    /// write path. Returns the hook's new readiness flags.
    fn data_write(&mut self, bytes: &[u8]) -> Result<HookFlags, HttpHookError>;
}

/// The trivial hook: transport and data are the same path. Used for plain
/// `http://` sources, and as the fallback when no probe claims a scheme.
#[derive(Debug, Default)]
pub struct PlainHook {
    inbound: Vec<u8>,
    outbound: Vec<u8>,
}

impl PlainHook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SslHook for PlainHook {
    fn transport_read(&mut self, bytes: &[u8]) -> Result<HookFlags, HttpHookError> {
        self.inbound.extend_from_slice(bytes);
        Ok(HookFlags { data_read: !self.inbound.is_empty(), ..HookFlags::none() })
    }

    fn transport_write(&mut self) -> Option<Vec<u8>> {
        (!self.outbound.is_empty()).then(|| std::mem::take(&mut self.outbound))
    }

    fn data_read(&mut self) -> Option<Vec<u8>> {
        (!self.inbound.is_empty()).then(|| std::mem::take(&mut self.inbound))
    }

    fn data_write(&mut self, bytes: &[u8]) -> Result<HookFlags, HttpHookError> {
        self.outbound.extend_from_slice(bytes);
        Ok(HookFlags { transport_write: true, ..HookFlags::none() })
    }
}

/// A structurally complete stand-in for a real TLS engine (BearSSL or
/// OpenSSL in the original). No cipher suite in this workspace's
/// dependency stack can back it without fabricating a registry crate, so
/// this hook implements the same interface and the same buffering shape
/// as [`PlainHook`] but is explicitly not a security boundary: it does
/// not encrypt, authenticate, or verify a certificate chain. A production
/// build would swap this module out for a real `rustls`/`openssl`-backed
/// implementation behind the same [`SslHook`] trait; nothing upstream of
/// the hook would need to change.
#[derive(Debug, Default)]
pub struct PlaceholderTlsHook {
    inner: PlainHook,
}

impl PlaceholderTlsHook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SslHook for PlaceholderTlsHook {
    fn transport_read(&mut self, bytes: &[u8]) -> Result<HookFlags, HttpHookError> {
        self.inner.transport_read(bytes)
    }

    fn transport_write(&mut self) -> Option<Vec<u8>> {
        self.inner.transport_write()
    }

    fn data_read(&mut self) -> Option<Vec<u8>> {
        self.inner.data_read()
    }

    fn data_write(&mut self, bytes: &[u8]) -> Result<HookFlags, HttpHookError> {
        self.inner.data_write(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_hook_round_trips_inbound_bytes_to_data_read() {
        let mut hook = PlainHook::new();
        let flags = hook.transport_read(b"hello").unwrap();
        assert!(flags.data_read);
        assert_eq!(hook.data_read().unwrap(), b"hello");
        assert!(hook.data_read().is_none());
    }

    #[test]
    fn plain_hook_round_trips_outbound_bytes_to_transport_write() {
        let mut hook = PlainHook::new();
        let flags = hook.data_write(b"GET / HTTP/1.1\r\n").unwrap();
        assert!(flags.transport_write);
        assert_eq!(hook.transport_write().unwrap(), b"GET / HTTP/1.1\r\n");
        assert!(hook.transport_write().is_none());
    }
}
