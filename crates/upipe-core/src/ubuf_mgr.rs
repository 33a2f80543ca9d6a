// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `ubuf_mgr`: a pool that hands out block buffers and reclaims them on
//! drop, so the steady state does not allocate.
//!
//! Grounded on a bucketed frame pool: buffers are bucketed by size class,
//! a bounded number of buffers are kept per bucket, and a returned buffer
//! larger than its bucket's cap is simply dropped rather than held forever.

use std::sync::{Arc, Mutex};

use crate::ubuf::BlockUbuf;

#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
}

struct Bucket {
    cap: usize,
    free: Vec<Vec<u8>>,
}

struct Inner {
    bucket_sizes: Vec<usize>,
    max_per_bucket: usize,
    buckets: Vec<Bucket>,
    stats: PoolStats,
}

impl Inner {
    fn bucket_index_for(&self, len: usize) -> Option<usize> {
        self.bucket_sizes.iter().position(|&s| len <= s)
    }
}

/// Pool of block-ubuf backing storage, shared by every pipe downstream of
/// one `UBUF_MGR` negotiation.
#[derive(Clone)]
pub struct UbufMgr {
    inner: Arc<Mutex<Inner>>,
}

/// Default size classes for MPEG-TS style workloads: one aligned TS packet,
/// a handful of packets, and a full PES-sized chunk.
pub const DEFAULT_BLOCK_BUCKET_SIZES: [usize; 4] = [188, 188 * 7, 65536, 1 << 20];
pub const DEFAULT_BUFFERS_PER_BUCKET: usize = 32;

impl UbufMgr {
    #[must_use]
    pub fn new(bucket_sizes: Vec<usize>, max_per_bucket: usize) -> Self {
        let buckets = bucket_sizes.iter().map(|&cap| Bucket { cap, free: Vec::new() }).collect();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                bucket_sizes,
                max_per_bucket,
                buckets,
                stats: PoolStats::default(),
            })),
        }
    }

    #[must_use]
    pub fn default_for_ts() -> Self {
        Self::new(DEFAULT_BLOCK_BUCKET_SIZES.to_vec(), DEFAULT_BUFFERS_PER_BUCKET)
    }

    /// Allocate (or reuse) a block ubuf of exactly `len` bytes, zeroed.
    #[must_use]
    pub fn alloc_block(&self, len: usize) -> BlockUbuf {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(idx) = inner.bucket_index_for(len) {
            if let Some(mut buf) = inner.buckets[idx].free.pop() {
                inner.stats.hits += 1;
                buf.clear();
                buf.resize(len, 0);
                return BlockUbuf::from_vec(buf);
            }
        }
        inner.stats.misses += 1;
        BlockUbuf::from_vec(vec![0u8; len])
    }

    /// Return a buffer's backing storage to its bucket, if it has one and
    /// the bucket is not already full.
    pub fn reclaim(&self, storage: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(idx) = inner.bucket_index_for(storage.capacity()) {
            let max = inner.max_per_bucket;
            let bucket = &mut inner.buckets[idx];
            if bucket.free.len() < max {
                bucket.free.push(storage);
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).stats
    }
}
