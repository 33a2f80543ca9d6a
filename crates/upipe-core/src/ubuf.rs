// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `ubuf`: reference-counted binary payload, in block / picture / sound
//! shapes, with copy-on-write mutation.
//!
//! Grounded on the pooled, `Arc`-backed sample buffers this crate's sibling
//! media pipelines use: exclusivity is established by `Arc::strong_count`
//! and duplication-on-write goes through `Arc::make_mut`, the same pattern
//! as a copy-on-write sample buffer, generalized to block/picture/sound and
//! to the two-level sharing a `ubuf` needs (the `Ubuf` value itself, and the
//! individual block segments that `insert` can alias across several
//! `Ubuf`s).

use std::borrow::Cow;
use std::sync::Arc;

/// One block payload, stored as a sequence of shared segments so that
/// `insert` can splice in another block's data without copying it.
#[derive(Debug, Clone, Default)]
pub struct BlockUbuf {
    segments: Vec<Arc<Vec<u8>>>,
}

impl BlockUbuf {
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { segments: vec![Arc::new(data)] }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    /// `read(offset, len)`: borrow when the range sits inside one segment,
    /// otherwise extract a compact copy.
    #[must_use]
    pub fn read(&self, offset: usize, len: usize) -> Option<Cow<'_, [u8]>> {
        if offset.checked_add(len)? > self.size() {
            return None;
        }
        let mut pos = 0usize;
        for seg in &self.segments {
            if offset >= pos && offset + len <= pos + seg.len() {
                let local = offset - pos;
                return Some(Cow::Borrowed(&seg[local..local + len]));
            }
            pos += seg.len();
        }
        let mut out = vec![0u8; len];
        self.extract(offset, len, &mut out)?;
        Some(Cow::Owned(out))
    }

    /// `extract(offset, len, dst)`: compact copy spanning segment boundaries.
    pub fn extract(&self, offset: usize, len: usize, dst: &mut [u8]) -> Option<()> {
        if dst.len() < len || offset.checked_add(len)? > self.size() {
            return None;
        }
        let mut pos = 0usize;
        let mut written = 0usize;
        for seg in &self.segments {
            let seg_start = pos;
            let seg_end = pos + seg.len();
            pos = seg_end;
            let copy_start = offset.max(seg_start);
            let copy_end = (offset + len).min(seg_end);
            if copy_start >= copy_end {
                continue;
            }
            let local_start = copy_start - seg_start;
            let n = copy_end - copy_start;
            dst[written..written + n].copy_from_slice(&seg[local_start..local_start + n]);
            written += n;
            if written == len {
                break;
            }
        }
        (written == len).then_some(())
    }

    /// `write(offset, len) -> mut slice`: requires the touched segment to be
    /// exclusively owned, duplicating it first via `Arc::make_mut` if not.
    /// Only supported within a single segment; a write spanning segments
    /// goes through `resize`/`insert` instead.
    pub fn write(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let mut pos = 0usize;
        for seg in &mut self.segments {
            if offset >= pos && offset + len <= pos + seg.len() {
                let local = offset - pos;
                let seg = Arc::make_mut(seg);
                return Some(&mut seg[local..local + len]);
            }
            pos += seg.len();
        }
        None
    }

    /// `insert(offset, child)`: zero-copy splice of another block's segments
    /// at `offset`, which must land on a segment boundary.
    pub fn insert(&mut self, offset: usize, child: Self) -> Option<()> {
        let mut pos = 0usize;
        for i in 0..=self.segments.len() {
            if pos == offset {
                self.segments.splice(i..i, child.segments);
                return Some(());
            }
            if i < self.segments.len() {
                pos += self.segments[i].len();
            }
        }
        None
    }

    /// `resize(offset, new_size)`: truncate or zero-extend from `offset`.
    pub fn resize(&mut self, offset: usize, new_size: usize) {
        let current = self.size();
        if new_size < current {
            let keep_total = offset + new_size;
            let mut kept = Vec::new();
            let mut pos = 0usize;
            for seg in std::mem::take(&mut self.segments) {
                if pos >= keep_total {
                    break;
                }
                let seg_len = seg.len();
                if pos + seg_len <= keep_total {
                    kept.push(seg);
                } else {
                    let keep_len = keep_total - pos;
                    let mut v = (*seg).clone();
                    v.truncate(keep_len);
                    kept.push(Arc::new(v));
                }
                pos += seg_len;
            }
            self.segments = kept;
        } else if new_size > current {
            self.segments.push(Arc::new(vec![0u8; new_size - current]));
        }
    }

    /// `iovec_read`: scatter-gather view over `[offset, offset+len)`.
    #[must_use]
    pub fn iovec_read(&self, offset: usize, len: usize) -> Vec<Cow<'_, [u8]>> {
        let mut out = Vec::new();
        let mut pos = 0usize;
        let end = offset + len;
        for seg in &self.segments {
            let seg_start = pos;
            let seg_end = pos + seg.len();
            pos = seg_end;
            let start = offset.max(seg_start);
            let stop = end.min(seg_end);
            if start >= stop {
                continue;
            }
            out.push(Cow::Borrowed(&seg[start - seg_start..stop - seg_start]));
        }
        out
    }
}

/// One plane of a planar picture or sound buffer.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Arc<Vec<u8>>,
    pub stride: usize,
}

/// Planar image with per-plane stride, chroma subsampling and alignment.
#[derive(Debug, Clone)]
pub struct PictureUbuf {
    pub hsize: u32,
    pub vsize: u32,
    /// Horizontal/vertical chroma subsampling, one pair per plane.
    pub subsampling: Vec<(u8, u8)>,
    pub planes: Vec<Plane>,
}

impl PictureUbuf {
    #[must_use]
    pub fn plane_read(&self, plane: usize) -> Option<&[u8]> {
        self.planes.get(plane).map(|p| p.data.as_slice())
    }

    pub fn plane_write(&mut self, plane: usize) -> Option<&mut [u8]> {
        let plane = self.planes.get_mut(plane)?;
        Some(Arc::make_mut(&mut plane.data).as_mut_slice())
    }
}

/// Audio layout: planar (one `Arc<Vec<u8>>` per channel) or packed
/// (interleaved, single buffer).
#[derive(Debug, Clone)]
pub enum SoundLayout {
    Planar(Vec<Arc<Vec<u8>>>),
    Packed(Arc<Vec<u8>>),
}

#[derive(Debug, Clone)]
pub struct SoundUbuf {
    pub channels: u8,
    pub sample_rate: u32,
    pub layout: SoundLayout,
}

impl SoundUbuf {
    /// `size(samples, channels)`: byte size of an `i32`-sample buffer of the
    /// given shape.
    #[must_use]
    pub fn size(samples: usize, channels: u8) -> usize {
        samples * usize::from(channels) * std::mem::size_of::<i32>()
    }

    /// `read_int32_t`: decode `count` big-endian 32-bit samples starting at
    /// `offset` (in samples) from the given channel/plane.
    #[must_use]
    pub fn read_int32_t(&self, channel: usize, offset: usize, count: usize) -> Option<Vec<i32>> {
        let bytes_per_sample = std::mem::size_of::<i32>();
        let data = match &self.layout {
            SoundLayout::Planar(planes) => planes.get(channel)?.as_slice(),
            SoundLayout::Packed(buf) => buf.as_slice(),
        };
        let stride = match &self.layout {
            SoundLayout::Planar(_) => 1,
            SoundLayout::Packed(_) => usize::from(self.channels),
        };
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let sample_index = match &self.layout {
                SoundLayout::Planar(_) => offset + i,
                SoundLayout::Packed(_) => (offset + i) * stride + channel,
            };
            let start = sample_index * bytes_per_sample;
            let end = start + bytes_per_sample;
            if end > data.len() {
                return None;
            }
            let mut b = [0u8; 4];
            b.copy_from_slice(&data[start..end]);
            out.push(i32::from_be_bytes(b));
        }
        Some(out)
    }
}

/// The three payload shapes a `ubuf` can take.
#[derive(Debug, Clone)]
pub enum Ubuf {
    Block(BlockUbuf),
    Picture(PictureUbuf),
    Sound(SoundUbuf),
}

impl Ubuf {
    #[must_use]
    pub fn as_block(&self) -> Option<&BlockUbuf> {
        match self {
            Self::Block(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_block_mut(&mut self) -> Option<&mut BlockUbuf> {
        match self {
            Self::Block(b) => Some(b),
            _ => None,
        }
    }
}
