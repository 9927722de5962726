//! Scatter/gather mapping between a host I/O's segmented buffer and the
//! contiguous scratch buffers the engine XORs into.
//!
//! A host request's payload is modeled as [`HostBuffer`], an ordered list of
//! independently allocated segments (mirroring a real `iovec` array handed
//! down by the block-device framework). Segment boundaries need not align
//! with block or chunk boundaries.


use crate::parity::xor_slices;

/// A host I/O buffer, given as a list of byte segments in order. The
/// logical byte range covered is `0..self.total_len()`.
#[derive(Debug, Default)]
pub struct HostBuffer(pub Vec<Vec<u8>>);

/// The host range was shorter than the region the caller needed to map.
#[derive(Debug, thiserror::Error)]
#[error("host buffer too short: need {need} bytes at offset {offset}, have {have}")]
pub struct ShortBuffer {
    pub offset: usize,
    pub need: usize,
    pub have: usize,
}

impl HostBuffer {
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }

    /// `walk` invokes `f` with successive (possibly partial) segment slices
    /// covering `[byte_offset, byte_offset+byte_len)`, in order. Fails with
    /// [`ShortBuffer`] if the host buffer runs out before `byte_len` bytes
    /// have been visited.
    fn walk(
        &self,
        byte_offset: usize,
        byte_len: usize,
        mut f: impl FnMut(&[u8]),
    ) -> Result<(), ShortBuffer> {
        let mut skip = byte_offset;
        let mut remaining = byte_len;
        for seg in &self.0 {
            if remaining == 0 {
                break;
            }
            if skip >= seg.len() {
                skip -= seg.len();
                continue;
            }
            let start = skip;
            let take = (seg.len() - start).min(remaining);
            f(&seg[start..start + take]);
            remaining -= take;
            skip = 0;
        }
        if remaining != 0 {
            return Err(ShortBuffer {
                offset: byte_offset,
                need: byte_len,
                have: self.total_len().saturating_sub(byte_offset),
            });
        }
        Ok(())
    }

    /// `walk_mut` is the mutable counterpart of [`Self::walk`].
    fn walk_mut(
        &mut self,
        byte_offset: usize,
        byte_len: usize,
        mut f: impl FnMut(&mut [u8]),
    ) -> Result<(), ShortBuffer> {
        let mut skip = byte_offset;
        let mut remaining = byte_len;
        for seg in &mut self.0 {
            if remaining == 0 {
                break;
            }
            if skip >= seg.len() {
                skip -= seg.len();
                continue;
            }
            let start = skip;
            let take = (seg.len() - start).min(remaining);
            f(&mut seg[start..start + take]);
            remaining -= take;
            skip = 0;
        }
        if remaining != 0 {
            return Err(ShortBuffer {
                offset: byte_offset,
                need: byte_len,
                have: self.total_len().saturating_sub(byte_offset),
            });
        }
        Ok(())
    }

    /// `copy_out` is `memcpy_iovs` from host into a contiguous `dst`: copies
    /// `dst.len()` bytes starting at `byte_offset` out of the host buffer.
    pub fn copy_out(&self, byte_offset: usize, dst: &mut [u8]) -> Result<(), ShortBuffer> {
        let mut pos = 0;
        self.walk(byte_offset, dst.len(), |seg| {
            dst[pos..pos + seg.len()].copy_from_slice(seg);
            pos += seg.len();
        })
    }

    /// `copy_in` is `memcpy_iovs` from a contiguous `src` into the host
    /// buffer at `byte_offset`.
    pub fn copy_in(&mut self, byte_offset: usize, src: &[u8]) -> Result<(), ShortBuffer> {
        let mut pos = 0;
        self.walk_mut(byte_offset, src.len(), |seg| {
            seg.copy_from_slice(&src[pos..pos + seg.len()]);
            pos += seg.len();
        })
    }

    /// `xor_into` is `xor_iovs` from host data at `byte_offset` into a
    /// contiguous scratch buffer `dst`: `dst ^= host[byte_offset..]`.
    pub fn xor_into(&self, byte_offset: usize, dst: &mut [u8]) -> Result<(), ShortBuffer> {
        let mut pos = 0;
        self.walk(byte_offset, dst.len(), |seg| {
            xor_slices(&mut dst[pos..pos + seg.len()], seg);
            pos += seg.len();
        })
    }
}
