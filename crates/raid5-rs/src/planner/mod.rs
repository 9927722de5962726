//! Turns a host I/O range into per-child chunk slices, plus (for writes)
//! the strategy used to recompute parity and (for reads) the plan used to
//! reconstruct a degraded child from the others.

pub mod read;
pub mod write;

use crate::chunk::Chunk;
use crate::geometry::Geometry;

/// The span of a strip that a write's parity computation must cover, in
/// blocks relative to the start of the strip. Per spec step 1: narrowed to
/// a single chunk's own slice when only that chunk is touched, otherwise
/// the full strip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParityWindow {
    pub offset: u64,
    pub blocks: u64,
}

/// Which algorithm the write planner chose to recompute parity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Read-modify-write: preread the touched data chunks and old parity,
    /// XOR out old data and XOR in new.
    Rmw,
    /// Reconstruction-write: preread the untouched portion of every data
    /// chunk, then recompute parity from scratch.
    Rcw,
    /// The parity child itself is degraded; write the touched data chunks
    /// and skip parity entirely.
    ParityDegraded,
    /// A data child is degraded and only partially touched by this write;
    /// its old contents are reconstructed from the other children before
    /// an Rcw-style parity accumulation runs.
    DataDegradedReconstruct,
}

/// Builds the base chunk list for a stripe request: one [`Chunk`] per
/// physical child, each carrying the `(req_offset, req_blocks)` slice of
/// the host range landing on it. Shared by the read and write planners.
#[must_use]
pub fn build_chunks(geom: &Geometry, stripe: u64, stripe_offset: u64, blocks: u64) -> Vec<Chunk> {
    let parity_child = geom.parity_index(stripe);
    let mut chunks: Vec<Chunk> = (0..geom.disks)
        .map(|child| Chunk::idle(child, child == parity_child))
        .collect();
    for data_idx in 0..geom.disks - 1 {
        let child = geom.child_for_data_idx(stripe, data_idx);
        let (req_offset, req_blocks) = geom.chunk_slice(stripe_offset, blocks, data_idx);
        chunks[child].req_offset = req_offset;
        chunks[child].req_blocks = req_blocks;
    }
    chunks
}

/// `parity_window` computes the step-1 parity window: when exactly one
/// data chunk is touched, the window narrows to that chunk's own slice;
/// otherwise it spans the full strip.
#[must_use]
pub fn parity_window(
    geom: &Geometry,
    stripe: u64,
    chunks: &[Chunk],
    first_data_chunk: usize,
    last_data_chunk: usize,
) -> ParityWindow {
    if first_data_chunk == last_data_chunk {
        let child = geom.child_for_data_idx(stripe, first_data_chunk);
        let c = &chunks[child];
        ParityWindow { offset: c.req_offset, blocks: c.req_blocks }
    } else {
        ParityWindow { offset: 0, blocks: geom.strip_size }
    }
}

/// `chunk_gap` returns the complementary sub-range of `window` not covered
/// by `c`'s own touched slice, or `None` if `c` already fully covers the
/// window. A contiguous host range touches at most a prefix of one chunk
/// and a suffix of another, so the complement is always a single
/// contiguous span (never a hole in the middle).
#[must_use]
pub fn chunk_gap(window: ParityWindow, c: &Chunk) -> Option<(u64, u64)> {
    let w_end = window.offset + window.blocks;
    if c.req_blocks == 0 {
        return Some((window.offset, window.blocks));
    }
    let c_end = c.req_offset + c.req_blocks;
    if c.req_offset <= window.offset && c_end >= w_end {
        return None;
    }
    if c.req_offset > window.offset {
        Some((window.offset, c.req_offset - window.offset))
    } else {
        Some((c_end, w_end - c_end))
    }
}

/// Splits `scratch` into two disjoint mutable references at `i` and `j`
/// (which must differ). Used to XOR one child's buffer into another's
/// without a second borrow of the whole slice.
pub(crate) fn two_mut(scratch: &mut [Vec<u8>], i: usize, j: usize) -> (&mut Vec<u8>, &mut Vec<u8>) {
    assert_ne!(i, j, "two_mut: indices must differ");
    if i < j {
        let (a, b) = scratch.split_at_mut(j);
        (&mut a[i], &mut b[0])
    } else {
        let (a, b) = scratch.split_at_mut(i);
        (&mut b[0], &mut a[j])
    }
}
