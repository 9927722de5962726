//! Write planning: chooses read-modify-write vs reconstruction-write (or
//! the relevant degraded-write branch), builds the preread set, and
//! accumulates new parity once preread data lands.
//!
//! The strategy choice follows a "vote": each data chunk contributes +1 if
//! its touched span is smaller than a full strip (cheap to patch in
//! place) and -1 if it is touched at all (cost already paid reading it
//! back for Rcw anyway). `vote > 0` favors Rmw. The spec phrases the
//! per-chunk threshold as the (possibly single-chunk-narrowed) parity
//! window; taken literally that mis-selects Rcw for a single-block write
//! to a wide stripe (window narrows to the touched chunk's own slice, so
//! the touched chunk can never register "< window"). Comparing against
//! the full strip size instead reproduces the spec's own worked examples,
//! so that's what's implemented here.

use crate::chunk::{Chunk, ChunkIo};
use crate::gather::HostBuffer;
use crate::geometry::Geometry;
use crate::parity::{xor_slices, zero_fill};
use crate::status::RaidError;

use super::{ParityWindow, Strategy, build_chunks, chunk_gap, parity_window, two_mut};

/// The output of [`plan_write`]: everything the engine needs to drive a
/// write request's preread phase, parity accumulation, and final writes.
pub struct WritePlan {
    pub strategy: Strategy,
    pub window: ParityWindow,
    pub first_data_chunk: usize,
    pub last_data_chunk: usize,
    pub parity_child: usize,
    pub degraded_chunk: Option<usize>,
    /// Set only for [`Strategy::DataDegradedReconstruct`]: the span of the
    /// degraded child's own strip that must be reconstructed before parity
    /// accumulation.
    pub reconstruct_gap: Option<(u64, u64)>,
    pub chunks: Vec<Chunk>,
}

/// `plan_write` builds the chunk list, chooses a strategy, and marks the
/// preread each chunk needs (if any) via `Chunk::preread_offset/blocks`
/// and `Chunk::io`.
///
/// # Errors
/// Returns [`RaidError::TooManyDegraded`] if more than one child is
/// degraded (this geometry tolerates at most one).
pub fn plan_write(
    geom: &Geometry,
    stripe: u64,
    stripe_offset: u64,
    blocks: u64,
    degraded: &[bool],
) -> Result<WritePlan, RaidError> {
    let degraded_count = degraded.iter().filter(|&&d| d).count();
    if degraded_count > 1 {
        return Err(RaidError::TooManyDegraded { degraded: degraded_count, max_degraded: 1 });
    }
    let degraded_chunk = degraded.iter().position(|&d| d);

    let mut chunks = build_chunks(geom, stripe, stripe_offset, blocks);
    let (first_data_chunk, last_data_chunk) = geom.data_chunk_range(stripe_offset, blocks);
    let parity_child = geom.parity_index(stripe);
    let window = parity_window(geom, stripe, &chunks, first_data_chunk, last_data_chunk);

    let mut reconstruct_gap = None;

    let strategy = if Some(parity_child) == degraded_chunk {
        Strategy::ParityDegraded
    } else if let Some(d) = degraded_chunk {
        let dc = chunks[d];
        if dc.req_blocks == 0 {
            mark_rmw_preread(geom, stripe, window, &mut chunks, parity_child);
            Strategy::Rmw
        } else if chunk_gap(window, &dc).is_none() {
            mark_rcw_preread(geom, stripe, window, &mut chunks);
            Strategy::Rcw
        } else {
            let gap = mark_degraded_reconstruct_preread(geom, stripe, window, &mut chunks, parity_child, d);
            reconstruct_gap = Some(gap);
            Strategy::DataDegradedReconstruct
        }
    } else if vote_rmw(geom, stripe, &chunks) {
        mark_rmw_preread(geom, stripe, window, &mut chunks, parity_child);
        Strategy::Rmw
    } else {
        mark_rcw_preread(geom, stripe, window, &mut chunks);
        Strategy::Rcw
    };

    Ok(WritePlan {
        strategy,
        window,
        first_data_chunk,
        last_data_chunk,
        parity_child,
        degraded_chunk,
        reconstruct_gap,
        chunks,
    })
}

/// `vote_rmw` returns `true` when the per-chunk vote favors read-modify-
/// write over reconstruction-write.
fn vote_rmw(geom: &Geometry, stripe: u64, chunks: &[Chunk]) -> bool {
    let mut vote: i64 = 0;
    for data_idx in 0..geom.disks - 1 {
        let child = geom.child_for_data_idx(stripe, data_idx);
        let touched = chunks[child].req_blocks;
        if touched < geom.strip_size {
            vote += 1;
        }
        if touched > 0 {
            vote -= 1;
        }
    }
    vote > 0
}

fn mark_rmw_preread(geom: &Geometry, stripe: u64, window: ParityWindow, chunks: &mut [Chunk], parity_child: usize) {
    for data_idx in 0..geom.disks - 1 {
        let child = geom.child_for_data_idx(stripe, data_idx);
        if chunks[child].touched() {
            chunks[child].preread_offset = chunks[child].req_offset;
            chunks[child].preread_blocks = chunks[child].req_blocks;
            chunks[child].io = ChunkIo::Preread;
        }
    }
    chunks[parity_child].preread_offset = window.offset;
    chunks[parity_child].preread_blocks = window.blocks;
    chunks[parity_child].io = ChunkIo::Preread;
}

fn mark_rcw_preread(geom: &Geometry, stripe: u64, window: ParityWindow, chunks: &mut [Chunk]) {
    for data_idx in 0..geom.disks - 1 {
        let child = geom.child_for_data_idx(stripe, data_idx);
        if let Some((gap_off, gap_blocks)) = chunk_gap(window, &chunks[child]) {
            chunks[child].preread_offset = gap_off;
            chunks[child].preread_blocks = gap_blocks;
            chunks[child].io = ChunkIo::Preread;
        }
    }
}

/// Builds the preread set for [`Strategy::DataDegradedReconstruct`]: the
/// parity child is preread only over the degraded chunk's gap (the span
/// needed to reconstruct it), and every other surviving data chunk is
/// preread over the whole window. Prereading the full window for already-
/// touched survivors is more than strictly necessary (their touched
/// portion will be overwritten anyway) but keeps this branch's preread
/// set uniform and simple; see `DESIGN.md`.
fn mark_degraded_reconstruct_preread(
    geom: &Geometry,
    stripe: u64,
    window: ParityWindow,
    chunks: &mut [Chunk],
    parity_child: usize,
    degraded: usize,
) -> (u64, u64) {
    let gap = chunk_gap(window, &chunks[degraded]).expect("degraded chunk must be only partially touched");
    chunks[parity_child].preread_offset = gap.0;
    chunks[parity_child].preread_blocks = gap.1;
    chunks[parity_child].io = ChunkIo::Preread;
    for data_idx in 0..geom.disks - 1 {
        let child = geom.child_for_data_idx(stripe, data_idx);
        if child == degraded {
            continue;
        }
        chunks[child].preread_offset = window.offset;
        chunks[child].preread_blocks = window.blocks;
        chunks[child].io = ChunkIo::Preread;
    }
    gap
}

/// Reconstructs the degraded child's old contents over `gap` into its own
/// scratch buffer, from the other children's preread data and old parity
/// (all of which must already be populated by the preread phase). Must
/// run before [`rcw_finish`] for [`Strategy::DataDegradedReconstruct`].
pub fn reconstruct_degraded_gap(
    geom: &Geometry,
    stripe: u64,
    gap: (u64, u64),
    degraded: usize,
    parity_child: usize,
    scratch: &mut [Vec<u8>],
) {
    let g_start = (gap.0 * geom.blocklen) as usize;
    let g_len = (gap.1 * geom.blocklen) as usize;
    zero_fill(&mut scratch[degraded][g_start..g_start + g_len]);
    for data_idx in 0..geom.disks - 1 {
        let child = geom.child_for_data_idx(stripe, data_idx);
        if child == degraded {
            continue;
        }
        let (src, dst) = two_mut(scratch, child, degraded);
        xor_slices(&mut dst[g_start..g_start + g_len], &src[g_start..g_start + g_len]);
    }
    let (parity, dst) = two_mut(scratch, parity_child, degraded);
    xor_slices(&mut dst[g_start..g_start + g_len], &parity[g_start..g_start + g_len]);
}

/// Accumulates new parity for [`Strategy::Rmw`]: starts from the old
/// parity already prereaded into `scratch[parity_child]`, then for each
/// touched data chunk XORs out its prereaded old data and XORs in the new
/// data straight from `host`.
///
/// # Errors
/// Returns [`RaidError::Mapping`] if `host` is shorter than the request
/// claims.
pub fn rmw_finish(
    geom: &Geometry,
    stripe: u64,
    stripe_offset: u64,
    chunks: &[Chunk],
    parity_child: usize,
    scratch: &mut [Vec<u8>],
    host: &HostBuffer,
) -> Result<(), RaidError> {
    for data_idx in 0..geom.disks - 1 {
        let child = geom.child_for_data_idx(stripe, data_idx);
        let c = &chunks[child];
        if !c.touched() {
            continue;
        }
        let start = (c.req_offset * geom.blocklen) as usize;
        let len = (c.req_blocks * geom.blocklen) as usize;
        let host_off = geom.host_byte_offset(stripe_offset, data_idx, c.req_offset) as usize;

        let (old, parity) = two_mut(scratch, child, parity_child);
        xor_slices(&mut parity[start..start + len], &old[start..start + len]);
        host.xor_into(host_off, &mut parity[start..start + len])?;
    }
    Ok(())
}

/// Accumulates new parity for [`Strategy::Rcw`] (and, after
/// [`reconstruct_degraded_gap`] has run, [`Strategy::DataDegradedReconstruct`]):
/// zeroes the parity window, then for each data chunk XORs in its
/// prereaded gap (the untouched portion) and its new data straight from
/// `host` (the touched portion).
///
/// # Errors
/// Returns [`RaidError::Mapping`] if `host` is shorter than the request
/// claims.
pub fn rcw_finish(
    geom: &Geometry,
    stripe: u64,
    stripe_offset: u64,
    window: ParityWindow,
    chunks: &[Chunk],
    parity_child: usize,
    scratch: &mut [Vec<u8>],
    host: &HostBuffer,
) -> Result<(), RaidError> {
    let w_start = (window.offset * geom.blocklen) as usize;
    let w_len = (window.blocks * geom.blocklen) as usize;
    zero_fill(&mut scratch[parity_child][w_start..w_start + w_len]);

    for data_idx in 0..geom.disks - 1 {
        let child = geom.child_for_data_idx(stripe, data_idx);
        let c = &chunks[child];

        if let Some((gap_off, gap_blocks)) = chunk_gap(window, c) {
            let g_start = (gap_off * geom.blocklen) as usize;
            let g_len = (gap_blocks * geom.blocklen) as usize;
            let (src, parity) = two_mut(scratch, child, parity_child);
            xor_slices(&mut parity[g_start..g_start + g_len], &src[g_start..g_start + g_len]);
        }
        if c.touched() {
            let start = (c.req_offset * geom.blocklen) as usize;
            let len = (c.req_blocks * geom.blocklen) as usize;
            let host_off = geom.host_byte_offset(stripe_offset, data_idx, c.req_offset) as usize;
            host.xor_into(host_off, &mut scratch[parity_child][start..start + len])?;
        }
    }
    Ok(())
}

/// Lists the physical children that must be written once parity has been
/// accumulated: every touched, non-degraded data chunk, plus parity
/// itself unless [`Strategy::ParityDegraded`] or parity is the degraded
/// child.
#[must_use]
pub fn build_write_set(strategy: Strategy, chunks: &[Chunk], parity_child: usize, degraded_chunk: Option<usize>) -> Vec<usize> {
    let mut out: Vec<usize> = chunks
        .iter()
        .filter(|c| !c.is_parity && c.touched() && Some(c.child) != degraded_chunk)
        .map(|c| c.child)
        .collect();
    if !matches!(strategy, Strategy::ParityDegraded) && Some(parity_child) != degraded_chunk {
        out.push(parity_child);
    }
    out
}
