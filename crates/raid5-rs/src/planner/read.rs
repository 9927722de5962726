//! Read planning: a plain read when no touched chunk is degraded, or a
//! reconstruction read that XORs the degraded chunk's slice back together
//! from the surviving children (and parity) when it is.

use crate::chunk::ChunkIo;
use crate::gather::HostBuffer;
use crate::geometry::Geometry;
use crate::parity::xor_slices;
use crate::status::RaidError;

use super::build_chunks;
use crate::chunk::Chunk;

/// The output of [`plan_read`].
pub struct ReadPlan {
    pub chunks: Vec<Chunk>,
    pub first_data_chunk: usize,
    pub last_data_chunk: usize,
    pub parity_child: usize,
    /// The physical child index that needs reconstructing, if any. `None`
    /// both when nothing is degraded and when the degraded child isn't
    /// touched by this read at all (parity is never in this set: reads
    /// never need parity unless reconstructing a *data* child).
    pub degraded_chunk: Option<usize>,
}

/// `plan_read` builds the chunk list for a read and, if a touched data
/// chunk is degraded, marks the preread each surviving chunk needs to
/// reconstruct it.
///
/// For each surviving chunk `c` relative to the degraded chunk `d`'s
/// touched slice:
/// - if `c` has no request slice of its own (including parity, which
///   never does), it prereads exactly `d`'s slice;
/// - if `c`'s own request slice already fully contains `d`'s slice, `c`'s
///   plain read (already going to the host buffer) doubles as the
///   reconstruction source, no preread needed;
/// - otherwise `c`'s preread widens to the union of its own slice and
///   `d`'s slice, landing in scratch; the caller must later copy `c`'s own
///   sub-range back out of scratch into the host buffer.
///
/// # Errors
/// Returns [`RaidError::TooManyDegraded`] if more than one child is
/// degraded.
pub fn plan_read(
    geom: &Geometry,
    stripe: u64,
    stripe_offset: u64,
    blocks: u64,
    degraded: &[bool],
) -> Result<ReadPlan, RaidError> {
    let degraded_count = degraded.iter().filter(|&&d| d).count();
    if degraded_count > 1 {
        return Err(RaidError::TooManyDegraded { degraded: degraded_count, max_degraded: 1 });
    }
    let parity_child = geom.parity_index(stripe);
    let mut chunks = build_chunks(geom, stripe, stripe_offset, blocks);
    let (first_data_chunk, last_data_chunk) = geom.data_chunk_range(stripe_offset, blocks);

    let degraded_chunk = degraded
        .iter()
        .position(|&d| d)
        .filter(|&d| d != parity_child && chunks[d].req_blocks > 0);

    for c in &mut chunks {
        if Some(c.child) != degraded_chunk && !c.is_parity && c.req_blocks > 0 {
            c.io = ChunkIo::Read;
        }
    }

    if let Some(d) = degraded_chunk {
        let d_off = chunks[d].req_offset;
        let d_blocks = chunks[d].req_blocks;
        let d_end = d_off + d_blocks;

        for child in 0..geom.disks {
            if child == d {
                continue;
            }
            let c_is_parity = chunks[child].is_parity;
            let c_off = chunks[child].req_offset;
            let c_blocks = chunks[child].req_blocks;

            if c_is_parity || c_blocks == 0 {
                chunks[child].preread_offset = d_off;
                chunks[child].preread_blocks = d_blocks;
                chunks[child].io = ChunkIo::Preread;
                continue;
            }

            let c_end = c_off + c_blocks;
            let fully_contains = c_off <= d_off && c_end >= d_end;
            if !fully_contains {
                let off = c_off.min(d_off);
                let end = c_end.max(d_end);
                chunks[child].preread_offset = off;
                chunks[child].preread_blocks = end - off;
                chunks[child].io = ChunkIo::Preread;
            }
        }
    }

    Ok(ReadPlan { chunks, first_data_chunk, last_data_chunk, parity_child, degraded_chunk })
}

/// Reconstructs the degraded chunk's slice from the other children once
/// every preread this plan called for has completed, writes the result
/// into `host` at the degraded chunk's position, and copies any widened
/// preread's own request slice out of scratch into `host` as well.
///
/// # Errors
/// Returns [`RaidError::Mapping`] if `host` is shorter than the request
/// claims.
pub fn finish_read(
    geom: &Geometry,
    stripe: u64,
    stripe_offset: u64,
    degraded: usize,
    chunks: &[Chunk],
    scratch: &[Vec<u8>],
    host: &mut HostBuffer,
) -> Result<(), RaidError> {
    let d = &chunks[degraded];
    let d_off = d.req_offset;
    let d_blocks = d.req_blocks;
    let len = (d_blocks * geom.blocklen) as usize;
    let mut recon = vec![0u8; len];

    for child in 0..geom.disks {
        if child == degraded {
            continue;
        }
        let c = &chunks[child];
        if c.preread_blocks == 0 {
            // Plain read fully covering d's slice: source is the host buffer.
            let data_idx = geom.data_idx_for_child(stripe, child).expect("non-preread chunk here is always a data chunk");
            let host_off = geom.host_byte_offset(stripe_offset, data_idx, d_off) as usize;
            host.xor_into(host_off, &mut recon)?;
        } else {
            // Scratch is always indexed by absolute strip-relative byte offset
            // (matching the write planner's convention), so `d_off` addresses
            // directly into it regardless of where this chunk's own preread
            // started.
            let start = (d_off * geom.blocklen) as usize;
            xor_slices(&mut recon, &scratch[child][start..start + len]);
        }
    }

    let d_data_idx = geom.data_idx_for_child(stripe, degraded).expect("degraded chunk in a read reconstruction is a data chunk");
    let d_host_off = geom.host_byte_offset(stripe_offset, d_data_idx, d_off) as usize;
    host.copy_in(d_host_off, &recon)?;

    for (child, c) in chunks.iter().enumerate() {
        if child == degraded || c.is_parity || c.req_blocks == 0 || c.preread_blocks == 0 {
            continue;
        }
        if c.preread_offset == c.req_offset && c.preread_blocks == c.req_blocks {
            continue; // not widened, nothing staged in scratch to copy out
        }
        let data_idx = geom.data_idx_for_child(stripe, child).unwrap();
        let host_off = geom.host_byte_offset(stripe_offset, data_idx, c.req_offset) as usize;
        let start = (c.req_offset * geom.blocklen) as usize;
        let clen = (c.req_blocks * geom.blocklen) as usize;
        host.copy_in(host_off, &scratch[child][start..start + clen])?;
    }

    Ok(())
}
