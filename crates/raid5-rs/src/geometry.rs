//! Stripe geometry: parity rotation, data/child index mapping, and
//! per-child chunk slice computation for a RAID-5 array.

#[cfg(test)]
mod geometry_tests;

/// Geometry describes the fixed shape of a RAID-5 array: how many
/// children it has, how many blocks make up one strip on a child, and
/// how many blocks make up a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub disks: usize,
    pub strip_size: u64,
    pub strip_size_shift: u32,
    pub blocklen: u64,
    pub total_stripes: u64,
}

impl Geometry {
    /// `new` builds a geometry, requiring `strip_size` to be a power of two
    /// (as `chunk_index = stripe_offset >> shift` assumes).
    ///
    /// # Errors
    /// Returns an error if `disks < 3` or `strip_size` is not a power of two.
    pub fn new(
        disks: usize,
        strip_size: u64,
        blocklen: u64,
        total_stripes: u64,
    ) -> anyhow::Result<Self> {
        if disks < 3 {
            anyhow::bail!("raid5 requires at least 3 children, got {disks}");
        }
        if strip_size == 0 || !strip_size.is_power_of_two() {
            anyhow::bail!("strip_size must be a nonzero power of two, got {strip_size}");
        }
        Ok(Self {
            disks,
            strip_size,
            strip_size_shift: strip_size.trailing_zeros(),
            blocklen,
            total_stripes,
        })
    }

    /// `stripe_blocks` returns the number of data blocks addressable in one
    /// stripe (all children except the rotating parity child).
    #[must_use]
    pub const fn stripe_blocks(&self) -> u64 {
        self.strip_size * (self.disks as u64 - 1)
    }

    /// `strip_bytes` returns the byte size of one strip.
    #[must_use]
    pub const fn strip_bytes(&self) -> u64 {
        self.strip_size * self.blocklen
    }

    /// `blockcnt` returns the virtual device's total block count, as
    /// exposed to the framework by `start()`.
    #[must_use]
    pub const fn blockcnt(&self) -> u64 {
        self.stripe_blocks() * self.total_stripes
    }

    /// `parity_index` returns the child index holding parity for `stripe`.
    /// Parity rotates backwards across children as the stripe index grows.
    #[must_use]
    pub fn parity_index(&self, stripe: u64) -> usize {
        (self.disks - 1) - usize::try_from(stripe % self.disks as u64).unwrap_or(0)
    }

    /// `child_for_data_idx` maps a data-chunk index (0..N-1, skipping the
    /// parity slot) to its physical child index within the stripe.
    #[must_use]
    pub fn child_for_data_idx(&self, stripe: u64, data_idx: usize) -> usize {
        let parity = self.parity_index(stripe);
        if data_idx < parity { data_idx } else { data_idx + 1 }
    }

    /// `data_idx_for_child` is the inverse of [`Self::child_for_data_idx`];
    /// returns `None` when `child` is the parity child for this stripe.
    #[must_use]
    pub fn data_idx_for_child(&self, stripe: u64, child: usize) -> Option<usize> {
        let parity = self.parity_index(stripe);
        match child.cmp(&parity) {
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Less => Some(child),
            std::cmp::Ordering::Greater => Some(child - 1),
        }
    }

    /// `locate` decomposes a host block range into its stripe index and the
    /// block offset within that stripe. Callers must ensure the range does
    /// not cross a stripe boundary (the host framework is expected to split
    /// requests at `stripe_blocks()` boundaries before they reach the core).
    #[must_use]
    pub fn locate(&self, offset_blocks: u64) -> (u64, u64) {
        let sb = self.stripe_blocks();
        (offset_blocks / sb, offset_blocks % sb)
    }

    /// `data_chunk_range` returns the inclusive `(first, last)` data-chunk
    /// indices touched by a `(stripe_offset, blocks)` range within a stripe.
    #[must_use]
    pub fn data_chunk_range(&self, stripe_offset: u64, blocks: u64) -> (usize, usize) {
        let first = (stripe_offset >> self.strip_size_shift) as usize;
        let last = ((stripe_offset + blocks - 1) >> self.strip_size_shift) as usize;
        (first, last)
    }

    /// `host_byte_offset` maps a block offset local to data chunk
    /// `data_idx` back to the byte offset within the host buffer of a
    /// request that started at `stripe_offset`. Used to pull the "new
    /// data" contribution for a chunk straight out of the host buffer
    /// without staging it through scratch first.
    #[must_use]
    pub fn host_byte_offset(&self, stripe_offset: u64, data_idx: usize, chunk_block_offset: u64) -> u64 {
        let logical_block = data_idx as u64 * self.strip_size + chunk_block_offset;
        (logical_block - stripe_offset) * self.blocklen
    }

    /// `chunk_slice` computes the `(req_offset, req_blocks)` slice of the
    /// given data chunk (by data index, not child index) touched by a
    /// `(stripe_offset, blocks)` host range. Returns `(0, 0)` if the chunk
    /// is untouched.
    #[must_use]
    pub fn chunk_slice(&self, stripe_offset: u64, blocks: u64, data_idx: usize) -> (u64, u64) {
        let chunk_off_from = data_idx as u64 * self.strip_size;
        let chunk_off_to = chunk_off_from + self.strip_size;
        let req_offset = stripe_offset.saturating_sub(chunk_off_from);
        let until = chunk_off_to.min(stripe_offset + blocks);
        let touched_from = chunk_off_from + req_offset;
        if until <= touched_from {
            return (0, 0);
        }
        (req_offset, until - touched_from)
    }
}
