//! The child-device contract the engine submits I/O against, and an
//! in-memory device used by the core's own tests.
//!
//! The real implementation of this trait belongs to the host block-device
//! framework (submission to NVMe/bdev children, per-thread I/O channels);
//! see the spec's out-of-scope section. What the engine actually needs
//! from it is captured here.

#[cfg(test)]
mod child_tests;

use std::collections::VecDeque;

/// The operation a child I/O performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildOp {
    Read,
    Write,
}

/// One child-device I/O: an operation over `blocks` blocks starting at
/// `offset_blocks` within the child's own address space (not the stripe's).
/// `buf` carries the write payload on submission and is filled with the
/// read result on completion.
#[derive(Debug)]
pub struct ChildRequest {
    pub op: ChildOp,
    pub offset_blocks: u64,
    pub blocks: u64,
    pub buf: Vec<u8>,
}

/// Delivered back to the engine when a child I/O finishes. `success` is
/// `false` if the child reported a failure (media error, etc); transient
/// submission-time exhaustion is reported through [`SubmitError::Busy`]
/// instead and never reaches a completion callback.
pub type ChildCompletion = Box<dyn FnOnce(ChildRequest, bool)>;

/// Returned by [`ChildDevice::submit`] when the device cannot accept the
/// I/O right now. A real framework would register a waitq entry and retry
/// once the child signals space is available; this crate retries inline
/// (see [`crate::engine::Engine::submit_child`]).
pub enum SubmitError {
    Busy(ChildRequest, ChildCompletion),
}

/// What the engine needs from a physical child device.
pub trait ChildDevice {
    fn blockcnt(&self) -> u64;
    fn blocklen(&self) -> u64;
    /// Whether this child is unavailable and must be reconstructed around.
    fn is_degraded(&self) -> bool;
    /// Submit an I/O. On `Ok`, the device has accepted the request and
    /// will call `on_complete` exactly once, synchronously or later. On
    /// `Err(SubmitError::Busy(..))`, the caller gets the request and
    /// completion back unconsumed.
    fn submit(
        &mut self,
        req: ChildRequest,
        on_complete: ChildCompletion,
    ) -> Result<(), SubmitError>;
}

/// An in-memory child device for tests: a flat byte buffer plus knobs to
/// simulate degradation, transient `NOMEM` at submission, and deferred
/// completion (so tests can control child I/O ordering directly instead of
/// relying on synchronous fall-through).
pub struct MemChildDevice {
    blocklen: u64,
    data: Vec<u8>,
    degraded: bool,
    /// When `true`, `submit` queues the I/O instead of completing it
    /// inline; call `drain_one` / `drain_all` to deliver completions.
    pub deferred: bool,
    /// Number of remaining submissions to reject with `Busy` before
    /// accepting normally. Simulates transient child-side exhaustion.
    pub busy_countdown: u32,
    pending: VecDeque<(ChildRequest, ChildCompletion)>,
}

impl MemChildDevice {
    #[must_use]
    pub fn new(blockcnt: u64, blocklen: u64) -> Self {
        let len = usize::try_from(blockcnt * blocklen).expect("device size exceeds usize");
        Self {
            blocklen,
            data: vec![0u8; len],
            degraded: false,
            deferred: false,
            busy_countdown: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn set_degraded(&mut self, degraded: bool) {
        self.degraded = degraded;
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Complete the oldest queued I/O. Panics if nothing is pending.
    pub fn drain_one(&mut self) {
        let (req, done) = self.pending.pop_front().expect("no pending child I/O");
        Self::execute(&mut self.data, self.blocklen, req, done);
    }

    /// Complete all queued I/O in FIFO order.
    pub fn drain_all(&mut self) {
        while !self.pending.is_empty() {
            self.drain_one();
        }
    }

    /// Read out the raw backing bytes; used by tests asserting on-disk
    /// content directly (parity correctness, read-back equality).
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    fn execute(data: &mut [u8], blocklen: u64, mut req: ChildRequest, done: ChildCompletion) {
        let start = usize::try_from(req.offset_blocks * blocklen).unwrap_or(usize::MAX);
        let len = usize::try_from(req.blocks * blocklen).unwrap_or(0);
        let in_range = start.checked_add(len).is_some_and(|end| end <= data.len());

        if !in_range {
            done(req, false);
            return;
        }
        let end = start + len;
        match req.op {
            ChildOp::Read => req.buf.copy_from_slice(&data[start..end]),
            ChildOp::Write => data[start..end].copy_from_slice(&req.buf),
        }
        done(req, true);
    }
}

impl ChildDevice for MemChildDevice {
    fn blockcnt(&self) -> u64 {
        self.data.len() as u64 / self.blocklen.max(1)
    }

    fn blocklen(&self) -> u64 {
        self.blocklen
    }

    fn is_degraded(&self) -> bool {
        self.degraded
    }

    fn submit(
        &mut self,
        req: ChildRequest,
        on_complete: ChildCompletion,
    ) -> Result<(), SubmitError> {
        if self.busy_countdown > 0 {
            self.busy_countdown -= 1;
            return Err(SubmitError::Busy(req, on_complete));
        }
        if self.deferred {
            self.pending.push_back((req, on_complete));
            return Ok(());
        }
        Self::execute(&mut self.data, self.blocklen, req, on_complete);
        Ok(())
    }
}
