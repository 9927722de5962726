//! Per-I/O stripe request state and the fixed pool it is allocated from.
//!
//! A request is created when a host I/O arrives, bound to a stripe, and
//! executed once it reaches the head of that stripe's serial queue (see
//! [`crate::stripe::cache::StripeCache::handle_stripe`]).

use std::sync::Arc;

use crate::chunk::Chunk;
use crate::gather::HostBuffer;
use crate::planner::{ParityWindow, Strategy};
use crate::status::{RaidError, RaidStatus};
use crate::stripe::StripeSlot;

/// Invoked once a host I/O (already confined to a single stripe by the
/// framework's `split_on_optimal_io_boundary` contract) finishes: final
/// status, blocks completed, and the host buffer handed back to its owner.
pub type HostCompletion = Box<dyn FnOnce(RaidStatus, u64, HostBuffer)>;

/// Whether a stripe request originated from a host READ or WRITE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostOp {
    Read,
    Write,
}

/// Opaque handle into a [`RequestPool`]. Cheap to copy, carried through
/// child-completion callbacks instead of a raw pointer (see the spec's
/// design note on avoiding container-of pointer arithmetic).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub usize);

/// The which-strategy-are-we-executing state machine a write request
/// moves through. A read request stays in `Planned` until completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Just allocated; the planner hasn't chosen a strategy yet.
    Planned,
    /// Waiting on preread child I/O to complete.
    Prereading,
    /// Preread done (or skipped); waiting on the final read/write I/O.
    Executing,
    Done,
}

/// Per-I/O state bound to one stripe.
pub struct StripeRequest {
    pub stripe: u64,
    pub op: HostOp,
    pub stripe_offset: u64,
    pub blocks: u64,
    pub host: HostBuffer,
    pub status: RaidStatus,
    /// First error observed from a child or host-mapping failure; latched by
    /// [`StripeRequest::mark_failed`] and surfaced to the caller's
    /// [`HostCompletion`] alongside the final [`RaidStatus`].
    pub error: Option<RaidError>,
    pub phase: Phase,
    /// Outstanding child-I/O count for the current phase.
    pub remaining: usize,
    pub first_data_chunk: usize,
    pub last_data_chunk: usize,
    pub parity_chunk: usize,
    pub degraded_chunk: Option<usize>,
    /// One entry per child, indexed by physical child index.
    pub chunks: Vec<Chunk>,
    /// The stripe slot this request is bound to; kept alongside the
    /// request so completion can advance the slot's FIFO and decrement its
    /// refcount without a second cache lookup.
    pub slot: Arc<StripeSlot>,
    /// The channel that submitted this request; used to route the "next
    /// queued request on this stripe" dispatch back to its owner.
    pub channel_id: usize,
    /// `None` for reads. Set once by the write planner at creation time.
    pub strategy: Option<Strategy>,
    pub window: Option<ParityWindow>,
    /// Set only for [`Strategy::DataDegradedReconstruct`].
    pub reconstruct_gap: Option<(u64, u64)>,
    /// Invoked exactly once, when the request completes or fails.
    pub complete: Option<HostCompletion>,
}

impl StripeRequest {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stripe: u64,
        op: HostOp,
        stripe_offset: u64,
        blocks: u64,
        host: HostBuffer,
        chunks: Vec<Chunk>,
        first_data_chunk: usize,
        last_data_chunk: usize,
        parity_chunk: usize,
        degraded_chunk: Option<usize>,
        slot: Arc<StripeSlot>,
        channel_id: usize,
    ) -> Self {
        Self {
            stripe,
            op,
            stripe_offset,
            blocks,
            host,
            status: RaidStatus::Success,
            error: None,
            phase: Phase::Planned,
            remaining: 0,
            first_data_chunk,
            last_data_chunk,
            parity_chunk,
            degraded_chunk,
            chunks,
            slot,
            channel_id,
            strategy: None,
            window: None,
            reconstruct_gap: None,
            complete: None,
        }
    }

    /// Latches the request's status to `Failed` and records `err` if this
    /// is the first failure seen (first failure wins, per the spec's error
    /// policy — a later child failure doesn't overwrite the original cause).
    pub fn mark_failed(&mut self, err: RaidError) {
        self.status = RaidStatus::Failed;
        self.error.get_or_insert(err);
    }
}

/// A fixed pool of request slots, sized so it never needs to grow once the
/// array starts (spec design note (b): reserve capacity up front, avoid
/// per-request heap churn for the pool itself).
pub struct RequestPool {
    slots: Vec<Option<StripeRequest>>,
    free: Vec<usize>,
}

impl RequestPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity).rev().collect(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Allocates a slot for `req`, handing it back in `Err` if the pool is
    /// momentarily exhausted (caller should surface `NoMem` and keep the
    /// host buffer it was holding, e.g. to queue for retry).
    pub fn alloc(&mut self, req: StripeRequest) -> Result<RequestId, StripeRequest> {
        let Some(id) = self.free.pop() else { return Err(req) };
        self.slots[id] = Some(req);
        Ok(RequestId(id))
    }

    pub fn get(&self, id: RequestId) -> &StripeRequest {
        self.slots[id.0].as_ref().expect("dangling request id")
    }

    pub fn get_mut(&mut self, id: RequestId) -> &mut StripeRequest {
        self.slots[id.0].as_mut().expect("dangling request id")
    }

    /// Releases the slot, returning its final state.
    pub fn release(&mut self, id: RequestId) -> StripeRequest {
        let req = self.slots[id.0].take().expect("dangling request id");
        self.free.push(id.0);
        req
    }
}
