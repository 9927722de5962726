//! Ties geometry, the stripe cache, the request pool, and the read/write
//! planners into the crate's external entry point, `submit_rw_request`.
//!
//! This module plays the role the spec calls "Array context" plus the
//! per-channel back-pressure component (spec §3, §5). The host
//! block-device framework itself — per-thread I/O channels, real
//! cross-thread message passing, `queue_io_wait` — is out of scope (spec
//! §1); `Channel` models just enough of it to drive the engine end to end
//! in tests: one channel is one cooperative, single-threaded submitter,
//! and "cross-thread dispatch" of a stripe's next queued request is a
//! direct call into the owning channel rather than a posted message. With
//! one channel (every test in this crate) that is observationally
//! identical to the real thing.

#[cfg(test)]
mod engine_tests;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::child::{ChildCompletion, ChildDevice, ChildOp, ChildRequest, SubmitError};
use crate::chunk::ChunkIo;
use crate::gather::HostBuffer;
use crate::geometry::Geometry;
use crate::metrics::{self, DiskOp, IoOpType, RaidOp};
use crate::planner::{Strategy, read as rplan, write as wplan};
use crate::request::{HostCompletion, HostOp, Phase, RequestId, RequestPool, StripeRequest};
use crate::status::{RaidError, RaidStatus};
use crate::stripe::StripeSlot;
use crate::stripe::cache::StripeCache;

/// Default stripe-slot capacity (`RAID_MAX_STRIPES` in the spec).
pub const RAID_MAX_STRIPES: usize = 1024;

/// A host I/O parked because the stripe cache or request pool was
/// momentarily exhausted (spec §5, "per-channel back-pressure"). Released
/// when a stripe ref on this channel's completion path drops to zero.
struct PendingHostIo {
    op: HostOp,
    offset_blocks: u64,
    blocks: u64,
    host: HostBuffer,
    complete: HostCompletion,
}

/// Shared engine state: geometry, child devices, the stripe cache and
/// request pool. Cross-thread per spec §5 — the cache and each child guard
/// their own state with a lock held only for O(1) operations.
pub struct Engine<C: ChildDevice> {
    geom: Geometry,
    children: Vec<Mutex<C>>,
    pool: Mutex<RequestPool>,
    cache: StripeCache,
    max_degraded: usize,
    channels: Mutex<HashMap<usize, Weak<Channel<C>>>>,
    next_channel_id: Mutex<usize>,
    /// Completion thunks staged by [`Self::submit_child`], drained by
    /// [`Self::drain_completions`] once every per-child lock has been
    /// released. A [`ChildDevice`] may call its completion back
    /// synchronously from inside `submit`; running that callback straight
    /// away, while still holding `children[child]`'s lock, would deadlock
    /// the moment the callback's own logic (e.g. an RMW write's final
    /// parity write) submits more I/O to that same child. Queueing instead
    /// and draining outside the lock avoids that self-deadlock entirely.
    completions: Arc<Mutex<VecDeque<Box<dyn FnOnce()>>>>,
    draining: Mutex<bool>,
}

impl<C: ChildDevice> Engine<C> {
    /// `start(array)`: allocates the stripe cache, request pool and
    /// per-child handles. Fails if `children.len()` does not match
    /// `geom.disks`, or if any strip does not fit a `usize`-addressable
    /// scratch buffer on this platform.
    ///
    /// # Errors
    /// See above.
    pub fn new(geom: Geometry, children: Vec<C>, stripe_slots: usize) -> anyhow::Result<Arc<Self>> {
        if children.len() != geom.disks {
            anyhow::bail!(
                "geometry specifies {} children but {} were given",
                geom.disks,
                children.len()
            );
        }
        let strip_bytes = usize::try_from(geom.strip_bytes())
            .map_err(|_| anyhow::anyhow!("strip size {} exceeds addressable size", geom.strip_bytes()))?;
        Ok(Arc::new(Self {
            cache: StripeCache::new(stripe_slots, geom.disks, strip_bytes),
            pool: Mutex::new(RequestPool::new(stripe_slots * 4)),
            children: children.into_iter().map(Mutex::new).collect(),
            geom,
            max_degraded: 1,
            channels: Mutex::new(HashMap::new()),
            next_channel_id: Mutex::new(0),
            completions: Arc::new(Mutex::new(VecDeque::new())),
            draining: Mutex::new(false),
        }))
    }

    #[must_use]
    pub const fn geometry(&self) -> &Geometry {
        &self.geom
    }

    /// The virtual device's total block count, as exposed to the framework
    /// by `start()` (spec §6).
    #[must_use]
    pub fn blockcnt(&self) -> u64 {
        self.geom.blockcnt()
    }

    /// `optimal_io_boundary`: the framework splits host I/O at multiples of
    /// this many blocks, so every request this engine sees is confined to
    /// one stripe.
    #[must_use]
    pub fn optimal_io_boundary(&self) -> u64 {
        self.geom.stripe_blocks()
    }

    fn degraded_mask(&self) -> Vec<bool> {
        self.children.iter().map(|c| c.lock().is_degraded()).collect()
    }

    /// Runs `f` against child `idx`'s device directly, e.g. to flip
    /// simulated degradation or inspect raw backing bytes in tests —
    /// mirrors the spec's `fail_disk`-style administrative hook, which in
    /// production belongs to the host framework rather than this crate.
    pub fn with_child<R>(&self, idx: usize, f: impl FnOnce(&mut C) -> R) -> R {
        let result = f(&mut self.children[idx].lock());
        self.drain_completions();
        result
    }

    fn register_channel(&self, id: usize, ch: Weak<Channel<C>>) {
        self.channels.lock().insert(id, ch);
    }

    fn channel(&self, id: usize) -> Option<Arc<Channel<C>>> {
        self.channels.lock().get(&id).and_then(Weak::upgrade)
    }

    fn alloc_channel_id(&self) -> usize {
        let mut next = self.next_channel_id.lock();
        let id = *next;
        *next += 1;
        id
    }

    /// Submits one child I/O, retrying inline on transient `NOMEM`
    /// (spec §5: "the child's wait queue"). This crate's [`ChildDevice`]
    /// test double has no asynchronous wake of its own to offer, so the
    /// retry loop below stands in for the waitq entry a real framework
    /// would register; see `DESIGN.md`.
    ///
    /// `on_complete` is never invoked directly from here: a device may call
    /// its completion back synchronously from inside `submit`, and that
    /// callback commonly submits more I/O — e.g. an RMW write's last
    /// preread completing triggers the final parity write, sometimes to
    /// this very child. Running it while still holding `children[child]`'s
    /// lock would deadlock on that reentrant submit. Instead the callback
    /// is wrapped so it only enqueues a completion thunk, which
    /// [`Self::drain_completions`] runs after every per-child lock in the
    /// current call has been released.
    fn submit_child(&self, child: usize, req: ChildRequest, on_complete: ChildCompletion) {
        let completions = self.completions.clone();
        let wrapped: ChildCompletion = Box::new(move |req, success| {
            completions.lock().push_back(Box::new(move || on_complete(req, success)));
        });
        let mut req = req;
        let mut on_complete = wrapped;
        loop {
            let outcome = self.children[child].lock().submit(req, on_complete);
            match outcome {
                Ok(()) => break,
                Err(SubmitError::Busy(r, c)) => {
                    req = r;
                    on_complete = c;
                }
            }
        }
        self.drain_completions();
    }

    /// Runs every completion thunk queued by [`Self::submit_child`], outside
    /// any child lock. Guarded against reentrancy: a thunk's own logic may
    /// submit further child I/O and so call this indirectly again; that
    /// nested call just returns immediately and lets the active outer loop
    /// keep draining, since `drain_completions` always continues popping
    /// until the queue is empty.
    fn drain_completions(&self) {
        let mut draining = self.draining.lock();
        if *draining {
            return;
        }
        *draining = true;
        drop(draining);

        loop {
            let next = self.completions.lock().pop_front();
            let Some(thunk) = next else { break };
            thunk();
        }

        *self.draining.lock() = false;
    }
}

/// One cooperative I/O channel: the spec's per-thread submission context.
/// Owns a retry queue for host I/O that arrived while the stripe cache or
/// request pool was full.
pub struct Channel<C: ChildDevice> {
    id: usize,
    engine: Arc<Engine<C>>,
    retry_queue: Mutex<VecDeque<PendingHostIo>>,
}

impl<C: ChildDevice + 'static> Channel<C> {
    /// `io_channel_resource_init`: registers a new channel against `engine`.
    #[must_use]
    pub fn new(engine: Arc<Engine<C>>) -> Arc<Self> {
        let id = engine.alloc_channel_id();
        let channel = Arc::new(Self { id, engine: engine.clone(), retry_queue: Mutex::new(VecDeque::new()) });
        engine.register_channel(id, Arc::downgrade(&channel));
        channel
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn retry_queue_len(&self) -> usize {
        self.retry_queue.lock().len()
    }

    /// `submit_rw_request`: the crate's host I/O entry point. `offset_blocks`
    /// and `blocks` address the virtual device directly; per the spec's
    /// `split_on_optimal_io_boundary` contract the caller (the framework, in
    /// production) never lets a single call cross a stripe boundary.
    pub fn submit_rw_request(
        self: &Arc<Self>,
        op: HostOp,
        offset_blocks: u64,
        blocks: u64,
        host: HostBuffer,
        complete: HostCompletion,
    ) {
        let (stripe, stripe_offset) = self.engine.geometry().locate(offset_blocks);
        if stripe_offset + blocks > self.engine.geometry().stripe_blocks() {
            complete(RaidStatus::Failed, 0, host);
            return;
        }
        self.admit(op, stripe, stripe_offset, blocks, host, complete);
    }

    fn admit(
        self: &Arc<Self>,
        op: HostOp,
        stripe: u64,
        stripe_offset: u64,
        blocks: u64,
        host: HostBuffer,
        complete: HostCompletion,
    ) {
        let Some((_, slot)) = self.engine.cache.get_stripe(stripe) else {
            self.retry_queue.lock().push_back(PendingHostIo { op, offset_blocks: stripe * self.engine.geometry().stripe_blocks() + stripe_offset, blocks, host, complete });
            return;
        };

        let degraded = self.engine.degraded_mask();
        let degraded_count = degraded.iter().filter(|&&d| d).count();
        if degraded_count > self.engine.max_degraded {
            slot.dec_refs();
            complete(RaidStatus::Failed, 0, host);
            return;
        }

        let built = match op {
            HostOp::Read => build_read_request(&self.engine.geom, stripe, stripe_offset, blocks, host, &degraded, slot.clone(), self.id),
            HostOp::Write => build_write_request(&self.engine.geom, stripe, stripe_offset, blocks, host, &degraded, slot.clone(), self.id),
        };
        let req = match built {
            Ok(req) => req,
            Err((host, _err)) => {
                slot.dec_refs();
                complete(RaidStatus::Failed, 0, host);
                return;
            }
        };

        let global_offset = stripe * self.engine.geometry().stripe_blocks() + stripe_offset;
        let id = match self.engine.pool.lock().alloc(req) {
            Ok(id) => id,
            Err(mut req) => {
                slot.dec_refs();
                let host = std::mem::take(&mut req.host);
                self.retry_queue.lock().push_back(PendingHostIo { op, offset_blocks: global_offset, blocks, host, complete });
                return;
            }
        };
        self.engine.pool.lock().get_mut(id).complete = Some(complete);

        if slot.enqueue(id) {
            self.run(id);
        }
    }

    fn run(self: &Arc<Self>, id: RequestId) {
        let op = self.engine.pool.lock().get(id).op;
        match op {
            HostOp::Read => self.start_read(id),
            HostOp::Write => self.start_write(id),
        }
    }

    fn start_read(self: &Arc<Self>, id: RequestId) {
        let prereads: Vec<(usize, u64, u64)> = {
            let mut pool = self.engine.pool.lock();
            let req = pool.get_mut(id);
            req.chunks
                .iter()
                .filter(|c| matches!(c.io, ChunkIo::Preread))
                .map(|c| (c.child, c.preread_offset, c.preread_blocks))
                .collect()
        };
        let plain: Vec<(usize, u64, u64)> = {
            let pool = self.engine.pool.lock();
            let req = pool.get(id);
            req.chunks
                .iter()
                .filter(|c| matches!(c.io, ChunkIo::Read))
                .map(|c| (c.child, c.req_offset, c.req_blocks))
                .collect()
        };

        if prereads.is_empty() && plain.is_empty() {
            self.finish(id, RaidStatus::Success);
            return;
        }

        {
            let mut pool = self.engine.pool.lock();
            let req = pool.get_mut(id);
            req.phase = Phase::Prereading;
            req.remaining = prereads.len() + plain.len();
        }

        for (child, off, blocks) in plain {
            self.submit_read_to_host(id, child, off, blocks);
        }
        for (child, off, blocks) in prereads {
            self.submit_read_to_scratch(id, child, off, blocks);
        }
    }

    fn submit_read_to_host(self: &Arc<Self>, id: RequestId, child: usize, off: u64, blocks: u64) {
        let geom = self.engine.geom;
        let stripe = { self.engine.pool.lock().get(id).stripe };
        let data_idx = geom.data_idx_for_child(stripe, child).expect("plain read target is a data chunk");
        let stripe_offset = { self.engine.pool.lock().get(id).stripe_offset };
        let host_off = geom.host_byte_offset(stripe_offset, data_idx, off) as usize;

        let blocklen = geom.blocklen;
        let bytes = blocks * blocklen;
        let creq = ChildRequest {
            op: ChildOp::Read,
            offset_blocks: stripe * geom.strip_size + off,
            blocks,
            buf: vec![0u8; (blocks * blocklen) as usize],
        };
        let channel = self.clone();
        self.engine.submit_child(
            child,
            creq,
            Box::new(move |creq, success| {
                metrics::record_disk_op(DiskOp { disk_id: child.to_string(), op: IoOpType::Read, bytes, latency_seconds: 0.0, error: !success });
                channel.on_child_complete(id, child, success, move |pool| {
                    if success {
                        let req = pool.get_mut(id);
                        if let Err(e) = req.host.copy_in(host_off, &creq.buf) {
                            req.mark_failed(RaidError::Mapping(e));
                        }
                    }
                });
            }),
        );
    }

    fn submit_read_to_scratch(self: &Arc<Self>, id: RequestId, child: usize, off: u64, blocks: u64) {
        let geom = self.engine.geom;
        let stripe = { self.engine.pool.lock().get(id).stripe };
        let blocklen = geom.blocklen;
        let bytes = blocks * blocklen;
        let creq = ChildRequest {
            op: ChildOp::Read,
            offset_blocks: stripe * geom.strip_size + off,
            blocks,
            buf: vec![0u8; (blocks * blocklen) as usize],
        };
        let slot = { self.engine.pool.lock().get(id).slot.clone() };
        let start = (off * blocklen) as usize;
        let channel = self.clone();
        self.engine.submit_child(
            child,
            creq,
            Box::new(move |creq, success| {
                metrics::record_disk_op(DiskOp { disk_id: child.to_string(), op: IoOpType::Read, bytes, latency_seconds: 0.0, error: !success });
                if success {
                    slot.with_scratch(child, |buf| buf[start..start + creq.buf.len()].copy_from_slice(&creq.buf));
                }
                channel.on_child_complete(id, child, success, |_| {});
            }),
        );
    }

    /// Called on every child-I/O completion for the current phase.
    /// Decrements `remaining`; when it reaches zero, runs `on_drain` (to
    /// stage the result) and then advances the request's state machine.
    fn on_child_complete(self: &Arc<Self>, id: RequestId, child: usize, success: bool, on_drain: impl FnOnce(&mut RequestPool)) {
        let done = {
            let mut pool = self.engine.pool.lock();
            if !success {
                pool.get_mut(id).mark_failed(RaidError::ChildFailed { child });
            }
            on_drain(&mut pool);
            let req = pool.get_mut(id);
            req.remaining -= 1;
            req.remaining == 0
        };
        if !done {
            return;
        }
        let (phase, status) = {
            let pool = self.engine.pool.lock();
            let req = pool.get(id);
            (req.phase, req.status)
        };
        match (phase, status) {
            (_, RaidStatus::Failed) => self.finish(id, RaidStatus::Failed),
            (Phase::Prereading, _) => self.after_preread(id),
            (Phase::Executing, _) => self.finish(id, RaidStatus::Success),
            (Phase::Planned | Phase::Done, _) => self.finish(id, status),
        }
    }

    fn after_preread(self: &Arc<Self>, id: RequestId) {
        let op = { self.engine.pool.lock().get(id).op };
        match op {
            HostOp::Read => self.finish_read(id),
            HostOp::Write => self.finish_write_after_preread(id),
        }
    }

    fn finish_read(self: &Arc<Self>, id: RequestId) {
        let geom = self.engine.geom;
        let result = {
            let mut pool = self.engine.pool.lock();
            let req = pool.get_mut(id);
            let Some(degraded) = req.degraded_chunk else {
                return self.start_final_write_or_complete_read(id);
            };
            let slot = req.slot.clone();
            let scratch: Vec<Vec<u8>> = (0..geom.disks).map(|i| slot.with_scratch(i, <[u8]>::to_vec)).collect();
            rplan::finish_read(&geom, req.stripe, req.stripe_offset, degraded, &req.chunks, &scratch, &mut req.host)
        };
        match result {
            Ok(()) => self.finish(id, RaidStatus::Success),
            Err(_) => self.finish(id, RaidStatus::Failed),
        }
    }

    fn start_final_write_or_complete_read(self: &Arc<Self>, id: RequestId) {
        self.finish(id, RaidStatus::Success);
    }

    fn start_write(self: &Arc<Self>, id: RequestId) {
        let prereads: Vec<(usize, u64, u64)> = {
            let pool = self.engine.pool.lock();
            let req = pool.get(id);
            req.chunks
                .iter()
                .filter(|c| c.needs_preread())
                .map(|c| (c.child, c.preread_offset, c.preread_blocks))
                .collect()
        };

        if prereads.is_empty() {
            self.compute_write_parity(id);
            return;
        }

        {
            let mut pool = self.engine.pool.lock();
            let req = pool.get_mut(id);
            req.phase = Phase::Prereading;
            req.remaining = prereads.len();
        }
        for (child, off, blocks) in prereads {
            self.submit_read_to_scratch(id, child, off, blocks);
        }
    }

    fn finish_write_after_preread(self: &Arc<Self>, id: RequestId) {
        self.compute_write_parity(id);
    }

    fn compute_write_parity(self: &Arc<Self>, id: RequestId) {
        let geom = self.engine.geom;
        let outcome = {
            let mut pool = self.engine.pool.lock();
            let req = pool.get_mut(id);
            let strategy = req.strategy.expect("write request always has a strategy");
            let slot = req.slot.clone();
            let mut scratch: Vec<Vec<u8>> = (0..geom.disks).map(|i| slot.with_scratch(i, <[u8]>::to_vec)).collect();

            let result: Result<(), RaidError> = match strategy {
                Strategy::ParityDegraded => Ok(()),
                Strategy::Rmw => {
                    wplan::rmw_finish(&geom, req.stripe, req.stripe_offset, &req.chunks, req.parity_chunk, &mut scratch, &req.host)
                }
                Strategy::Rcw => {
                    let window = req.window.expect("rcw strategy always has a window");
                    wplan::rcw_finish(&geom, req.stripe, req.stripe_offset, window, &req.chunks, req.parity_chunk, &mut scratch, &req.host)
                }
                Strategy::DataDegradedReconstruct => {
                    let gap = req.reconstruct_gap.expect("degraded-reconstruct strategy always has a gap");
                    let degraded = req.degraded_chunk.expect("degraded-reconstruct strategy always has a degraded chunk");
                    wplan::reconstruct_degraded_gap(&geom, req.stripe, gap, degraded, req.parity_chunk, &mut scratch);
                    let window = req.window.expect("degraded-reconstruct strategy always has a window");
                    wplan::rcw_finish(&geom, req.stripe, req.stripe_offset, window, &req.chunks, req.parity_chunk, &mut scratch, &req.host)
                }
            };
            if result.is_ok() {
                for (i, buf) in scratch.into_iter().enumerate() {
                    slot.with_scratch(i, |dst| dst.copy_from_slice(&buf));
                }
            }
            result
        };

        match outcome {
            Ok(()) => self.submit_final_writes(id),
            Err(_) => self.finish(id, RaidStatus::Failed),
        }
    }

    fn submit_final_writes(self: &Arc<Self>, id: RequestId) {
        let geom = self.engine.geom;
        let (stripe, stripe_offset, strategy, parity_chunk, degraded_chunk, window, slot) = {
            let pool = self.engine.pool.lock();
            let req = pool.get(id);
            (
                req.stripe,
                req.stripe_offset,
                req.strategy.expect("write request always has a strategy"),
                req.parity_chunk,
                req.degraded_chunk,
                req.window,
                req.slot.clone(),
            )
        };
        let write_set = {
            let pool = self.engine.pool.lock();
            wplan::build_write_set(strategy, &pool.get(id).chunks, parity_chunk, degraded_chunk)
        };

        if write_set.is_empty() {
            self.finish(id, RaidStatus::Success);
            return;
        }

        // Build every child's payload before submitting any of them: a short
        // host buffer must fail the whole request, and once one child write
        // is in flight the engine can no longer back out of submitting the
        // rest (their slot in `remaining` has already been promised).
        let mut writes = Vec::with_capacity(write_set.len());
        for child in write_set {
            if child == parity_chunk {
                let window = window.expect("a parity write always has a window");
                let start = (window.offset * geom.blocklen) as usize;
                let len = (window.blocks * geom.blocklen) as usize;
                let payload = slot.with_scratch(child, |buf| buf[start..start + len].to_vec());
                writes.push((child, window.offset, window.blocks, payload));
            } else {
                let pool = self.engine.pool.lock();
                let req = pool.get(id);
                let c = req.chunks[child];
                let data_idx = geom.data_idx_for_child(stripe, child).expect("non-parity write target is a data chunk");
                let host_off = geom.host_byte_offset(stripe_offset, data_idx, c.req_offset) as usize;
                let len = (c.req_blocks * geom.blocklen) as usize;
                let mut payload = vec![0u8; len];
                let req_offset = c.req_offset;
                let req_blocks = c.req_blocks;
                let mapped = req.host.copy_out(host_off, &mut payload);
                drop(pool);
                if let Err(e) = mapped {
                    self.engine.pool.lock().get_mut(id).mark_failed(RaidError::Mapping(e));
                    self.finish(id, RaidStatus::Failed);
                    return;
                }
                writes.push((child, req_offset, req_blocks, payload));
            }
        }

        {
            let mut pool = self.engine.pool.lock();
            pool.get_mut(id).phase = Phase::Executing;
            pool.get_mut(id).remaining = writes.len();
        }

        for (child, off, blocks, payload) in writes {
            let creq = ChildRequest { op: ChildOp::Write, offset_blocks: stripe * geom.strip_size + off, blocks, buf: payload };
            let channel = self.clone();
            let bytes = blocks * geom.blocklen;
            self.engine.submit_child(
                child,
                creq,
                Box::new(move |_creq, success| {
                    metrics::record_disk_op(DiskOp { disk_id: child.to_string(), op: IoOpType::Write, bytes, latency_seconds: 0.0, error: !success });
                    channel.on_child_complete(id, child, success, |_| {});
                }),
            );
        }
    }

    fn finish(self: &Arc<Self>, id: RequestId, status: RaidStatus) {
        let mut pool = self.engine.pool.lock();
        let req = pool.get_mut(id);
        req.phase = Phase::Done;
        let final_status = if matches!(req.status, RaidStatus::Failed) { RaidStatus::Failed } else { status };
        let slot = req.slot.clone();
        let blocks = req.blocks;
        let op = req.op;
        drop(pool);

        let req = self.engine.pool.lock().release(id);
        metrics::record_raid_op(RaidOp {
            op: if matches!(op, HostOp::Read) { IoOpType::Read } else { IoOpType::Write },
            bytes: blocks * self.engine.geom.blocklen,
            latency_seconds: 0.0,
            error: matches!(final_status, RaidStatus::Failed),
        });

        if let Some(complete) = req.complete {
            complete(final_status, blocks, req.host);
        }

        let next = slot.advance();
        let refs = slot.dec_refs();
        if let Some(next_id) = next {
            let next_channel_id = self.engine.pool.lock().get(next_id).channel_id;
            if let Some(ch) = self.engine.channel(next_channel_id) {
                ch.run(next_id);
            }
        }
        if refs == 0 {
            self.release_one_waiter();
        }
    }

    fn release_one_waiter(self: &Arc<Self>) {
        let Some(pending) = self.retry_queue.lock().pop_front() else { return };
        self.submit_rw_request(pending.op, pending.offset_blocks, pending.blocks, pending.host, pending.complete);
    }
}

type BuildErr = (HostBuffer, RaidError);

fn build_read_request(
    geom: &Geometry,
    stripe: u64,
    stripe_offset: u64,
    blocks: u64,
    host: HostBuffer,
    degraded: &[bool],
    slot: Arc<StripeSlot>,
    channel_id: usize,
) -> Result<StripeRequest, BuildErr> {
    let plan = match rplan::plan_read(geom, stripe, stripe_offset, blocks, degraded) {
        Ok(p) => p,
        Err(e) => return Err((host, e)),
    };
    let req = StripeRequest::new(
        stripe,
        HostOp::Read,
        stripe_offset,
        blocks,
        host,
        plan.chunks,
        plan.first_data_chunk,
        plan.last_data_chunk,
        plan.parity_child,
        plan.degraded_chunk,
        slot,
        channel_id,
    );
    Ok(req)
}

fn build_write_request(
    geom: &Geometry,
    stripe: u64,
    stripe_offset: u64,
    blocks: u64,
    host: HostBuffer,
    degraded: &[bool],
    slot: Arc<StripeSlot>,
    channel_id: usize,
) -> Result<StripeRequest, BuildErr> {
    let plan = match wplan::plan_write(geom, stripe, stripe_offset, blocks, degraded) {
        Ok(p) => p,
        Err(e) => return Err((host, e)),
    };
    let mut req = StripeRequest::new(
        stripe,
        HostOp::Write,
        stripe_offset,
        blocks,
        host,
        plan.chunks,
        plan.first_data_chunk,
        plan.last_data_chunk,
        plan.parity_child,
        plan.degraded_chunk,
        slot,
        channel_id,
    );
    req.strategy = Some(plan.strategy);
    req.window = Some(plan.window);
    req.reconstruct_gap = plan.reconstruct_gap;
    Ok(req)
}
