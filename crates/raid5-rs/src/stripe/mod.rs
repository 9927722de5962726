//! The stripe slot: a reusable scratch buffer plus the FIFO that
//! serializes requests against one stripe index.

pub mod cache;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::request::RequestId;

/// A reusable stripe slot. Lives for the array's lifetime; `index` (held
/// in the cache's metadata, not here) changes every time the slot is
/// reassigned to a different stripe.
///
/// Invariant: while `refs() > 0` the slot cannot be reclaimed, even if it
/// is momentarily absent from the cache's active list mid-reassignment.
pub struct StripeSlot {
    refs: AtomicUsize,
    requests: Mutex<VecDeque<RequestId>>,
    chunk_buffers: Mutex<Vec<Vec<u8>>>,
}

impl StripeSlot {
    pub(crate) fn new(n_children: usize, strip_bytes: usize) -> Self {
        Self {
            refs: AtomicUsize::new(0),
            requests: Mutex::new(VecDeque::new()),
            chunk_buffers: Mutex::new(vec![vec![0u8; strip_bytes]; n_children]),
        }
    }

    #[must_use]
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_refs(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the refcount, returning the value after the decrement.
    pub fn dec_refs(&self) -> usize {
        self.refs.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Appends `id` to this stripe's request FIFO. Returns `true` if `id`
    /// became the head (the caller should submit its child I/O now);
    /// `false` if an earlier request is still in flight and `id` must wait.
    pub fn enqueue(&self, id: RequestId) -> bool {
        let mut q = self.requests.lock();
        let became_head = q.is_empty();
        q.push_back(id);
        became_head
    }

    /// Pops the completed head request and returns the next head, if any.
    /// Only ever the head has outstanding child I/O; this is what lets a
    /// completion "dequeue the next request on the same stripe".
    pub fn advance(&self) -> Option<RequestId> {
        let mut q = self.requests.lock();
        q.pop_front();
        q.front().copied()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.requests.lock().is_empty()
    }

    /// Scratch buffer for child `idx`, sized one strip (`strip_size *
    /// blocklen` bytes). Used for preread targets and the final parity
    /// write.
    pub fn with_scratch<R>(&self, idx: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bufs = self.chunk_buffers.lock();
        f(&mut bufs[idx])
    }
}
