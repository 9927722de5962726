//! Maps stripe index to stripe slot; admits and reclaims entries under
//! refcount, MRU-ordered.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use super::StripeSlot;

struct Meta {
    /// stripe index -> slot id, for slots currently mapped (active).
    by_index: HashMap<u64, usize>,
    /// slot id -> stripe index, the reverse of `by_index`, so reclaim can
    /// drop the forward entry in O(1) without scanning it.
    slot_index: Vec<Option<u64>>,
    /// MRU-ordered list of active slot ids; front = most recently touched.
    active: std::collections::VecDeque<usize>,
    free: Vec<usize>,
}

/// Fixed pool of `S` stripe slots with a hash index from stripe index to
/// slot, reclaimed LRU-first among `refs == 0` slots.
pub struct StripeCache {
    slots: Vec<Arc<StripeSlot>>,
    meta: Mutex<Meta>,
}

impl StripeCache {
    #[must_use]
    pub fn new(capacity: usize, n_children: usize, strip_bytes: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Arc::new(StripeSlot::new(n_children, strip_bytes)))
            .collect();
        Self {
            slots,
            meta: Mutex::new(Meta {
                by_index: HashMap::new(),
                slot_index: vec![None; capacity],
                active: std::collections::VecDeque::new(),
                free: (0..capacity).collect(),
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.meta.lock().active.len()
    }

    /// Looks up or admits the slot for `index`, bumping its refcount.
    /// Returns `None` only when the cache is full and every active slot
    /// still has outstanding requests (`refs > 0`); the caller should then
    /// queue the host I/O on its channel's retry queue.
    pub fn get_stripe(&self, index: u64) -> Option<(usize, Arc<StripeSlot>)> {
        let mut meta = self.meta.lock();

        if let Some(&slot_id) = meta.by_index.get(&index) {
            Self::touch_mru(&mut meta, slot_id);
            let slot = self.slots[slot_id].clone();
            slot.inc_refs();
            return Some((slot_id, slot));
        }

        if meta.free.is_empty() {
            self.reclaim(&mut meta);
        }
        let slot_id = meta.free.pop()?;
        meta.by_index.insert(index, slot_id);
        meta.slot_index[slot_id] = Some(index);
        meta.active.push_front(slot_id);

        let slot = self.slots[slot_id].clone();
        slot.refs.store(1, Ordering::SeqCst);
        Some((slot_id, slot))
    }

    fn touch_mru(meta: &mut Meta, slot_id: usize) {
        if let Some(pos) = meta.active.iter().position(|&s| s == slot_id) {
            meta.active.remove(pos);
        }
        meta.active.push_front(slot_id);
    }

    /// Walks the active list from the LRU end (the back), moving slots
    /// with `refs == 0` to the free list until roughly 7/8 of capacity is
    /// free-or-active-but-reclaimable. The spec's own reclaim bound
    /// (`(S/8) - S + active_count`) is noted there as fragile under
    /// concurrent inserts; this targets the same ~7/8 utilization without
    /// trying to reproduce that exact arithmetic.
    fn reclaim(&self, meta: &mut Meta) {
        let target_free = (self.slots.len() / 8).max(1);
        if meta.free.len() >= target_free {
            return;
        }
        let mut idx = meta.active.len();
        while meta.free.len() < target_free && idx > 0 {
            idx -= 1;
            let slot_id = meta.active[idx];
            if self.slots[slot_id].refs() == 0 {
                meta.active.remove(idx);
                if let Some(stripe_idx) = meta.slot_index[slot_id].take() {
                    meta.by_index.remove(&stripe_idx);
                }
                meta.free.push(slot_id);
            }
        }
    }
}
