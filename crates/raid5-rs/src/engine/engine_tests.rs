use std::cell::RefCell;
use std::rc::Rc;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::child::MemChildDevice;
use crate::engine::{Channel, Engine};
use crate::gather::HostBuffer;
use crate::geometry::Geometry;
use crate::request::HostOp;
use crate::status::RaidStatus;

fn geom3() -> Geometry {
    Geometry::new(3, 8, 512, 4).unwrap()
}

fn engine_of(geom: Geometry, stripe_slots: usize) -> std::sync::Arc<Engine<MemChildDevice>> {
    let child_blocks = geom.total_stripes * geom.strip_size;
    let children: Vec<MemChildDevice> = (0..geom.disks)
        .map(|_| MemChildDevice::new(child_blocks, geom.blocklen))
        .collect();
    Engine::new(geom, children, stripe_slots).unwrap()
}

fn capture() -> (
    Rc<RefCell<Option<(RaidStatus, u64, HostBuffer)>>>,
    Box<dyn FnOnce(RaidStatus, u64, HostBuffer)>,
) {
    let slot = Rc::new(RefCell::new(None));
    let slot2 = slot.clone();
    let cb: Box<dyn FnOnce(RaidStatus, u64, HostBuffer)> = Box::new(move |status, blocks, host| {
        *slot2.borrow_mut() = Some((status, blocks, host));
    });
    (slot, cb)
}

fn pattern(byte: u8, len: usize) -> Vec<u8> {
    vec![byte; len]
}

#[test]
fn full_stripe_write_recomputes_parity_then_reads_back() {
    let geom = geom3();
    let engine = engine_of(geom, 4);
    let ch = Channel::new(engine.clone());
    let strip_bytes = (geom.strip_size * geom.blocklen) as usize;

    let data0 = pattern(0xAA, strip_bytes);
    let data1 = pattern(0x55, strip_bytes);
    let mut payload = data0.clone();
    payload.extend_from_slice(&data1);

    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Write, 0, geom.stripe_blocks(), HostBuffer(vec![payload.clone()]), cb);
    let (status, blocks, _host) = result.borrow_mut().take().expect("write completes synchronously");
    assert_eq!(status, RaidStatus::Success);
    assert_eq!(blocks, geom.stripe_blocks());

    engine.with_child(0, |c| assert_eq!(&c.raw()[..strip_bytes], &data0[..]));
    engine.with_child(1, |c| assert_eq!(&c.raw()[..strip_bytes], &data1[..]));
    engine.with_child(2, |c| {
        let mut expect = data0.clone();
        for (d, s) in expect.iter_mut().zip(&data1) {
            *d ^= s;
        }
        assert_eq!(&c.raw()[..strip_bytes], &expect[..]);
    });

    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Read, 0, geom.stripe_blocks(), HostBuffer(vec![vec![0u8; payload.len()]]), cb);
    let (status, blocks, host) = result.borrow_mut().take().unwrap();
    assert_eq!(status, RaidStatus::Success);
    assert_eq!(blocks, geom.stripe_blocks());
    assert_eq!(&host.0[0], &payload);
}

#[test]
fn single_block_write_uses_rmw_and_leaves_rest_of_strip_untouched() {
    let geom = geom3();
    let engine = engine_of(geom, 4);
    let ch = Channel::new(engine.clone());
    let strip_bytes = (geom.strip_size * geom.blocklen) as usize;
    let bl = geom.blocklen as usize;

    let data0 = pattern(0xAA, strip_bytes);
    let data1 = pattern(0x55, strip_bytes);
    let mut payload = data0.clone();
    payload.extend_from_slice(&data1);
    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Write, 0, geom.stripe_blocks(), HostBuffer(vec![payload]), cb);
    result.borrow_mut().take().unwrap();

    let new_block = pattern(0xFF, bl);
    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Write, 0, 1, HostBuffer(vec![new_block.clone()]), cb);
    let (status, blocks, _) = result.borrow_mut().take().unwrap();
    assert_eq!(status, RaidStatus::Success);
    assert_eq!(blocks, 1);

    engine.with_child(0, |c| {
        assert_eq!(&c.raw()[..bl], &new_block[..]);
        assert_eq!(&c.raw()[bl..strip_bytes], &pattern(0xAA, strip_bytes - bl)[..]);
    });
    engine.with_child(2, |c| {
        let mut expect_block0 = new_block.clone();
        for (d, s) in expect_block0.iter_mut().zip(&pattern(0x55, bl)) {
            *d ^= s;
        }
        assert_eq!(&c.raw()[..bl], &expect_block0[..]);
        let mut rest = pattern(0xAA, strip_bytes - bl);
        for (d, s) in rest.iter_mut().zip(&pattern(0x55, strip_bytes - bl)) {
            *d ^= s;
        }
        assert_eq!(&c.raw()[bl..strip_bytes], &rest[..]);
    });
}

#[test]
fn degraded_read_reconstructs_lost_child_from_parity() {
    let geom = geom3();
    let engine = engine_of(geom, 4);
    let ch = Channel::new(engine.clone());
    let strip_bytes = (geom.strip_size * geom.blocklen) as usize;

    let data0 = pattern(0xAA, strip_bytes);
    let data1 = pattern(0x55, strip_bytes);
    let mut payload = data0.clone();
    payload.extend_from_slice(&data1);
    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Write, 0, geom.stripe_blocks(), HostBuffer(vec![payload]), cb);
    result.borrow_mut().take().unwrap();

    engine.with_child(0, |c| c.set_degraded(true));

    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Read, 0, geom.stripe_blocks(), HostBuffer(vec![vec![0u8; strip_bytes * 2]]), cb);
    let (status, _, host) = result.borrow_mut().take().unwrap();
    assert_eq!(status, RaidStatus::Success);
    assert_eq!(&host.0[0][..strip_bytes], &data0[..]);
    assert_eq!(&host.0[0][strip_bytes..], &data1[..]);
}

#[test]
fn degraded_partial_write_reconstructs_gap_before_accumulating_parity() {
    let geom = geom3();
    let engine = engine_of(geom, 4);
    let ch = Channel::new(engine.clone());
    let strip_bytes = (geom.strip_size * geom.blocklen) as usize;
    let bl = geom.blocklen as usize;

    let data0 = pattern(0xAA, strip_bytes);
    let data1 = pattern(0x55, strip_bytes);
    let mut payload = data0.clone();
    payload.extend_from_slice(&data1);
    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Write, 0, geom.stripe_blocks(), HostBuffer(vec![payload]), cb);
    result.borrow_mut().take().unwrap();

    // Child 0 (data chunk 0) goes degraded, then gets a write covering only
    // its first block — a partial touch, forcing DataDegradedReconstruct.
    engine.with_child(0, |c| c.set_degraded(true));
    let new_block = pattern(0x11, bl);
    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Write, 0, 1, HostBuffer(vec![new_block.clone()]), cb);
    let (status, _, _) = result.borrow_mut().take().unwrap();
    assert_eq!(status, RaidStatus::Success);

    // Child 0 itself is never written while degraded.
    engine.with_child(0, |c| assert_eq!(&c.raw()[..strip_bytes], &pattern(0, strip_bytes)[..]));

    // Bring child 0 back and read the whole stripe: block 0 must reflect
    // the new write, the rest of the old data must be intact.
    engine.with_child(0, |c| c.set_degraded(false));
    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Read, 0, geom.stripe_blocks(), HostBuffer(vec![vec![0u8; strip_bytes * 2]]), cb);
    let (status, _, host) = result.borrow_mut().take().unwrap();
    assert_eq!(status, RaidStatus::Success);
    assert_eq!(&host.0[0][..bl], &new_block[..]);
    assert_eq!(&host.0[0][bl..strip_bytes], &data0[bl..]);
    assert_eq!(&host.0[0][strip_bytes..], &data1[..]);
}

#[test]
fn two_degraded_children_fail_the_request_immediately() {
    let geom = geom3();
    let engine = engine_of(geom, 4);
    let ch = Channel::new(engine.clone());
    engine.with_child(0, |c| c.set_degraded(true));
    engine.with_child(1, |c| c.set_degraded(true));

    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Read, 0, geom.stripe_blocks(), HostBuffer(vec![vec![0u8; 0]]), cb);
    let (status, blocks, _) = result.borrow_mut().take().unwrap();
    assert_eq!(status, RaidStatus::Failed);
    assert_eq!(blocks, 0);
}

#[test]
fn request_crossing_a_stripe_boundary_fails_immediately() {
    let geom = geom3();
    let engine = engine_of(geom, 4);
    let ch = Channel::new(engine.clone());

    let (result, cb) = capture();
    // stripe_blocks() - 1 .. stripe_blocks() + 1 straddles two stripes.
    ch.submit_rw_request(HostOp::Read, geom.stripe_blocks() - 1, 2, HostBuffer(vec![vec![0u8; 1024]]), cb);
    let (status, blocks, _) = result.borrow_mut().take().unwrap();
    assert_eq!(status, RaidStatus::Failed);
    assert_eq!(blocks, 0);
}

#[test]
fn concurrent_writes_to_the_same_stripe_serialize_through_the_fifo() {
    let geom = geom3();
    let engine = engine_of(geom, 4);
    let ch = Channel::new(engine.clone());
    let strip_bytes = (geom.strip_size * geom.blocklen) as usize;
    for idx in 0..geom.disks {
        engine.with_child(idx, |c| c.deferred = true);
    }

    let payload_a = pattern(0x11, strip_bytes * 2);
    let payload_b = pattern(0x22, strip_bytes * 2);
    let (result_a, cb_a) = capture();
    let (result_b, cb_b) = capture();

    ch.submit_rw_request(HostOp::Write, 0, geom.stripe_blocks(), HostBuffer(vec![payload_a]), cb_a);
    ch.submit_rw_request(HostOp::Write, 0, geom.stripe_blocks(), HostBuffer(vec![payload_b.clone()]), cb_b);

    // Nothing has completed yet: both are queued behind deferred child I/O.
    assert!(result_a.borrow().is_none());
    assert!(result_b.borrow().is_none());

    // The second write's child I/O must not have been submitted at all
    // while the first is still in flight on this stripe.
    let pending_before = engine.with_child(0, |c| c.pending_len());
    assert_eq!(pending_before, 1);

    // Drain every child device until both requests have completed.
    for _ in 0..8 {
        for idx in 0..geom.disks {
            engine.with_child(idx, |c| while c.pending_len() > 0 { c.drain_one(); });
        }
    }

    let (status_a, _, _) = result_a.borrow_mut().take().expect("first write completes");
    assert_eq!(status_a, RaidStatus::Success);
    let (status_b, _, _) = result_b.borrow_mut().take().expect("second write completes");
    assert_eq!(status_b, RaidStatus::Success);

    engine.with_child(0, |c| assert_eq!(&c.raw()[..strip_bytes], &payload_b[..strip_bytes]));
}

#[test]
fn stripe_cache_exhaustion_queues_the_second_stripe_for_retry() {
    let geom = geom3();
    let engine = engine_of(geom, 1);
    let ch = Channel::new(engine.clone());
    for idx in 0..geom.disks {
        engine.with_child(idx, |c| c.deferred = true);
    }

    let (result_a, cb_a) = capture();
    let (result_b, cb_b) = capture();
    ch.submit_rw_request(HostOp::Read, 0, geom.stripe_blocks(), HostBuffer(vec![vec![0u8; 1024 * 2]]), cb_a);
    // Second request targets a different stripe; the only cache slot is
    // still pinned by the first (in-flight) request.
    ch.submit_rw_request(HostOp::Read, geom.stripe_blocks(), geom.stripe_blocks(), HostBuffer(vec![vec![0u8; 1024 * 2]]), cb_b);

    assert_eq!(ch.retry_queue_len(), 1);
    assert!(result_b.borrow().is_none());

    for _ in 0..8 {
        for idx in 0..geom.disks {
            engine.with_child(idx, |c| while c.pending_len() > 0 { c.drain_one(); });
        }
    }

    result_a.borrow_mut().take().expect("first read completes");
    let (status_b, ..) = result_b.borrow_mut().take().expect("second read eventually completes");
    assert_eq!(status_b, RaidStatus::Success);
    assert_eq!(ch.retry_queue_len(), 0);
}

#[test]
fn transient_child_nomem_is_retried_inline_to_completion() {
    let geom = geom3();
    let engine = engine_of(geom, 4);
    let ch = Channel::new(engine.clone());
    engine.with_child(2, |c| c.busy_countdown = 3);

    let strip_bytes = (geom.strip_size * geom.blocklen) as usize;
    let payload = pattern(0x42, strip_bytes * 2);
    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Write, 0, geom.stripe_blocks(), HostBuffer(vec![payload]), cb);
    let (status, ..) = result.borrow_mut().take().expect("busy child is retried inline");
    assert_eq!(status, RaidStatus::Success);
}

#[test]
fn repeating_a_completed_write_with_identical_payload_leaves_children_unchanged() {
    let geom = geom3();
    let engine = engine_of(geom, 4);
    let ch = Channel::new(engine.clone());
    let strip_bytes = (geom.strip_size * geom.blocklen) as usize;
    let bl = geom.blocklen as usize;

    let data0 = pattern(0xAA, strip_bytes);
    let data1 = pattern(0x55, strip_bytes);
    let mut payload = data0.clone();
    payload.extend_from_slice(&data1);
    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Write, 0, geom.stripe_blocks(), HostBuffer(vec![payload]), cb);
    result.borrow_mut().take().unwrap();

    // Single-block RMW (the same write as
    // single_block_write_uses_rmw_and_leaves_rest_of_strip_untouched),
    // replayed twice with the identical payload.
    let new_block = pattern(0xFF, bl);
    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Write, 0, 1, HostBuffer(vec![new_block.clone()]), cb);
    let (status, ..) = result.borrow_mut().take().unwrap();
    assert_eq!(status, RaidStatus::Success);

    let raw_after_first_replay: Vec<Vec<u8>> = (0..geom.disks).map(|idx| engine.with_child(idx, |c| c.raw().to_vec())).collect();

    let (result, cb) = capture();
    ch.submit_rw_request(HostOp::Write, 0, 1, HostBuffer(vec![new_block]), cb);
    let (status, ..) = result.borrow_mut().take().expect("identical replay completes");
    assert_eq!(status, RaidStatus::Success);

    for idx in 0..geom.disks {
        engine.with_child(idx, |c| assert_eq!(c.raw(), raw_after_first_replay[idx].as_slice(), "child {idx} state changed on identical replay"));
    }
}

#[test]
fn randomized_writes_then_reads_round_trip() {
    let geom = Geometry::new(4, 4, 64, 6).unwrap();
    let engine = engine_of(geom, 6);
    let ch = Channel::new(engine.clone());
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let mut model = vec![0u8; (geom.blockcnt() * geom.blocklen) as usize];

    for _ in 0..40 {
        let stripe = rng.random_range(0..geom.total_stripes);
        let sb = geom.stripe_blocks();
        let stripe_offset = rng.random_range(0..sb);
        let blocks = rng.random_range(1..=(sb - stripe_offset));
        let byte_off = (stripe * sb + stripe_offset) * geom.blocklen;
        let len = blocks * geom.blocklen;
        let data: Vec<u8> = (0..len).map(|_| rng.random()).collect();

        let (result, cb) = capture();
        ch.submit_rw_request(HostOp::Write, stripe * sb + stripe_offset, blocks, HostBuffer(vec![data.clone()]), cb);
        let (status, ..) = result.borrow_mut().take().unwrap();
        assert_eq!(status, RaidStatus::Success);
        model[byte_off as usize..(byte_off + len) as usize].copy_from_slice(&data);
    }

    for stripe in 0..geom.total_stripes {
        let sb = geom.stripe_blocks();
        let byte_off = (stripe * sb * geom.blocklen) as usize;
        let len = (sb * geom.blocklen) as usize;
        let (result, cb) = capture();
        ch.submit_rw_request(HostOp::Read, stripe * sb, sb, HostBuffer(vec![vec![0u8; len]]), cb);
        let (status, _, host) = result.borrow_mut().take().unwrap();
        assert_eq!(status, RaidStatus::Success);
        assert_eq!(&host.0[0], &model[byte_off..byte_off + len]);
    }
}
