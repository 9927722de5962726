use super::*;

#[test]
fn writes_then_reads_back() {
    let mut dev = MemChildDevice::new(16, 512);
    let payload = vec![0xABu8; 512 * 2];
    let mut write_ok = None;
    dev.submit(
        ChildRequest {
            op: ChildOp::Write,
            offset_blocks: 0,
            blocks: 2,
            buf: payload.clone(),
        },
        Box::new(|_req, ok| write_ok = Some(ok)),
    )
    .ok();
    assert_eq!(write_ok, Some(true));

    let mut read_buf = None;
    dev.submit(
        ChildRequest {
            op: ChildOp::Read,
            offset_blocks: 0,
            blocks: 2,
            buf: vec![0u8; 1024],
        },
        Box::new(|req, ok| {
            assert!(ok);
            read_buf = Some(req.buf);
        }),
    )
    .ok();
    assert_eq!(read_buf, Some(payload));
}

#[test]
fn out_of_range_io_fails() {
    let mut dev = MemChildDevice::new(4, 512);
    let mut result = None;
    dev.submit(
        ChildRequest {
            op: ChildOp::Read,
            offset_blocks: 10,
            blocks: 1,
            buf: vec![0u8; 512],
        },
        Box::new(|_req, ok| result = Some(ok)),
    )
    .ok();
    assert_eq!(result, Some(false));
}

#[test]
fn busy_countdown_rejects_then_accepts() {
    let mut dev = MemChildDevice::new(4, 512);
    dev.busy_countdown = 2;

    for _ in 0..2 {
        let res = dev.submit(
            ChildRequest {
                op: ChildOp::Write,
                offset_blocks: 0,
                blocks: 1,
                buf: vec![1u8; 512],
            },
            Box::new(|_, _| {}),
        );
        assert!(matches!(res, Err(SubmitError::Busy(..))));
    }

    let res = dev.submit(
        ChildRequest {
            op: ChildOp::Write,
            offset_blocks: 0,
            blocks: 1,
            buf: vec![1u8; 512],
        },
        Box::new(|_, _| {}),
    );
    assert!(res.is_ok());
}

#[test]
fn deferred_mode_completes_in_fifo_order() {
    let mut dev = MemChildDevice::new(4, 512);
    dev.deferred = true;

    let mut order = Vec::new();
    for i in 0..3u8 {
        dev.submit(
            ChildRequest {
                op: ChildOp::Write,
                offset_blocks: 0,
                blocks: 1,
                buf: vec![i; 512],
            },
            Box::new(move |_, ok| {
                assert!(ok);
            }),
        )
        .ok();
        order.push(i);
    }
    assert_eq!(dev.pending_len(), 3);
    dev.drain_all();
    assert_eq!(dev.pending_len(), 0);
    // last write wins
    assert_eq!(dev.raw()[0], 2);
}
