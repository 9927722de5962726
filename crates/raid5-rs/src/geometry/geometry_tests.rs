use super::*;

fn geom() -> Geometry {
    // N=3, strip_size=8 blocks, blocklen=512B (matches the spec's worked scenarios).
    Geometry::new(3, 8, 512, 64).unwrap()
}

#[test]
fn rejects_too_few_disks() {
    assert!(Geometry::new(2, 8, 512, 64).is_err());
}

#[test]
fn rejects_non_power_of_two_strip_size() {
    assert!(Geometry::new(3, 9, 512, 64).is_err());
}

#[test]
fn stripe_blocks_is_strip_size_times_data_disks() {
    assert_eq!(geom().stripe_blocks(), 16);
}

#[test]
fn parity_rotates_backwards_across_stripes() {
    let g = geom();
    assert_eq!(g.parity_index(0), 2);
    assert_eq!(g.parity_index(1), 1);
    assert_eq!(g.parity_index(2), 0);
    assert_eq!(g.parity_index(3), 2);
}

#[test]
fn data_idx_and_child_round_trip() {
    let g = geom();
    for stripe in 0..6u64 {
        let parity = g.parity_index(stripe);
        for child in 0..g.disks {
            if child == parity {
                assert_eq!(g.data_idx_for_child(stripe, child), None);
            } else {
                let data_idx = g.data_idx_for_child(stripe, child).unwrap();
                assert_eq!(g.child_for_data_idx(stripe, data_idx), child);
            }
        }
    }
}

#[test]
fn locate_splits_offset_into_stripe_and_in_stripe_offset() {
    let g = geom();
    assert_eq!(g.locate(0), (0, 0));
    assert_eq!(g.locate(15), (0, 15));
    assert_eq!(g.locate(16), (1, 0));
    assert_eq!(g.locate(20), (1, 4));
}

#[test]
fn full_stripe_write_touches_all_data_chunks() {
    let g = geom();
    let (first, last) = g.data_chunk_range(0, 16);
    assert_eq!((first, last), (0, 1));
    for data_idx in 0..=last {
        assert_eq!(g.chunk_slice(0, 16, data_idx), (0, 8));
    }
}

#[test]
fn single_block_write_touches_one_chunk() {
    let g = geom();
    let (first, last) = g.data_chunk_range(0, 1);
    assert_eq!((first, last), (0, 0));
    assert_eq!(g.chunk_slice(0, 1, 0), (0, 1));
    assert_eq!(g.chunk_slice(0, 1, 1), (0, 0));
}

#[test]
fn mid_chunk_write_computes_correct_offset() {
    let g = geom();
    // blocks 2..6 of stripe 0 fall entirely in data chunk 0.
    assert_eq!(g.chunk_slice(2, 4, 0), (2, 4));
    assert_eq!(g.chunk_slice(2, 4, 1), (0, 0));
}

#[test]
fn host_byte_offset_tracks_logical_block_position() {
    let g = geom();
    // Request starts at stripe_offset=2, so data chunk 0 block 2 is the
    // very first byte of the host buffer.
    assert_eq!(g.host_byte_offset(2, 0, 2), 0);
    // Data chunk 1 block 0 is logical block 8 (one strip over); with the
    // request starting at logical block 2, that's 6 blocks in.
    assert_eq!(g.host_byte_offset(2, 1, 0), 6 * 512);
}
