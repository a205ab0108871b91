//! Reproduces spec.md §8's "largest-free-block" scenario.

use quickfit_vm::address::Address;
use quickfit_vm::qf::QuickFit;

// alignment=32, 8 buckets: threshold = 256, so a 128-byte request is
// strictly small (see `QuickFit::is_small`) and QF_LARGE_BLOCK_SIZE(128) =
// 128*8 = 1024 matches the whole region exactly, so the first alloc seeds
// it into 8 slices of 128 bytes with no leftover.
const A: usize = 32;

#[test]
fn seeding_then_draining_zeroes_the_largest_block() {
    let mut qf = QuickFit::new(Address(0), 1024, A, 8).unwrap();
    qf.alloc(128).unwrap();
    assert_eq!(qf.largest_free_block(), 128);

    for _ in 0..7 {
        qf.alloc(128).unwrap();
    }
    assert_eq!(qf.largest_free_block(), 0);
}
