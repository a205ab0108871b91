//! Reproduces spec.md §8's "can-allot-p" scenario: `qf_can_alloc` correctly
//! reports a large-request size as satisfiable when a plain best-fit
//! split leaves a large block of exactly that size, but doesn't claim a
//! request can succeed when no large block clears its seeding threshold.

use quickfit_vm::address::Address;
use quickfit_vm::qf::QuickFit;

const A: usize = 16;
const N_BUCKETS: usize = 64;

#[test]
fn exact_leftover_says_yes_unseedable_size_says_no() {
    let mut qf = QuickFit::new(Address(0), 4096, A, N_BUCKETS).unwrap();
    for _ in 0..3 {
        qf.alloc(1024).unwrap();
    }

    // 1024 == N_BUCKETS * A, so this request is never "small" (see
    // `QuickFit::is_small`): each of the three prior allocs best-fit-splits
    // 1024 bytes off the region's one large block, and the third split
    // leaves exactly a 1024-byte remainder sitting in `large_blocks` --
    // no bucket seeding is involved at this boundary.
    assert!(qf.can_alloc(1024), "best-fit still finds the exact 1024-byte leftover");
    // QF_LARGE_BLOCK_SIZE(480) = 480 * 64 = 30720, far larger than the
    // 4096-byte region, so no large block can ever satisfy it.
    assert!(!qf.can_alloc(480));
    // `alloc` must agree with `can_alloc` in this direction: a plain
    // best-fit split of the one remaining 1024-byte block would leave a
    // 544-byte remainder, which is smaller than the 1024-byte seeding
    // threshold and so would become an unusable gap rather than a
    // trackable free block. `qf_alloc(480)` must fail here exactly as
    // `can_alloc(480)` already predicted.
    assert!(qf.alloc(480).is_none());
}
