//! Reproduces spec.md §8's "small-alloc" scenario: the first small
//! allocation seeds a bucket with `n_buckets - 1` free entries, and
//! draining them lands exactly on the expected free space.

use quickfit_vm::address::Address;
use quickfit_vm::qf::QuickFit;

const A: usize = 16;
const N_BUCKETS: usize = 64;

#[test]
fn first_alloc_seeds_63_free_entries() {
    let mut qf = QuickFit::new(Address(0), 10 * 1024, A, N_BUCKETS).unwrap();
    qf.alloc(16).unwrap();

    let free_in_bucket_one = qf
        .free_block_ranges()
        .into_iter()
        .filter(|&(_, size)| size == A)
        .count();
    assert_eq!(free_in_bucket_one, N_BUCKETS - 1);
}

#[test]
fn draining_the_seeded_bucket_leaves_9ki_free() {
    let mut qf = QuickFit::new(Address(0), 10 * 1024, A, N_BUCKETS).unwrap();
    qf.alloc(16).unwrap();
    for _ in 0..N_BUCKETS - 1 {
        qf.alloc(16).unwrap();
    }
    assert_eq!(qf.free_space(), 9 * 1024);
}
