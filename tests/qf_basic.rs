//! Reproduces spec.md §8's "basic" scenario literally.

use quickfit_vm::address::Address;
use quickfit_vm::qf::QuickFit;

const A: usize = 16;
const N_BUCKETS: usize = 64;

#[test]
fn basic_scenario() {
    let mut qf = QuickFit::new(Address(0), 10 * 1024, A, N_BUCKETS).unwrap();

    let p = qf.alloc(1000).unwrap();
    assert_eq!(qf.free_space(), 10 * 1024 - 1008);
    assert_eq!(qf.n_blocks(), 1);

    qf.free(p, 1008);
    assert_eq!(qf.n_blocks(), 2);

    assert!(qf.alloc(20000).is_none());
}
