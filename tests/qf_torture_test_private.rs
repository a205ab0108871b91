//! Same torture coverage as `qf_torture.rs`, but sourcing the committed
//! block size directly from `QuickFit::rounded_request_size` (exposed only
//! under the `test_private` feature) instead of duplicating QF's rounding
//! rule in the test. Only compiled when that feature is enabled.

#![cfg(feature = "test_private")]

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use quickfit_vm::address::Address;
use quickfit_vm::qf::QuickFit;

const A: usize = 16;
const N_BUCKETS: usize = 64;
const REGION: usize = 256 * 1024;

#[test]
fn random_alloc_free_traffic_preserves_free_space_invariant_via_test_private() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5EED_F00D);
    let mut qf = QuickFit::new(Address(0), REGION, A, N_BUCKETS).unwrap();
    let mut live: Vec<(Address, usize)> = Vec::new();
    let mut allocated_total = 0usize;

    for _ in 0..20_000 {
        let do_alloc = live.is_empty() || rng.random_ratio(2, 3);
        if do_alloc {
            let req = rng.random_range(1..=4096);
            let expected = qf.rounded_request_size(req);
            if let Some(addr) = qf.alloc(req) {
                live.push((addr, expected));
                allocated_total += expected;
            }
        } else {
            let idx = rng.random_range(0..live.len());
            let (addr, size) = live.swap_remove(idx);
            qf.free(addr, size);
            allocated_total -= size;
        }
        assert_eq!(qf.free_space(), REGION - allocated_total);
    }
}
