//! A seeded, reproducible torture test for QF: random alloc/free traffic
//! that never double-frees and always frees with the originally-returned
//! size, checking invariant (P1) -- `free_space == region_size -
//! sum(live allocated sizes)` -- after every operation.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use quickfit_vm::address::Address;
use quickfit_vm::qf::QuickFit;

const A: usize = 16;
const N_BUCKETS: usize = 64;
const REGION: usize = 256 * 1024;

#[test]
fn random_alloc_free_traffic_preserves_free_space_invariant() {
    let mut rng = ChaCha8Rng::seed_from_u64(0xA11E_57ED);
    let mut qf = QuickFit::new(Address(0), REGION, A, N_BUCKETS).unwrap();
    let mut live: Vec<(Address, usize)> = Vec::new();
    let mut allocated_total = 0usize;

    for _ in 0..20_000 {
        // Bias towards allocation so the live set actually builds up
        // before the region starts rejecting requests.
        let do_alloc = live.is_empty() || rng.random_ratio(2, 3);
        if do_alloc {
            let req = rng.random_range(1..=4096);
            if let Some(addr) = qf.alloc(req) {
                // Recover the size QF actually committed by re-deriving
                // it the same way `qf_alloc` rounds a request, since the
                // allocator doesn't hand the rounded size back directly.
                let rounded = round_like_qf(req);
                live.push((addr, rounded));
                allocated_total += rounded;
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

fn round_like_qf(req: usize) -> usize {
    let rounded = (req + A - 1) / A * A;
    rounded.max(A)
}
