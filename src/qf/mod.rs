//! The quick-fit segregated free-list allocator.
//!
//! Carves one contiguous, caller-owned address range into *A*-aligned
//! blocks. Small requests (< `n_buckets * A`) are served from exact-size
//! LIFO buckets that get populated ("seeded") by fanning out a large block
//! the first time a size class is touched; everything else goes through
//! best-fit against [`OrderedMap`]-backed `large_blocks`. QF never merges
//! neighboring free blocks on its own -- that is the GC sweep's job, once
//! per collection, after it has walked the whole region anyway.
//!
//! Free-list linkage lives entirely in `buckets`/`large_blocks` here rather
//! than in the first two words of each free block the way the original
//! does it in raw memory: [`crate::util::SmallVec`] and
//! [`crate::util::OrderedMap`] already give an ordered, appendable
//! structure, so there is nothing to gain by also threading an in-place
//! linked list through the managed bytes.

use crate::address::Address;
use crate::error::FatalError;
use crate::util::{OrderedMap, SmallVec};

/// Default bucket count for VM-owned instances. The original fixes this at
/// a single compile-time constant (`qf_init` always sees 64 classes); here
/// it stays a per-instance constructor argument (see `DESIGN.md`) so tests
/// can probe other bucket counts directly, with this constant standing in
/// for "what a real VM actually passes".
pub const QF_N_BUCKETS: usize = 64;

/// A quick-fit allocator over one address range.
pub struct QuickFit {
    region_base: Address,
    region_size: usize,
    alignment: usize,
    /// Number of small-size buckets. Configurable per instance: the spec's
    /// own worked examples seed differently sized heaps against different
    /// bucket counts, so this is a construction parameter, not a global
    /// constant. See `DESIGN.md` for the derivation.
    n_buckets: usize,
    /// `buckets[0]` is unused (there is no size-zero class); `buckets[k]`
    /// for `k in 1..n_buckets` holds free blocks of exactly `k * alignment`
    /// bytes. `k == n_buckets` is unreachable: that size is never "small"
    /// (see `threshold`/`is_small`), so there is no bucket for it.
    buckets: Vec<SmallVec>,
    large_blocks: OrderedMap,
    n_blocks: usize,
    free_space: usize,
}

impl QuickFit {
    /// Install a single free block covering `region_size` bytes starting at
    /// `region_base`. The base is rounded up and the size rounded down to
    /// `alignment`, per the spec's `qf_init`.
    pub fn new(
        region_base: Address,
        region_size: usize,
        alignment: usize,
        n_buckets: usize,
    ) -> Result<Self, FatalError> {
        if alignment == 0 || n_buckets == 0 {
            return Err(FatalError::InvalidSize {
                detail: "QF alignment and bucket count must be nonzero",
            });
        }
        let base = region_base.align_up(alignment);
        let shift = base - region_base;
        let avail = region_size.saturating_sub(shift);
        let aligned_size = avail / alignment * alignment;
        if aligned_size < 2 * alignment {
            return Err(FatalError::InvalidSize {
                detail: "QF region smaller than 2 * data alignment",
            });
        }

        // Valid small-bucket indices are `1..n_buckets` (see `is_small`):
        // a request of exactly `n_buckets * alignment` is never small, so
        // index `n_buckets` itself is unreachable and gets no bucket.
        let mut buckets = Vec::with_capacity(n_buckets);
        for _ in 0..n_buckets {
            buckets.push(SmallVec::new());
        }
        let mut large_blocks = OrderedMap::new();
        large_blocks.insert(aligned_size, base.as_usize());

        Ok(QuickFit {
            region_base: base,
            region_size: aligned_size,
            alignment,
            n_buckets,
            buckets,
            large_blocks,
            n_blocks: 1,
            free_space: aligned_size,
        })
    }

    pub fn region_base(&self) -> Address {
        self.region_base
    }

    pub fn region_size(&self) -> usize {
        self.region_size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn n_blocks(&self) -> usize {
        self.n_blocks
    }

    pub fn free_space(&self) -> usize {
        self.free_space
    }

    /// The size threshold below which a request is served from a bucket
    /// rather than by best-fit against `large_blocks`. A request of exactly
    /// this size is large (see `is_small`), matching `free`'s own
    /// `size < threshold()` classification.
    fn threshold(&self) -> usize {
        self.n_buckets * self.alignment
    }

    fn is_small(&self, req: usize) -> bool {
        req < self.threshold()
    }

    fn bucket_index(&self, size: usize) -> usize {
        size / self.alignment
    }

    fn round_request(&self, req_bytes: usize) -> usize {
        let rounded = (req_bytes + self.alignment - 1) / self.alignment * self.alignment;
        // The floor is one alignment unit, not two: `alignment` already
        // equals two words (header + one payload word, see `object_model`),
        // so this alone guarantees the "header + >= 1 payload word" minimum
        // the spec's qf_alloc contract describes. A literal 2*alignment
        // floor would over-allocate every fixed 2-word object (int, float,
        // wrapper) and break `vm_heap_used == 2*W` after a single boxed
        // allocation -- see DESIGN.md.
        rounded.max(self.alignment)
    }

    /// The size a large block must reach for bucket seeding to fan it out
    /// into `n_buckets - 1` equal slices of `req` plus the reserved one.
    fn large_block_size(&self, req: usize) -> usize {
        req.saturating_mul(self.n_buckets)
    }

    /// Reserve `req_bytes`, returning the base address of the allocated
    /// block, or `None` if no policy can produce one.
    pub fn alloc(&mut self, req_bytes: usize) -> Option<Address> {
        let result = self.alloc_inner(req_bytes);
        #[cfg(feature = "extreme_assertions")]
        self.check_invariants();
        result
    }

    fn alloc_inner(&mut self, req_bytes: usize) -> Option<Address> {
        let req = self.round_request(req_bytes);
        if self.is_small(req) {
            let idx = self.bucket_index(req);
            if let Some(addr) = self.buckets[idx].pop() {
                self.n_blocks -= 1;
                self.free_space -= req;
                return Some(Address(addr));
            }
            if let Some(block_size) = self.large_blocks.find_best_fit(self.large_block_size(req))
            {
                return Some(self.seed_bucket(block_size, req));
            }
            // Seeding isn't eligible (no large-enough block to fan out), so
            // fall back to a plain split -- but only if the block found by
            // best-fit leaves a remainder that is itself "large". A small
            // leftover here would become exactly the kind of unusable gap
            // `seed_bucket`'s own remainder already guards against, and
            // granting it anyway is what made `can_alloc` and `alloc`
            // disagree on requests like 480 bytes against a single
            // 1024-byte block (see `can_alloc`'s doc comment and
            // DESIGN.md's "Bucket-seeding remainder" note).
            if let Some(block_size) = self.large_blocks.find_best_fit(req) {
                if block_size - req >= self.threshold() || block_size == req {
                    return Some(self.split(block_size, req));
                }
            }
            None
        } else {
            let block_size = self.large_blocks.find_best_fit(req)?;
            Some(self.split(block_size, req))
        }
    }

    /// True iff the allocator, without an intervening collection, would
    /// currently satisfy `qf_alloc(req_bytes)`. This deliberately mirrors
    /// only the fast paths (direct bucket hit, seed-eligible large block):
    /// it is a conservative, one-directional predictor, not an exact one.
    /// `can_alloc(s) == true` guarantees `alloc(s)` immediately succeeds
    /// (the only direction the spec's (P3) requires), but the converse
    /// does not hold: it may answer `false` for a request that `alloc`'s
    /// own plain best-fit split (see `alloc_inner`'s large-remainder gate)
    /// would still satisfy -- e.g. the `basic` scenario's `alloc(1000)`,
    /// whose split leaves a large 9232-byte remainder. See `DESIGN.md` for
    /// why this matches the spec's own worked examples.
    pub fn can_alloc(&self, req_bytes: usize) -> bool {
        let req = self.round_request(req_bytes);
        if self.is_small(req) {
            let idx = self.bucket_index(req);
            if !self.buckets[idx].is_empty() {
                return true;
            }
            self.large_blocks
                .find_best_fit(self.large_block_size(req))
                .is_some()
        } else {
            self.large_blocks.find_best_fit(req).is_some()
        }
    }

    /// Every currently-free block as `(address, size)`, sorted by address.
    ///
    /// QF keeps free-list linkage out of the managed bytes entirely (see
    /// the module docs), so a linear region walk cannot recover a free
    /// block's size by reading its memory the way it can for a live
    /// object's header. The GC's sweep and mark-stack-overflow rescan
    /// instead merge this list against the address range: everything not
    /// covered by a free range is necessarily a live object, recoverable
    /// by reading its header.
    pub fn free_block_ranges(&self) -> Vec<(Address, usize)> {
        let mut ranges = Vec::with_capacity(self.n_blocks);
        for (idx, bucket) in self.buckets.iter().enumerate().skip(1) {
            let size = idx * self.alignment;
            for addr in bucket.iter() {
                ranges.push((Address(*addr), size));
            }
        }
        for (size, addr) in self.large_blocks.iter() {
            ranges.push((Address(addr), size));
        }
        ranges.sort_by_key(|(addr, _)| addr.as_usize());
        ranges
    }

    /// Max of the largest tracked large block and the highest nonempty
    /// bucket's block size.
    pub fn largest_free_block(&self) -> usize {
        let large_max = self.large_blocks.iterate_max().unwrap_or(0);
        let bucket_max = self
            .buckets
            .iter()
            .enumerate()
            .rev()
            .find(|(_, b)| !b.is_empty())
            .map(|(idx, _)| idx * self.alignment)
            .unwrap_or(0);
        large_max.max(bucket_max)
    }

    /// Release `block` of `size` bytes back to the allocator. `size` must
    /// be the exact size originally returned by the `alloc` call that
    /// produced `block`; passing the wrong size corrupts QF silently (the
    /// spec treats this as caller-fault, not a detectable error).
    pub fn free(&mut self, block: Address, size: usize) {
        if size < self.threshold() {
            let idx = self.bucket_index(size);
            self.buckets[idx].push(block.as_usize());
        } else {
            self.large_blocks.insert(size, block.as_usize());
        }
        self.n_blocks += 1;
        self.free_space += size;
        #[cfg(feature = "extreme_assertions")]
        self.check_invariants();
    }

    /// Re-derive the size `alloc(req_bytes)` would actually commit, without
    /// performing the allocation. Exposed only under `test_private` so
    /// integration tests (a separate crate, with no access to private
    /// fields/methods) can check committed sizes against their own
    /// bookkeeping instead of duplicating the rounding rule.
    #[cfg(feature = "test_private")]
    pub fn rounded_request_size(&self, req_bytes: usize) -> usize {
        self.round_request(req_bytes)
    }

    /// Recompute `free_space` from scratch by summing every tracked free
    /// block, and check it against the maintained running total. Used by
    /// `extreme_assertions` to catch free-list bookkeeping drift (I4) right
    /// after the mutation that could have introduced it, rather than
    /// waiting for a later symptom like a corrupted allocation.
    #[cfg(feature = "extreme_assertions")]
    fn check_invariants(&self) {
        // buckets[k] holds blocks of size k*alignment; recompute using each
        // bucket's own index rather than guessing a uniform size.
        let mut recomputed = 0usize;
        for (idx, bucket) in self.buckets.iter().enumerate() {
            recomputed += bucket.len() * idx * self.alignment;
        }
        for (size, _) in self.large_blocks.iter() {
            recomputed += size;
        }
        assert_eq!(
            recomputed, self.free_space,
            "QF free_space drifted from the sum of tracked free blocks"
        );
        assert!(
            self.free_space <= self.region_size,
            "QF free_space exceeds the managed region"
        );
        let n_large = self.large_blocks.size();
        let n_small: usize = self.buckets.iter().map(SmallVec::len).sum();
        assert_eq!(
            n_small + n_large,
            self.n_blocks,
            "QF n_blocks drifted from the tracked free-list lengths"
        );
    }

    /// Reset to the single-large-block initial state.
    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
        self.large_blocks.clear();
        self.large_blocks
            .insert(self.region_size, self.region_base.as_usize());
        self.n_blocks = 1;
        self.free_space = self.region_size;
        #[cfg(feature = "extreme_assertions")]
        self.check_invariants();
    }

    /// Drop to the truly-empty state (no free blocks at all, not even the
    /// whole-region block `clear` installs). Used by the GC sweep, which
    /// immediately repopulates everything by calling [`QuickFit::free`] on
    /// each coalesced dead run it finds while walking the region.
    pub fn empty_for_sweep(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
        self.large_blocks.clear();
        self.n_blocks = 0;
        self.free_space = 0;
    }

    /// Fan a block known to be `>= large_block_size(req)` out into one
    /// reserved block of `req` bytes plus `n_buckets - 1` free blocks of
    /// `req` bytes in `buckets[req / alignment]`. The leftover past the
    /// `n_buckets` slices is tracked in `large_blocks` if it still clears
    /// the small/large threshold, otherwise it is an unusable gap: it is
    /// not freed anywhere and is only reclaimed the next time the GC sweep
    /// rebuilds the free structures from a full region walk.
    fn seed_bucket(&mut self, block_size: usize, req: usize) -> Address {
        let base = Address(
            self.large_blocks
                .take_one(block_size)
                .expect("block_size must be present in large_blocks"),
        );
        let idx = self.bucket_index(req);
        let mut cursor = base + req;
        for _ in 0..self.n_buckets - 1 {
            self.buckets[idx].push(cursor.as_usize());
            cursor = cursor + req;
        }
        self.n_blocks = self.n_blocks - 1 + (self.n_buckets - 1);

        let consumed = req * self.n_buckets;
        let leftover = block_size - consumed;
        if leftover >= self.threshold() {
            self.large_blocks.insert(leftover, cursor.as_usize());
            self.n_blocks += 1;
        }
        self.free_space -= req;
        base
    }

    /// Plain best-fit split with no fan-out: reserve `req` bytes from the
    /// low end of `block_size`, routing whatever remains to a bucket or to
    /// `large_blocks` depending on its own size. Used both for the
    /// seed-ineligible small-request fallback and for every large-request
    /// allocation (which never seeds at all).
    fn split(&mut self, block_size: usize, req: usize) -> Address {
        let base = Address(
            self.large_blocks
                .take_one(block_size)
                .expect("block_size must be present in large_blocks"),
        );
        let remainder = block_size - req;
        self.n_blocks -= 1;
        if remainder > 0 {
            let remainder_addr = base + req;
            if remainder >= self.threshold() {
                self.large_blocks.insert(remainder, remainder_addr.as_usize());
            } else {
                let idx = self.bucket_index(remainder);
                self.buckets[idx].push(remainder_addr.as_usize());
            }
            self.n_blocks += 1;
        }
        self.free_space -= req;
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: usize = 16;

    #[test]
    fn basic() {
        let mut qf = QuickFit::new(Address(0), 10 * 1024, A, 64).unwrap();
        let p = qf.alloc(1000).unwrap();
        assert_eq!(qf.free_space(), 10 * 1024 - 1008);
        assert_eq!(qf.n_blocks(), 1);

        qf.free(p, 1008);
        assert_eq!(qf.n_blocks(), 2);

        assert!(qf.alloc(20000).is_none());
    }

    #[test]
    fn small_alloc() {
        let mut qf = QuickFit::new(Address(0), 10 * 1024, A, 64).unwrap();
        qf.alloc(16).unwrap();
        for _ in 0..63 {
            qf.alloc(16).unwrap();
        }
        assert_eq!(qf.free_space(), 9 * 1024);
    }

    #[test]
    fn largest_free_block() {
        // alignment=32, 8 buckets: threshold = 256, so 128 is strictly
        // small and QF_LARGE_BLOCK_SIZE(128) = 128*8 = 1024 matches the
        // whole region exactly -- the first alloc(128) seeds it into 8
        // slices of 128 bytes with no leftover.
        let mut qf = QuickFit::new(Address(0), 1024, 32, 8).unwrap();
        qf.alloc(128).unwrap();
        assert_eq!(qf.largest_free_block(), 128);

        for _ in 0..7 {
            qf.alloc(128).unwrap();
        }
        assert_eq!(qf.largest_free_block(), 0);
    }

    #[test]
    fn can_allot_p() {
        let mut qf = QuickFit::new(Address(0), 4096, A, 64).unwrap();
        for _ in 0..3 {
            qf.alloc(1024).unwrap();
        }
        assert!(qf.can_alloc(1024));
        assert!(!qf.can_alloc(480));
    }

    #[test]
    fn clear_resets_to_single_block() {
        let mut qf = QuickFit::new(Address(0), 4096, A, 8).unwrap();
        qf.alloc(128).unwrap();
        qf.clear();
        assert_eq!(qf.n_blocks(), 1);
        assert_eq!(qf.free_space(), 4096);
        assert_eq!(qf.largest_free_block(), 4096);
    }

    #[test]
    fn rejects_undersized_region() {
        assert!(QuickFit::new(Address(0), A, A, 8).is_err());
    }

    #[test]
    fn free_then_realloc_round_trips_free_space() {
        let mut qf = QuickFit::new(Address(0), 4096, A, 8).unwrap();
        let start = qf.free_space();
        let p = qf.alloc(200).unwrap();
        qf.free(p, 208);
        assert_eq!(qf.free_space(), start);
    }
}
