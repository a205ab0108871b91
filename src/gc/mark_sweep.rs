//! Non-recursive mark-sweep, the mandatory collector.
//!
//! Mark walks the root stack and then an explicit, capacity-bounded
//! worklist; when the worklist would overflow, marking falls back to a
//! linear rescan of the region instead of growing without bound, so a
//! 300,000-deep wrapper chain marks in bounded memory. Sweep then walks
//! the region once, coalescing adjacent dead objects into single runs
//! before handing them back to [`QuickFit`].
//!
//! The region walk needs to tell live objects from free blocks without
//! any in-memory free-list tag (see `qf`'s module docs): it merges
//! [`QuickFit::free_block_ranges`] against the address range and treats
//! everything else as a live object whose header gives its size.

use crate::address::Address;
use crate::error::FatalError;
use crate::object_model::{self, Ref};
use crate::qf::{QuickFit, QF_N_BUCKETS};
use crate::util::{BitSet, SmallVec};
use crate::vm::Collector;

pub struct MarkSweep {
    marks: BitSet,
    worklist: SmallVec,
    worklist_capacity: usize,
    region_base: Address,
    alignment: usize,
}

impl MarkSweep {
    pub fn new(
        region_base: Address,
        region_size: usize,
        alignment: usize,
        worklist_capacity: usize,
    ) -> Result<Self, FatalError> {
        let word_bits = usize::BITS as usize;
        let n_slots = region_size / alignment;
        let n_bits = (n_slots + word_bits - 1) / word_bits * word_bits;
        Ok(MarkSweep {
            marks: BitSet::new(n_bits)?,
            worklist: SmallVec::with_capacity(worklist_capacity),
            worklist_capacity,
            region_base,
            alignment,
        })
    }

    fn slot_index(&self, addr: Address) -> usize {
        (addr - self.region_base) / self.alignment
    }

    /// Run a full collection: mark from `roots`, then sweep dead objects
    /// back into `qf`. `heap` provides header/slot access; mark bits are
    /// cleared on live objects as they are swept, satisfying (G2).
    pub fn collect(
        &mut self,
        heap: &mut [u8],
        qf: &mut QuickFit,
        roots: &SmallVec,
    ) -> Result<(), FatalError> {
        self.mark(heap, qf, roots)?;
        self.sweep(heap, qf)?;
        #[cfg(feature = "extreme_assertions")]
        self.check_mark_bits_clear();
        Ok(())
    }

    /// (G2): every mark bit must be clear once a collection finishes --
    /// sweep clears the bit of every object it leaves in place, and a free
    /// range's bits were never set to begin with. A re-scan of the whole
    /// table is O(region/A), the same cost `extreme_assertions` already
    /// accepts for QF's post-mutation checks.
    #[cfg(feature = "extreme_assertions")]
    fn check_mark_bits_clear(&self) {
        for i in 0..self.marks.len() {
            assert!(!self.marks.get(i), "mark bit {i} left set after sweep");
        }
    }

    fn mark(&mut self, heap: &[u8], qf: &QuickFit, roots: &SmallVec) -> Result<(), FatalError> {
        self.marks.clear_all();
        self.worklist.clear();
        let mut overflowed = false;

        for word in roots.iter() {
            let r = Ref(*word);
            if !r.is_null() {
                self.mark_and_enqueue(r, &mut overflowed);
            }
        }
        self.drain_worklist(heap, &mut overflowed);

        if overflowed {
            self.rescan(heap, qf)?;
        }
        Ok(())
    }

    fn mark_and_enqueue(&mut self, r: Ref, overflowed: &mut bool) {
        let idx = self.slot_index(object_model::addr_of(r));
        if self.marks.get(idx) {
            return;
        }
        self.marks.set(idx);
        if self.worklist.len() < self.worklist_capacity {
            self.worklist.push(r.0);
        } else {
            *overflowed = true;
        }
    }

    fn drain_worklist(&mut self, heap: &[u8], overflowed: &mut bool) {
        while let Some(word) = self.worklist.pop() {
            let addr = object_model::addr_of(Ref(word));
            for i in 0..object_model::slot_count(heap, addr) {
                let child = object_model::slot_read(heap, addr, i);
                if !child.is_null() {
                    self.mark_and_enqueue(child, overflowed);
                }
            }
        }
    }

    /// Linear-scan fallback for when the worklist overflowed: repeatedly
    /// walk the region, marking any unmarked child of an already-marked
    /// object, until a full pass makes no new marks. Bounded at
    /// O(region/A) per pass, independent of chain depth.
    fn rescan(&mut self, heap: &[u8], qf: &QuickFit) -> Result<(), FatalError> {
        loop {
            let mut made_progress = false;
            self.walk_live_objects(heap, qf, |gc, addr| {
                if gc.marks.get(gc.slot_index(addr)) {
                    for i in 0..object_model::slot_count(heap, addr) {
                        let child = object_model::slot_read(heap, addr, i);
                        if !child.is_null() {
                            let cidx = gc.slot_index(object_model::addr_of(child));
                            if !gc.marks.get(cidx) {
                                gc.marks.set(cidx);
                                made_progress = true;
                            }
                        }
                    }
                }
                Ok(())
            })?;
            if !made_progress {
                return Ok(());
            }
        }
    }

    /// Visit every live object in address order, skipping free ranges
    /// without reading their (meaningless) bytes as a header.
    fn walk_live_objects(
        &mut self,
        heap: &[u8],
        qf: &QuickFit,
        mut visit: impl FnMut(&mut Self, Address) -> Result<(), FatalError>,
    ) -> Result<(), FatalError> {
        let free_ranges = qf.free_block_ranges();
        let end = qf.region_base() + qf.region_size();
        let mut addr = qf.region_base();
        let mut next_free = 0;

        while addr < end {
            if next_free < free_ranges.len() && free_ranges[next_free].0 == addr {
                let (_, size) = free_ranges[next_free];
                addr = addr + size;
                next_free += 1;
                continue;
            }
            let size = object_model::object_size(heap, addr)?;
            visit(self, addr)?;
            addr = addr + size;
        }
        Ok(())
    }

    /// Clear QF to empty and walk the region once, coalescing every
    /// contiguous run of (previously-free-or-now-unmarked) bytes into one
    /// run handed to `qf.free`. Marked objects have their mark bit cleared
    /// and are left in place.
    fn sweep(&mut self, heap: &mut [u8], qf: &mut QuickFit) -> Result<(), FatalError> {
        let free_ranges = qf.free_block_ranges();
        let base = qf.region_base();
        let end = base + qf.region_size();
        qf.empty_for_sweep();

        let mut addr = base;
        let mut next_free = 0;
        let mut run_start: Option<Address> = None;
        let mut run_len = 0usize;

        while addr < end {
            if next_free < free_ranges.len() && free_ranges[next_free].0 == addr {
                let (_, size) = free_ranges[next_free];
                run_start.get_or_insert(addr);
                run_len += size;
                addr = addr + size;
                next_free += 1;
                continue;
            }

            let size = object_model::object_size(heap, addr)?;
            let idx = self.slot_index(addr);
            if self.marks.get(idx) {
                if let Some(start) = run_start.take() {
                    qf.free(start, run_len);
                    run_len = 0;
                }
                let mut header = object_model::header_read(heap, addr);
                header.marked = false;
                object_model::header_write(heap, addr, header);
            } else {
                run_start.get_or_insert(addr);
                run_len += size;
            }
            addr = addr + size;
        }
        if let Some(start) = run_start.take() {
            qf.free(start, run_len);
        }
        Ok(())
    }
}

/// Bundles a [`QuickFit`] allocator, a [`MarkSweep`] collector, and their
/// shared backing bytes behind the [`Collector`] contract [`crate::vm::Vm`]
/// needs. This is the mandatory reclaim strategy: it's what a build gets
/// when none of `copying` / `ref_count` / `ref_count_cycles` is enabled.
pub struct MarkSweepHeap {
    heap: Vec<u8>,
    qf: QuickFit,
    gc: MarkSweep,
}

impl Collector for MarkSweepHeap {
    fn new(region_bytes: usize, alignment: usize, worklist_capacity: usize) -> Result<Self, FatalError> {
        let qf = QuickFit::new(Address(0), region_bytes, alignment, QF_N_BUCKETS)?;
        let gc = MarkSweep::new(qf.region_base(), qf.region_size(), alignment, worklist_capacity)?;
        let heap = vec![0u8; qf.region_size()];
        Ok(MarkSweepHeap { heap, qf, gc })
    }

    fn heap(&self) -> &[u8] {
        &self.heap
    }

    fn heap_mut(&mut self) -> &mut [u8] {
        &mut self.heap
    }

    fn try_alloc(&mut self, size: usize) -> Option<Address> {
        self.qf.alloc(size)
    }

    fn collect(&mut self, roots: &mut SmallVec) -> Result<(), FatalError> {
        let before = self.heap_used();
        self.gc.collect(&mut self.heap, &mut self.qf, roots)?;
        log::debug!(
            "quickfit-vm: mark-sweep collection reclaimed {} bytes",
            before.saturating_sub(self.heap_used())
        );
        Ok(())
    }

    fn heap_used(&self) -> usize {
        self.qf.region_size() - self.qf.free_space()
    }
}
