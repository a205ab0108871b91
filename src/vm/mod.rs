//! The VM: root stack, object constructors, and the allocation trampoline
//! that invokes a collector when the active reclaim strategy's allocator
//! reports it is out of space.
//!
//! Which collector backs a given build is a compile-time choice (the
//! `copying` / `ref_count` / `ref_count_cycles` Cargo features; none of
//! them gives mark-sweep, the mandatory default -- see the crate's
//! `[features]` table and `DESIGN.md`). [`Collector`] is the narrow,
//! crate-private contract [`Vm`] needs from whichever one is compiled in;
//! this mirrors the teacher's `Plan`/`Collection` trait seam
//! (`mmtk-mmtk-core`'s `plan::Plan`), which lets `MMTK` stay generic over
//! its chosen plan rather than hard-coding one collector's shape.

use crate::address::Address;
use crate::error::{FatalError, OutOfMemory};
use crate::object_model::{self, Header, Ref, Tag, A, W};
use crate::util::SmallVec;

cfg_if::cfg_if! {
    if #[cfg(feature = "copying")] {
        use crate::gc::copying::CopyingGc as ActiveCollector;
    } else if #[cfg(feature = "ref_count")] {
        use crate::gc::rc::RcHeap as ActiveCollector;
    } else if #[cfg(feature = "ref_count_cycles")] {
        use crate::gc::rc::RcCyclesHeap as ActiveCollector;
    } else {
        use crate::gc::mark_sweep::MarkSweepHeap as ActiveCollector;
    }
}

/// Which reclaim policy a build was compiled with. Exactly one is ever
/// active (see the `Group:reclaim` Cargo features); this enum exists so a
/// host can log/report the choice, not to select among them at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimStrategy {
    MarkSweep,
    Copying,
    RefCount,
    RefCountCycles,
}

#[cfg(feature = "copying")]
impl ReclaimStrategy {
    pub const ACTIVE: ReclaimStrategy = ReclaimStrategy::Copying;
}
#[cfg(feature = "ref_count")]
impl ReclaimStrategy {
    pub const ACTIVE: ReclaimStrategy = ReclaimStrategy::RefCount;
}
#[cfg(feature = "ref_count_cycles")]
impl ReclaimStrategy {
    pub const ACTIVE: ReclaimStrategy = ReclaimStrategy::RefCountCycles;
}
#[cfg(not(any(feature = "copying", feature = "ref_count", feature = "ref_count_cycles")))]
impl ReclaimStrategy {
    pub const ACTIVE: ReclaimStrategy = ReclaimStrategy::MarkSweep;
}

impl std::fmt::Display for ReclaimStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReclaimStrategy::MarkSweep => "mark_sweep",
            ReclaimStrategy::Copying => "copying",
            ReclaimStrategy::RefCount => "ref_count",
            ReclaimStrategy::RefCountCycles => "ref_count_cycles",
        };
        f.write_str(name)
    }
}

/// Default capacity of the mark-sweep worklist. Irrelevant to the other
/// three strategies, which ignore it (see each `Collector::new`).
const DEFAULT_MARK_WORKLIST_CAPACITY: usize = 1024;

/// Construction-time knobs for a [`Vm`]. Grounded on the teacher's options
/// pattern (`util::options::Options`, built once and handed to `MMTK::new`
/// rather than threaded as a global): a plain struct, not a builder, since
/// the knob set here is small and fixed.
#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    pub region_bytes: usize,
    pub reclaim: ReclaimStrategy,
    /// Bound on the mark-sweep worklist (see `gc::mark_sweep`). Exposed so
    /// tests can force the rescan-overflow path without allocating
    /// hundreds of thousands of objects; ignored by every other strategy.
    pub mark_worklist_capacity: usize,
}

impl VmOptions {
    pub fn new(region_bytes: usize) -> Self {
        VmOptions {
            region_bytes,
            reclaim: ReclaimStrategy::ACTIVE,
            mark_worklist_capacity: DEFAULT_MARK_WORKLIST_CAPACITY,
        }
    }
}

/// The narrow interface [`Vm`] needs from whichever allocator/collector
/// backs the active reclaim strategy. Each implementor owns its heap bytes
/// and whatever bookkeeping its policy needs (QF + mark bits for
/// mark-sweep, two semispaces for copying, refcounts for the RC variants).
pub(crate) trait Collector: Sized {
    fn new(region_bytes: usize, alignment: usize, worklist_capacity: usize) -> Result<Self, FatalError>;
    fn heap(&self) -> &[u8];
    fn heap_mut(&mut self) -> &mut [u8];
    /// Try to reserve `size` bytes without invoking a collection. `None`
    /// means the caller should collect and retry.
    fn try_alloc(&mut self, size: usize) -> Option<Address>;
    /// Run one reclaim cycle. Collectors that relocate objects (the
    /// copying variant) update `roots` in place; tracing/RC collectors
    /// leave it untouched.
    fn collect(&mut self, roots: &mut SmallVec) -> Result<(), FatalError>;
    /// Bytes currently allocated to live objects.
    fn heap_used(&self) -> usize;
    /// Called after `r` is written into the root stack (push, or as the
    /// new value of an in-place `set`). No-op except for the RC variants.
    fn on_root_push(&mut self, _r: Ref) {}
    /// Called after `r` is removed from the root stack (pop, or as the old
    /// value overwritten by an in-place `set`).
    fn on_root_pop(&mut self, _r: Ref) {}
    /// Called after a container slot is overwritten: `old` is no longer
    /// reachable through that slot, `new` now is.
    fn on_slot_overwrite(&mut self, _old: Ref, _new: Ref) {}
}

/// A managed-memory runtime: one QF-backed (or collector-specific) heap
/// plus an explicit root stack. See `spec.md` §4.5 and §6.
pub struct Vm {
    collector: ActiveCollector,
    roots: SmallVec,
    options: VmOptions,
}

impl Vm {
    /// Allocate a fresh VM with a managed region of exactly `region_bytes`
    /// (rounded to the data alignment), using the reclaim strategy the
    /// crate was compiled with.
    pub fn new(region_bytes: usize) -> Result<Self, FatalError> {
        Self::with_options(VmOptions::new(region_bytes))
    }

    pub fn with_options(options: VmOptions) -> Result<Self, FatalError> {
        crate::logger::try_init();
        let collector =
            ActiveCollector::new(options.region_bytes, A, options.mark_worklist_capacity)?;
        log::debug!(
            "quickfit-vm: new VM, region_bytes={}, reclaim={}",
            options.region_bytes,
            options.reclaim
        );
        Ok(Vm {
            collector,
            roots: SmallVec::new(),
            options,
        })
    }

    pub fn reclaim_strategy(&self) -> ReclaimStrategy {
        self.options.reclaim
    }

    /// Bytes currently allocated to live objects.
    pub fn heap_used(&self) -> usize {
        self.collector.heap_used()
    }

    /// Force a collection outside of the allocation trampoline.
    pub fn gc(&mut self) {
        log::debug!("quickfit-vm: forced GC requested");
        if let Err(e) = self.collector.collect(&mut self.roots) {
            e.abort();
        }
    }

    /// `vm_allocate`: try the fast path, collect once on failure, then
    /// fail with `OutOfMemory` if the retry still can't produce a block.
    /// Per `spec.md` §5, no caller-held bare address survives across this
    /// call except through the root stack or an already-rooted slot.
    fn allocate(&mut self, bytes: usize) -> Result<Address, OutOfMemory> {
        if let Some(addr) = self.collector.try_alloc(bytes) {
            return Ok(addr);
        }
        log::trace!("quickfit-vm: allocation of {bytes} bytes failed, invoking GC");
        if let Err(e) = self.collector.collect(&mut self.roots) {
            e.abort();
        }
        self.collector.try_alloc(bytes).ok_or(OutOfMemory {
            requested_bytes: bytes,
        })
    }

    // -- Root stack ---------------------------------------------------

    pub fn push(&mut self, r: Ref) {
        self.collector.on_root_push(r);
        self.roots.push(r.0);
    }

    /// Fatal on an empty stack (`RootStackUnderflow`): this indicates a
    /// program bug, not a recoverable condition, so it aborts rather than
    /// returning a `Result`. Per the spec's recommendation (§9 Open
    /// Questions), the popped backing slot is not merely forgotten: the
    /// value returned is exactly what was there, and the slot itself is
    /// dropped from the stack so a stale copy cannot accidentally keep
    /// rooting it.
    pub fn pop(&mut self) -> Ref {
        match self.roots.pop() {
            Some(word) => {
                let r = Ref(word);
                self.collector.on_root_pop(r);
                r
            }
            None => FatalError::RootStackUnderflow.abort(),
        }
    }

    pub fn get(&self, i: usize) -> Ref {
        match self.roots.get(i) {
            Some(word) => Ref(word),
            None => FatalError::RootStackUnderflow.abort(),
        }
    }

    pub fn set(&mut self, i: usize, r: Ref) {
        let Some(old_word) = self.roots.get(i) else {
            FatalError::RootStackUnderflow.abort();
        };
        self.collector.on_root_pop(Ref(old_word));
        self.collector.on_root_push(r);
        self.roots.set(i, r.0);
    }

    pub fn size(&self) -> usize {
        self.roots.len()
    }

    /// Find `r`'s current slot on the root stack. Any operation that embeds
    /// or trusts a caller-supplied `Ref` across something that could have
    /// relocated it must call this first: constructors that embed a
    /// caller-supplied `Ref` into a freshly allocated object (`wrapper`'s
    /// child, `array`'s fill) call it *before* allocating, since allocation
    /// can invoke a relocating collection (the `copying` strategy) that
    /// rewrites root-stack entries in place but has no way to patch a bare
    /// `Ref` sitting in a local variable; `set_slot`/`slot` call it on
    /// `container` (and `set_slot` on a non-null `value`) for the same
    /// reason, since a `Ref` obtained before *any* earlier allocation may
    /// already be a stale from-space address by the time it's used here.
    /// Re-reading the value from this index after the allocation, rather
    /// than reusing the pre-allocation local, is what keeps the written
    /// slot pointing at the live object instead of its stale from-space
    /// address. Aborts if `r` isn't rooted; per `spec.md` §5 that's a
    /// caller bug, not a recoverable condition.
    fn require_rooted(&self, r: Ref) -> usize {
        self.roots
            .iter()
            .position(|&word| word == r.0)
            .unwrap_or_else(|| FatalError::UnrootedReference.abort())
    }

    /// Re-read `r` from root-stack slot `i` if `r` is non-null (a rooted
    /// constructor argument may have moved during the allocation that just
    /// ran); leaves `Ref::NULL` as-is since it was never a root to begin
    /// with.
    fn reload_rooted(&self, r: Ref, i: Option<usize>) -> Ref {
        match i {
            Some(i) => Ref(self.roots.get(i).expect("rooted slot vanished during allocation")),
            None => r,
        }
    }

    // -- Constructors ---------------------------------------------------

    pub fn int(&mut self, value: i64) -> Result<Ref, OutOfMemory> {
        let addr = self.allocate(2 * W)?;
        let heap = self.collector.heap_mut();
        object_model::header_write(
            heap,
            addr,
            Header {
                tag: Tag::Int,
                marked: false,
                length: 0,
            },
        );
        object_model::int_payload_write(heap, addr, value);
        Ok(object_model::make_ref(Tag::Int, addr))
    }

    pub fn float(&mut self, value: f64) -> Result<Ref, OutOfMemory> {
        let addr = self.allocate(2 * W)?;
        let heap = self.collector.heap_mut();
        object_model::header_write(
            heap,
            addr,
            Header {
                tag: Tag::Float,
                marked: false,
                length: 0,
            },
        );
        object_model::float_payload_write(heap, addr, value);
        Ok(object_model::make_ref(Tag::Float, addr))
    }

    /// `child` must already be on the root stack (e.g. just `push`ed by the
    /// caller), unless it is [`Ref::NULL`]. This lets the write below
    /// survive a collection embedded in the allocation -- see
    /// `require_rooted`.
    pub fn wrapper(&mut self, child: Ref) -> Result<Ref, OutOfMemory> {
        let child_slot = (!child.is_null()).then(|| self.require_rooted(child));
        let addr = self.allocate(2 * W)?;
        let child = self.reload_rooted(child, child_slot);
        let heap = self.collector.heap_mut();
        object_model::header_write(
            heap,
            addr,
            Header {
                tag: Tag::Wrapper,
                marked: false,
                length: 0,
            },
        );
        object_model::slot_write(heap, addr, 0, child);
        self.collector.on_root_push(child);
        Ok(object_model::make_ref(Tag::Wrapper, addr))
    }

    /// `length` slots, each initialized to `fill`. `fill` must already be on
    /// the root stack unless it is [`Ref::NULL`] -- see `require_rooted`.
    pub fn array(&mut self, length: usize, fill: Ref) -> Result<Ref, OutOfMemory> {
        let fill_slot = (!fill.is_null()).then(|| self.require_rooted(fill));
        let bytes = (1 + length) * W;
        let addr = self.allocate(bytes)?;
        let fill = self.reload_rooted(fill, fill_slot);
        {
            let heap = self.collector.heap_mut();
            object_model::header_write(
                heap,
                addr,
                Header {
                    tag: Tag::Array,
                    marked: false,
                    length,
                },
            );
            for i in 0..length {
                object_model::slot_write(heap, addr, i, fill);
            }
        }
        for _ in 0..length {
            self.collector.on_root_push(fill);
        }
        Ok(object_model::make_ref(Tag::Array, addr))
    }

    /// Write slot `i` of `container`. No write barrier under mark-sweep;
    /// the refcounting variants hook this to keep counts exact. Under the
    /// `copying` strategy, `container`'s own address is only ever valid
    /// until the next relocating collection, and nothing patches a bare
    /// `Ref` a caller holds across one (see `spec.md` §5's core safety rule
    /// and §9's write-barrier note): `container` (and a non-null `value`)
    /// must already be on the root stack, the same requirement `wrapper`
    /// and `array` place on their own `Ref` arguments, so a stale address
    /// is caught as a fatal error here instead of silently writing into
    /// dead from-space bytes.
    pub fn set_slot(&mut self, container: Ref, i: usize, value: Ref) {
        self.require_rooted(container);
        if !value.is_null() {
            self.require_rooted(value);
        }
        let addr = object_model::addr_of(container);
        let heap = self.collector.heap_mut();
        let old = object_model::slot_read(heap, addr, i);
        object_model::slot_write(heap, addr, i, value);
        self.collector.on_slot_overwrite(old, value);
    }

    /// Read slot `i` of `container`. `container` must already be on the
    /// root stack, for the same reason `set_slot` requires it -- see there.
    pub fn slot(&self, container: Ref, i: usize) -> Ref {
        self.require_rooted(container);
        let addr = object_model::addr_of(container);
        object_model::slot_read(self.collector.heap(), addr, i)
    }

    /// Debug-print the reachable object graph. Visits every reachable
    /// object exactly once via an explicit stack (the spec's iterative
    /// traversal guidance applies here just as much as to GC mark), so
    /// this terminates even on the deep wrapper chains the GC torture
    /// tests build.
    pub fn dump(&self) -> String {
        use std::collections::HashSet;
        use std::fmt::Write;

        let mut out = String::new();
        let mut visited: HashSet<usize> = HashSet::new();
        let mut stack: Vec<(usize, Ref)> = Vec::new();

        for i in 0..self.roots.len() {
            stack.push((0, Ref(self.roots.get(i).unwrap())));
        }
        // Reverse so roots print in push order; this is purely cosmetic.
        stack.reverse();

        while let Some((depth, r)) = stack.pop() {
            let indent = "  ".repeat(depth);
            if r.is_null() {
                let _ = writeln!(out, "{indent}null");
                continue;
            }
            let addr = object_model::addr_of(r).as_usize();
            if !visited.insert(addr) {
                let _ = writeln!(out, "{indent}<ref @{addr:#x}, already visited>");
                continue;
            }
            let heap = self.collector.heap();
            match object_model::tag_of(r) {
                Tag::Int => {
                    let v = object_model::int_payload_read(heap, Address(addr));
                    let _ = writeln!(out, "{indent}int@{addr:#x} = {v}");
                }
                Tag::Float => {
                    let v = object_model::float_payload_read(heap, Address(addr));
                    let _ = writeln!(out, "{indent}float@{addr:#x} = {v}");
                }
                Tag::Wrapper => {
                    let _ = writeln!(out, "{indent}wrapper@{addr:#x}");
                    let child = object_model::slot_read(heap, Address(addr), 0);
                    stack.push((depth + 1, child));
                }
                Tag::Array => {
                    let n = object_model::slot_count(heap, Address(addr));
                    let _ = writeln!(out, "{indent}array@{addr:#x}[{n}]");
                    for i in (0..n).rev() {
                        let child = object_model::slot_read(heap, Address(addr), i);
                        stack.push((depth + 1, child));
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxed_int_round_trips() {
        let mut vm = Vm::new(10 * 1024).unwrap();
        let r = vm.int(42).unwrap();
        vm.push(r);
        assert_eq!(vm.heap_used(), 2 * W);
        let popped = vm.pop();
        assert_eq!(popped, r);
    }

    #[test]
    fn wrapper_chain_reads_back() {
        let mut vm = Vm::new(64 * 1024).unwrap();
        let inner = vm.int(7).unwrap();
        vm.push(inner);
        let outer = vm.wrapper(inner).unwrap();
        vm.push(outer);
        assert_eq!(vm.slot(outer, 0), inner);
    }

    #[test]
    fn array_slots_start_filled() {
        let mut vm = Vm::new(64 * 1024).unwrap();
        let filler = vm.int(1).unwrap();
        vm.push(filler);
        let arr = vm.array(10, filler).unwrap();
        vm.push(arr);
        for i in 0..10 {
            assert_eq!(vm.slot(arr, i), filler);
        }
    }

    #[test]
    #[should_panic]
    fn pop_on_empty_stack_is_fatal() {
        let mut vm = Vm::new(4096).unwrap();
        vm.pop();
    }

    #[test]
    #[should_panic]
    fn wrapper_rejects_an_unrooted_child() {
        let mut vm = Vm::new(4096).unwrap();
        let orphan = vm.int(1).unwrap(); // never pushed
        vm.wrapper(orphan).unwrap();
    }

    #[test]
    fn dump_visits_shared_node_once() {
        let mut vm = Vm::new(64 * 1024).unwrap();
        let shared = vm.int(1).unwrap();
        vm.push(shared);
        let w1 = vm.wrapper(shared).unwrap();
        vm.push(w1);
        let arr = vm.array(2, shared).unwrap();
        vm.push(arr);
        let text = vm.dump();
        // The shared int is reachable from both the wrapper and the array
        // but should only print its payload once.
        assert_eq!(text.matches("= 1").count(), 1);
    }
}
