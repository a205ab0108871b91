//! Reference-counting reclaim strategies (optional, `ref_count` /
//! `ref_count_cycles` features): eager reclamation on count-to-zero, with
//! [`RcCyclesHeap`] additionally running Bacon & Rattenbury-style trial
//! deletion to collect reference cycles the plain variant leaks.
//!
//! Per `spec.md` §4.7, a conforming build exposes exactly one reclaim
//! policy; these two are alternatives to mark-sweep and to each other,
//! selected at compile time like the original project's
//! `REF_COUNTING_NORMAL` build flag.

use std::collections::HashMap;

use crate::address::Address;
use crate::error::FatalError;
use crate::object_model::{self, Ref};
use crate::qf::{QuickFit, QF_N_BUCKETS};
use crate::util::SmallVec;
use crate::vm::Collector;

/// Plain eager reference counting, no cycle collector: a cycle of objects
/// with no external reference simply leaks (its members' counts never
/// reach zero). `vm_gc` is a no-op here -- there's nothing for a
/// non-tracing, non-cycle-aware collector to do.
pub struct RcHeap {
    heap: Vec<u8>,
    qf: QuickFit,
    counts: HashMap<usize, u32>,
}

impl RcHeap {
    fn incref(&mut self, r: Ref) {
        if r.is_null() {
            return;
        }
        let addr = object_model::addr_of(r).as_usize();
        *self.counts.entry(addr).or_insert(0) += 1;
    }

    /// Decrement `r`'s count; if it reaches zero, free its block and
    /// cascade the decrement to every child it held. Iterative (an
    /// explicit worklist, not recursion) so a long reference chain going
    /// out of scope at once can't blow the call stack -- the same
    /// non-recursive-traversal rule `spec.md` §9 applies to GC mark.
    fn decref(&mut self, r: Ref) {
        if r.is_null() {
            return;
        }
        let mut stack = vec![r];
        while let Some(cur) = stack.pop() {
            if cur.is_null() {
                continue;
            }
            let addr = object_model::addr_of(cur).as_usize();
            let Some(count) = self.counts.get_mut(&addr) else {
                continue;
            };
            *count -= 1;
            if *count != 0 {
                continue;
            }
            self.counts.remove(&addr);
            let real = Address(addr);
            let size = object_model::object_size(&self.heap, real).unwrap_or_else(|e| e.abort());
            for i in 0..object_model::slot_count(&self.heap, real) {
                let child = object_model::slot_read(&self.heap, real, i);
                if !child.is_null() {
                    stack.push(child);
                }
            }
            self.qf.free(real, size);
        }
    }
}

impl Collector for RcHeap {
    fn new(region_bytes: usize, alignment: usize, _worklist_capacity: usize) -> Result<Self, FatalError> {
        let qf = QuickFit::new(Address(0), region_bytes, alignment, QF_N_BUCKETS)?;
        let heap = vec![0u8; qf.region_size()];
        Ok(RcHeap {
            heap,
            qf,
            counts: HashMap::new(),
        })
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

    fn collect(&mut self, _roots: &mut SmallVec) -> Result<(), FatalError> {
        log::trace!("quickfit-vm: ref_count has no tracing collection; vm_gc is a no-op");
        Ok(())
    }

    fn heap_used(&self) -> usize {
        self.qf.region_size() - self.qf.free_space()
    }

    fn on_root_push(&mut self, r: Ref) {
        self.incref(r);
    }

    fn on_root_pop(&mut self, r: Ref) {
        self.decref(r);
    }

    fn on_slot_overwrite(&mut self, old: Ref, new: Ref) {
        self.incref(new);
        self.decref(old);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Black,
    Gray,
    White,
    Purple,
}

/// Reference counting augmented with Bacon & Rattenbury trial deletion:
/// when a decrement leaves a nonzero count, the object is buffered as a
/// possible cycle root (`Purple`). `vm_gc` runs the three-pass trial
/// deletion (mark candidate subgraphs gray, scan to tell surviving
/// external references from self-sustaining cycles, then collect whatever
/// is left white) instead of being a no-op.
pub struct RcCyclesHeap {
    heap: Vec<u8>,
    qf: QuickFit,
    counts: HashMap<usize, u32>,
    color: HashMap<usize, Color>,
    /// Addresses currently sitting in `roots_buffer`, tracked separately so
    /// `possible_root` doesn't enqueue the same address twice.
    buffered: std::collections::HashSet<usize>,
    roots_buffer: Vec<usize>,
}

impl RcCyclesHeap {
    fn incref(&mut self, r: Ref) {
        if r.is_null() {
            return;
        }
        let addr = object_model::addr_of(r).as_usize();
        *self.counts.entry(addr).or_insert(0) += 1;
        self.color.insert(addr, Color::Black);
    }

    fn decref(&mut self, r: Ref) {
        if r.is_null() {
            return;
        }
        let mut stack = vec![r];
        while let Some(cur) = stack.pop() {
            if cur.is_null() {
                continue;
            }
            let addr = object_model::addr_of(cur).as_usize();
            let Some(count) = self.counts.get_mut(&addr) else {
                continue;
            };
            *count -= 1;
            if *count != 0 {
                self.possible_root(addr);
                continue;
            }
            // Count reached zero: release this object's own references and
            // free it now, unless trial deletion is still holding it as a
            // buffered candidate -- in that case the count entry is left
            // at 0 (not removed) so the next `collect_cycles` can tell
            // "released but not yet freed" apart from "never tracked".
            let real = Address(addr);
            let size = object_model::object_size(&self.heap, real).unwrap_or_else(|e| e.abort());
            for i in 0..object_model::slot_count(&self.heap, real) {
                let child = object_model::slot_read(&self.heap, real, i);
                if !child.is_null() {
                    stack.push(child);
                }
            }
            self.color.insert(addr, Color::Black);
            if !self.buffered.contains(&addr) {
                self.counts.remove(&addr);
                self.color.remove(&addr);
                self.qf.free(real, size);
            }
        }
    }

    fn possible_root(&mut self, addr: usize) {
        if self.color.get(&addr) == Some(&Color::Purple) {
            return;
        }
        self.color.insert(addr, Color::Purple);
        if self.buffered.insert(addr) {
            self.roots_buffer.push(addr);
        }
    }

    fn children(&self, addr: usize) -> Vec<usize> {
        let real = Address(addr);
        let mut out = Vec::new();
        for i in 0..object_model::slot_count(&self.heap, real) {
            let child = object_model::slot_read(&self.heap, real, i);
            if !child.is_null() {
                out.push(object_model::addr_of(child).as_usize());
            }
        }
        out
    }

    fn mark_gray(&mut self, start: usize) {
        let mut stack = vec![start];
        while let Some(addr) = stack.pop() {
            if self.color.get(&addr) == Some(&Color::Gray) {
                continue;
            }
            self.color.insert(addr, Color::Gray);
            for child in self.children(addr) {
                if let Some(c) = self.counts.get_mut(&child) {
                    *c = c.saturating_sub(1);
                }
                stack.push(child);
            }
        }
    }

    fn scan_black(&mut self, start: usize) {
        let mut stack = vec![start];
        while let Some(addr) = stack.pop() {
            self.color.insert(addr, Color::Black);
            for child in self.children(addr) {
                if let Some(c) = self.counts.get_mut(&child) {
                    *c += 1;
                }
                if self.color.get(&child) != Some(&Color::Black) {
                    stack.push(child);
                }
            }
        }
    }

    fn scan(&mut self, start: usize) {
        let mut stack = vec![start];
        while let Some(addr) = stack.pop() {
            if self.color.get(&addr) != Some(&Color::Gray) {
                continue;
            }
            let count = self.counts.get(&addr).copied().unwrap_or(0);
            if count > 0 {
                self.scan_black(addr);
            } else {
                self.color.insert(addr, Color::White);
                for child in self.children(addr) {
                    stack.push(child);
                }
            }
        }
    }

    fn collect_white(&mut self, start: usize) {
        let mut stack = vec![start];
        while let Some(addr) = stack.pop() {
            if self.color.get(&addr) != Some(&Color::White) {
                continue;
            }
            let children = self.children(addr);
            let real = Address(addr);
            let size = object_model::object_size(&self.heap, real).unwrap_or_else(|e| e.abort());
            self.color.remove(&addr);
            self.counts.remove(&addr);
            self.buffered.remove(&addr);
            self.qf.free(real, size);
            stack.extend(children);
        }
    }

    /// The mandatory three passes of trial deletion, run over whatever
    /// `possible_root` has buffered since the last call.
    fn collect_cycles(&mut self) {
        let candidates = std::mem::take(&mut self.roots_buffer);

        let mut kept = Vec::with_capacity(candidates.len());
        for addr in &candidates {
            if self.color.get(addr) == Some(&Color::Purple) {
                self.mark_gray(*addr);
                kept.push(*addr);
                continue;
            }
            self.buffered.remove(addr);
            // This candidate was released (count dropped to 0) while still
            // buffered, but never freed at the time -- finish the job now.
            if self.color.get(addr) == Some(&Color::Black) && self.counts.get(addr).copied() == Some(0)
            {
                let real = Address(*addr);
                if let Ok(size) = object_model::object_size(&self.heap, real) {
                    self.color.remove(addr);
                    self.counts.remove(addr);
                    self.qf.free(real, size);
                }
            }
        }

        for addr in &kept {
            self.scan(*addr);
        }

        for addr in &kept {
            self.buffered.remove(addr);
            self.collect_white(*addr);
        }
    }
}

impl Collector for RcCyclesHeap {
    fn new(region_bytes: usize, alignment: usize, _worklist_capacity: usize) -> Result<Self, FatalError> {
        let qf = QuickFit::new(Address(0), region_bytes, alignment, QF_N_BUCKETS)?;
        let heap = vec![0u8; qf.region_size()];
        Ok(RcCyclesHeap {
            heap,
            qf,
            counts: HashMap::new(),
            color: HashMap::new(),
            buffered: std::collections::HashSet::new(),
            roots_buffer: Vec::new(),
        })
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

    fn collect(&mut self, _roots: &mut SmallVec) -> Result<(), FatalError> {
        log::debug!(
            "quickfit-vm: running trial deletion over {} candidate(s)",
            self.roots_buffer.len()
        );
        self.collect_cycles();
        Ok(())
    }

    fn heap_used(&self) -> usize {
        self.qf.region_size() - self.qf.free_space()
    }

    fn on_root_push(&mut self, r: Ref) {
        self.incref(r);
    }

    fn on_root_pop(&mut self, r: Ref) {
        self.decref(r);
    }

    fn on_slot_overwrite(&mut self, old: Ref, new: Ref) {
        self.incref(new);
        self.decref(old);
    }
}
