//! Cheney-style copying collector (optional variant, `copying` feature).
//!
//! The managed region is split into two equal semispaces. Allocation bumps
//! a pointer in the current from-space; a collection walks roots, copies
//! every reachable object into to-space, and then swaps which half is
//! "from". Forwarding during the copy is tracked in a side table rather
//! than stashed in the old object's header (the header's tag/mark/length
//! bits have no spare room for a forwarding address once the mark bit is
//! gone anyway, and a copy only lives for the duration of one collection),
//! which keeps this variant decoupled from `object_model`'s bit layout.
//!
//! Per `spec.md` §9's resolved open question, every reference reachable
//! from the root stack is updated in place at the end of a cycle -- the
//! VM never holds a stale address across `vm_allocate`.

use std::collections::HashMap;

use crate::address::Address;
use crate::error::FatalError;
use crate::object_model::{self, Ref};
use crate::util::SmallVec;
use crate::vm::Collector;

pub struct CopyingGc {
    /// Two semispaces back to back: `[0, half_size)` and `[half_size,
    /// 2*half_size)`. Whichever one is "from" is tracked by `active_base`.
    heap: Vec<u8>,
    half_size: usize,
    alignment: usize,
    active_base: usize,
    bump: usize,
}

impl CopyingGc {
    fn round_up(&self, bytes: usize) -> usize {
        (bytes + self.alignment - 1) / self.alignment * self.alignment
    }

    /// Copy the object at `old_addr` (in the current from-space) into
    /// to-space, or return its existing copy if one was already made this
    /// collection. Does not recurse into children; the caller's Cheney
    /// scan visits them once they're in to-space.
    fn copy_object(
        &mut self,
        old_addr: Address,
        to_base: usize,
        forwarding: &mut HashMap<usize, usize>,
        free: &mut usize,
    ) -> Address {
        if let Some(&new_off) = forwarding.get(&old_addr.as_usize()) {
            return Address(to_base + new_off);
        }
        let size = object_model::object_size(&self.heap, old_addr)
            .unwrap_or_else(|e| e.abort());
        let new_off = *free;
        *free += size;
        self.heap
            .copy_within(old_addr.as_usize()..old_addr.as_usize() + size, to_base + new_off);
        forwarding.insert(old_addr.as_usize(), new_off);
        Address(to_base + new_off)
    }
}

impl Collector for CopyingGc {
    fn new(region_bytes: usize, alignment: usize, _worklist_capacity: usize) -> Result<Self, FatalError> {
        let half_size = (region_bytes / 2) / alignment * alignment;
        if half_size < alignment {
            return Err(FatalError::InvalidSize {
                detail: "copying GC region too small to hold two non-trivial semispaces",
            });
        }
        Ok(CopyingGc {
            heap: vec![0u8; 2 * half_size],
            half_size,
            alignment,
            active_base: 0,
            bump: 0,
        })
    }

    fn heap(&self) -> &[u8] {
        &self.heap
    }

    fn heap_mut(&mut self) -> &mut [u8] {
        &mut self.heap
    }

    fn try_alloc(&mut self, size: usize) -> Option<Address> {
        let size = self.round_up(size).max(self.alignment);
        if self.bump + size > self.half_size {
            return None;
        }
        let addr = Address(self.active_base + self.bump);
        self.bump += size;
        Some(addr)
    }

    fn collect(&mut self, roots: &mut SmallVec) -> Result<(), FatalError> {
        let to_base = if self.active_base == 0 {
            self.half_size
        } else {
            0
        };
        let mut forwarding: HashMap<usize, usize> = HashMap::new();
        let mut free = 0usize;

        for i in 0..roots.len() {
            let word = roots.get(i).expect("index within bounds");
            let r = Ref(word);
            if r.is_null() {
                continue;
            }
            let new_addr =
                self.copy_object(object_model::addr_of(r), to_base, &mut forwarding, &mut free);
            let new_ref = object_model::make_ref(object_model::tag_of(r), new_addr);
            roots.set(i, new_ref.0);
        }

        // Cheney scan: `scan` chases `free` through to-space, which only
        // grows as new objects are copied in -- no explicit worklist, and
        // no recursion, needed.
        let mut scan = 0usize;
        while scan < free {
            let addr = Address(to_base + scan);
            let size = object_model::object_size(&self.heap, addr)?;
            let n_slots = object_model::slot_count(&self.heap, addr);
            for i in 0..n_slots {
                let child = object_model::slot_read(&self.heap, addr, i);
                if child.is_null() {
                    continue;
                }
                let new_addr = self.copy_object(
                    object_model::addr_of(child),
                    to_base,
                    &mut forwarding,
                    &mut free,
                );
                let new_ref = object_model::make_ref(object_model::tag_of(child), new_addr);
                object_model::slot_write(&mut self.heap, addr, i, new_ref);
            }
            scan += size;
        }

        log::debug!(
            "quickfit-vm: copying collection moved {} live bytes ({} -> {} bytes used)",
            free,
            self.bump,
            free
        );
        self.active_base = to_base;
        self.bump = free;
        Ok(())
    }

    fn heap_used(&self) -> usize {
        self.bump
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::{make_ref, Header, Tag, A, W};

    fn write_int(heap: &mut [u8], addr: Address, value: i64) {
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
    }

    #[test]
    fn survives_a_collection_with_updated_address() {
        let mut gc = CopyingGc::new(4096, A, 0).unwrap();
        let addr = gc.try_alloc(2 * W).unwrap();
        write_int(gc.heap_mut(), addr, 99);

        let mut roots = SmallVec::new();
        roots.push(make_ref(Tag::Int, addr).0);

        gc.collect(&mut roots).unwrap();

        let moved = Ref(roots.get(0).unwrap());
        let moved_addr = object_model::addr_of(moved);
        assert_eq!(object_model::int_payload_read(gc.heap(), moved_addr), 99);
        assert_eq!(gc.heap_used(), 2 * W);
    }

    #[test]
    fn unreachable_object_is_not_copied() {
        let mut gc = CopyingGc::new(4096, A, 0).unwrap();
        let kept = gc.try_alloc(2 * W).unwrap();
        write_int(gc.heap_mut(), kept, 1);
        let _dropped = gc.try_alloc(2 * W).unwrap();

        let mut roots = SmallVec::new();
        roots.push(make_ref(Tag::Int, kept).0);

        gc.collect(&mut roots).unwrap();
        assert_eq!(gc.heap_used(), 2 * W);
    }
}
