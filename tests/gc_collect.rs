//! Reproduces spec.md §8's "cg_collect" scenario against the mandatory
//! mark-sweep collector (this file only compiles under the default
//! feature set -- none of `copying` / `ref_count` / `ref_count_cycles`).
//!
//! See DESIGN.md for why the final assertion uses "surviving int (2W) +
//! array (12W)" rather than the scenario's literal "(2 + 12 + 2)*W": the
//! array term alone is unambiguous from spec.md §3's size formula, but the
//! outer "+2" doesn't correspond to any object this scenario actually
//! allocates.

#![cfg(not(any(feature = "copying", feature = "ref_count", feature = "ref_count_cycles")))]

use quickfit_vm::object_model::W;
use quickfit_vm::Vm;

#[test]
fn cg_collect_scenario() {
    let mut vm = Vm::new(64 * 1024).unwrap();

    let i1 = vm.int(1).unwrap();
    vm.push(i1);
    assert_eq!(vm.heap_used(), 2 * W);

    vm.pop();
    vm.gc();
    assert_eq!(vm.heap_used(), 0);

    let i2 = vm.int(2).unwrap();
    vm.push(i2);
    let i3 = vm.int(3).unwrap();
    vm.push(i3);
    vm.pop(); // drops i3
    vm.gc();
    assert_eq!(vm.heap_used(), 2 * W);

    let arr = vm.array(10, quickfit_vm::Ref::NULL).unwrap();
    vm.push(arr);
    assert_eq!(vm.heap_used(), 2 * W + 12 * W);

    vm.pop(); // drops arr
    vm.pop(); // drops i2
    vm.gc();
    assert_eq!(vm.heap_used(), 0);
}
