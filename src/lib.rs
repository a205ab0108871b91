//! A quick-fit segregated free-list allocator and a small tagged-object VM
//! traced by a mark-sweep collector.
//!
//! The published surface is [`Vm`] and its supporting types
//! ([`VmOptions`], [`ReclaimStrategy`]); everything else (`qf`,
//! `object_model`, `gc`, `util`) is exposed `pub` for testing and for
//! embedders who want to build on the allocator directly, but is not part
//! of the stable contract the way `vm` is.
//!
//! Which collector backs [`Vm`] is chosen at compile time through the
//! `copying` / `ref_count` / `ref_count_cycles` Cargo features (mutually
//! exclusive; none of them gives mark-sweep, the default and only
//! fully-specified collector -- see each module's docs and `DESIGN.md`).

pub mod address;
pub mod error;
pub mod gc;
mod logger;
pub mod object_model;
pub mod qf;
pub mod util;
pub mod vm;

pub use address::Address;
pub use error::{FatalError, OutOfMemory};
pub use object_model::{Ref, Tag};
pub use vm::{ReclaimStrategy, Vm, VmOptions};
