//! Reclaim strategies. Mark-sweep is the mandatory collector and is always
//! compiled in; the Cargo features `copying`, `ref_count`, and
//! `ref_count_cycles` are mutually exclusive alternatives selected at
//! build time (see the crate's `[features]` table). Exactly one of the
//! three optional strategies may be active; none of them is active by
//! default, leaving mark-sweep as the sole collector.

pub mod mark_sweep;

#[cfg(feature = "copying")]
pub mod copying;

#[cfg(any(feature = "ref_count", feature = "ref_count_cycles"))]
pub mod rc;
