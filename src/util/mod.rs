pub mod bitset;
pub mod ordered_map;
pub mod smallvec;

pub use bitset::BitSet;
pub use ordered_map::OrderedMap;
pub use smallvec::SmallVec;
