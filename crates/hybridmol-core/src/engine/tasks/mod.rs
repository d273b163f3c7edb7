//! Merge steps applied to an [`AtomMapping`](crate::engine::mapping::AtomMapping).
//!
//! Each task works on the hybrid model held by the mapping and returns a small
//! summary of what it changed. Tasks assume atoms are already mapped and run in
//! the order used by the alchemical workflow: hybrid terms first, then the
//! exclusion/pair reconciler, then the constraint merger.

pub mod constraints;
pub mod exclusions;
pub mod hybrid;
