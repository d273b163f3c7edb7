use slotmap::new_key_type;
use std::sync::atomic::{AtomicU64, Ordering};

new_key_type! {
    pub struct ResidueId;
    pub struct ChainId;
    pub struct TermId;
    pub struct ParamId;
}

/// Atom identifier, unique across every model in the process.
///
/// An id handed out by one model is never valid in another, and ids grow in
/// allocation order, so sorting a model's ids gives its insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomId(u64);

impl AtomId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(n: u64) -> Self {
        Self(n)
    }
}
