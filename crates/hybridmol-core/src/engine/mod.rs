//! # Engine Module
//!
//! The merge machinery that turns two end-state models and an atom
//! correspondence into a single hybrid model.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Which bonded tables to merge, their keeper
//!   columns, pair handling, and the dummy exclusion cutoff
//! - **Atom Mapping** ([`mapping`]) - Correspondence loading and validation, and
//!   the hybrid atom set with dummy atoms
//! - **Term Blocks** ([`block`]) - Canonical keys and the aligned A/B term lists
//!   every merge step consumes
//! - **Tasks** ([`tasks`]) - Hybrid term population, exclusion/pair
//!   reconciliation, and constraint merging
//! - **Progress Monitoring** ([`progress`]) - Phase callbacks for callers
//! - **Error Handling** ([`error`]) - Engine-specific error types
//!
//! Hybrid atoms are addressed by position: position `i` is the `i`-th pair of
//! the correspondence after dummies are moved last. Terms of both end states are
//! compared on these positions, never on the atom ids of either model.

pub mod block;
pub mod config;
pub mod error;
pub mod mapping;
pub mod progress;
pub mod tasks;
