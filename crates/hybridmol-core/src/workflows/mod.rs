//! # Workflows Module
//!
//! High-level entry points that run the engine stages end to end.
//!
//! - **Alchemical Workflow** ([`alchemical`]) - Builds a dual-state hybrid model
//!   from two end-state models and an atom correspondence, reporting progress
//!   per phase and returning a summary of every merge step.

pub mod alchemical;
