//! # hybridmol Core Library
//!
//! Construction of hybrid-topology models for alchemical free-energy
//! calculations. Given two molecular models and an atom correspondence, the
//! library builds one model whose terms carry a primary (`A`) and an alternate
//! (`B`) parameter state.
//!
//! ## Architectural Philosophy
//!
//! The library keeps the same three-layer split throughout:
//!
//! - **[`core`]: The Foundation.** Data models (`MolecularSystem`), shared
//!   refcounted parameter tables, term tables and their schemas.
//!
//! - **[`engine`]: The Logic Core.** The merge stages: atom correspondence
//!   mapping, per-table term block building and transition handling,
//!   exclusion and pair reconciliation, and constraint merging.
//!
//! - **[`workflows`]: The Public API.** Runs the stages in order on two input
//!   models and returns the hybrid model with a summary of what was done.

pub mod core;
pub mod engine;
pub mod workflows;
