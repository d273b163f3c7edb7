//! # Core Module
//!
//! Stateless building blocks of the library: the molecular model and the term
//! and parameter tables that describe its force field.
//!
//! ## Architecture
//!
//! - **Molecular Representation** ([`models`]) - Atoms, residues, chains, bonds and whole models
//! - **Force Field Storage** ([`forcefield`]) - Param tables, term tables, schemas and nonbonded rules
//!
//! Everything here operates on a single model. Combining two models into one
//! alchemical model is the job of [`crate::engine`].

pub mod forcefield;
pub mod models;
