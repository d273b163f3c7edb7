//! # Force Field Module
//!
//! Parameter and term storage for molecular mechanics interactions.
//!
//! ## Overview
//!
//! Interactions are stored as fixed-arity terms in named [`term_table::TermTable`]s.
//! Every term points at up to two rows (primary state `A`, alternate state `B`)
//! of a [`params::ParamTable`]. Param tables are reference counted per row and
//! may be shared by several term tables, which then observe each other's writes.
//!
//! ## Key Components
//!
//! - [`params`] - Shared, refcounted parameter rows
//! - [`term_table`] - Terms, categories, and the validated mutable view
//! - [`schema`] - Built-in and user-loaded table layouts
//! - [`nonbonded`] - Van der Waals functions and combining rules
//! - [`error`] - Errors raised by table operations

pub mod error;
pub mod nonbonded;
pub mod params;
pub mod schema;
pub mod term_table;
