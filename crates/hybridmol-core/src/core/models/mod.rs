//! # Core Models Module
//!
//! Data structures describing one molecular model: atoms, residues, chains,
//! bonds, and the term tables attached to them.
//!
//! ## Overview
//!
//! A [`system::MolecularSystem`] owns its entities keyed by the identifier
//! types in [`ids`]. Atom ids are unique across models, so an id from one model
//! is never found in another. Atoms iterate in insertion order, which is the
//! model's positional order the merge engine uses to address atoms of the two
//! input endpoints.
//!
//! Atoms and bonds carry, besides their fixed fields, a row of typed extra
//! properties described by a model-wide [`properties::PropertySchema`].
//!
//! ## Key Components
//!
//! - [`atom`] - Atom record with coordinates, charges and the alchemical flag
//! - [`residue`] - Residue grouping of atoms
//! - [`chain`] - Chain grouping of residues
//! - [`topology`] - Bonds and bond orders
//! - [`properties`] - Typed property values and column schemas
//! - [`system`] - The model itself, including cloning and appending
//! - [`ids`] - Unique identifier types for every arena
//!
//! ## Usage
//!
//! ```ignore
//! use hybridmol::core::models::{atom::Atom, system::MolecularSystem};
//!
//! let mut system = MolecularSystem::new();
//! let chain_id = system.add_chain("A");
//! let residue_id = system.add_residue(chain_id, 1, "LIG").unwrap();
//! let c1 = system.add_atom_to_residue(residue_id, Atom::new("C1", residue_id, Point3::origin()));
//! ```

pub mod atom;
pub mod chain;
pub mod ids;
pub mod properties;
pub mod residue;
pub mod system;
pub mod topology;
