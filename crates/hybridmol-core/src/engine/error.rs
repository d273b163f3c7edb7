use thiserror::Error;

use super::block::Marker;
use super::config::ConfigError;
use crate::core::forcefield::error::TableError;
use crate::core::forcefield::nonbonded::NonbondedError;
use crate::core::models::ids::{AtomId, TermId};
use crate::core::models::system::ModelError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Overlapping constraint for atom {atom} (claimed by '{first}' and '{second}')")]
    OverlappingConstraint {
        atom: usize,
        first: String,
        second: String,
    },

    #[error("Unsupported term arity {0}")]
    UnsupportedArity(usize),

    #[error("Unsupported mapping in table '{table}': A is {a}, B is {b}")]
    UnsupportedTransition { table: String, a: Marker, b: Marker },

    #[error("Unsupported combining rule '{rule}' for {funct}")]
    UnsupportedCombiningRule { funct: String, rule: String },

    #[error("Unsupported van der Waals function '{0}'")]
    UnsupportedVdwFunction(String),

    #[error("Invalid atom correspondence: {0}")]
    InvalidCorrespondence(String),

    #[error("Missing nonbonded term for atom {atom:?} in end state {state}")]
    MissingNonbondedTerm { state: char, atom: AtomId },

    #[error("Constraint term {term:?} in table '{table}' has no distance column '{column}'")]
    MalformedConstraint {
        table: String,
        term: TermId,
        column: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Table error: {0}")]
    Table(#[from] TableError),
}

impl From<NonbondedError> for EngineError {
    fn from(err: NonbondedError) -> Self {
        match err {
            NonbondedError::UnsupportedVdwFunction(funct) => EngineError::UnsupportedVdwFunction(funct),
            NonbondedError::UnsupportedCombiningRule { funct, rule } => {
                EngineError::UnsupportedCombiningRule { funct, rule }
            }
        }
    }
}
