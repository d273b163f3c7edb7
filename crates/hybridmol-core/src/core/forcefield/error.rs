use crate::core::models::ids::{AtomId, ParamId, TermId};
use crate::core::models::properties::PropertyError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("Table '{table}' holds {expected}-atom terms, got {found} atoms")]
    ArityMismatch {
        table: String,
        expected: usize,
        found: usize,
    },

    #[error("Atom {atom:?} does not belong to the model owning table '{table}'")]
    ForeignAtom { table: String, atom: AtomId },

    #[error("Property '{name}' of table '{table}' would exist in both the term and param schemas")]
    SchemaCollision { table: String, name: String },

    #[error("Unknown property '{name}'")]
    UnknownProperty { name: String },

    #[error("Param {0:?} does not exist")]
    ParamNotFound(ParamId),

    #[error("Term {term:?} does not exist in table '{table}'")]
    TermNotFound { table: String, term: TermId },

    #[error("Term {term:?} of table '{table}' has no param assigned")]
    MissingParam { table: String, term: TermId },

    #[error("Cannot assign an alternate param to term {term:?} of table '{table}' without a primary param")]
    InvalidAlchemicalState { table: String, term: TermId },

    #[error("Term {term:?} of table '{table}' has no alternate-state param")]
    NoAlternateState { table: String, term: TermId },

    #[error("Property schema error: {0}")]
    Property(PropertyError),
}

impl From<PropertyError> for TableError {
    fn from(err: PropertyError) -> Self {
        match err {
            PropertyError::UnknownProperty { name } => TableError::UnknownProperty { name },
            other => TableError::Property(other),
        }
    }
}
