use super::error::EngineError;
use crate::core::forcefield::params::copy_param;
use crate::core::forcefield::schema::NONBONDED_TABLE;
use crate::core::forcefield::term_table::TermTable;
use crate::core::models::atom::Atom;
use crate::core::models::ids::{AtomId, ParamId, TermId};
use crate::core::models::properties::remap_row;
use crate::core::models::system::{ModelError, MolecularSystem};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// One row of an atom correspondence: the positional index of the atom in
/// end state A and in end state B. `None` marks an atom absent from that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomPair {
    pub a: Option<usize>,
    pub b: Option<usize>,
}

impl AtomPair {
    pub fn new(a: Option<usize>, b: Option<usize>) -> Self {
        Self { a, b }
    }

    pub fn is_dummy_in_a(&self) -> bool {
        self.a.is_none()
    }

    pub fn is_dummy_in_b(&self) -> bool {
        self.b.is_none()
    }
}

#[derive(Debug, Error)]
pub enum CorrespondenceLoadError {
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("Invalid correspondence in '{path}': {reason}")]
    Invalid { path: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct CorrespondenceRecord {
    a: i64,
    b: i64,
}

/// An ordered list of atom pairs. Each atom of either end state appears at
/// most once, and no pair is absent from both states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomCorrespondence {
    pairs: Vec<AtomPair>,
}

impl AtomCorrespondence {
    pub fn new(pairs: Vec<AtomPair>) -> Result<Self, EngineError> {
        let mut seen_a = HashSet::new();
        let mut seen_b = HashSet::new();
        for (i, pair) in pairs.iter().enumerate() {
            if pair.a.is_none() && pair.b.is_none() {
                return Err(EngineError::InvalidCorrespondence(format!(
                    "pair {} is absent from both end states",
                    i
                )));
            }
            if let Some(a) = pair.a {
                if !seen_a.insert(a) {
                    return Err(EngineError::InvalidCorrespondence(format!(
                        "atom {} of A is mapped more than once",
                        a
                    )));
                }
            }
            if let Some(b) = pair.b {
                if !seen_b.insert(b) {
                    return Err(EngineError::InvalidCorrespondence(format!(
                        "atom {} of B is mapped more than once",
                        b
                    )));
                }
            }
        }
        Ok(Self { pairs })
    }

    /// Builds a correspondence from signed indices where `-1` marks absence.
    pub fn from_raw(pairs: &[(i64, i64)]) -> Result<Self, EngineError> {
        let mut converted = Vec::with_capacity(pairs.len());
        for &(a, b) in pairs {
            converted.push(AtomPair::new(signed_index(a)?, signed_index(b)?));
        }
        Self::new(converted)
    }

    /// Maps atom `i` of A onto atom `i` of B for the first `n` atoms.
    pub fn identity(n: usize) -> Self {
        Self {
            pairs: (0..n).map(|i| AtomPair::new(Some(i), Some(i))).collect(),
        }
    }

    /// Loads a correspondence from a CSV file with an `a,b` header.
    pub fn load_csv(path: &Path) -> Result<Self, CorrespondenceLoadError> {
        let origin = path.to_string_lossy().to_string();
        let mut reader = csv::Reader::from_path(path).map_err(|e| CorrespondenceLoadError::Csv {
            path: origin.clone(),
            source: e,
        })?;

        let mut raw = Vec::new();
        for result in reader.deserialize::<CorrespondenceRecord>() {
            let record = result.map_err(|e| CorrespondenceLoadError::Csv {
                path: origin.clone(),
                source: e,
            })?;
            raw.push((record.a, record.b));
        }
        Self::from_raw(&raw).map_err(|e| CorrespondenceLoadError::Invalid {
            path: origin,
            reason: e.to_string(),
        })
    }

    pub fn pairs(&self) -> &[AtomPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Pairs with an A atom first, pairs absent from A last; relative order is
    /// otherwise preserved.
    pub fn dummies_last(&self) -> Vec<AtomPair> {
        let (mut real, dummies): (Vec<_>, Vec<_>) =
            self.pairs.iter().copied().partition(|pair| pair.a.is_some());
        real.extend(dummies);
        real
    }
}

fn signed_index(index: i64) -> Result<Option<usize>, EngineError> {
    match index {
        -1 => Ok(None),
        i if i >= 0 => Ok(Some(i as usize)),
        i => Err(EngineError::InvalidCorrespondence(format!(
            "index {} is neither -1 nor a valid atom index",
            i
        ))),
    }
}

/// The hybrid model after atom mapping, along with everything later merge
/// steps need to translate between end states.
#[derive(Debug)]
pub struct AtomMapping {
    /// Correspondence in hybrid order: pair `i` describes hybrid atom `i`.
    pub pairs: Vec<AtomPair>,
    /// The hybrid model, holding only correspondence atoms, in pair order.
    pub system: MolecularSystem,
    /// Hybrid atom ids by position.
    pub atoms: Vec<AtomId>,
    /// End state B restricted to its correspondence atoms.
    pub b_system: MolecularSystem,
    /// Atom of `b_system` to hybrid position.
    pub b_positions: HashMap<AtomId, usize>,
    /// Number of atoms added because they only exist in B.
    pub dummy_atoms: usize,
    positions: HashMap<AtomId, usize>,
    b_atoms: Vec<Option<AtomId>>,
}

impl AtomMapping {
    /// Position of a hybrid atom.
    pub fn position(&self, atom: AtomId) -> Option<usize> {
        self.positions.get(&atom).copied()
    }

    /// Positions of a hybrid term's atoms.
    pub(crate) fn positions_of(&self, atoms: &[AtomId]) -> Result<Vec<usize>, EngineError> {
        atoms
            .iter()
            .map(|a| self.position(*a).ok_or(EngineError::Model(ModelError::AtomNotFound(*a))))
            .collect()
    }

    /// Hybrid positions of a `b_system` term's atoms.
    pub(crate) fn b_positions_of(&self, atoms: &[AtomId]) -> Result<Vec<usize>, EngineError> {
        atoms
            .iter()
            .map(|a| {
                self.b_positions
                    .get(a)
                    .copied()
                    .ok_or(EngineError::Model(ModelError::AtomNotFound(*a)))
            })
            .collect()
    }

    /// Hybrid atom ids for a list of positions.
    pub(crate) fn atom_ids(&self, positions: &[usize]) -> Vec<AtomId> {
        positions.iter().map(|&p| self.atoms[p]).collect()
    }

    /// The `b_system` atom at hybrid position `position`, if present in B.
    pub fn b_atom(&self, position: usize) -> Option<AtomId> {
        self.b_atoms.get(position).copied().flatten()
    }
}

/// Finds the nonbonded term of `atom`, the single-atom term whose atom is `atom`.
pub(crate) fn nonbonded_term(table: &TermTable, atom: AtomId) -> Option<TermId> {
    table
        .terms_iter()
        .find(|(_, term)| term.atoms().first() == Some(&atom))
        .map(|(id, _)| id)
}

/// Clones the correspondence atoms of A and B and builds the hybrid atom set.
///
/// Atoms present only in B are added as dummy atoms after every atom of A.
/// Every correspondence atom is marked alchemical and gets its B charge as
/// second-state charge; dummies have a zero primary charge. When the models
/// carry a `nonbonded` table, each hybrid atom's nonbonded term gets a B-state
/// row copied from B, and atoms absent in one state share one zero row in that
/// state.
#[instrument(skip_all, name = "atom_mapping")]
pub fn map_atoms(
    a: &MolecularSystem,
    b: &MolecularSystem,
    correspondence: &AtomCorrespondence,
) -> Result<AtomMapping, EngineError> {
    let pairs = correspondence.dummies_last();
    let a_ids = a.atom_ids();
    let b_ids = b.atom_ids();
    for pair in &pairs {
        if pair.a.is_some_and(|i| i >= a_ids.len()) || pair.b.is_some_and(|i| i >= b_ids.len()) {
            return Err(EngineError::InvalidCorrespondence(format!(
                "pair {:?} is out of range for models of {} and {} atoms",
                pair,
                a_ids.len(),
                b_ids.len()
            )));
        }
    }

    let mut a_indices: Vec<usize> = pairs.iter().filter_map(|p| p.a).collect();
    a_indices.sort_unstable();
    let mut b_indices: Vec<usize> = pairs.iter().filter_map(|p| p.b).collect();
    b_indices.sort_unstable();

    let a_subset: Vec<AtomId> = a_indices.iter().map(|&i| a_ids[i]).collect();
    let b_subset: Vec<AtomId> = b_indices.iter().map(|&i| b_ids[i]).collect();
    let mut hybrid = a.clone_subset(&a_subset)?;
    let b_system = b.clone_subset(&b_subset)?;

    let a_to_hybrid: HashMap<usize, AtomId> =
        a_indices.iter().copied().zip(hybrid.atom_ids()).collect();
    let b_to_clone: HashMap<usize, AtomId> =
        b_indices.iter().copied().zip(b_system.atom_ids()).collect();

    for column in b_system.atom_props().columns() {
        hybrid.add_atom_prop(&column.name, column.ty)?;
    }

    let b_nonbonded = b_system.table(NONBONDED_TABLE);
    let has_nonbonded = hybrid.table(NONBONDED_TABLE).is_some();
    if !has_nonbonded && b_nonbonded.is_some() {
        return Err(ModelError::TableNotFound(NONBONDED_TABLE.to_string()).into());
    }
    let mut zero_row: Option<ParamId> = None;
    let mut order = Vec::with_capacity(pairs.len());
    let mut b_positions = HashMap::new();
    let mut dummy_atoms = 0;

    for (position, pair) in pairs.iter().enumerate() {
        let b_atom = pair.b.and_then(|i| b_to_clone.get(&i).copied());
        let hybrid_atom = match pair.a.and_then(|i| a_to_hybrid.get(&i).copied()) {
            Some(atom_id) => {
                let atom = hybrid
                    .atom_mut(atom_id)
                    .ok_or(ModelError::AtomNotFound(atom_id))?;
                atom.alchemical = true;
                if let Some(b_atom) = b_atom {
                    atom.charge_b = b_system
                        .atom(b_atom)
                        .ok_or(ModelError::AtomNotFound(b_atom))?
                        .charge;
                }
                if has_nonbonded {
                    let mut table = hybrid.table_mut(NONBONDED_TABLE)?;
                    let term = nonbonded_term(&table, atom_id).ok_or(
                        EngineError::MissingNonbondedTerm {
                            state: 'A',
                            atom: atom_id,
                        },
                    )?;
                    let row = match b_atom {
                        Some(b_atom) => copy_b_nonbonded(&table, b_nonbonded, b_atom)?,
                        None => lazy_zero_row(&table, &mut zero_row),
                    };
                    table.set_param_b(term, Some(row))?;
                }
                atom_id
            }
            None => {
                let b_atom = b_atom.ok_or_else(|| {
                    EngineError::InvalidCorrespondence(format!(
                        "pair {} is absent from both end states",
                        position
                    ))
                })?;
                dummy_atoms += 1;
                let atom_id = add_dummy_atom(&mut hybrid, &b_system, b_atom)?;
                if has_nonbonded {
                    let mut table = hybrid.table_mut(NONBONDED_TABLE)?;
                    let zero = lazy_zero_row(&table, &mut zero_row);
                    let term = table.add_term(&[atom_id], Some(zero))?;
                    let row = copy_b_nonbonded(&table, b_nonbonded, b_atom)?;
                    table.set_param_b(term, Some(row))?;
                }
                atom_id
            }
        };
        order.push(hybrid_atom);
        if let Some(b_atom) = b_atom {
            b_positions.insert(b_atom, position);
        }
    }

    let system = hybrid.clone_subset(&order)?;
    let atoms = system.atom_ids();
    let positions = atoms.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut b_atoms = vec![None; atoms.len()];
    for (b_atom, position) in &b_positions {
        b_atoms[*position] = Some(*b_atom);
    }

    info!(
        atoms = atoms.len(),
        dummies = dummy_atoms,
        "Hybrid atom set built."
    );

    Ok(AtomMapping {
        pairs,
        system,
        atoms,
        b_system,
        b_positions,
        b_atoms,
        dummy_atoms,
        positions,
    })
}

fn lazy_zero_row(table: &TermTable, zero_row: &mut Option<ParamId>) -> ParamId {
    *zero_row.get_or_insert_with(|| {
        debug!("Allocating shared zero nonbonded row.");
        table.params().write().add_param()
    })
}

fn copy_b_nonbonded(
    table: &TermTable,
    b_table: Option<&TermTable>,
    b_atom: AtomId,
) -> Result<ParamId, EngineError> {
    let missing = EngineError::MissingNonbondedTerm {
        state: 'B',
        atom: b_atom,
    };
    let Some(b_table) = b_table else {
        return Err(missing);
    };
    let term = nonbonded_term(b_table, b_atom).ok_or(missing)?;
    let Some(b_row) = b_table.param(term)? else {
        return Err(EngineError::MissingNonbondedTerm {
            state: 'B',
            atom: b_atom,
        });
    };
    Ok(copy_param(table.params(), b_table.params(), b_row)?)
}

fn add_dummy_atom(
    hybrid: &mut MolecularSystem,
    b_system: &MolecularSystem,
    b_atom_id: AtomId,
) -> Result<AtomId, EngineError> {
    let b_atom = b_system
        .atom(b_atom_id)
        .ok_or(ModelError::AtomNotFound(b_atom_id))?;
    let b_residue = b_system
        .residue(b_atom.residue_id)
        .ok_or(ModelError::ResidueNotFound(b_atom.residue_id))?;
    let b_chain = b_system
        .chain(b_residue.chain_id)
        .ok_or(ModelError::ChainNotFound(b_residue.chain_id))?;

    let chain_id = hybrid.add_chain(&b_chain.name);
    let residue_id = hybrid
        .add_residue(chain_id, b_residue.number, &b_residue.name)
        .ok_or(ModelError::ChainNotFound(chain_id))?;

    let mut atom = Atom::new(&b_atom.name, residue_id, b_atom.position);
    atom.velocity = b_atom.velocity;
    atom.mass = b_atom.mass;
    atom.atomic_number = b_atom.atomic_number;
    atom.charge_b = b_atom.charge;
    atom.alchemical = true;
    atom.props = remap_row(b_system.atom_props(), b_atom.props(), hybrid.atom_props())
        .map_err(ModelError::from)?;

    let atom_id = hybrid
        .add_atom_to_residue(residue_id, atom)
        .ok_or(ModelError::ResidueNotFound(residue_id))?;
    debug!(atom = %b_atom.name, residue = %b_residue.name, "Added dummy atom from B.");
    Ok(atom_id)
}
