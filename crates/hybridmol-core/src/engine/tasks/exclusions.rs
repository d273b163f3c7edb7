use crate::core::forcefield::nonbonded::VdwFunction;
use crate::core::forcefield::params::ParamTableRef;
use crate::core::forcefield::schema::NONBONDED_TABLE;
use crate::core::forcefield::term_table::{TermState, TermTable};
use crate::core::models::ids::{AtomId, ParamId, TermId};
use crate::core::models::system::{ModelError, MolecularSystem};
use crate::engine::block::{Marker, build_exclusion_block};
use crate::engine::error::EngineError;
use crate::engine::mapping::{AtomMapping, nonbonded_term};
use std::collections::HashSet;
use tracing::{debug, info, instrument};

const EXCLUSION_TABLE: &str = "exclusion";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Exclusions present only in B, added to the hybrid.
    pub added_exclusions: usize,
    /// Exclusions between vanishing and appearing atoms within the cutoff.
    pub cutoff_exclusions: usize,
    /// Explicit pair terms given coefficients for a state that lost an exclusion.
    pub synthesized_pairs: usize,
}

/// Which end state a synthesized pair row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairState {
    A,
    B,
}

/// Reconciles the exclusion lists of both end states.
///
/// Exclusions are kept as a union. When one state excludes a pair of atoms
/// that both exist in the other state and are not excluded there, the state
/// without the exclusion gets an explicit pair term combining the two atoms'
/// nonbonded parameters, so its interaction survives. Vanishing atoms are also
/// excluded from appearing atoms closer than `cutoff`.
#[instrument(skip_all, name = "exclusion_task")]
pub fn run(mapping: &mut AtomMapping, cutoff: f64) -> Result<ReconcileSummary, EngineError> {
    for model in [&mapping.system, &mapping.b_system] {
        if let Some(table) = model.table(EXCLUSION_TABLE).filter(|t| t.arity() != 2) {
            return Err(EngineError::UnsupportedArity(table.arity()));
        }
    }

    let block = build_exclusion_block(
        mapping.system.table(EXCLUSION_TABLE),
        mapping.b_system.table(EXCLUSION_TABLE),
        mapping,
    )?;

    let mut summary = ReconcileSummary::default();
    let mut excluded: HashSet<Vec<usize>> = HashSet::with_capacity(block.len());
    let mut to_add: Vec<Vec<usize>> = Vec::new();

    for entry in block {
        let shared = entry
            .atoms
            .iter()
            .all(|&p| mapping.pairs[p].a.is_some() && mapping.pairs[p].b.is_some());
        match (entry.a, entry.b) {
            (Marker::Term(_), Marker::Term(_)) => {}
            (Marker::Term(_), Marker::Absent) => {
                if shared {
                    synthesize_pair(mapping, &entry.atoms, PairState::B)?;
                    summary.synthesized_pairs += 1;
                }
            }
            (Marker::Absent, Marker::Term(_)) => {
                if shared {
                    synthesize_pair(mapping, &entry.atoms, PairState::A)?;
                    summary.synthesized_pairs += 1;
                }
                to_add.push(entry.atoms.clone());
                summary.added_exclusions += 1;
            }
            (a, b) => {
                return Err(EngineError::UnsupportedTransition {
                    table: EXCLUSION_TABLE.to_string(),
                    a,
                    b,
                });
            }
        }
        excluded.insert(entry.atoms);
    }

    for key in close_dummy_pairs(mapping, cutoff)? {
        if excluded.insert(key.clone()) {
            to_add.push(key);
            summary.cutoff_exclusions += 1;
        }
    }

    if !to_add.is_empty() {
        if mapping.system.table(EXCLUSION_TABLE).is_none() {
            mapping.system.add_table_from_schema(EXCLUSION_TABLE)?;
        }
        let mut table = mapping.system.table_mut(EXCLUSION_TABLE)?;
        for key in &to_add {
            let atoms: Vec<_> = key.iter().map(|&p| mapping.atoms[p]).collect();
            table.add_term(&atoms, None)?;
        }
    }

    info!(
        added = summary.added_exclusions,
        cutoff = summary.cutoff_exclusions,
        synthesized_pairs = summary.synthesized_pairs,
        "Exclusions reconciled."
    );
    Ok(summary)
}

/// Sorted position pairs of an atom only in A and an atom only in B whose
/// hybrid positions are closer than `cutoff`.
fn close_dummy_pairs(mapping: &AtomMapping, cutoff: f64) -> Result<Vec<Vec<usize>>, EngineError> {
    let mut a_only = Vec::new();
    let mut b_only = Vec::new();
    for (position, pair) in mapping.pairs.iter().enumerate() {
        let atom_id = mapping.atoms[position];
        let atom = mapping
            .system
            .atom(atom_id)
            .ok_or(ModelError::AtomNotFound(atom_id))?;
        match (pair.a, pair.b) {
            (Some(_), None) => a_only.push((position, atom.position)),
            (None, Some(_)) => b_only.push((position, atom.position)),
            _ => {}
        }
    }

    let cutoff_sq = cutoff * cutoff;
    let mut keys = Vec::new();
    for (i, pi) in &a_only {
        for (j, pj) in &b_only {
            if nalgebra::distance_squared(pi, pj) < cutoff_sq {
                keys.push(vec![(*i).min(*j), (*i).max(*j)]);
            }
        }
    }
    debug!(
        vanishing = a_only.len(),
        appearing = b_only.len(),
        close = keys.len(),
        "Scanned dummy atom pairs."
    );
    Ok(keys)
}

/// Gives the explicit pair term of `positions` a row for `state`, creating the
/// term with a zero row for the other state when the hybrid has none.
fn synthesize_pair(
    mapping: &mut AtomMapping,
    positions: &[usize],
    state: PairState,
) -> Result<(), EngineError> {
    let atoms: Vec<AtomId> = positions.iter().map(|&p| mapping.atoms[p]).collect();
    let (source, source_atoms) = match state {
        PairState::A => (&mapping.system, atoms.clone()),
        PairState::B => {
            let b_atoms = positions
                .iter()
                .map(|&p| {
                    mapping
                        .b_atom(p)
                        .ok_or(EngineError::Model(ModelError::AtomNotFound(mapping.atoms[p])))
                })
                .collect::<Result<Vec<_>, _>>()?;
            (&mapping.b_system, b_atoms)
        }
    };
    let columns = pair_columns(source, &source_atoms, state)?;

    let pair_table = pair_table_name(mapping)?;
    if mapping.system.table(pair_table).is_none() {
        mapping.system.add_table_from_schema(pair_table)?;
    }
    let existing = find_pair_term(mapping, pair_table, positions)?;

    let mut table = mapping.system.table_mut(pair_table)?;
    let params = table.params().clone();
    let row = write_row(&params, &columns)?;
    match (state, existing) {
        (PairState::B, Some(term)) => table.set_param_b(term, Some(row))?,
        (PairState::B, None) => {
            let zero = params.write().add_param();
            let term = table.add_term(&atoms, Some(zero))?;
            table.set_param_b(term, Some(row))?;
        }
        (PairState::A, Some(term)) => table.set_param(term, Some(row))?,
        (PairState::A, None) => {
            let term = table.add_term(&atoms, Some(row))?;
            let zero = params.write().add_param();
            table.set_param_b(term, Some(zero))?;
        }
    }
    debug!(?positions, ?state, table = pair_table, "Synthesized pair interaction.");
    Ok(())
}

fn pair_table_name(mapping: &AtomMapping) -> Result<&'static str, EngineError> {
    let info = mapping
        .system
        .nonbonded_info()
        .or_else(|| mapping.b_system.nonbonded_info())
        .ok_or_else(|| EngineError::UnsupportedVdwFunction("<undeclared>".to_string()))?;
    Ok(info.vdw_funct.parse::<VdwFunction>()?.pair_table())
}

fn find_pair_term(
    mapping: &AtomMapping,
    table: &str,
    positions: &[usize],
) -> Result<Option<TermId>, EngineError> {
    let Some(table) = mapping.system.table(table) else {
        return Ok(None);
    };
    for (id, term) in table.terms_iter() {
        let mut key = mapping.positions_of(term.atoms())?;
        key.sort_unstable();
        if key == positions {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Pair coefficients of two atoms in `model`, combined from their primary
/// nonbonded rows with the model's declared rule, plus their charge product.
fn pair_columns(
    model: &MolecularSystem,
    atoms: &[AtomId],
    state: PairState,
) -> Result<Vec<(&'static str, f64)>, EngineError> {
    let info = model
        .nonbonded_info()
        .ok_or_else(|| EngineError::UnsupportedVdwFunction("<undeclared>".to_string()))?;
    let vdw = info.vdw_model()?;
    let nonbonded = model
        .table(NONBONDED_TABLE)
        .ok_or_else(|| ModelError::TableNotFound(NONBONDED_TABLE.to_string()))?;

    let mut per_atom = Vec::with_capacity(atoms.len());
    let mut qij = 1.0;
    for &atom_id in atoms {
        let atom = model.atom(atom_id).ok_or(ModelError::AtomNotFound(atom_id))?;
        qij *= atom.charge;
        per_atom.push(nonbonded_values(nonbonded, atom_id, vdw.funct, state)?);
    }
    let [i, j] = per_atom.as_slice() else {
        return Err(EngineError::UnsupportedArity(per_atom.len()));
    };
    Ok(vdw.combine(i, j).columns(qij))
}

fn nonbonded_values(
    table: &TermTable,
    atom: AtomId,
    funct: VdwFunction,
    state: PairState,
) -> Result<Vec<f64>, EngineError> {
    let term = nonbonded_term(table, atom).ok_or(EngineError::MissingNonbondedTerm {
        state: match state {
            PairState::A => 'A',
            PairState::B => 'B',
        },
        atom,
    })?;
    funct
        .param_names()
        .iter()
        .map(|name| Ok(table.prop_f64(term, name, TermState::A)?))
        .collect()
}

fn write_row(params: &ParamTableRef, columns: &[(&'static str, f64)]) -> Result<ParamId, EngineError> {
    let mut params = params.write();
    let row = params.add_param();
    for (name, value) in columns {
        params.set_prop(row, name, *value)?;
    }
    Ok(row)
}
