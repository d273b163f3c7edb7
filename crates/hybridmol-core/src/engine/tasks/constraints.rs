use crate::core::forcefield::schema::constraint_ah_name;
use crate::core::forcefield::term_table::{Category, TermState, TermTable};
use crate::core::models::ids::{AtomId, TermId};
use crate::core::models::system::{ModelError, MolecularSystem};
use crate::engine::error::EngineError;
use crate::engine::mapping::AtomMapping;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstraintSummary {
    /// B groups copied onto hybrid atoms that had no constraint.
    pub copied: usize,
    /// B groups folded into an existing hybrid group.
    pub merged: usize,
}

/// A constraint term located by its table, with its atoms as hybrid positions.
#[derive(Debug, Clone)]
struct Group {
    table: String,
    term: TermId,
    positions: Vec<usize>,
}

/// Merges the rigid constraint groups of B into the hybrid model.
///
/// Groups are keyed by their first atom. A B group on an unconstrained atom is
/// copied into the `constraint_ahN` table sized to its atom count; one on a
/// constrained atom is merged with the existing group into a single
/// `constraint_ahN` group holding the union of both atom lists. Only the
/// `r1..rN` distances are carried, so the `theta` of a `constraint_hoh` group
/// is not.
#[instrument(skip_all, name = "constraint_task")]
pub fn run(mapping: &mut AtomMapping) -> Result<ConstraintSummary, EngineError> {
    let hybrid_groups = constraint_groups(&mapping.system, |atoms| mapping.positions_of(atoms))?;
    let b_groups = constraint_groups(&mapping.b_system, |atoms| mapping.b_positions_of(atoms))?;

    let mut summary = ConstraintSummary::default();
    for (key, b_group) in &b_groups {
        match hybrid_groups.get(key) {
            None => {
                copy_group(mapping, b_group)?;
                summary.copied += 1;
            }
            Some(group) => {
                merge_groups(mapping, group, b_group)?;
                summary.merged += 1;
            }
        }
    }

    info!(
        copied = summary.copied,
        merged = summary.merged,
        "Constraint groups merged."
    );
    Ok(summary)
}

/// Key map of every constraint group in `system` by first-atom position.
fn constraint_groups(
    system: &MolecularSystem,
    resolve: impl Fn(&[AtomId]) -> Result<Vec<usize>, EngineError>,
) -> Result<BTreeMap<usize, Group>, EngineError> {
    let mut groups = BTreeMap::new();
    for table in system
        .tables_iter()
        .filter(|t| t.category() == Category::Constraint)
    {
        for (term, t) in table.terms_iter() {
            let positions = resolve(t.atoms())?;
            let Some(&first) = positions.first() else {
                continue;
            };
            match groups.entry(first) {
                Entry::Occupied(existing) => {
                    let existing: &Group = existing.get();
                    return Err(EngineError::OverlappingConstraint {
                        atom: first,
                        first: existing.table.clone(),
                        second: table.name().to_string(),
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(Group {
                        table: table.name().to_string(),
                        term,
                        positions,
                    });
                }
            }
        }
    }
    Ok(groups)
}

fn copy_group(mapping: &mut AtomMapping, group: &Group) -> Result<(), EngineError> {
    let b_table = mapping
        .b_system
        .table(&group.table)
        .ok_or_else(|| ModelError::TableNotFound(group.table.clone()))?;
    let distances = (1..group.positions.len())
        .map(|k| distance(b_table, group.term, k))
        .collect::<Result<Vec<_>, _>>()?;
    let atoms = mapping.atom_ids(&group.positions);

    let name = add_group(&mut mapping.system, &atoms, &distances)?;
    debug!(from = %group.table, table = %name, positions = ?group.positions, "Copied constraint group.");
    Ok(())
}

fn merge_groups(mapping: &mut AtomMapping, group: &Group, b_group: &Group) -> Result<(), EngineError> {
    let table = mapping
        .system
        .table(&group.table)
        .ok_or_else(|| ModelError::TableNotFound(group.table.clone()))?;
    let b_table = mapping
        .b_system
        .table(&b_group.table)
        .ok_or_else(|| ModelError::TableNotFound(b_group.table.clone()))?;

    let mut positions = group.positions.clone();
    let mut distances = (1..positions.len())
        .map(|k| distance(table, group.term, k))
        .collect::<Result<Vec<_>, _>>()?;
    for (k, &position) in b_group.positions.iter().enumerate().skip(1) {
        if !positions.contains(&position) {
            positions.push(position);
            distances.push(distance(b_table, b_group.term, k)?);
        }
    }
    let atoms = mapping.atom_ids(&positions);

    mapping.system.table_mut(&group.table)?.del_term(group.term)?;
    let name = add_group(&mut mapping.system, &atoms, &distances)?;
    debug!(table = %name, ?positions, "Merged constraint groups.");
    Ok(())
}

/// Adds a group to the `constraint_ahN` table for `distances.len()` partners,
/// creating the table if needed, and returns the table name.
fn add_group(system: &mut MolecularSystem, atoms: &[AtomId], distances: &[f64]) -> Result<String, EngineError> {
    let name = constraint_ah_name(distances.len());
    if system.table(&name).is_none() {
        system.add_table_from_schema(&name)?;
    }
    let mut table = system.table_mut(&name)?;
    let params = table.params().clone();
    let row = {
        let mut params = params.write();
        let row = params.add_param();
        for (k, d) in distances.iter().enumerate() {
            params.set_prop(row, &format!("r{}", k + 1), *d)?;
        }
        row
    };
    table.add_term(atoms, Some(row))?;
    Ok(name)
}

/// Target distance of the `k`-th partner (1-based) of a constraint group.
fn distance(table: &TermTable, term: TermId, k: usize) -> Result<f64, EngineError> {
    let column = format!("r{}", k);
    table
        .prop_f64(term, &column, TermState::A)
        .map_err(|_| EngineError::MalformedConstraint {
            table: table.name().to_string(),
            term,
            column,
        })
}
