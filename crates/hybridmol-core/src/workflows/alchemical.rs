use crate::core::forcefield::nonbonded::VdwFunction;
use crate::core::forcefield::params::copy_param;
use crate::core::forcefield::term_table::{TermTable, TermTableMut};
use crate::core::models::ids::{AtomId, ParamId, TermId};
use crate::core::models::system::{ModelError, MolecularSystem};
use crate::engine::block::{build_pair_block, build_term_block};
use crate::engine::config::MergeConfig;
use crate::engine::error::EngineError;
use crate::engine::mapping::{AtomCorrespondence, AtomMapping, AtomPair, map_atoms};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::tasks::constraints::{self, ConstraintSummary};
use crate::engine::tasks::exclusions::{self, ReconcileSummary};
use crate::engine::tasks::hybrid::{self, TransitionCounts, ensure_table_like};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeSummary {
    /// Transition counts per merged term table, pair table included.
    pub tables: BTreeMap<String, TransitionCounts>,
    pub exclusions: ReconcileSummary,
    pub constraints: ConstraintSummary,
    pub dummy_atoms: usize,
    /// Bonds of B added between hybrid atoms.
    pub b_bonds: usize,
    /// Atoms of A outside the correspondence, carried over unchanged.
    pub remainder_atoms: usize,
    pub restored_terms: usize,
    pub restored_bonds: usize,
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub system: MolecularSystem,
    pub summary: MergeSummary,
}

/// Builds the hybrid model of `a` and `b` with the default configuration and
/// no progress reporting.
pub fn make_alchemical(
    a: &MolecularSystem,
    b: &MolecularSystem,
    correspondence: &AtomCorrespondence,
) -> Result<MergeOutcome, EngineError> {
    run(
        a,
        b,
        correspondence,
        &MergeConfig::default(),
        &ProgressReporter::new(),
    )
}

/// Builds a hybrid model whose terms interpolate between `a` and `b`.
///
/// Neither input is modified. The hybrid starts as a copy of the
/// correspondence atoms of `a`, with atoms present only in `b` added after
/// them. Every configured bonded table, the explicit pair table, exclusions and
/// constraints are then merged so each term carries its state A parameters as
/// primary row and its state B parameters as alternate row. Atoms of `a` that
/// are not in the correspondence are appended last with the terms and bonds
/// connecting them to the rest of the molecule.
#[instrument(skip_all, name = "alchemical_workflow")]
pub fn run(
    a: &MolecularSystem,
    b: &MolecularSystem,
    correspondence: &AtomCorrespondence,
    config: &MergeConfig,
    reporter: &ProgressReporter,
) -> Result<MergeOutcome, EngineError> {
    config.validate()?;
    info!(
        a_atoms = a.atom_count(),
        b_atoms = b.atom_count(),
        pairs = correspondence.len(),
        "Starting alchemical merge."
    );

    let mut mapping = reporter.phase("Atom Mapping", || map_atoms(a, b, correspondence))?;
    let mut summary = MergeSummary {
        dummy_atoms: mapping.dummy_atoms,
        ..Default::default()
    };
    if mapping.dummy_atoms > 0 {
        reporter.report(Progress::Message(format!(
            "{} atom(s) present only in B added as dummies",
            mapping.dummy_atoms
        )));
    }

    reporter.phase("Bonded Terms", || -> Result<(), EngineError> {
        for bonded in &config.bonded {
            if mapping.system.table(&bonded.table).is_none()
                && mapping.b_system.table(&bonded.table).is_none()
            {
                warn!(table = %bonded.table, "Bonded table absent from both end states; skipped.");
                continue;
            }
            let counts = merge_table(&mut mapping, &bonded.table, bonded.keeper.as_deref(), false)?;
            report_table(reporter, &bonded.table, &counts);
            summary.tables.insert(bonded.table.clone(), counts);
        }
        Ok(())
    })?;

    if config.pairs.enabled {
        reporter.phase("Pair Terms", || -> Result<(), EngineError> {
            let name = pair_table_name(&mapping)?;
            let counts = merge_table(&mut mapping, name, None, true)?;
            report_table(reporter, name, &counts);
            summary.tables.insert(name.to_string(), counts);
            Ok(())
        })?;
    }

    summary.b_bonds = reporter.phase("Bonds", || add_b_bonds(&mut mapping))?;

    summary.exclusions = reporter.phase("Exclusions", || {
        exclusions::run(&mut mapping, config.exclusion_cutoff)
    })?;
    summary.constraints = reporter.phase("Constraints", || constraints::run(&mut mapping))?;

    let AtomMapping {
        pairs,
        atoms,
        mut system,
        ..
    } = mapping;
    reporter.phase("Remainder", || -> Result<(), EngineError> {
        let mapped: HashMap<usize, AtomId> = pairs
            .iter()
            .zip(&atoms)
            .filter_map(|(pair, &atom)| pair.a.map(|i| (i, atom)))
            .collect();
        let restored = append_remainder(&mut system, a, &pairs, &mapped)?;
        summary.remainder_atoms = restored.atoms;
        summary.restored_terms = restored.terms;
        summary.restored_bonds = restored.bonds;
        Ok(())
    })?;
    system.reassign_gids();

    info!(
        atoms = system.atom_count(),
        dummies = summary.dummy_atoms,
        tables = summary.tables.len(),
        synthesized_pairs = summary.exclusions.synthesized_pairs,
        merged_constraints = summary.constraints.merged,
        "Alchemical merge complete."
    );
    Ok(MergeOutcome { system, summary })
}

fn merge_table(
    mapping: &mut AtomMapping,
    name: &str,
    keeper: Option<&str>,
    pairwise: bool,
) -> Result<TransitionCounts, EngineError> {
    let a_table = mapping.system.table(name);
    let b_table = mapping.b_system.table(name);
    let block = if pairwise {
        build_pair_block(a_table, b_table, mapping)?
    } else {
        build_term_block(a_table, b_table, mapping)?
    };
    hybrid::run(mapping, name, &block, keeper)
}

fn report_table(reporter: &ProgressReporter, table: &str, counts: &TransitionCounts) {
    reporter.report(Progress::TableMerged {
        table: table.to_string(),
        entries: counts.total(),
    });
}

fn pair_table_name(mapping: &AtomMapping) -> Result<&'static str, EngineError> {
    let funct = match mapping
        .system
        .nonbonded_info()
        .or_else(|| mapping.b_system.nonbonded_info())
    {
        Some(info) => info.vdw_funct.parse::<VdwFunction>()?,
        None => VdwFunction::Lj12_6,
    };
    Ok(funct.pair_table())
}

/// Adds the bonds of B between hybrid atoms; bonds already present are kept.
fn add_b_bonds(mapping: &mut AtomMapping) -> Result<usize, EngineError> {
    let mut added = 0;
    for bond in mapping.b_system.bonds() {
        let positions = mapping.b_positions_of(&[bond.atom1_id, bond.atom2_id])?;
        let (a1, a2) = (mapping.atoms[positions[0]], mapping.atoms[positions[1]]);
        if mapping.system.bond_between(a1, a2).is_none() {
            mapping
                .system
                .add_bond(a1, a2, bond.order)
                .ok_or(ModelError::SelfBond(a1))?;
            added += 1;
        }
    }
    debug!(added, "Added bonds of state B.");
    Ok(added)
}

#[derive(Debug, Default)]
struct Restored {
    atoms: usize,
    terms: usize,
    bonds: usize,
}

/// Appends the atoms of `a` outside the correspondence, then restores the
/// terms and bonds of `a` that connect them to correspondence atoms.
fn append_remainder(
    system: &mut MolecularSystem,
    a: &MolecularSystem,
    pairs: &[AtomPair],
    mapped: &HashMap<usize, AtomId>,
) -> Result<Restored, EngineError> {
    let a_ids = a.atom_ids();
    let in_correspondence: HashSet<usize> = pairs.iter().filter_map(|p| p.a).collect();
    let remainder: Vec<AtomId> = a_ids
        .iter()
        .enumerate()
        .filter(|(i, _)| !in_correspondence.contains(i))
        .map(|(_, &id)| id)
        .collect();
    if remainder.is_empty() {
        return Ok(Restored::default());
    }

    let rest = a.clone_subset(&remainder)?;
    let appended = system.append(&rest)?;

    let mut to_hybrid: HashMap<AtomId, AtomId> = remainder.iter().copied().zip(appended).collect();
    let remainder: HashSet<AtomId> = to_hybrid.keys().copied().collect();
    for (&i, &hybrid_atom) in mapped {
        to_hybrid.insert(a_ids[i], hybrid_atom);
    }
    let spans_boundary = |atoms: &[AtomId]| {
        atoms.iter().all(|a| to_hybrid.contains_key(a))
            && atoms.iter().any(|a| remainder.contains(a))
            && atoms.iter().any(|a| !remainder.contains(a))
    };

    let mut restored = Restored {
        atoms: remainder.len(),
        ..Default::default()
    };
    for table in a.tables_iter() {
        let boundary: Vec<TermId> = table
            .terms_iter()
            .filter(|(_, term)| spans_boundary(term.atoms()))
            .map(|(id, _)| id)
            .collect();
        if boundary.is_empty() {
            continue;
        }
        ensure_table_like(system, table.name(), Some(table))?;
        let mut dst = system.table_mut(table.name())?;
        for id in boundary {
            restore_term(&mut dst, table, id, &to_hybrid)?;
            restored.terms += 1;
        }
    }

    for bond in a.bonds() {
        let atoms = [bond.atom1_id, bond.atom2_id];
        if !spans_boundary(&atoms) {
            continue;
        }
        let (a1, a2) = (to_hybrid[&atoms[0]], to_hybrid[&atoms[1]]);
        if system.bond_between(a1, a2).is_some() {
            continue;
        }
        system.add_bond(a1, a2, bond.order).ok_or(ModelError::SelfBond(a1))?;
        for column in a.bond_props().columns() {
            let value = a.bond_prop(atoms[0], atoms[1], &column.name)?.clone();
            system.set_bond_prop(a1, a2, &column.name, value)?;
        }
        restored.bonds += 1;
    }

    debug!(
        atoms = restored.atoms,
        terms = restored.terms,
        bonds = restored.bonds,
        "Restored remainder of A."
    );
    Ok(restored)
}

fn restore_term(
    dst: &mut TermTableMut<'_>,
    src: &TermTable,
    id: TermId,
    to_hybrid: &HashMap<AtomId, AtomId>,
) -> Result<(), EngineError> {
    let term = src.term(id)?;
    let atoms: Vec<AtomId> = term.atoms().iter().map(|a| to_hybrid[a]).collect();
    let param = restore_param(dst, src, term.param())?;
    let param_b = restore_param(dst, src, term.param_b())?;

    let new_term = dst.add_term(&atoms, param)?;
    if param_b.is_some() {
        dst.set_param_b(new_term, param_b)?;
    }
    for column in src.term_props().columns() {
        dst.add_term_prop(&column.name, column.ty)?;
        let value = src.term_prop(id, &column.name)?.clone();
        dst.set_term_prop(new_term, &column.name, value)?;
    }
    Ok(())
}

/// Row of `dst` for a row of `src`: the same row when both tables share
/// storage, a copy otherwise.
fn restore_param(
    dst: &TermTableMut<'_>,
    src: &TermTable,
    param: Option<ParamId>,
) -> Result<Option<ParamId>, EngineError> {
    let Some(param) = param else {
        return Ok(None);
    };
    if dst.params().ptr_eq(src.params()) {
        return Ok(Some(param));
    }
    Ok(Some(copy_param(dst.params(), src.params(), param)?))
}
