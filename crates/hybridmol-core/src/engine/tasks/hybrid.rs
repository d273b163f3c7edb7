use crate::core::forcefield::error::TableError;
use crate::core::forcefield::params::{ParamTableRef, copy_param};
use crate::core::forcefield::term_table::{TermTable, TermTableMut};
use crate::core::models::ids::{ParamId, TermId};
use crate::core::models::system::{ModelError, MolecularSystem};
use crate::engine::block::{BlockEntry, Transition};
use crate::engine::error::EngineError;
use crate::engine::mapping::AtomMapping;
use tracing::{debug, info, instrument};

/// Number of block entries of a table per transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionCounts {
    pub only_a: usize,
    pub vanish_b: usize,
    pub appear_from_dummy: usize,
    pub only_b: usize,
    pub morph: usize,
}

impl TransitionCounts {
    pub fn total(&self) -> usize {
        self.only_a + self.vanish_b + self.appear_from_dummy + self.only_b + self.morph
    }

    fn record(&mut self, transition: &Transition) {
        match transition {
            Transition::OnlyA(_) => self.only_a += 1,
            Transition::VanishB(_) => self.vanish_b += 1,
            Transition::AppearFromDummy(_) => self.appear_from_dummy += 1,
            Transition::OnlyB(_) => self.only_b += 1,
            Transition::Morph { .. } => self.morph += 1,
        }
    }
}

/// Creates `name` in the hybrid model with B's layout when only B has it.
pub(crate) fn ensure_table_like(
    system: &mut MolecularSystem,
    name: &str,
    template: Option<&TermTable>,
) -> Result<bool, EngineError> {
    if system.table(name).is_some() {
        return Ok(true);
    }
    let Some(template) = template else {
        return Ok(false);
    };
    let params = ParamTableRef::from_table(template.params().read().empty_like());
    let mut table = system.add_table(name, template.arity(), template.category(), Some(params))?;
    for column in template.term_props().columns() {
        table.add_term_prop(&column.name, column.ty)?;
    }
    Ok(true)
}

/// Applies the block of one table to the hybrid model.
///
/// `keeper` names the single param column that survives when a state's
/// parameters are zeroed; every other column is reset to its default.
#[instrument(skip_all, name = "hybrid_terms_task", fields(table = name))]
pub fn run(
    mapping: &mut AtomMapping,
    name: &str,
    block: &[BlockEntry],
    keeper: Option<&str>,
) -> Result<TransitionCounts, EngineError> {
    let b_table = mapping.b_system.table(name);
    let mut counts = TransitionCounts::default();
    if !ensure_table_like(&mut mapping.system, name, b_table)? {
        return Ok(counts);
    }

    let mut table = mapping.system.table_mut(name)?;
    if let Some(b_table) = b_table {
        for column in b_table.term_props().columns() {
            table.add_term_prop(&column.name, column.ty)?;
        }
    }

    for entry in block {
        let transition = Transition::classify(name, entry.a, entry.b)?;
        counts.record(&transition);
        match transition {
            Transition::OnlyA(_) => {}
            Transition::VanishB(term) => {
                let primary = required_param(&table, term)?;
                let params = table.params().clone();
                let vanished = params.write().duplicate_param(primary)?;
                params.write().zero_except(vanished, keeper)?;
                table.set_param_b(term, Some(vanished))?;
            }
            Transition::AppearFromDummy(b_term) | Transition::OnlyB(b_term) => {
                let b_table = b_table.ok_or_else(|| missing_table(name))?;
                let atoms: Vec<_> = entry.atoms.iter().map(|&p| mapping.atoms[p]).collect();
                let b_param = required_param(b_table, b_term)?;
                let params = table.params().clone();
                let primary = copy_param(&params, b_table.params(), b_param)?;
                params.write().zero_except(primary, keeper)?;
                let alternate = copy_param(&params, b_table.params(), b_param)?;

                let term = table.add_term(&atoms, Some(primary))?;
                table.set_param_b(term, Some(alternate))?;
                copy_term_props(&mut table, term, b_table, b_term)?;
            }
            Transition::Morph { a, b } => {
                let b_table = b_table.ok_or_else(|| missing_table(name))?;
                let b_param = required_param(b_table, b)?;
                let alternate = copy_param(table.params(), b_table.params(), b_param)?;
                table.set_param_b(a, Some(alternate))?;
            }
        }
    }

    debug!(?counts, "Transitions applied.");
    info!(
        table = name,
        entries = counts.total(),
        morphed = counts.morph,
        vanished = counts.vanish_b,
        appeared = counts.appear_from_dummy + counts.only_b,
        "Hybrid terms populated."
    );
    Ok(counts)
}

fn required_param(table: &TermTable, term: TermId) -> Result<ParamId, TableError> {
    table.param(term)?.ok_or_else(|| TableError::MissingParam {
        table: table.name().to_string(),
        term,
    })
}

fn copy_term_props(
    table: &mut TermTableMut<'_>,
    term: TermId,
    b_table: &TermTable,
    b_term: TermId,
) -> Result<(), EngineError> {
    for column in b_table.term_props().columns() {
        let value = b_table.term_prop(b_term, &column.name)?.clone();
        table.set_term_prop(term, &column.name, value)?;
    }
    Ok(())
}

fn missing_table(name: &str) -> EngineError {
    EngineError::Model(ModelError::TableNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::term_table::TermState;
    use crate::core::models::atom::Atom;
    use crate::core::models::properties::Value;
    use crate::engine::block::build_term_block;
    use crate::engine::mapping::{AtomCorrespondence, map_atoms};
    use nalgebra::Point3;

    fn model(n_atoms: usize, stretches: &[(usize, usize, f64, f64, i64)]) -> MolecularSystem {
        let mut system = MolecularSystem::new();
        let chain = system.add_chain("L");
        let residue = system.add_residue(chain, 1, "LIG").unwrap();
        let ids: Vec<_> = (0..n_atoms)
            .map(|i| {
                let atom = Atom::new(&format!("X{}", i), residue, Point3::new(i as f64, 0.0, 0.0));
                system.add_atom_to_residue(residue, atom).unwrap()
            })
            .collect();
        let mut table = system.add_table_from_schema("stretch_harm").unwrap();
        for &(i, j, r0, fc, constrained) in stretches {
            let p = table.params().write().add_param();
            table.params().write().set_prop(p, "r0", r0).unwrap();
            table.params().write().set_prop(p, "fc", fc).unwrap();
            let t = table.add_term(&[ids[i], ids[j]], Some(p)).unwrap();
            table.set_term_prop(t, "constrained", constrained).unwrap();
        }
        system
    }

    fn merge(a: &MolecularSystem, b: &MolecularSystem, corr: &[(i64, i64)]) -> (AtomMapping, TransitionCounts) {
        let corr = AtomCorrespondence::from_raw(corr).unwrap();
        let mut mapping = map_atoms(a, b, &corr).unwrap();
        let block = build_term_block(
            mapping.system.table("stretch_harm"),
            mapping.b_system.table("stretch_harm"),
            &mapping,
        )
        .unwrap();
        let counts = run(&mut mapping, "stretch_harm", &block, Some("r0")).unwrap();
        (mapping, counts)
    }

    fn values(mapping: &AtomMapping, i: usize, j: usize, state: TermState) -> (f64, f64) {
        let table = mapping.system.table("stretch_harm").unwrap();
        let term = table.find_exact(&[mapping.atoms[i], mapping.atoms[j]])[0];
        (
            table.prop_f64(term, "r0", state).unwrap(),
            table.prop_f64(term, "fc", state).unwrap(),
        )
    }

    #[test]
    fn vanishing_stretch_keeps_r0_and_zeroes_fc() {
        let a = model(2, &[(0, 1, 1.5, 300.0, 0)]);
        let b = model(2, &[]);
        let (mapping, counts) = merge(&a, &b, &[(0, 0), (1, 1)]);

        assert_eq!(counts.vanish_b, 1);
        assert_eq!(values(&mapping, 0, 1, TermState::A), (1.5, 300.0));
        assert_eq!(values(&mapping, 0, 1, TermState::B), (1.5, 0.0));
    }

    #[test]
    fn morph_copies_b_parameters_into_the_alternate_state() {
        let a = model(2, &[(0, 1, 1.5, 300.0, 0)]);
        let b = model(2, &[(1, 0, 1.4, 350.0, 0)]);
        let (mapping, counts) = merge(&a, &b, &[(0, 0), (1, 1)]);

        assert_eq!(counts.morph, 1);
        assert_eq!(values(&mapping, 0, 1, TermState::A), (1.5, 300.0));
        assert_eq!(values(&mapping, 0, 1, TermState::B), (1.4, 350.0));
    }

    #[test]
    fn b_only_term_is_zeroed_in_a_and_copies_term_props() {
        let a = model(2, &[]);
        let b = model(2, &[(0, 1, 1.1, 340.0, 1)]);
        let (mapping, counts) = merge(&a, &b, &[(0, 0), (1, 1)]);

        assert_eq!(counts.only_b, 1);
        assert_eq!(values(&mapping, 0, 1, TermState::A), (1.1, 0.0));
        assert_eq!(values(&mapping, 0, 1, TermState::B), (1.1, 340.0));
        let table = mapping.system.table("stretch_harm").unwrap();
        let term = table.find_exact(&[mapping.atoms[0], mapping.atoms[1]])[0];
        assert_eq!(table.term_prop(term, "constrained").unwrap(), &Value::Int(1));
    }

    #[test]
    fn term_between_dummies_appears_and_a_only_term_is_untouched() {
        let a = model(3, &[(1, 2, 1.0, 100.0, 0)]);
        let b = model(3, &[(1, 2, 1.2, 200.0, 0)]);
        let (mapping, counts) = merge(&a, &b, &[(0, 0), (1, -1), (2, -1), (-1, 1), (-1, 2)]);

        assert_eq!(counts.only_a, 1);
        assert_eq!(counts.appear_from_dummy, 1);
        let table = mapping.system.table("stretch_harm").unwrap();
        let kept = table.find_exact(&[mapping.atoms[1], mapping.atoms[2]])[0];
        assert_eq!(table.param_b(kept).unwrap(), None);
        assert_eq!(values(&mapping, 3, 4, TermState::A), (1.2, 0.0));
        assert_eq!(values(&mapping, 3, 4, TermState::B), (1.2, 200.0));
    }

    #[test]
    fn refcounts_match_slots_after_merge() {
        let a = model(3, &[(0, 1, 1.5, 300.0, 0), (1, 2, 1.5, 300.0, 0)]);
        let b = model(3, &[(0, 1, 1.4, 320.0, 0)]);
        let (mapping, _) = merge(&a, &b, &[(0, 0), (1, 1), (2, 2)]);

        let table = mapping.system.table("stretch_harm").unwrap();
        let params = table.params().read();
        for id in params.param_ids() {
            let slots = table
                .terms_iter()
                .flat_map(|(_, t)| [t.param(), t.param_b()])
                .filter(|p| *p == Some(id))
                .count();
            assert_eq!(params.refcount(id).unwrap(), slots);
        }
    }
}
