#![allow(dead_code)]

use hybridmol::core::forcefield::params::ParamTableRef;
use hybridmol::core::forcefield::term_table::{Category, TermTable};
use hybridmol::core::models::atom::Atom;
use hybridmol::core::models::ids::{AtomId, ResidueId};
use hybridmol::core::models::system::MolecularSystem;
use hybridmol::core::models::topology::BondOrder;
use nalgebra::Point3;

/// Builds small single-residue models with a declared nonbonded table,
/// `vdw_12_6` with the geometric rule unless chosen otherwise.
pub struct LigandBuilder {
    system: MolecularSystem,
    residue: ResidueId,
    ids: Vec<AtomId>,
}

impl LigandBuilder {
    pub fn new() -> Self {
        Self::with_vdw("vdw_12_6", "geometric")
    }

    pub fn with_vdw(vdw_funct: &str, vdw_rule: &str) -> Self {
        let mut system = MolecularSystem::new();
        let chain = system.add_chain("L");
        let residue = system.add_residue(chain, 1, "LIG").unwrap();
        system.add_nonbonded_from_schema(vdw_funct, vdw_rule).unwrap();
        Self {
            system,
            residue,
            ids: Vec::new(),
        }
    }

    pub fn atom(self, x: f64, charge: f64, sigma: f64, epsilon: f64) -> Self {
        self.atom_with(x, charge, &[("sigma", sigma), ("epsilon", epsilon)])
    }

    /// Adds an atom whose nonbonded row holds `columns`.
    pub fn atom_with(mut self, x: f64, charge: f64, columns: &[(&str, f64)]) -> Self {
        let name = format!("X{}", self.ids.len() + 1);
        let mut atom = Atom::new(&name, self.residue, Point3::new(x, 0.0, 0.0));
        atom.charge = charge;
        let id = self.system.add_atom_to_residue(self.residue, atom).unwrap();
        let mut nb = self.system.table_mut("nonbonded").unwrap();
        let p = nb.params().write().add_param();
        for (column, value) in columns {
            nb.params().write().set_prop(p, column, *value).unwrap();
        }
        nb.add_term(&[id], Some(p)).unwrap();
        self.ids.push(id);
        self
    }

    /// Adds `n` atoms one Å apart with small alternating charges.
    pub fn atoms(mut self, n: usize) -> Self {
        for i in 0..n {
            let charge = if i % 2 == 0 { 0.1 } else { -0.1 };
            self = self.atom(i as f64, charge, 0.3, 0.1);
        }
        self
    }

    pub fn stretch(mut self, i: usize, j: usize, r0: f64, fc: f64) -> Self {
        if self.system.table("stretch_harm").is_none() {
            self.system.add_table_from_schema("stretch_harm").unwrap();
        }
        let mut table = self.system.table_mut("stretch_harm").unwrap();
        let p = table.params().write().add_param();
        table.params().write().set_prop(p, "r0", r0).unwrap();
        table.params().write().set_prop(p, "fc", fc).unwrap();
        table.add_term(&[self.ids[i], self.ids[j]], Some(p)).unwrap();
        self.system
            .add_bond(self.ids[i], self.ids[j], BondOrder::Single)
            .unwrap();
        self
    }

    /// Adds a stretch whose parameter row lives in `shared`, a table that
    /// other models may alias.
    pub fn shared_stretch(mut self, shared: &ParamTableRef, i: usize, j: usize, r0: f64, fc: f64) -> Self {
        if self.system.table("stretch_harm").is_none() {
            self.system
                .add_table("stretch_harm", 2, Category::Bond, Some(shared.clone()))
                .unwrap();
        }
        let p = shared.write().add_param();
        shared.write().set_prop(p, "r0", r0).unwrap();
        shared.write().set_prop(p, "fc", fc).unwrap();
        let mut table = self.system.table_mut("stretch_harm").unwrap();
        table.add_term(&[self.ids[i], self.ids[j]], Some(p)).unwrap();
        self
    }

    pub fn exclusion(mut self, i: usize, j: usize) -> Self {
        if self.system.table("exclusion").is_none() {
            self.system.add_table_from_schema("exclusion").unwrap();
        }
        let mut table = self.system.table_mut("exclusion").unwrap();
        table.add_term(&[self.ids[i], self.ids[j]], None).unwrap();
        self
    }

    pub fn constraint(mut self, atoms: &[usize], distances: &[f64]) -> Self {
        let name = format!("constraint_ah{}", distances.len());
        if self.system.table(&name).is_none() {
            self.system.add_table_from_schema(&name).unwrap();
        }
        let mut table = self.system.table_mut(&name).unwrap();
        let p = table.params().write().add_param();
        for (k, d) in distances.iter().enumerate() {
            table.params().write().set_prop(p, &format!("r{}", k + 1), *d).unwrap();
        }
        let atoms: Vec<_> = atoms.iter().map(|&i| self.ids[i]).collect();
        table.add_term(&atoms, Some(p)).unwrap();
        self
    }

    pub fn build(self) -> MolecularSystem {
        self.system
    }
}

/// Number of (table, term, slot) triples across `tables` pointing at each row
/// of `params`, checked against the row's refcount.
pub fn assert_refcounts_exact<'a>(params: &ParamTableRef, tables: impl IntoIterator<Item = &'a TermTable>) {
    let tables: Vec<_> = tables
        .into_iter()
        .filter(|t| t.params().ptr_eq(params))
        .collect();
    let params = params.read();
    for id in params.param_ids() {
        let slots = tables
            .iter()
            .flat_map(|t| t.terms_iter().map(|(_, term)| [term.param(), term.param_b()]))
            .flatten()
            .filter(|p| *p == Some(id))
            .count();
        assert_eq!(params.refcount(id).unwrap(), slots, "row {:?}", id);
    }
}

/// Refcount check for every table of a single model.
pub fn assert_model_refcounts_exact(system: &MolecularSystem) {
    for table in system.tables_iter() {
        assert_refcounts_exact(table.params(), [table]);
    }
}
