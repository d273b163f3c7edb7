use super::atom::Atom;
use super::chain::Chain;
use super::ids::{AtomId, ChainId, ParamId, ResidueId};
use super::properties::{
    PropertyError, PropertySchema, Value, ValueType, extend_rows, remap_row, shrink_rows,
};
use super::residue::Residue;
use super::topology::{Bond, BondOrder};
use crate::core::forcefield::error::TableError;
use crate::core::forcefield::nonbonded::NonbondedInfo;
use crate::core::forcefield::params::ParamTableRef;
use crate::core::forcefield::schema::{self, TableSchema};
use crate::core::forcefield::term_table::{Category, TermTable, TermTableMut};
use slotmap::SlotMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Atom {0:?} does not exist in this model")]
    AtomNotFound(AtomId),
    #[error("Residue {0:?} does not exist in this model")]
    ResidueNotFound(ResidueId),
    #[error("Chain {0:?} does not exist in this model")]
    ChainNotFound(ChainId),
    #[error("Atom {0:?} appears more than once in the selection")]
    DuplicateAtom(AtomId),
    #[error("Atom {0:?} cannot be bonded to itself")]
    SelfBond(AtomId),
    #[error("Bond between {0:?} and {1:?} does not exist")]
    BondNotFound(AtomId, AtomId),
    #[error("Table '{0}' does not exist")]
    TableNotFound(String),
    #[error("Table '{0}' already exists")]
    TableExists(String),
    #[error("No schema named '{0}'")]
    UnknownSchema(String),
    #[error("Property error: {0}")]
    Property(#[from] PropertyError),
    #[error("Table error: {0}")]
    Table(#[from] TableError),
}

/// An in-memory molecular model: atoms, bonds, residues, chains, term tables
/// and auxiliary parameter tables.
///
/// Atoms iterate in insertion order; an atom added after a removal comes
/// last. Positional indices used by the merge engine refer to this order.
/// Atom ids are never shared between models.
#[derive(Debug, Default)]
pub struct MolecularSystem {
    /// Atoms keyed by process-unique id, which keeps them in insertion order.
    atoms: BTreeMap<AtomId, Atom>,
    /// Primary storage for residues using a slot map for efficient ID management.
    residues: SlotMap<ResidueId, Residue>,
    /// Primary storage for chains using a slot map for efficient ID management.
    chains: SlotMap<ChainId, Chain>,
    /// List of all bonds in the system.
    bonds: Vec<Bond>,
    /// Lookup map for residues by chain, residue number and residue name.
    residue_id_map: HashMap<(ChainId, isize, String), ResidueId>,
    /// Lookup map for chains by name.
    chain_id_map: HashMap<String, ChainId>,
    /// Cached adjacency list for bond connectivity, indexed by atom ID.
    bond_adjacency: HashMap<AtomId, Vec<AtomId>>,
    /// Extra per-atom property columns.
    atom_props: PropertySchema,
    /// Extra per-bond property columns.
    bond_props: PropertySchema,
    /// Term tables by name.
    tables: BTreeMap<String, TermTable>,
    /// Parameter tables not attached to any term table.
    aux_tables: BTreeMap<String, ParamTableRef>,
    /// Declared nonbonded functional forms.
    nonbonded_info: Option<NonbondedInfo>,
}

impl MolecularSystem {
    /// Creates a new, empty molecular system.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn atom(&self, id: AtomId) -> Option<&Atom> {
        self.atoms.get(&id)
    }

    pub fn atom_mut(&mut self, id: AtomId) -> Option<&mut Atom> {
        self.atoms.get_mut(&id)
    }

    /// Returns an iterator over all atoms in the system, in model order.
    pub fn atoms_iter(&self) -> impl Iterator<Item = (AtomId, &Atom)> {
        self.atoms.iter().map(|(id, atom)| (*id, atom))
    }

    pub fn atoms_iter_mut(&mut self) -> impl Iterator<Item = (AtomId, &mut Atom)> {
        self.atoms.iter_mut().map(|(id, atom)| (*id, atom))
    }

    /// Atom ids in model order; the index of an id in this list is its
    /// positional index.
    pub fn atom_ids(&self) -> Vec<AtomId> {
        self.atoms.keys().copied().collect()
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    pub fn contains_atom(&self, id: AtomId) -> bool {
        self.atoms.contains_key(&id)
    }

    pub fn residue(&self, id: ResidueId) -> Option<&Residue> {
        self.residues.get(id)
    }

    pub fn residues_iter(&self) -> impl Iterator<Item = (ResidueId, &Residue)> {
        self.residues.iter()
    }

    pub fn chain(&self, id: ChainId) -> Option<&Chain> {
        self.chains.get(id)
    }

    pub fn chains_iter(&self) -> impl Iterator<Item = (ChainId, &Chain)> {
        self.chains.iter()
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    /// Finds a chain ID by its name.
    pub fn find_chain(&self, name: &str) -> Option<ChainId> {
        self.chain_id_map.get(name).copied()
    }

    /// Finds a residue by its chain, name and number.
    pub fn find_residue(&self, chain_id: ChainId, name: &str, number: isize) -> Option<ResidueId> {
        self.residue_id_map
            .get(&(chain_id, number, name.to_string()))
            .copied()
    }

    /// Adds a new chain to the system or returns the existing one.
    ///
    /// This method is idempotent; if a chain with the given name already exists,
    /// it returns the existing chain ID without creating a duplicate.
    pub fn add_chain(&mut self, name: &str) -> ChainId {
        if let Some(id) = self.chain_id_map.get(name) {
            return *id;
        }
        let id = self.chains.insert(Chain::new(name));
        self.chain_id_map.insert(name.to_string(), id);
        id
    }

    /// Adds a new residue to a chain or returns the existing one.
    ///
    /// This method is idempotent on (chain, number, name).
    ///
    /// # Return
    ///
    /// Returns `Some(ResidueId)` if successful, otherwise `None` (the chain doesn't exist).
    pub fn add_residue(&mut self, chain_id: ChainId, number: isize, name: &str) -> Option<ResidueId> {
        let chain = self.chains.get_mut(chain_id)?;
        let key = (chain_id, number, name.to_string());

        let residue_id = *self
            .residue_id_map
            .entry(key)
            .or_insert_with(|| self.residues.insert(Residue::new(number, name, chain_id)));

        if !chain.residues.contains(&residue_id) {
            chain.residues.push(residue_id);
        }

        Some(residue_id)
    }

    /// Adds an atom to a specific residue.
    ///
    /// The atom's extra properties are reset to the system's column defaults
    /// unless they already match the schema width.
    ///
    /// # Return
    ///
    /// Returns `Some(AtomId)` if successful, otherwise `None` (the residue doesn't exist).
    pub fn add_atom_to_residue(&mut self, residue_id: ResidueId, mut atom: Atom) -> Option<AtomId> {
        let residue = self.residues.get_mut(residue_id)?;
        atom.residue_id = residue_id;
        if atom.props.len() != self.atom_props.len() {
            atom.props = self.atom_props.defaults();
        }
        let atom_id = AtomId::next();
        self.atoms.insert(atom_id, atom);
        residue.add_atom(atom_id);
        self.bond_adjacency.insert(atom_id, Vec::new());
        Some(atom_id)
    }

    /// Adds a bond between two atoms.
    ///
    /// This method is idempotent; adding an existing bond succeeds without
    /// creating duplicates.
    ///
    /// # Return
    ///
    /// Returns `Some(())` if successful, otherwise `None` (missing atoms or a self bond).
    pub fn add_bond(&mut self, atom1_id: AtomId, atom2_id: AtomId, order: BondOrder) -> Option<()> {
        if atom1_id == atom2_id
            || !self.atoms.contains_key(&atom1_id)
            || !self.atoms.contains_key(&atom2_id)
        {
            return None;
        }

        if self
            .bond_adjacency
            .get(&atom1_id)
            .is_some_and(|neighbors| neighbors.contains(&atom2_id))
        {
            return Some(());
        }

        let mut bond = Bond::new(atom1_id, atom2_id, order);
        bond.props = self.bond_props.defaults();
        self.bonds.push(bond);
        self.bond_adjacency.entry(atom1_id).or_default().push(atom2_id);
        self.bond_adjacency.entry(atom2_id).or_default().push(atom1_id);
        Some(())
    }

    pub fn bond_between(&self, atom1_id: AtomId, atom2_id: AtomId) -> Option<&Bond> {
        self.bonds.iter().find(|b| b.connects(atom1_id, atom2_id))
    }

    /// Retrieves the bonded neighbors of an atom.
    pub fn get_bonded_neighbors(&self, atom_id: AtomId) -> Option<&[AtomId]> {
        self.bond_adjacency.get(&atom_id).map(|v| v.as_slice())
    }

    /// Removes an atom from the system.
    ///
    /// Bonds to the atom and every term mentioning it are removed as well,
    /// releasing the terms' param refcounts.
    ///
    /// # Return
    ///
    /// Returns `Some(Atom)` if the atom existed and was removed, otherwise `None`.
    pub fn remove_atom(&mut self, atom_id: AtomId) -> Option<Atom> {
        let atom = self.atoms.remove(&atom_id)?;

        if let Some(residue) = self.residues.get_mut(atom.residue_id) {
            residue.remove_atom(atom_id);
        }

        self.bonds.retain(|bond| !bond.contains(atom_id));

        let neighbors = self.bond_adjacency.remove(&atom_id).unwrap_or_default();
        for neighbor_id in neighbors {
            if let Some(adjacency) = self.bond_adjacency.get_mut(&neighbor_id) {
                adjacency.retain(|&id| id != atom_id);
            }
        }

        for table in self.tables.values_mut() {
            table.del_terms_with_atom(atom_id);
        }

        Some(atom)
    }

    /// Writes `gid` = positional index on every atom.
    pub fn reassign_gids(&mut self) {
        for (index, atom) in self.atoms.values_mut().enumerate() {
            atom.gid = index;
        }
    }

    // --- Extra atom and bond properties ---

    pub fn atom_props(&self) -> &PropertySchema {
        &self.atom_props
    }

    /// Declares an atom property column; idempotent for the same type.
    pub fn add_atom_prop(&mut self, name: &str, ty: ValueType) -> Result<usize, ModelError> {
        let (index, is_new) = self.atom_props.add(name, ty)?;
        if is_new {
            extend_rows(self.atoms.values_mut().map(|a| &mut a.props), ty);
        }
        Ok(index)
    }

    pub fn del_atom_prop(&mut self, name: &str) -> Result<(), ModelError> {
        let index = self.atom_props.remove(name)?;
        shrink_rows(self.atoms.values_mut().map(|a| &mut a.props), index);
        Ok(())
    }

    pub fn atom_prop(&self, id: AtomId, name: &str) -> Result<&Value, ModelError> {
        let index = self.atom_props.require(name)?;
        let atom = self.atoms.get(&id).ok_or(ModelError::AtomNotFound(id))?;
        Ok(&atom.props[index])
    }

    pub fn set_atom_prop(
        &mut self,
        id: AtomId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), ModelError> {
        let index = self.atom_props.require(name)?;
        let value = self.atom_props.coerce(index, value.into())?;
        let atom = self.atoms.get_mut(&id).ok_or(ModelError::AtomNotFound(id))?;
        atom.props[index] = value;
        Ok(())
    }

    pub fn bond_props(&self) -> &PropertySchema {
        &self.bond_props
    }

    pub fn add_bond_prop(&mut self, name: &str, ty: ValueType) -> Result<usize, ModelError> {
        let (index, is_new) = self.bond_props.add(name, ty)?;
        if is_new {
            extend_rows(self.bonds.iter_mut().map(|b| &mut b.props), ty);
        }
        Ok(index)
    }

    pub fn bond_prop(&self, atom1_id: AtomId, atom2_id: AtomId, name: &str) -> Result<&Value, ModelError> {
        let index = self.bond_props.require(name)?;
        let bond = self
            .bond_between(atom1_id, atom2_id)
            .ok_or(ModelError::BondNotFound(atom1_id, atom2_id))?;
        Ok(&bond.props[index])
    }

    pub fn set_bond_prop(
        &mut self,
        atom1_id: AtomId,
        atom2_id: AtomId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), ModelError> {
        let index = self.bond_props.require(name)?;
        let value = self.bond_props.coerce(index, value.into())?;
        let bond = self
            .bonds
            .iter_mut()
            .find(|b| b.connects(atom1_id, atom2_id))
            .ok_or(ModelError::BondNotFound(atom1_id, atom2_id))?;
        bond.props[index] = value;
        Ok(())
    }

    // --- Term tables ---

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn tables_iter(&self) -> impl Iterator<Item = &TermTable> {
        self.tables.values()
    }

    pub fn table(&self, name: &str) -> Option<&TermTable> {
        self.tables.get(name)
    }

    /// Mutable access to a table, paired with this model's atoms so new terms
    /// can be validated.
    pub fn table_mut(&mut self, name: &str) -> Result<TermTableMut<'_>, ModelError> {
        let table = self
            .tables
            .get_mut(name)
            .ok_or_else(|| ModelError::TableNotFound(name.to_string()))?;
        Ok(TermTableMut::new(table, &self.atoms))
    }

    /// Creates an empty term table. When `params` is `None` the table gets a
    /// fresh, unshared param table; otherwise it aliases the given one.
    pub fn add_table(
        &mut self,
        name: &str,
        arity: usize,
        category: Category,
        params: Option<ParamTableRef>,
    ) -> Result<TermTableMut<'_>, ModelError> {
        if self.tables.contains_key(name) {
            return Err(ModelError::TableExists(name.to_string()));
        }
        let table = TermTable::new(name, arity, category, params.unwrap_or_default());
        self.tables.insert(name.to_string(), table);
        self.table_mut(name)
    }

    /// Creates the table described by `schema`, or returns the existing table
    /// of that name after declaring any missing columns on it.
    pub fn add_table_with_schema(
        &mut self,
        schema: &TableSchema,
    ) -> Result<TermTableMut<'_>, ModelError> {
        match self.tables.get(&schema.name).map(TermTable::arity) {
            Some(arity) if arity != schema.arity => {
                return Err(TableError::ArityMismatch {
                    table: schema.name.clone(),
                    expected: arity,
                    found: schema.arity,
                }
                .into());
            }
            Some(_) => {}
            None => {
                self.add_table(&schema.name, schema.arity, schema.category, None)?;
            }
        }
        let mut table = self.table_mut(&schema.name)?;
        for (name, ty) in &schema.params {
            table.add_param_prop(name, *ty)?;
        }
        for (name, ty) in &schema.term_props {
            table.add_term_prop(name, *ty)?;
        }
        Ok(table)
    }

    /// Creates (or returns) a table from a built-in schema by name.
    pub fn add_table_from_schema(&mut self, name: &str) -> Result<TermTableMut<'_>, ModelError> {
        let schema = schema::builtin(name).ok_or_else(|| ModelError::UnknownSchema(name.to_string()))?;
        self.add_table_with_schema(&schema)
    }

    /// Creates (or returns) the `nonbonded` table for `vdw_funct` and records
    /// the declared function and combining rule.
    pub fn add_nonbonded_from_schema(
        &mut self,
        vdw_funct: &str,
        vdw_rule: &str,
    ) -> Result<TermTableMut<'_>, ModelError> {
        let schema = schema::nonbonded(vdw_funct)
            .ok_or_else(|| ModelError::UnknownSchema(vdw_funct.to_string()))?;
        let es_funct = self
            .nonbonded_info
            .as_ref()
            .map(|info| info.es_funct.clone())
            .unwrap_or_default();
        self.nonbonded_info = Some(NonbondedInfo {
            vdw_funct: vdw_funct.to_string(),
            vdw_rule: vdw_rule.to_string(),
            es_funct,
        });
        self.add_table_with_schema(&schema)
    }

    /// Removes a table, releasing all refcounts it holds.
    pub fn del_table(&mut self, name: &str) -> Result<(), ModelError> {
        self.tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ModelError::TableNotFound(name.to_string()))
    }

    pub fn nonbonded_info(&self) -> Option<&NonbondedInfo> {
        self.nonbonded_info.as_ref()
    }

    pub fn set_nonbonded_info(&mut self, info: NonbondedInfo) {
        self.nonbonded_info = Some(info);
    }

    // --- Auxiliary param tables ---

    pub fn add_aux_table(&mut self, name: &str, table: ParamTableRef) -> Result<(), ModelError> {
        if self.aux_tables.contains_key(name) {
            return Err(ModelError::TableExists(name.to_string()));
        }
        self.aux_tables.insert(name.to_string(), table);
        Ok(())
    }

    pub fn aux_table(&self, name: &str) -> Option<&ParamTableRef> {
        self.aux_tables.get(name)
    }

    pub fn aux_table_names(&self) -> impl Iterator<Item = &str> {
        self.aux_tables.keys().map(String::as_str)
    }

    pub fn del_aux_table(&mut self, name: &str) -> Option<ParamTableRef> {
        self.aux_tables.remove(name)
    }

    // --- Cloning and appending ---

    /// Clones the given atoms, in the given order, into a new model.
    ///
    /// Bonds and terms whose atoms are all selected come along. Param tables
    /// shared by several term tables stay aliased; unshared ones are copied,
    /// keeping only rows the cloned terms use. Auxiliary tables are aliased.
    ///
    /// # Errors
    ///
    /// Returns `AtomNotFound` for dead ids and `DuplicateAtom` for repeats.
    pub fn clone_subset(&self, atoms: &[AtomId]) -> Result<MolecularSystem, ModelError> {
        let mut seen = HashSet::with_capacity(atoms.len());
        for &id in atoms {
            if !self.atoms.contains_key(&id) {
                return Err(ModelError::AtomNotFound(id));
            }
            if !seen.insert(id) {
                return Err(ModelError::DuplicateAtom(id));
            }
        }

        let mut clone = MolecularSystem::new();
        clone.atom_props = self.atom_props.clone();
        clone.bond_props = self.bond_props.clone();
        clone.nonbonded_info = self.nonbonded_info.clone();
        clone.aux_tables = self.aux_tables.clone();

        let id_map = clone.import_atoms(self, atoms)?;
        clone.import_bonds(self, &id_map)?;
        for table in self.tables.values() {
            clone.import_table(table, &id_map)?;
        }
        Ok(clone)
    }

    /// Clones every atom of the model.
    pub fn try_clone(&self) -> Result<MolecularSystem, ModelError> {
        self.clone_subset(&self.atom_ids())
    }

    /// Appends all of `other` to this model and returns the new ids of its
    /// atoms, in `other`'s order.
    ///
    /// Chains and residues are matched by identity (chain name, residue name
    /// and number). Tables are matched by name, with missing param and term
    /// columns declared on the destination as needed.
    pub fn append(&mut self, other: &MolecularSystem) -> Result<Vec<AtomId>, ModelError> {
        for column in other.atom_props.columns() {
            self.add_atom_prop(&column.name, column.ty)?;
        }
        for column in other.bond_props.columns() {
            self.add_bond_prop(&column.name, column.ty)?;
        }

        let order = other.atom_ids();
        let id_map = self.import_atoms(other, &order)?;
        self.import_bonds(other, &id_map)?;
        for table in other.tables.values() {
            self.import_table(table, &id_map)?;
        }
        for (name, aux) in &other.aux_tables {
            self.aux_tables
                .entry(name.clone())
                .or_insert_with(|| aux.clone());
        }
        if self.nonbonded_info.is_none() {
            self.nonbonded_info = other.nonbonded_info.clone();
        }

        Ok(order.iter().filter_map(|id| id_map.get(id).copied()).collect())
    }

    fn import_atoms(
        &mut self,
        src: &MolecularSystem,
        atoms: &[AtomId],
    ) -> Result<HashMap<AtomId, AtomId>, ModelError> {
        let mut id_map = HashMap::with_capacity(atoms.len());
        for &src_id in atoms {
            let atom = src.atoms.get(&src_id).ok_or(ModelError::AtomNotFound(src_id))?;
            let residue = src
                .residues
                .get(atom.residue_id)
                .ok_or(ModelError::ResidueNotFound(atom.residue_id))?;
            let chain = src
                .chains
                .get(residue.chain_id)
                .ok_or(ModelError::ChainNotFound(residue.chain_id))?;

            let chain_id = self.add_chain(&chain.name);
            let residue_id = self
                .add_residue(chain_id, residue.number, &residue.name)
                .ok_or(ModelError::ChainNotFound(chain_id))?;

            let mut copy = atom.clone();
            copy.props = remap_row(&src.atom_props, &atom.props, &self.atom_props)?;
            let new_id = self
                .add_atom_to_residue(residue_id, copy)
                .ok_or(ModelError::ResidueNotFound(residue_id))?;
            id_map.insert(src_id, new_id);
        }
        Ok(id_map)
    }

    fn import_bonds(
        &mut self,
        src: &MolecularSystem,
        id_map: &HashMap<AtomId, AtomId>,
    ) -> Result<(), ModelError> {
        for bond in &src.bonds {
            let (Some(&a1), Some(&a2)) = (id_map.get(&bond.atom1_id), id_map.get(&bond.atom2_id))
            else {
                continue;
            };
            if self.bond_between(a1, a2).is_some() {
                continue;
            }
            self.add_bond(a1, a2, bond.order)
                .ok_or(ModelError::AtomNotFound(a1))?;
            let props = remap_row(&src.bond_props, &bond.props, &self.bond_props)?;
            if let Some(new_bond) = self.bonds.last_mut() {
                new_bond.props = props;
            }
        }
        Ok(())
    }

    fn import_table(
        &mut self,
        src: &TermTable,
        id_map: &HashMap<AtomId, AtomId>,
    ) -> Result<(), ModelError> {
        let name = src.name();
        if !self.tables.contains_key(name) {
            let params = if src.params().read().is_shared() {
                src.params().clone()
            } else {
                ParamTableRef::from_table(src.params().read().empty_like())
            };
            self.add_table(name, src.arity(), src.category(), Some(params))?;
        }

        let mut dst = self.table_mut(name)?;
        if dst.arity() != src.arity() {
            return Err(TableError::ArityMismatch {
                table: name.to_string(),
                expected: dst.arity(),
                found: src.arity(),
            }
            .into());
        }
        for column in src.term_props().columns() {
            dst.add_term_prop(&column.name, column.ty)?;
        }

        let aliased = dst.params().ptr_eq(src.params());
        if !aliased {
            let columns = src.params().read().schema().columns().to_vec();
            for column in columns {
                dst.add_param_prop(&column.name, column.ty)?;
            }
        }

        let mut param_map: HashMap<ParamId, ParamId> = HashMap::new();
        let mut translate = |dst: &TermTable, p: Option<ParamId>| -> Result<Option<ParamId>, TableError> {
            let Some(p) = p else { return Ok(None) };
            if aliased {
                return Ok(Some(p));
            }
            if let Some(mapped) = param_map.get(&p) {
                return Ok(Some(*mapped));
            }
            let mapped = {
                let src_params = src.params().read();
                dst.params().write().copy_row_from(&src_params, p)?
            };
            param_map.insert(p, mapped);
            Ok(Some(mapped))
        };

        for (_, term) in src.terms_iter() {
            let atoms: Option<Vec<AtomId>> = term.atoms().iter().map(|a| id_map.get(a).copied()).collect();
            let Some(atoms) = atoms else { continue };
            let param = translate(&*dst, term.param())?;
            let param_b = translate(&*dst, term.param_b())?;
            let props = remap_row(src.term_props(), term.props(), dst.term_props())?;
            dst.import_term(atoms, param, param_b, props)?;
        }
        Ok(())
    }
}
