use super::error::TableError;
use super::params::ParamTableRef;
use crate::core::models::atom::Atom;
use crate::core::models::ids::{AtomId, ParamId, TermId};
use crate::core::models::properties::{
    PropertySchema, Value, ValueType, compare_rows, extend_rows, shrink_rows,
};
use slotmap::SlotMap;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Category {
    #[default]
    None,
    Bond,
    Constraint,
    Virtual,
    Polar,
    Nonbonded,
    Exclusion,
}

#[derive(Debug, Error)]
#[error("Invalid term table category '{0}'")]
pub struct ParseCategoryError(pub String);

impl FromStr for Category {
    type Err = ParseCategoryError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Category::None),
            "bond" => Ok(Category::Bond),
            "constraint" => Ok(Category::Constraint),
            "virtual" => Ok(Category::Virtual),
            "polar" => Ok(Category::Polar),
            "nonbonded" => Ok(Category::Nonbonded),
            "exclusion" => Ok(Category::Exclusion),
            _ => Err(ParseCategoryError(s.to_string())),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Category::None => "none",
                Category::Bond => "bond",
                Category::Constraint => "constraint",
                Category::Virtual => "virtual",
                Category::Polar => "polar",
                Category::Nonbonded => "nonbonded",
                Category::Exclusion => "exclusion",
            }
        )
    }
}

/// Selects the primary (`A`) or alternate (`B`) param slot of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermState {
    A,
    B,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    atoms: Vec<AtomId>,
    param: Option<ParamId>,
    param_b: Option<ParamId>,
    props: Vec<Value>,
}

impl Term {
    pub fn atoms(&self) -> &[AtomId] {
        &self.atoms
    }

    pub fn param(&self) -> Option<ParamId> {
        self.param
    }

    pub fn param_b(&self) -> Option<ParamId> {
        self.param_b
    }

    pub fn props(&self) -> &[Value] {
        &self.props
    }

    fn slots(&self) -> impl Iterator<Item = ParamId> {
        self.param.into_iter().chain(self.param_b)
    }
}

/// A table of fixed-arity interaction terms belonging to one model.
///
/// Every term points at zero, one or two rows of the table's [`ParamTable`];
/// all pointer changes update the row refcounts under the same write lock.
/// Dropping the table releases every refcount it holds.
#[derive(Debug)]
pub struct TermTable {
    name: String,
    arity: usize,
    category: Category,
    params: ParamTableRef,
    term_props: PropertySchema,
    terms: SlotMap<TermId, Term>,
}

impl TermTable {
    pub(crate) fn new(name: &str, arity: usize, category: Category, params: ParamTableRef) -> Self {
        params.write().attach();
        Self {
            name: name.to_string(),
            arity,
            category,
            params,
            term_props: PropertySchema::new(),
            terms: SlotMap::with_key(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn params(&self) -> &ParamTableRef {
        &self.params
    }

    pub fn term_props(&self) -> &PropertySchema {
        &self.term_props
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn term_ids(&self) -> Vec<TermId> {
        self.terms.keys().collect()
    }

    pub fn terms_iter(&self) -> impl Iterator<Item = (TermId, &Term)> {
        self.terms.iter()
    }

    pub fn term(&self, id: TermId) -> Result<&Term, TableError> {
        self.terms.get(id).ok_or_else(|| self.not_found(id))
    }

    pub fn atoms(&self, id: TermId) -> Result<&[AtomId], TableError> {
        Ok(self.term(id)?.atoms())
    }

    pub fn param(&self, id: TermId) -> Result<Option<ParamId>, TableError> {
        Ok(self.term(id)?.param)
    }

    pub fn param_b(&self, id: TermId) -> Result<Option<ParamId>, TableError> {
        Ok(self.term(id)?.param_b)
    }

    /// Inserts a term over atoms the caller has already validated.
    pub(crate) fn insert_term(
        &mut self,
        atoms: Vec<AtomId>,
        param: Option<ParamId>,
    ) -> Result<TermId, TableError> {
        if atoms.len() != self.arity {
            return Err(TableError::ArityMismatch {
                table: self.name.clone(),
                expected: self.arity,
                found: atoms.len(),
            });
        }
        if let Some(p) = param {
            self.params.write().incref(p)?;
        }
        Ok(self.terms.insert(Term {
            atoms,
            param,
            param_b: None,
            props: self.term_props.defaults(),
        }))
    }

    /// Inserts a fully specified term copied from another table. `props` must
    /// already be in this table's term property order.
    pub(crate) fn import_term(
        &mut self,
        atoms: Vec<AtomId>,
        param: Option<ParamId>,
        param_b: Option<ParamId>,
        props: Vec<Value>,
    ) -> Result<TermId, TableError> {
        let id = self.insert_term(atoms, param)?;
        if param_b.is_some() {
            self.assign_param_b(id, param_b)?;
        }
        if let Some(term) = self.terms.get_mut(id) {
            term.props = props;
        }
        Ok(id)
    }

    /// Points the primary slot of `id` at `param`, moving one refcount from the
    /// old row to the new one.
    pub fn set_param(&mut self, id: TermId, param: Option<ParamId>) -> Result<(), TableError> {
        let old = self.term(id)?.param;
        self.swap_slot(old, param)?;
        if let Some(term) = self.terms.get_mut(id) {
            term.param = param;
        }
        Ok(())
    }

    /// Alternate-slot assignment without the alchemical-state check; callers
    /// go through [`TermTableMut::set_param_b`].
    pub(crate) fn assign_param_b(
        &mut self,
        id: TermId,
        param: Option<ParamId>,
    ) -> Result<(), TableError> {
        let old = self.term(id)?.param_b;
        self.swap_slot(old, param)?;
        if let Some(term) = self.terms.get_mut(id) {
            term.param_b = param;
        }
        Ok(())
    }

    fn swap_slot(&self, old: Option<ParamId>, new: Option<ParamId>) -> Result<(), TableError> {
        let mut params = self.params.write();
        if let Some(p) = new {
            params.incref(p)?;
        }
        if let Some(p) = old {
            params.decref(p);
        }
        Ok(())
    }

    pub fn del_term(&mut self, id: TermId) -> Result<(), TableError> {
        let term = self.terms.remove(id).ok_or_else(|| self.not_found(id))?;
        let mut params = self.params.write();
        for p in term.slots() {
            params.decref(p);
        }
        Ok(())
    }

    /// Removes every term mentioning `atom` and returns how many were removed.
    pub fn del_terms_with_atom(&mut self, atom: AtomId) -> usize {
        let doomed = self.find_with_any(&[atom]);
        let mut params = self.params.write();
        for id in &doomed {
            if let Some(term) = self.terms.remove(*id) {
                for p in term.slots() {
                    params.decref(p);
                }
            }
        }
        doomed.len()
    }

    /// Terms whose atom tuple equals `atoms`, in order.
    pub fn find_exact(&self, atoms: &[AtomId]) -> Vec<TermId> {
        self.terms
            .iter()
            .filter(|(_, t)| t.atoms == atoms)
            .map(|(id, _)| id)
            .collect()
    }

    /// Terms mentioning at least one of `atoms`.
    pub fn find_with_any(&self, atoms: &[AtomId]) -> Vec<TermId> {
        self.terms
            .iter()
            .filter(|(_, t)| t.atoms.iter().any(|a| atoms.contains(a)))
            .map(|(id, _)| id)
            .collect()
    }

    /// Repoints every slot of this table's terms that references a row with the
    /// same values as a lower-ordered row at that representative row. The
    /// abandoned rows stay allocated with their refcount reduced. Returns the
    /// number of slots rewritten.
    pub fn coalesce(&mut self) -> Result<usize, TableError> {
        let mut referenced: Vec<ParamId> = self.terms.values().flat_map(Term::slots).collect();
        referenced.sort();
        referenced.dedup();

        let mut params = self.params.write();
        let mut keyed = Vec::with_capacity(referenced.len());
        for id in referenced {
            keyed.push((params.values(id)?.to_vec(), id));
        }
        keyed.sort_by(|(lv, lid), (rv, rid)| compare_rows(lv, rv).then(lid.cmp(rid)));

        let mut representative: HashMap<ParamId, ParamId> = HashMap::new();
        let mut group: Option<(&[Value], ParamId)> = None;
        for (values, id) in &keyed {
            match group {
                Some((group_values, rep)) if compare_rows(group_values, values).is_eq() => {
                    representative.insert(*id, rep);
                }
                _ => group = Some((values.as_slice(), *id)),
            }
        }

        let mut rewritten = 0;
        for term in self.terms.values_mut() {
            for slot in [&mut term.param, &mut term.param_b] {
                if let Some(rep) = slot.and_then(|p| representative.get(&p).copied()) {
                    if let Some(old) = slot.replace(rep) {
                        params.decref(old);
                    }
                    params.incref(rep)?;
                    rewritten += 1;
                }
            }
        }
        Ok(rewritten)
    }

    /// Declares a term-level property. Fails with `SchemaCollision` if the
    /// param table already has a column of the same name.
    pub fn add_term_prop(&mut self, name: &str, ty: ValueType) -> Result<usize, TableError> {
        if self.params.read().schema().contains(name) {
            return Err(self.collision(name));
        }
        let (index, is_new) = self.term_props.add(name, ty)?;
        if is_new {
            extend_rows(self.terms.values_mut().map(|t| &mut t.props), ty);
        }
        Ok(index)
    }

    pub fn del_term_prop(&mut self, name: &str) -> Result<(), TableError> {
        let index = self.term_props.remove(name)?;
        shrink_rows(self.terms.values_mut().map(|t| &mut t.props), index);
        Ok(())
    }

    pub fn term_prop(&self, id: TermId, name: &str) -> Result<&Value, TableError> {
        let index = self.term_props.require(name)?;
        Ok(&self.term(id)?.props[index])
    }

    pub fn set_term_prop(
        &mut self,
        id: TermId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), TableError> {
        let index = self.term_props.require(name)?;
        let value = self.term_props.coerce(index, value.into())?;
        let table = self.name.clone();
        let term = self
            .terms
            .get_mut(id)
            .ok_or(TableError::TermNotFound { table, term: id })?;
        term.props[index] = value;
        Ok(())
    }

    /// Declares a param column through this table. Fails with `SchemaCollision`
    /// if a term-level property of the same name exists.
    pub fn add_param_prop(&mut self, name: &str, ty: ValueType) -> Result<usize, TableError> {
        if self.term_props.contains(name) {
            return Err(self.collision(name));
        }
        self.params.write().add_prop(name, ty)
    }

    /// Reads a param column of the row behind the chosen slot of `id`.
    pub fn prop(&self, id: TermId, name: &str, state: TermState) -> Result<Value, TableError> {
        let param = self.slot(id, state)?;
        Ok(self.params.read().prop(param, name)?.clone())
    }

    pub fn prop_f64(&self, id: TermId, name: &str, state: TermState) -> Result<f64, TableError> {
        let param = self.slot(id, state)?;
        self.params.read().prop_f64(param, name)
    }

    /// Writes a param column of the row behind the chosen slot of `id`. The row
    /// is shared, so every term pointing at it observes the change.
    pub fn set_prop(
        &mut self,
        id: TermId,
        name: &str,
        state: TermState,
        value: impl Into<Value>,
    ) -> Result<(), TableError> {
        let param = self.slot(id, state)?;
        self.params.write().set_prop(param, name, value)
    }

    fn slot(&self, id: TermId, state: TermState) -> Result<ParamId, TableError> {
        let term = self.term(id)?;
        match state {
            TermState::A => term.param.ok_or_else(|| TableError::MissingParam {
                table: self.name.clone(),
                term: id,
            }),
            TermState::B => term.param_b.ok_or_else(|| TableError::NoAlternateState {
                table: self.name.clone(),
                term: id,
            }),
        }
    }

    fn not_found(&self, id: TermId) -> TableError {
        TableError::TermNotFound {
            table: self.name.clone(),
            term: id,
        }
    }

    fn collision(&self, name: &str) -> TableError {
        TableError::SchemaCollision {
            table: self.name.clone(),
            name: name.to_string(),
        }
    }
}

impl Drop for TermTable {
    fn drop(&mut self) {
        let mut params = self.params.write();
        for term in self.terms.values() {
            for p in term.slots() {
                params.decref(p);
            }
        }
        params.detach();
    }
}

/// Mutable view of a [`TermTable`] paired with the atoms of its owning model,
/// so that new terms and alternate-state assignments can be validated.
pub struct TermTableMut<'a> {
    table: &'a mut TermTable,
    atoms: &'a BTreeMap<AtomId, Atom>,
}

impl<'a> TermTableMut<'a> {
    pub(crate) fn new(table: &'a mut TermTable, atoms: &'a BTreeMap<AtomId, Atom>) -> Self {
        Self { table, atoms }
    }

    /// Adds a term over `atoms`, incrementing the refcount of `param`.
    pub fn add_term(
        &mut self,
        atoms: &[AtomId],
        param: Option<ParamId>,
    ) -> Result<TermId, TableError> {
        if atoms.len() != self.table.arity {
            return Err(TableError::ArityMismatch {
                table: self.table.name.clone(),
                expected: self.table.arity,
                found: atoms.len(),
            });
        }
        if let Some(&atom) = atoms.iter().find(|a| !self.atoms.contains_key(*a)) {
            return Err(TableError::ForeignAtom {
                table: self.table.name.clone(),
                atom,
            });
        }
        self.table.insert_term(atoms.to_vec(), param)
    }

    /// Points the alternate slot of `id` at `param`. A term touching an
    /// alchemical atom must already have a primary param.
    pub fn set_param_b(&mut self, id: TermId, param: Option<ParamId>) -> Result<(), TableError> {
        let term = self.table.term(id)?;
        let alchemical = term
            .atoms
            .iter()
            .any(|a| self.atoms.get(a).is_some_and(|atom| atom.alchemical));
        if param.is_some() && term.param.is_none() && alchemical {
            return Err(TableError::InvalidAlchemicalState {
                table: self.table.name.clone(),
                term: id,
            });
        }
        self.table.assign_param_b(id, param)
    }
}

impl Deref for TermTableMut<'_> {
    type Target = TermTable;

    fn deref(&self) -> &Self::Target {
        self.table
    }
}

impl DerefMut for TermTableMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.table
    }
}
