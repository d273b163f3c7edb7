use super::error::TableError;
use crate::core::models::ids::ParamId;
use crate::core::models::properties::{
    PropertyError, PropertySchema, Value, ValueType, compare_rows, extend_rows, shrink_rows,
};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use slotmap::SlotMap;
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
struct ParamRow {
    values: Vec<Value>,
    refcount: usize,
}

/// Schema-typed store of parameter rows, each carrying the number of term slots
/// (primary or alternate, across every attached [`TermTable`](super::term_table::TermTable))
/// that currently point at it.
///
/// Rows are never removed implicitly when their count drops to zero; they stay
/// addressable until [`purge_unreferenced`](Self::purge_unreferenced) runs.
#[derive(Debug, Default)]
pub struct ParamTable {
    schema: PropertySchema,
    rows: SlotMap<ParamId, ParamRow>,
    owners: usize,
}

impl ParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty table with the same columns as `self`.
    pub fn empty_like(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            ..Self::default()
        }
    }

    pub fn schema(&self) -> &PropertySchema {
        &self.schema
    }

    pub fn param_count(&self) -> usize {
        self.rows.len()
    }

    pub fn param_ids(&self) -> Vec<ParamId> {
        self.rows.keys().collect()
    }

    pub fn contains(&self, id: ParamId) -> bool {
        self.rows.contains_key(id)
    }

    /// Appends a row filled with column defaults and a refcount of zero.
    pub fn add_param(&mut self) -> ParamId {
        self.rows.insert(ParamRow {
            values: self.schema.defaults(),
            refcount: 0,
        })
    }

    /// Appends a copy of row `id`'s values with a refcount of zero.
    pub fn duplicate_param(&mut self, id: ParamId) -> Result<ParamId, TableError> {
        let values = self.row(id)?.values.clone();
        Ok(self.rows.insert(ParamRow {
            values,
            refcount: 0,
        }))
    }

    /// Declares a column, filling existing rows with its default. Returns the
    /// column index; redeclaring a column with the same type is a no-op.
    pub fn add_prop(&mut self, name: &str, ty: ValueType) -> Result<usize, TableError> {
        let (index, is_new) = self.schema.add(name, ty)?;
        if is_new {
            extend_rows(self.rows.values_mut().map(|r| &mut r.values), ty);
        }
        Ok(index)
    }

    pub fn del_prop(&mut self, name: &str) -> Result<(), TableError> {
        let index = self.schema.remove(name)?;
        shrink_rows(self.rows.values_mut().map(|r| &mut r.values), index);
        Ok(())
    }

    pub fn values(&self, id: ParamId) -> Result<&[Value], TableError> {
        Ok(&self.row(id)?.values)
    }

    pub fn prop(&self, id: ParamId, name: &str) -> Result<&Value, TableError> {
        let index = self.schema.require(name)?;
        Ok(&self.row(id)?.values[index])
    }

    /// Numeric value of a column, with integers widened.
    pub fn prop_f64(&self, id: ParamId, name: &str) -> Result<f64, TableError> {
        let value = self.prop(id, name)?;
        value.as_f64().ok_or_else(|| {
            TableError::Property(PropertyError::TypeMismatch {
                name: name.to_string(),
                expected: ValueType::Float,
                found: value.value_type(),
            })
        })
    }

    pub fn set_prop(
        &mut self,
        id: ParamId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), TableError> {
        let index = self.schema.require(name)?;
        let value = self.schema.coerce(index, value.into())?;
        self.row_mut(id)?.values[index] = value;
        Ok(())
    }

    /// Resets every column of row `id` to its default, except `keeper`.
    pub fn zero_except(&mut self, id: ParamId, keeper: Option<&str>) -> Result<(), TableError> {
        let defaults = self.schema.defaults();
        let keep = keeper.and_then(|k| self.schema.index_of(k));
        let row = self.row_mut(id)?;
        for (index, default) in defaults.into_iter().enumerate() {
            if Some(index) != keep {
                row.values[index] = default;
            }
        }
        Ok(())
    }

    pub fn refcount(&self, id: ParamId) -> Result<usize, TableError> {
        Ok(self.row(id)?.refcount)
    }

    pub(crate) fn incref(&mut self, id: ParamId) -> Result<(), TableError> {
        self.row_mut(id)?.refcount += 1;
        Ok(())
    }

    pub(crate) fn decref(&mut self, id: ParamId) {
        if let Some(row) = self.rows.get_mut(id) {
            row.refcount = row.refcount.saturating_sub(1);
        }
    }

    /// Lexicographic column-by-column ordering of two rows.
    pub fn compare(&self, l: ParamId, r: ParamId) -> Result<Ordering, TableError> {
        Ok(compare_rows(&self.row(l)?.values, &self.row(r)?.values))
    }

    /// Deletes every row whose refcount is zero. Ids of surviving rows stay valid.
    pub fn purge_unreferenced(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|_, row| row.refcount > 0);
        before - self.rows.len()
    }

    /// Appends a row to `self` whose columns are copied by name from row `id`
    /// of `src`; columns missing from `src` keep their defaults.
    pub fn copy_row_from(&mut self, src: &ParamTable, id: ParamId) -> Result<ParamId, TableError> {
        let src_values = &src.row(id)?.values;
        let mut values = self.schema.defaults();
        for (dst_index, column) in self.schema.columns().iter().enumerate() {
            if let Some(src_index) = src.schema.index_of(&column.name) {
                values[dst_index] = self.schema.coerce(dst_index, src_values[src_index].clone())?;
            }
        }
        Ok(self.rows.insert(ParamRow {
            values,
            refcount: 0,
        }))
    }

    /// Number of term tables currently attached to this table.
    pub fn owners(&self) -> usize {
        self.owners
    }

    /// True while more than one term table is attached.
    pub fn is_shared(&self) -> bool {
        self.owners > 1
    }

    pub(crate) fn attach(&mut self) {
        self.owners += 1;
    }

    pub(crate) fn detach(&mut self) {
        self.owners = self.owners.saturating_sub(1);
    }

    fn row(&self, id: ParamId) -> Result<&ParamRow, TableError> {
        self.rows.get(id).ok_or(TableError::ParamNotFound(id))
    }

    fn row_mut(&mut self, id: ParamId) -> Result<&mut ParamRow, TableError> {
        self.rows.get_mut(id).ok_or(TableError::ParamNotFound(id))
    }
}

/// Shared handle to a [`ParamTable`]. Cloning the handle aliases the rows.
#[derive(Debug, Clone, Default)]
pub struct ParamTableRef(Arc<RwLock<ParamTable>>);

impl ParamTableRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(table: ParamTable) -> Self {
        Self(Arc::new(RwLock::new(table)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ParamTable> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ParamTable> {
        self.0.write()
    }

    /// Whether both handles alias the same table.
    pub fn ptr_eq(&self, other: &ParamTableRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Copies row `src_id` of `src` into `dst`. When both handles alias the same
/// table the row is duplicated in place.
pub fn copy_param(
    dst: &ParamTableRef,
    src: &ParamTableRef,
    src_id: ParamId,
) -> Result<ParamId, TableError> {
    if dst.ptr_eq(src) {
        return dst.write().duplicate_param(src_id);
    }
    let src = src.read();
    dst.write().copy_row_from(&src, src_id)
}
