use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The storage type of a dynamically declared property column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Float,
    Int,
    Str,
}

impl FromStr for ValueType {
    type Err = PropertyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float" | "f64" | "real" => Ok(ValueType::Float),
            "int" | "i64" | "integer" => Ok(ValueType::Int),
            "str" | "string" | "text" => Ok(ValueType::Str),
            _ => Err(PropertyError::UnknownType(s.to_string())),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ValueType::Float => "float",
                ValueType::Int => "int",
                ValueType::Str => "str",
            }
        )
    }
}

/// A single typed cell of a property column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Str(String),
}

impl Value {
    pub fn default_for(ty: ValueType) -> Self {
        match ty {
            ValueType::Float => Value::Float(0.0),
            ValueType::Int => Value::Int(0),
            ValueType::Str => Value::Str(String::new()),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Float(_) => ValueType::Float,
            Value::Int(_) => ValueType::Int,
            Value::Str(_) => ValueType::Str,
        }
    }

    /// Numeric view of the value; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Str(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Total order used for row comparison and coalescing. Floats use IEEE
    /// total ordering so that NaN rows still group deterministically.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (a, b) => type_rank(a.value_type()).cmp(&type_rank(b.value_type())),
        }
    }
}

fn type_rank(ty: ValueType) -> u8 {
    match ty {
        ValueType::Float => 0,
        ValueType::Int => 1,
        ValueType::Str => 2,
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PropertyError {
    #[error("Unknown property '{name}'")]
    UnknownProperty { name: String },
    #[error("Property '{name}' holds {expected} values, got {found}")]
    TypeMismatch {
        name: String,
        expected: ValueType,
        found: ValueType,
    },
    #[error("Property '{name}' already exists with type {existing}, cannot redeclare as {requested}")]
    TypeConflict {
        name: String,
        existing: ValueType,
        requested: ValueType,
    },
    #[error("Unknown property type '{0}'")]
    UnknownType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyColumn {
    pub name: String,
    pub ty: ValueType,
}

/// Name → (type, column index) directory shared by every row of one store.
///
/// Rows themselves are plain `Vec<Value>` kept in column order by their owner;
/// the schema hands out defaults and validates values on write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySchema {
    columns: Vec<PropertyColumn>,
}

impl PropertySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[PropertyColumn] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn require(&self, name: &str) -> Result<usize, PropertyError> {
        self.index_of(name)
            .ok_or_else(|| PropertyError::UnknownProperty {
                name: name.to_string(),
            })
    }

    pub fn column(&self, index: usize) -> Option<&PropertyColumn> {
        self.columns.get(index)
    }

    /// Declares a column and returns its index. Redeclaring with the same type
    /// is a no-op; the caller must extend existing rows when `is_new` is true.
    pub fn add(&mut self, name: &str, ty: ValueType) -> Result<(usize, bool), PropertyError> {
        if let Some(index) = self.index_of(name) {
            let existing = self.columns[index].ty;
            if existing != ty {
                return Err(PropertyError::TypeConflict {
                    name: name.to_string(),
                    existing,
                    requested: ty,
                });
            }
            return Ok((index, false));
        }
        self.columns.push(PropertyColumn {
            name: name.to_string(),
            ty,
        });
        Ok((self.columns.len() - 1, true))
    }

    /// Removes a column, returning the index rows must drop.
    pub fn remove(&mut self, name: &str) -> Result<usize, PropertyError> {
        let index = self.require(name)?;
        self.columns.remove(index);
        Ok(index)
    }

    pub fn defaults(&self) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| Value::default_for(c.ty))
            .collect()
    }

    /// Validates `value` for column `index`, widening ints into float columns.
    pub fn coerce(&self, index: usize, value: Value) -> Result<Value, PropertyError> {
        let column = self
            .columns
            .get(index)
            .ok_or_else(|| PropertyError::UnknownProperty {
                name: format!("#{}", index),
            })?;
        match (column.ty, value) {
            (ValueType::Float, Value::Int(v)) => Ok(Value::Float(v as f64)),
            (ty, value) if value.value_type() == ty => Ok(value),
            (ty, value) => Err(PropertyError::TypeMismatch {
                name: column.name.clone(),
                expected: ty,
                found: value.value_type(),
            }),
        }
    }
}

/// Lexicographic ordering of two rows of the same schema.
pub(crate) fn compare_rows(left: &[Value], right: &[Value]) -> Ordering {
    left.iter()
        .zip(right)
        .map(|(a, b)| a.total_cmp(b))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| left.len().cmp(&right.len()))
}

/// Re-lays `row` (in `src` column order) into `dst` column order, matching
/// columns by name. Columns absent from `src` keep their defaults.
pub(crate) fn remap_row(
    src: &PropertySchema,
    row: &[Value],
    dst: &PropertySchema,
) -> Result<Vec<Value>, PropertyError> {
    let mut out = dst.defaults();
    for (index, column) in src.columns().iter().enumerate() {
        if let (Some(target), Some(value)) = (dst.index_of(&column.name), row.get(index)) {
            out[target] = dst.coerce(target, value.clone())?;
        }
    }
    Ok(out)
}

/// Appends a default cell for a freshly declared column to every row.
pub(crate) fn extend_rows<'a>(rows: impl Iterator<Item = &'a mut Vec<Value>>, ty: ValueType) {
    for row in rows {
        row.push(Value::default_for(ty));
    }
}

/// Drops column `index` from every row.
pub(crate) fn shrink_rows<'a>(rows: impl Iterator<Item = &'a mut Vec<Value>>, index: usize) {
    for row in rows {
        if index < row.len() {
            row.remove(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_returns_index_and_is_idempotent_for_same_type() {
        let mut schema = PropertySchema::new();
        assert_eq!(schema.add("F", ValueType::Float).unwrap(), (0, true));
        assert_eq!(schema.add("I", ValueType::Int).unwrap(), (1, true));
        assert_eq!(schema.add("F", ValueType::Float).unwrap(), (0, false));
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn add_rejects_type_change() {
        let mut schema = PropertySchema::new();
        schema.add("x", ValueType::Float).unwrap();
        let err = schema.add("x", ValueType::Str).unwrap_err();
        assert!(matches!(err, PropertyError::TypeConflict { .. }));
    }

    #[test]
    fn remove_shifts_following_columns() {
        let mut schema = PropertySchema::new();
        schema.add("F", ValueType::Float).unwrap();
        schema.add("I", ValueType::Int).unwrap();
        schema.add("S", ValueType::Str).unwrap();
        assert_eq!(schema.remove("I").unwrap(), 1);
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["F", "S"]);
        assert_eq!(schema.index_of("S"), Some(1));
        assert!(matches!(
            schema.remove("I"),
            Err(PropertyError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn defaults_follow_column_types() {
        let mut schema = PropertySchema::new();
        schema.add("F", ValueType::Float).unwrap();
        schema.add("I", ValueType::Int).unwrap();
        schema.add("S", ValueType::Str).unwrap();
        assert_eq!(
            schema.defaults(),
            vec![Value::Float(0.0), Value::Int(0), Value::Str(String::new())]
        );
    }

    #[test]
    fn coerce_widens_ints_and_rejects_strings_in_numeric_columns() {
        let mut schema = PropertySchema::new();
        schema.add("fc", ValueType::Float).unwrap();
        assert_eq!(schema.coerce(0, Value::Int(3)).unwrap(), Value::Float(3.0));
        assert!(matches!(
            schema.coerce(0, Value::from("oops")),
            Err(PropertyError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn remap_row_matches_columns_by_name() {
        let mut src = PropertySchema::new();
        src.add("a", ValueType::Int).unwrap();
        src.add("b", ValueType::Str).unwrap();
        let mut dst = PropertySchema::new();
        dst.add("b", ValueType::Str).unwrap();
        dst.add("c", ValueType::Float).unwrap();
        dst.add("a", ValueType::Float).unwrap();

        let row = vec![Value::Int(7), Value::from("x")];
        let out = remap_row(&src, &row, &dst).unwrap();
        assert_eq!(out, vec![Value::from("x"), Value::Float(0.0), Value::Float(7.0)]);
    }

    #[test]
    fn value_type_parses_common_spellings() {
        assert_eq!("float".parse::<ValueType>().unwrap(), ValueType::Float);
        assert_eq!("INT".parse::<ValueType>().unwrap(), ValueType::Int);
        assert_eq!("string".parse::<ValueType>().unwrap(), ValueType::Str);
        assert!("complex".parse::<ValueType>().is_err());
    }

    #[test]
    fn total_cmp_orders_within_and_across_types() {
        assert_eq!(Value::Float(1.0).total_cmp(&Value::Float(2.0)), Ordering::Less);
        assert_eq!(Value::Int(5).total_cmp(&Value::Int(5)), Ordering::Equal);
        assert_eq!(
            Value::Float(9.0).total_cmp(&Value::Int(0)),
            Ordering::Less
        );
    }
}
