use super::nonbonded::VdwFunction;
use super::term_table::Category;
use crate::core::models::properties::ValueType;
use phf::{Map, phf_map};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

/// Column layout and arity of a term table, used to create tables by name.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub arity: usize,
    pub category: Category,
    pub params: Vec<(String, ValueType)>,
    pub term_props: Vec<(String, ValueType)>,
}

struct StaticSchema {
    arity: usize,
    category: Category,
    params: &'static [&'static str],
    term_props: &'static [(&'static str, ValueType)],
}

const CONSTRAINED: &[(&str, ValueType)] = &[("constrained", ValueType::Int)];

static BUILTIN_SCHEMAS: Map<&'static str, StaticSchema> = phf_map! {
    "stretch_harm" => StaticSchema {
        arity: 2,
        category: Category::Bond,
        params: &["r0", "fc"],
        term_props: CONSTRAINED,
    },
    "angle_harm" => StaticSchema {
        arity: 3,
        category: Category::Bond,
        params: &["theta0", "fc"],
        term_props: CONSTRAINED,
    },
    "dihedral_trig" => StaticSchema {
        arity: 4,
        category: Category::Bond,
        params: &["phi0", "fc0", "fc1", "fc2", "fc3", "fc4", "fc5", "fc6"],
        term_props: &[],
    },
    "improper_harm" => StaticSchema {
        arity: 4,
        category: Category::Bond,
        params: &["phi0", "fc"],
        term_props: &[],
    },
    "pair_12_6_es" => StaticSchema {
        arity: 2,
        category: Category::Bond,
        params: &["aij", "bij", "qij"],
        term_props: &[],
    },
    "pair_exp_6_es" => StaticSchema {
        arity: 2,
        category: Category::Bond,
        params: &["aij", "bij", "cij", "qij"],
        term_props: &[],
    },
    "exclusion" => StaticSchema {
        arity: 2,
        category: Category::Exclusion,
        params: &[],
        term_props: &[],
    },
    "posre_harm" => StaticSchema {
        arity: 1,
        category: Category::Bond,
        params: &["x0", "y0", "z0", "fcx", "fcy", "fcz"],
        term_props: &[],
    },
    "constraint_hoh" => StaticSchema {
        arity: 3,
        category: Category::Constraint,
        params: &["theta", "r1", "r2"],
        term_props: &[],
    },
};

pub const NONBONDED_TABLE: &str = "nonbonded";
const CONSTRAINT_AH_PREFIX: &str = "constraint_ah";

impl StaticSchema {
    fn to_schema(&self, name: &str) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            arity: self.arity,
            category: self.category,
            params: floats(self.params),
            term_props: self
                .term_props
                .iter()
                .map(|(n, t)| (n.to_string(), *t))
                .collect(),
        }
    }
}

fn floats(names: &[&str]) -> Vec<(String, ValueType)> {
    names
        .iter()
        .map(|n| (n.to_string(), ValueType::Float))
        .collect()
}

/// Looks up a built-in schema. `constraint_ahN` is available for every N >= 1.
pub fn builtin(name: &str) -> Option<TableSchema> {
    if let Some(schema) = BUILTIN_SCHEMAS.get(name) {
        return Some(schema.to_schema(name));
    }
    let n = name.strip_prefix(CONSTRAINT_AH_PREFIX)?.parse::<usize>().ok()?;
    (n >= 1).then(|| constraint_ah(n))
}

/// Names of the fixed built-in schemas, sorted.
pub fn builtin_names() -> Vec<&'static str> {
    let mut names: Vec<_> = BUILTIN_SCHEMAS.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Schema of an A-H_n constraint group: one heavy atom, `n` partners, and
/// one target distance per partner.
pub fn constraint_ah(n: usize) -> TableSchema {
    let params = (1..=n).map(|i| (format!("r{}", i), ValueType::Float)).collect();
    TableSchema {
        name: constraint_ah_name(n),
        arity: n + 1,
        category: Category::Constraint,
        params,
        term_props: Vec::new(),
    }
}

pub fn constraint_ah_name(n: usize) -> String {
    format!("{}{}", CONSTRAINT_AH_PREFIX, n)
}

/// Schema of the per-atom `nonbonded` table for a van der Waals function.
pub fn nonbonded(vdw_funct: &str) -> Option<TableSchema> {
    let funct = vdw_funct.parse::<VdwFunction>().ok()?;
    Some(TableSchema {
        name: NONBONDED_TABLE.to_string(),
        arity: 1,
        category: Category::Nonbonded,
        params: floats(funct.param_names()),
        term_props: Vec::new(),
    })
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct SchemaDefinition {
    arity: usize,
    category: String,
    #[serde(default)]
    params: Vec<String>,
    #[serde(default)]
    term_props: BTreeMap<String, String>,
}

/// Built-in schemas plus user definitions loaded from TOML.
///
/// ```toml
/// [stretch_morse]
/// arity = 2
/// category = "bond"
/// params = ["r0", "d", "a"]
/// term-props = { constrained = "int" }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    custom: HashMap<String, TableSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, SchemaLoadError> {
        let origin = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| SchemaLoadError::Io {
            path: origin.clone(),
            source: e,
        })?;
        Self::parse(&content, &origin)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SchemaLoadError> {
        Self::parse(content, "<string>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self, SchemaLoadError> {
        let definitions: BTreeMap<String, SchemaDefinition> =
            toml::from_str(content).map_err(|e| SchemaLoadError::Toml {
                path: origin.to_string(),
                source: e,
            })?;

        let mut registry = Self::new();
        for (name, def) in definitions {
            let category = def
                .category
                .parse::<Category>()
                .map_err(|_| SchemaLoadError::InvalidCategory {
                    schema: name.clone(),
                    category: def.category.clone(),
                })?;
            let mut term_props = Vec::with_capacity(def.term_props.len());
            for (prop, ty) in &def.term_props {
                let ty = ty.parse::<ValueType>().map_err(|_| SchemaLoadError::InvalidType {
                    schema: name.clone(),
                    prop: prop.clone(),
                    ty: ty.clone(),
                })?;
                term_props.push((prop.clone(), ty));
            }
            let params = def
                .params
                .iter()
                .map(|p| (p.clone(), ValueType::Float))
                .collect();
            registry.register(TableSchema {
                name: name.clone(),
                arity: def.arity,
                category,
                params,
                term_props,
            });
        }
        Ok(registry)
    }

    /// Adds or replaces a custom schema; custom schemas shadow built-ins.
    pub fn register(&mut self, schema: TableSchema) {
        self.custom.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, name: &str) -> Option<TableSchema> {
        self.custom.get(name).cloned().or_else(|| builtin(name))
    }

    pub fn custom_len(&self) -> usize {
        self.custom.len()
    }
}

#[derive(Debug, Error)]
pub enum SchemaLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Schema '{schema}' has unknown category '{category}'")]
    InvalidCategory { schema: String, category: String },
    #[error("Schema '{schema}' declares term property '{prop}' with unknown type '{ty}'")]
    InvalidType {
        schema: String,
        prop: String,
        ty: String,
    },
}
