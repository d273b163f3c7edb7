use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },
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
}

/// A bonded term table to merge, with the one column (if any) that keeps its
/// value when a state's parameters are zeroed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct BondedTable {
    pub table: String,
    #[serde(default)]
    pub keeper: Option<String>,
}

impl BondedTable {
    pub fn new(table: &str, keeper: Option<&str>) -> Self {
        Self {
            table: table.to_string(),
            keeper: keeper.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct PairsConfig {
    pub enabled: bool,
}

impl Default for PairsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct MergeConfig {
    pub bonded: Vec<BondedTable>,
    #[serde(default)]
    pub pairs: PairsConfig,
    /// Distance in Å under which a vanishing atom and an appearing atom are
    /// excluded from each other.
    pub exclusion_cutoff: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            bonded: vec![
                BondedTable::new("stretch_harm", Some("r0")),
                BondedTable::new("angle_harm", None),
                BondedTable::new("dihedral_trig", None),
            ],
            pairs: PairsConfig::default(),
            exclusion_cutoff: 6.0,
        }
    }
}

impl MergeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.to_string_lossy())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, "<string>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: MergeConfig = toml::from_str(content).map_err(|e| ConfigError::Toml {
            path: origin.to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.exclusion_cutoff.is_finite() || self.exclusion_cutoff < 0.0 {
            return Err(ConfigError::InvalidValue {
                name: "exclusion_cutoff",
                reason: format!("expected a non-negative distance, got {}", self.exclusion_cutoff),
            });
        }
        if let Some(empty) = self.bonded.iter().find(|b| b.table.is_empty()) {
            return Err(ConfigError::InvalidValue {
                name: "bonded",
                reason: format!("empty table name (keeper {:?})", empty.keeper),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MergeConfigBuilder {
    bonded: Vec<BondedTable>,
    pairs_enabled: Option<bool>,
    exclusion_cutoff: Option<f64>,
}

impl MergeConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bonded_table(mut self, table: &str, keeper: Option<&str>) -> Self {
        self.bonded.push(BondedTable::new(table, keeper));
        self
    }
    pub fn pairs_enabled(mut self, enabled: bool) -> Self {
        self.pairs_enabled = Some(enabled);
        self
    }
    pub fn exclusion_cutoff(mut self, cutoff: f64) -> Self {
        self.exclusion_cutoff = Some(cutoff);
        self
    }

    pub fn build(self) -> Result<MergeConfig, ConfigError> {
        if self.bonded.is_empty() {
            return Err(ConfigError::MissingParameter("bonded"));
        }
        let config = MergeConfig {
            bonded: self.bonded,
            pairs: PairsConfig {
                enabled: self.pairs_enabled.unwrap_or(true),
            },
            exclusion_cutoff: self
                .exclusion_cutoff
                .ok_or(ConfigError::MissingParameter("exclusion_cutoff"))?,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn default_config_keeps_r0_for_stretches_only() {
        let config = MergeConfig::default();
        assert_eq!(config.bonded.len(), 3);
        assert_eq!(config.bonded[0].keeper.as_deref(), Some("r0"));
        assert!(config.bonded[1..].iter().all(|b| b.keeper.is_none()));
        assert!(config.pairs.enabled);
        assert_eq!(config.exclusion_cutoff, 6.0);
    }

    #[test]
    fn builder_requires_cutoff_and_tables() {
        let err = MergeConfigBuilder::new().exclusion_cutoff(4.0).build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingParameter("bonded")));

        let err = MergeConfigBuilder::new()
            .bonded_table("stretch_harm", Some("r0"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingParameter("exclusion_cutoff")));

        let config = MergeConfigBuilder::new()
            .bonded_table("stretch_harm", Some("r0"))
            .pairs_enabled(false)
            .exclusion_cutoff(4.0)
            .build()
            .unwrap();
        assert!(!config.pairs.enabled);
        assert_eq!(config.bonded, vec![BondedTable::new("stretch_harm", Some("r0"))]);
    }

    #[test]
    fn builder_rejects_negative_cutoff() {
        let err = MergeConfigBuilder::new()
            .bonded_table("angle_harm", None)
            .exclusion_cutoff(-1.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "exclusion_cutoff", .. }));
    }

    #[test]
    fn load_reads_kebab_case_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("merge.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            r#"
            exclusion-cutoff = 5.5

            [[bonded]]
            table = "stretch_harm"
            keeper = "r0"

            [[bonded]]
            table = "improper_harm"

            [pairs]
            enabled = false
            "#
        )
        .unwrap();

        let config = MergeConfig::load(&file_path).unwrap();
        assert_eq!(config.exclusion_cutoff, 5.5);
        assert_eq!(config.bonded[1], BondedTable::new("improper_harm", None));
        assert!(!config.pairs.enabled);
    }

    #[test]
    fn missing_pairs_section_defaults_to_enabled() {
        let config = MergeConfig::from_toml_str(
            r#"
            exclusion-cutoff = 6.0
            bonded = [{ table = "angle_harm" }]
            "#,
        )
        .unwrap();
        assert!(config.pairs.enabled);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = MergeConfig::from_toml_str(
            r#"
            exclusion-cutoff = 6.0
            bonded = []
            cutoff = 3.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempdir().unwrap();
        let err = MergeConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
