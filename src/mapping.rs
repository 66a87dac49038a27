//! Mapping configuration: target columns, fan-in sources, static overrides,
//! and per-source filter rules.
//!
//! A mapping file is YAML:
//!
//! ```yaml
//! columns:
//!   - target: full_name
//!     sources: [first_name, last_name]
//!   - target: amount
//!     sources: [amount]
//!   - target: load_tag
//!     static: nightly
//! filters:
//!   amount:
//!     trim: true
//!     cast: float
//!     strict: true
//! ```
//!
//! Targets are registered in file order. A target with several sources
//! concatenates their filtered values; a target with a `static` literal emits
//! that literal on every row, and the literal wins over any sources listed
//! alongside it. Filter rules attach to the *source* column, so one rule set
//! affects every target that consumes that source.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data::coerce_value;
use crate::error::ConfigError;

/// Requested typed coercion for a source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastType {
    Integer,
    Float,
    Date,
}

impl CastType {
    pub fn as_str(self) -> &'static str {
        match self {
            CastType::Integer => "integer",
            CastType::Float => "float",
            CastType::Date => "date",
        }
    }
}

impl fmt::Display for CastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output column of the import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetColumn {
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_value: Option<String>,
}

/// Filter rules for one source column, applied in a fixed order: trim, type
/// coercion, pattern extraction, default-on-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ColumnRules {
    pub trim: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cast: Option<CastType>,
    /// Reject the whole row when a cast fails instead of falling back.
    pub strict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Regular expression; capture group 1 (or the whole match) replaces the
    /// value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Reject the whole row when `pattern` does not match.
    pub reject_on_mismatch: bool,
}

impl ColumnRules {
    fn validate(&self, column: &str) -> Result<(), ConfigError> {
        if self.strict && self.cast.is_none() {
            return Err(ConfigError::StrictWithoutCast {
                column: column.to_string(),
            });
        }
        if self.reject_on_mismatch && self.pattern.is_none() {
            return Err(ConfigError::RejectWithoutPattern {
                column: column.to_string(),
            });
        }
        if let Some(pattern) = &self.pattern {
            Regex::new(pattern).map_err(|source| ConfigError::BadPattern {
                column: column.to_string(),
                source: Box::new(source),
            })?;
        }
        if let (Some(default), Some(cast)) = (&self.default, self.cast) {
            if coerce_value(default, cast).is_err() {
                return Err(ConfigError::BadDefault {
                    column: column.to_string(),
                    default: default.clone(),
                    cast: cast.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    #[serde(default)]
    pub columns: Vec<TargetColumn>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, ColumnRules>,
}

impl MappingConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening mapping file {path:?}"))?;
        let config: MappingConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing mapping YAML {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating mapping file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing mapping YAML")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.columns.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.target.trim().is_empty() {
                return Err(ConfigError::UnnamedTarget);
            }
            if !seen.insert(column.target.as_str()) {
                return Err(ConfigError::DuplicateTarget(column.target.clone()));
            }
            if column.sources.iter().any(|s| s.trim().is_empty()) {
                return Err(ConfigError::UnnamedSource(column.target.clone()));
            }
            if column.sources.is_empty() && column.static_value.is_none() {
                return Err(ConfigError::EmptyTarget(column.target.clone()));
            }
        }
        for (source, rules) in &self.filters {
            rules.validate(source)?;
        }
        Ok(())
    }

    /// Target columns in output order: fan-in targets in registration order,
    /// then static-only targets in registration order. The order is identical
    /// for every batch of a load and for the staging statement.
    pub fn ordered_targets(&self) -> Vec<&TargetColumn> {
        let mapped = self.columns.iter().filter(|c| !c.sources.is_empty());
        let static_only = self.columns.iter().filter(|c| c.sources.is_empty());
        mapped.chain(static_only).collect()
    }

    pub fn output_columns(&self) -> Vec<String> {
        self.ordered_targets()
            .iter()
            .map(|c| c.target.clone())
            .collect()
    }

    pub fn rules_for(&self, source: &str) -> Option<&ColumnRules> {
        self.filters.get(source)
    }

    /// Source columns in first-reference order across the registered targets.
    pub fn referenced_sources(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for column in &self.columns {
            for source in &column.sources {
                if seen.insert(source.as_str()) {
                    ordered.push(source.as_str());
                }
            }
        }
        ordered
    }
}
