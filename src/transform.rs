//! Transform engine: applies per-source filter rules, then assembles output
//! rows by fan-in, static override, and registration order.
//!
//! Rules run once per referenced source column, before fan-in, so one rule
//! set affects every target that consumes that source. Sources listed
//! alongside a static override still run their rules (a reject still drops
//! the row); only the emitted value is overridden. Row rejection is atomic:
//! either every target value of a row is emitted, or none is.

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;
use log::{debug, warn};
use regex::Regex;

use crate::data::{Value, coerce_value};
use crate::error::ConfigError;
use crate::mapping::{CastType, ColumnRules, MappingConfig};
use crate::source::RawBatch;

/// Separator placed between fan-in parts of a combined target value.
pub const FANIN_SEPARATOR: &str = " ";

/// One transformed batch: output column names plus typed rows.
#[derive(Debug, Clone)]
pub struct OutputBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Counters accumulated while transforming one batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchStats {
    pub rejected: u64,
}

enum TargetPlan {
    Static(Value),
    /// Indices into the filtered source slot table.
    Sources(Vec<usize>),
}

struct SourceSlot {
    header_index: usize,
    name: String,
    rule: Option<CompiledRule>,
}

pub struct Transformer {
    columns: Vec<String>,
    plans: Vec<TargetPlan>,
    slots: Vec<SourceSlot>,
}

impl Transformer {
    /// Binds a validated mapping to a concrete source header. Fails when a
    /// mapped source column is absent from the header, so misconfiguration
    /// surfaces before any data row is read.
    pub fn new(config: &MappingConfig, headers: &[String]) -> Result<Self, ConfigError> {
        config.validate()?;
        let header_index: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();

        let mut slot_index = HashMap::new();
        let mut slots = Vec::new();
        for source in config.referenced_sources() {
            let header_idx = *header_index.get(source).ok_or_else(|| {
                ConfigError::UnknownSourceColumn {
                    column: source.to_string(),
                }
            })?;
            let rule = config
                .rules_for(source)
                .map(|rules| CompiledRule::new(source, rules))
                .transpose()?;
            slot_index.insert(source.to_string(), slots.len());
            slots.push(SourceSlot {
                header_index: header_idx,
                name: source.to_string(),
                rule,
            });
        }

        for source in config.filters.keys() {
            if !slot_index.contains_key(source.as_str()) {
                warn!("Filter rule for '{source}' matches no mapped source column; ignoring");
            }
        }

        let mut columns = Vec::new();
        let mut plans = Vec::new();
        for target in config.ordered_targets() {
            columns.push(target.target.clone());
            let plan = match &target.static_value {
                Some(literal) => TargetPlan::Static(Value::String(literal.clone())),
                None => {
                    let mut indices = Vec::with_capacity(target.sources.len());
                    for source in &target.sources {
                        let idx = *slot_index.get(source.as_str()).ok_or_else(|| {
                            ConfigError::UnknownSourceColumn {
                                column: source.clone(),
                            }
                        })?;
                        indices.push(idx);
                    }
                    TargetPlan::Sources(indices)
                }
            };
            plans.push(plan);
        }
        Ok(Self {
            columns,
            plans,
            slots,
        })
    }

    /// Output column names, stable for the lifetime of the transformer.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Transforms one raw batch into typed output rows.
    ///
    /// Every input row must have exactly the header width the transformer was
    /// bound to; [`crate::source::CsvSource`] guarantees this.
    pub fn transform(&self, batch: RawBatch) -> (OutputBatch, BatchStats) {
        let mut stats = BatchStats::default();
        let mut rows = Vec::with_capacity(batch.len());
        for raw_row in batch {
            match self.transform_row(raw_row) {
                Ok(row) => rows.push(row),
                Err(reject) => {
                    stats.rejected += 1;
                    debug!("Rejected row: {reject}");
                }
            }
        }
        (
            OutputBatch {
                columns: self.columns.clone(),
                rows,
            },
            stats,
        )
    }

    fn transform_row(&self, mut raw: Vec<String>) -> Result<Vec<Value>, RowReject> {
        let mut filtered = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let text = std::mem::take(&mut raw[slot.header_index]);
            let value = match &slot.rule {
                Some(rule) => rule.apply(text).map_err(|reason| RowReject {
                    column: slot.name.clone(),
                    reason,
                })?,
                None => Value::String(text),
            };
            filtered.push(value);
        }

        let mut row = Vec::with_capacity(self.plans.len());
        for plan in &self.plans {
            let value = match plan {
                TargetPlan::Static(value) => value.clone(),
                TargetPlan::Sources(indices) if indices.len() == 1 => {
                    filtered[indices[0]].clone()
                }
                TargetPlan::Sources(indices) => {
                    let joined = indices
                        .iter()
                        .map(|&idx| filtered[idx].as_display())
                        .join(FANIN_SEPARATOR);
                    Value::String(joined)
                }
            };
            row.push(value);
        }
        Ok(row)
    }
}

struct CompiledRule {
    trim: bool,
    cast: Option<CastType>,
    strict: bool,
    default_value: Option<Value>,
    pattern: Option<Regex>,
    reject_on_mismatch: bool,
}

impl CompiledRule {
    fn new(column: &str, rules: &ColumnRules) -> Result<Self, ConfigError> {
        let pattern = rules
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|source| ConfigError::BadPattern {
                column: column.to_string(),
                source: Box::new(source),
            })?;
        let default_value = match (&rules.default, rules.cast) {
            (Some(default), Some(cast)) => {
                Some(
                    coerce_value(default, cast).map_err(|_| ConfigError::BadDefault {
                        column: column.to_string(),
                        default: default.clone(),
                        cast: cast.to_string(),
                    })?,
                )
            }
            (Some(default), None) => Some(Value::String(default.clone())),
            (None, _) => None,
        };
        Ok(Self {
            trim: rules.trim,
            cast: rules.cast,
            strict: rules.strict,
            default_value,
            pattern,
            reject_on_mismatch: rules.reject_on_mismatch,
        })
    }

    /// Runs the rule stages in order: trim, coercion, pattern extraction,
    /// default-on-empty. An `Err` rejects the whole row.
    fn apply(&self, raw: String) -> Result<Value, RejectReason> {
        let mut text = raw;
        if self.trim {
            let trimmed = text.trim();
            if trimmed.len() != text.len() {
                text = trimmed.to_string();
            }
        }

        let mut value: Option<Value> = None;
        self.coerce_in_place(&mut text, &mut value)?;

        if let Some(regex) = &self.pattern {
            if !text.is_empty() {
                match regex.captures(&text) {
                    Some(caps) => {
                        text = caps
                            .get(1)
                            .or_else(|| caps.get(0))
                            .map(|group| group.as_str().to_string())
                            .unwrap_or_default();
                        value = None;
                        self.coerce_in_place(&mut text, &mut value)?;
                    }
                    None if self.reject_on_mismatch => {
                        return Err(RejectReason::PatternMismatch);
                    }
                    None => {
                        text.clear();
                        value = None;
                    }
                }
            }
        }

        if text.is_empty() {
            if let Some(default) = &self.default_value {
                return Ok(default.clone());
            }
            return Ok(if self.cast.is_some() {
                Value::Null
            } else {
                Value::String(String::new())
            });
        }
        match value {
            Some(value) => Ok(value),
            None => Ok(Value::String(text)),
        }
    }

    /// Coercion stage, keeping the text form in sync with the typed value.
    /// Empty text passes through untyped; it is settled by the default stage.
    fn coerce_in_place(
        &self,
        text: &mut String,
        value: &mut Option<Value>,
    ) -> Result<(), RejectReason> {
        let Some(cast) = self.cast else {
            return Ok(());
        };
        if text.is_empty() {
            return Ok(());
        }
        match coerce_value(text, cast) {
            Ok(parsed) => {
                *text = parsed.as_display();
                *value = Some(parsed);
            }
            Err(_) if self.strict => {
                return Err(RejectReason::Coercion(std::mem::take(text)));
            }
            Err(_) => match &self.default_value {
                Some(fallback) => {
                    *text = fallback.as_display();
                    *value = Some(fallback.clone());
                }
                None => {
                    text.clear();
                    *value = None;
                }
            },
        }
        Ok(())
    }
}

struct RowReject {
    column: String,
    reason: RejectReason,
}

enum RejectReason {
    Coercion(String),
    PatternMismatch,
}

impl fmt::Display for RowReject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            RejectReason::Coercion(text) => {
                write!(f, "column '{}': cannot coerce '{}'", self.column, text)
            }
            RejectReason::PatternMismatch => {
                write!(f, "column '{}': pattern mismatch", self.column)
            }
        }
    }
}
