//! Staging-table promotion statements.
//!
//! Renders the `INSERT INTO ... SELECT` that moves rows from a staging table
//! of raw source columns into the target table, expressing the same trim,
//! coercion, pattern, and default stages in ClickHouse SQL. Rendering is
//! pure: the same mapping always yields byte-identical SQL.
//!
//! The row path applies patterns to the canonical text of an already-coerced
//! value; the SQL predicates test the trimmed raw column instead, which is
//! equivalent for the string-typed columns patterns are written against.

use itertools::Itertools;

use crate::data::{Value, coerce_value};
use crate::mapping::{CastType, ColumnRules, MappingConfig, TargetColumn};
use crate::transform::FANIN_SEPARATOR;

pub fn render_staging_sql(
    staging_db: &str,
    staging_table: &str,
    target_db: &str,
    target_table: &str,
    config: &MappingConfig,
) -> String {
    let targets = config.ordered_targets();
    let column_list = targets.iter().map(|t| quote_ident(&t.target)).join(", ");
    let select_list = targets
        .iter()
        .map(|t| {
            format!(
                "    {} AS {}",
                target_expr(t, config),
                quote_ident(&t.target)
            )
        })
        .join(",\n");

    let mut sql = format!(
        "INSERT INTO {}.{} ({})\nSELECT\n{}\nFROM {}.{}",
        quote_ident(target_db),
        quote_ident(target_table),
        column_list,
        select_list,
        quote_ident(staging_db),
        quote_ident(staging_table),
    );

    let predicates = where_predicates(config);
    if !predicates.is_empty() {
        sql.push_str("\nWHERE ");
        sql.push_str(&predicates.join("\n  AND "));
    }
    sql
}

/// Conventional name of the staging table for a target table.
pub fn staging_table_name(target_table: &str) -> String {
    format!("{target_table}_staging")
}

fn target_expr(target: &TargetColumn, config: &MappingConfig) -> String {
    if let Some(literal) = &target.static_value {
        return quote_str(literal);
    }
    if target.sources.len() == 1 {
        let (expr, _) = column_expr(&target.sources[0], config.rules_for(&target.sources[0]));
        return expr;
    }
    let separator = quote_str(FANIN_SEPARATOR);
    let parts = target
        .sources
        .iter()
        .map(|source| {
            let (expr, typed) = column_expr(source, config.rules_for(source));
            if typed {
                format!("ifNull(toString({expr}), '')")
            } else {
                expr
            }
        })
        .join(&format!(", {separator}, "));
    format!("concat({parts})")
}

/// Renders the filter stages for one source column. The flag reports whether
/// the expression is typed (nullable) rather than a plain string.
fn column_expr(source: &str, rules: Option<&ColumnRules>) -> (String, bool) {
    let mut expr = quote_ident(source);
    let Some(rules) = rules else {
        return (expr, false);
    };
    if rules.trim {
        expr = format!("trimBoth({expr})");
    }
    let mut typed = false;
    if let Some(cast) = rules.cast {
        expr = cast_expr(cast, &expr, rules.default.as_deref());
        typed = true;
    }
    if let Some(pattern) = &rules.pattern {
        let textual = if typed {
            format!("ifNull(toString({expr}), '')")
        } else {
            expr
        };
        expr = format!("extract({textual}, {})", quote_str(pattern));
        typed = false;
        if let Some(cast) = rules.cast {
            expr = cast_expr(cast, &expr, rules.default.as_deref());
            typed = true;
        }
    }
    if !typed {
        if let Some(default) = &rules.default {
            expr = format!("if(empty({expr}), {}, {expr})", quote_str(default));
        }
    }
    (expr, typed)
}

fn cast_expr(cast: CastType, expr: &str, default: Option<&str>) -> String {
    let casted = format!("{}({expr})", cast_fn(cast));
    let Some(default) = default else {
        return casted;
    };
    // A default that fails to parse still renders a well-formed statement.
    match coerce_value(default, cast) {
        Ok(value) => format!("ifNull({casted}, {})", value_literal(&value)),
        Err(_) => format!("ifNull({casted}, {}({}))", cast_fn(cast), quote_str(default)),
    }
}

fn where_predicates(config: &MappingConfig) -> Vec<String> {
    let mut predicates = Vec::new();
    for source in config.referenced_sources() {
        let Some(rules) = config.rules_for(source) else {
            continue;
        };
        let mut text = quote_ident(source);
        if rules.trim {
            text = format!("trimBoth({text})");
        }
        if rules.strict {
            if let Some(cast) = rules.cast {
                predicates.push(format!(
                    "(empty({text}) OR isNotNull({}({text})))",
                    cast_fn(cast)
                ));
            }
        }
        if rules.reject_on_mismatch {
            if let Some(pattern) = &rules.pattern {
                predicates.push(format!(
                    "(empty({text}) OR match({text}, {}))",
                    quote_str(pattern)
                ));
            }
        }
    }
    predicates
}

fn cast_fn(cast: CastType) -> &'static str {
    match cast {
        CastType::Integer => "toInt64OrNull",
        CastType::Float => "toFloat64OrNull",
        CastType::Date => "toDateOrNull",
    }
}

fn value_literal(value: &Value) -> String {
    match value {
        Value::String(s) => quote_str(s),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Date(d) => format!("toDate('{}')", d.format("%Y-%m-%d")),
        Value::Null => "NULL".to_string(),
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

pub fn quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
