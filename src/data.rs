use std::fmt;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;

use crate::mapping::CastType;

/// A typed field value flowing from the transform engine to the loader.
///
/// Values stay typed end to end; the tab-separated wire form is produced only
/// when a batch is serialized at the ClickHouse boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Null,
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                // Past 2^63 an i64 cast saturates.
                if f.fract() == 0.0 && f.abs() < 2f64.powi(63) {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Null => String::new(),
        }
    }

    /// True for values whose text form is empty.
    pub fn is_empty_text(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

/// Coerces a non-empty text field into the requested typed variant.
pub fn coerce_value(value: &str, cast: CastType) -> Result<Value> {
    match cast {
        CastType::Integer => {
            let parsed: i64 = value
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as integer"))?;
            Ok(Value::Integer(parsed))
        }
        CastType::Float => {
            let parsed: f64 = value
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as float"))?;
            Ok(Value::Float(parsed))
        }
        CastType::Date => Ok(Value::Date(parse_naive_date(value)?)),
    }
}
