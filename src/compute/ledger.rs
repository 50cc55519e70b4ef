//! ledger.rs
//! Field values as a closed tagged variant, with the coercions formulas and
//! rules rely on.

use crate::store::{DefaultValue, FieldId};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use thiserror::Error;

/// Display text of the computation-error sentinel.
pub const ERROR_SENTINEL: &str = "Error in formula";

/// Snapshot of every field's current value, keyed by field id.
pub type ValueMap = BTreeMap<FieldId, Value>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputationError {
    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("Unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Formula is longer than {limit} characters")]
    FormulaTooLong { limit: usize },
    #[error("Formula nesting exceeds depth {limit}")]
    NestingTooDeep { limit: usize },
    #[error("Evaluation exceeded {limit} steps")]
    StepLimitExceeded { limit: usize },
    #[error("Expected {expected} parent value(s), got {actual}")]
    ParentCountMismatch { expected: usize, actual: usize },
    #[error("Formula produced a list where a single value was expected")]
    UnsupportedResult,
}

/// The atomic unit of data in the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    /// Sentinel for a derived field whose computation failed.
    Error(ComputationError),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self { Value::Text(s.into()) }

    /// True for `Empty` and for the empty string, the two "nothing entered" shapes.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Empty => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn is_error(&self) -> bool { matches!(self, Value::Error(_)) }

    /// Numeric coercion. Blank values become 0, unparseable text becomes NaN,
    /// dates become epoch milliseconds.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Empty => 0.0,
            Value::Text(s) => parse_number(s),
            Value::Number(n) => *n,
            Value::Boolean(b) => if *b { 1.0 } else { 0.0 },
            Value::Date(d) => d.timestamp_millis() as f64,
            Value::Error(_) => f64::NAN,
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Text(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => format_date(d),
            Value::Error(_) => ERROR_SENTINEL.to_string(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Empty | Value::Error(_) => false,
            Value::Text(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Boolean(b) => *b,
            Value::Date(_) => true,
        }
    }

    /// Dates, date strings and epoch milliseconds read as dates.
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Text(s) => parse_date(s),
            Value::Number(n) if n.is_finite() => Utc.timestamp_millis_opt(*n as i64).single(),
            _ => None,
        }
    }

    /// Equality that treats two NaNs as the same value, for change detection.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }
}

impl From<&DefaultValue> for Value {
    fn from(value: &DefaultValue) -> Self {
        match value {
            DefaultValue::Boolean(b) => Value::Boolean(*b),
            DefaultValue::Number(n) => Value::Number(*n),
            DefaultValue::Text(s) => Value::Text(s.clone()),
            DefaultValue::List(items) if items.is_empty() => Value::Empty,
            DefaultValue::List(items) => Value::Text(items.join(",")),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self { Value::Number(n) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Boolean(b) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_string()) }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Empty => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Date(d) => serializer.serialize_str(&format_date(d)),
            Value::Error(_) => serializer.serialize_str(ERROR_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Boolean(bool),
            Number(f64),
            Text(String),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => Value::Empty,
            Some(Raw::Boolean(b)) => Value::Boolean(b),
            Some(Raw::Number(n)) => Value::Number(n),
            Some(Raw::Text(s)) => Value::Text(s),
        })
    }
}

/// Parses a number the way form inputs are read: surrounding whitespace is
/// ignored, blank is 0, anything else that is not a plain decimal literal is NaN.
pub fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if !t.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')) {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == n.trunc() && n.abs() < 1e21 {
        // Covers -0 as well.
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM[:SS[.fff]]` (read as UTC) and `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(d) = DateTime::parse_from_rfc3339(t) {
        return Some(d.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn format_date(d: &DateTime<Utc>) -> String {
    d.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
