//! Rule evaluation: one declarative rule against one value.

use crate::compute::Value;
use crate::store::{RuleKind, ValidationRule};
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

const MIN_PASSWORD_CHARS: usize = 8;

/// Returns `true` when `value` satisfies `rule`. Pure.
pub fn evaluate(rule: &ValidationRule, value: &Value) -> bool {
    match rule.kind {
        RuleKind::Required => is_present(value),
        RuleKind::NotEmpty => !matches!(value, Value::Text(s) if s.trim().is_empty()),
        RuleKind::MinLength => text_len(value).zip(rule.value).map_or(true, |(len, min)| len as f64 >= min),
        RuleKind::MaxLength => text_len(value).zip(rule.value).map_or(true, |(len, max)| len as f64 <= max),
        RuleKind::Email => match value {
            Value::Text(s) if !s.is_empty() => EMAIL.is_match(s),
            _ => true,
        },
        RuleKind::Password => match value {
            Value::Text(s) if !s.is_empty() => {
                s.chars().count() >= MIN_PASSWORD_CHARS && s.chars().any(|c| c.is_ascii_digit())
            }
            _ => true,
        },
    }
}

/// An explicit `false` is an answer, not an absence.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Empty | Value::Error(_) => false,
        Value::Text(s) => !s.trim().is_empty(),
        Value::Number(n) => !n.is_nan(),
        Value::Boolean(_) | Value::Date(_) => true,
    }
}

// Length rules only see strings.
fn text_len(value: &Value) -> Option<usize> {
    match value {
        Value::Text(s) => Some(s.chars().count()),
        _ => None,
    }
}
