//! The custom-formula language: a small expression interpreter with a fixed
//! set of built-ins and no access to anything outside its parent values.

pub mod eval;
pub mod lexer;
pub mod parser;

use crate::compute::ledger::{ComputationError, Value};
use crate::config::{EngineConfig, MAX_NESTING_DEPTH};
use chrono::{DateTime, Utc};
use eval::{Datum, Scope};
use parser::Expr;

/// A parsed custom formula, ready to be evaluated any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expr: Option<Expr>,
}

impl Formula {
    pub fn parse(src: &str, config: &EngineConfig) -> Result<Self, ComputationError> {
        if src.chars().count() > config.max_formula_length {
            return Err(ComputationError::FormulaTooLong { limit: config.max_formula_length });
        }
        Ok(Self { expr: parser::parse(src, config.max_nesting_depth.min(MAX_NESTING_DEPTH))? })
    }

    /// Evaluates against `parent_values` in a fresh scope. A formula with no
    /// expression evaluates to empty.
    pub fn evaluate(
        &self,
        parent_values: &[Value],
        now: DateTime<Utc>,
        config: &EngineConfig,
    ) -> Result<Value, ComputationError> {
        let Some(expr) = &self.expr else {
            return Ok(Value::Empty);
        };
        let mut scope = Scope::new(parent_values, now, config.max_evaluation_steps);
        match scope.eval(expr)? {
            Datum::Scalar(value) => Ok(value),
            Datum::List(_) => Err(ComputationError::UnsupportedResult),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builder_default_custom_formula() {
        let src = "// Write your custom formula here\n// parentValues array contains the values of parent fields\nreturn parentValues[0];";
        let formula = Formula::parse(src, &EngineConfig::default()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let out = formula.evaluate(&[Value::text("hello")], now, &EngineConfig::default());
        assert_eq!(out, Ok(Value::text("hello")));
    }

    #[test]
    fn test_length_bound() {
        let config = EngineConfig { max_formula_length: 8, ..EngineConfig::default() };
        assert_eq!(Formula::parse("1 + 2 + 3 + 4", &config), Err(ComputationError::FormulaTooLong { limit: 8 }));
    }

    #[test]
    fn test_long_operator_chain_rejected_before_evaluation() {
        let src = format!("10{}", "+1".repeat(2047));
        assert_eq!(src.len(), 4096);
        assert_eq!(
            Formula::parse(&src, &EngineConfig::default()),
            Err(ComputationError::NestingTooDeep { limit: 64 })
        );

        // A literal config skips `validate`; the parser still applies the ceiling.
        let config = EngineConfig { max_nesting_depth: 100_000, ..EngineConfig::default() };
        assert_eq!(Formula::parse(&src, &config), Err(ComputationError::NestingTooDeep { limit: MAX_NESTING_DEPTH }));
    }

    #[test]
    fn test_list_result_rejected() {
        let formula = Formula::parse("parentValues", &EngineConfig::default()).unwrap();
        let out = formula.evaluate(&[], Utc::now(), &EngineConfig::default());
        assert_eq!(out, Err(ComputationError::UnsupportedResult));
    }
}
