//! Formula executor: turns a derived field's parent values into its value.

use super::expr::Formula;
use super::ledger::{ComputationError, Value};
use crate::config::EngineConfig;
use crate::store::{CalculationKind, DerivedSpec, FieldType};
use chrono::{DateTime, Utc};

const MILLIS_PER_YEAR: f64 = 365.25 * 24.0 * 60.0 * 60.0 * 1000.0;

/// A derived field's calculation, prepared once per schema build.
///
/// Custom formulas are parsed here; a parse failure is kept and reported as
/// the computation error on every evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Calculation {
    Age,
    Sum,
    Concatenate,
    Custom(Result<Formula, ComputationError>),
    /// Derived, but no calculation kind chosen yet.
    Unset,
}

impl Calculation {
    pub fn prepare(spec: &DerivedSpec, config: &EngineConfig) -> Self {
        match spec.calculation_type {
            Some(CalculationKind::Age) => Calculation::Age,
            Some(CalculationKind::Sum) => Calculation::Sum,
            Some(CalculationKind::Concatenate) => Calculation::Concatenate,
            Some(CalculationKind::Custom) => Calculation::Custom(Formula::parse(&spec.formula, config)),
            None => Calculation::Unset,
        }
    }
}

/// Coerces a parent's raw value by the parent field's type before it reaches a
/// calculation: numbers for number fields, dates for date fields, everything
/// else unchanged. Blank values are never coerced.
pub fn coerce_parent(field_type: FieldType, value: &Value) -> Value {
    if value.is_blank() {
        return value.clone();
    }
    match field_type {
        FieldType::Number => Value::Number(value.to_number()),
        FieldType::Date => value.as_date().map_or_else(|| value.clone(), Value::Date),
        _ => value.clone(),
    }
}

pub struct FormulaExecutor<'c> {
    config: &'c EngineConfig,
    now: DateTime<Utc>,
}

impl<'c> FormulaExecutor<'c> {
    pub fn new(config: &'c EngineConfig, now: DateTime<Utc>) -> Self {
        Self { config, now }
    }

    /// Runs a prepared calculation. Failures come back as the sentinel value.
    pub fn run(&self, calculation: &Calculation, parents: &[Value]) -> Value {
        self.try_run(calculation, parents).unwrap_or_else(Value::Error)
    }

    pub fn try_run(&self, calculation: &Calculation, parents: &[Value]) -> Result<Value, ComputationError> {
        match calculation {
            Calculation::Age => self.age(parents),
            Calculation::Sum => Ok(Value::Number(sum(parents))),
            Calculation::Concatenate => Ok(Value::Text(concatenate(parents))),
            Calculation::Custom(Ok(formula)) => formula.evaluate(parents, self.now, self.config),
            Calculation::Custom(Err(e)) => Err(e.clone()),
            Calculation::Unset => Ok(Value::Empty),
        }
    }

    /// Whole years between the parent date and now. An unreadable date gives 0.
    fn age(&self, parents: &[Value]) -> Result<Value, ComputationError> {
        let [parent] = parents else {
            return Err(ComputationError::ParentCountMismatch { expected: 1, actual: parents.len() });
        };
        let born = match parent {
            Value::Date(_) | Value::Text(_) => parent.as_date(),
            _ => None,
        };
        let years = born.map_or(0.0, |born| {
            let elapsed = (self.now - born).num_milliseconds() as f64;
            (elapsed / MILLIS_PER_YEAR).floor()
        });
        Ok(Value::Number(years))
    }
}

/// Evaluates one derived spec against already-coerced parent values, using the
/// default limits and the current time.
pub fn compute(spec: &DerivedSpec, parent_values: &[Value]) -> Value {
    let config = EngineConfig::default();
    FormulaExecutor::new(&config, Utc::now()).run(&Calculation::prepare(spec, &config), parent_values)
}

fn sum(parents: &[Value]) -> f64 {
    parents
        .iter()
        .map(Value::to_number)
        .map(|n| if n.is_nan() { 0.0 } else { n })
        .sum()
}

fn concatenate(parents: &[Value]) -> String {
    parents
        .iter()
        .filter(|v| !v.is_blank())
        .map(Value::to_display_string)
        .collect::<Vec<_>>()
        .join(" ")
}
