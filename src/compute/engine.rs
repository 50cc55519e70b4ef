//! A synchronous, single-pass derivation resolver.
use super::formula::{coerce_parent, Calculation, FormulaExecutor};
use super::ledger::{ComputationError, Value, ValueMap};
use crate::config::EngineConfig;
use crate::graph::TopoOrder;
use crate::store::{FieldDefinition, FieldId};
use chrono::{DateTime, Utc};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// A computation failure kept for developer-facing logging.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub field: FieldId,
    pub error: ComputationError,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resolution {
    pub values: ValueMap,
    /// False when no derived value differs from the input snapshot, so the
    /// caller may skip re-rendering.
    pub changed: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// One derived field's slot in the evaluation order.
#[derive(Debug)]
struct Step {
    field: usize,
    /// Index into the field list per declared parent; `None` for unknown ids.
    parents: Vec<Option<usize>>,
    calculation: Calculation,
}

/// Recomputes derived fields in topological order.
///
/// Built once per schema build: parent lookups are resolved and custom
/// formulas parsed up front, so each value change only walks the steps.
#[derive(Debug)]
pub struct Resolver<'a> {
    fields: &'a [FieldDefinition],
    steps: Vec<Step>,
    config: EngineConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(order: &TopoOrder, fields: &'a [FieldDefinition], config: EngineConfig) -> Self {
        let index: HashMap<&str, usize> = fields.iter().enumerate().map(|(i, f)| (f.id.as_str(), i)).collect();

        let steps = order
            .iter()
            .filter_map(|id| {
                let &field = index.get(id.as_str())?;
                let spec = fields[field].derived_spec()?;
                let parents = spec
                    .parent_fields
                    .iter()
                    .map(|p| {
                        let found = index.get(p.as_str()).copied();
                        if found.is_none() {
                            tracing::warn!(field = %id, parent = %p, "derived field references an unknown parent");
                        }
                        found
                    })
                    .collect();
                Some(Step { field, parents, calculation: Calculation::prepare(spec, &config) })
            })
            .collect();

        Self { fields, steps, config }
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    /// Recomputes every derived field.
    pub fn resolve_at(&self, values: &ValueMap, now: DateTime<Utc>) -> Resolution {
        self.run(values, now, None)
    }

    /// Recomputes only the derived fields in `only`; everything else is copied through.
    pub fn resolve_subset_at(&self, values: &ValueMap, now: DateTime<Utc>, only: &HashSet<FieldId>) -> Resolution {
        self.run(values, now, Some(only))
    }

    fn run(&self, values: &ValueMap, now: DateTime<Utc>, only: Option<&HashSet<FieldId>>) -> Resolution {
        let executor = FormulaExecutor::new(&self.config, now);
        let mut working = values.clone();
        let mut changed = false;
        let mut diagnostics = Vec::new();

        for step in &self.steps {
            let field = &self.fields[step.field];
            if only.is_some_and(|only| !only.contains(&field.id)) {
                continue;
            }

            // Read from `working` so earlier derived results feed later ones.
            let parents: SmallVec<[Value; 4]> = step
                .parents
                .iter()
                .map(|p| match p {
                    Some(ix) => {
                        let parent = &self.fields[*ix];
                        let raw = working.get(&parent.id).unwrap_or(&Value::Empty);
                        coerce_parent(parent.field_type, raw)
                    }
                    None => Value::Empty,
                })
                .collect();

            let result = executor.run(&step.calculation, &parents);
            if let Value::Error(error) = &result {
                tracing::warn!(field = %field.id, %error, "derived field computation failed");
                diagnostics.push(Diagnostic { field: field.id.clone(), error: error.clone() });
            } else {
                tracing::trace!(field = %field.id, value = ?result, "derived field computed");
            }

            if !working.get(&field.id).is_some_and(|old| old.same_as(&result)) {
                changed = true;
            }
            working.insert(field.id.clone(), result);
        }

        Resolution { values: working, changed, diagnostics }
    }
}

/// Recomputes every derived field of `fields` along `order`, using the current time.
pub fn resolve(order: &TopoOrder, fields: &[FieldDefinition], values: &ValueMap) -> ValueMap {
    Resolver::new(order, fields, EngineConfig::default()).resolve_at(values, Utc::now()).values
}

/// Like [`resolve`], but only for derived fields downstream of `changed`.
pub fn resolve_changed(
    order: &TopoOrder,
    fields: &[FieldDefinition],
    values: &ValueMap,
    changed: &[FieldId],
) -> ValueMap {
    let affected = order.downstream_from(changed);
    Resolver::new(order, fields, EngineConfig::default())
        .resolve_subset_at(values, Utc::now(), &affected)
        .values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_graph;
    use crate::store::{CalculationKind, DerivedSpec, FieldType};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn number(id: &str) -> FieldDefinition {
        FieldDefinition::new(id, FieldType::Number, id)
    }

    fn values(pairs: &[(&str, Value)]) -> ValueMap {
        pairs.iter().map(|(k, v)| (FieldId::from(*k), v.clone())).collect()
    }

    fn resolve_now(fields: &[FieldDefinition], input: &ValueMap) -> Resolution {
        let order = build_graph(fields).unwrap();
        Resolver::new(&order, fields, EngineConfig::default()).resolve_at(input, now())
    }

    #[test]
    fn test_age_scenario() {
        let fields = vec![
            FieldDefinition::new("birth", FieldType::Date, "Birth date"),
            number("age").derived(DerivedSpec::new(CalculationKind::Age, ["birth"])),
        ];
        let out = resolve_now(&fields, &values(&[("birth", Value::text("2000-01-01"))]));
        assert_eq!(out.values["age"], Value::Number(24.0));
        assert!(out.changed);
    }

    #[test]
    fn test_sum_scenario_with_non_numeric_input() {
        let fields = vec![
            number("a"),
            number("b"),
            number("sum").derived(DerivedSpec::new(CalculationKind::Sum, ["a", "b"])),
        ];
        let out = resolve_now(&fields, &values(&[("a", Value::Number(3.0)), ("b", Value::Number(4.0))]));
        assert_eq!(out.values["sum"], Value::Number(7.0));

        let out = resolve_now(&fields, &values(&[("a", Value::text("3")), ("b", Value::text("four"))]));
        assert_eq!(out.values["sum"], Value::Number(3.0));

        let out = resolve_now(&fields, &values(&[("a", Value::Number(3.0))]));
        assert_eq!(out.values["sum"], Value::Number(3.0));
    }

    #[test]
    fn test_multi_level_derivation_reads_fresh_values() {
        // `total` is listed first but depends on `subtotal`.
        let fields = vec![
            number("total").derived(DerivedSpec::custom("parentValues[0] * 2", ["subtotal"])),
            number("subtotal").derived(DerivedSpec::new(CalculationKind::Sum, ["a", "b"])),
            number("a"),
            number("b"),
        ];
        let out = resolve_now(&fields, &values(&[("a", Value::Number(1.0)), ("b", Value::Number(2.0))]));
        assert_eq!(out.values["subtotal"], Value::Number(3.0));
        assert_eq!(out.values["total"], Value::Number(6.0));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let fields = vec![
            FieldDefinition::new("first", FieldType::Text, "First"),
            FieldDefinition::new("last", FieldType::Text, "Last"),
            FieldDefinition::new("full", FieldType::Text, "Full")
                .derived(DerivedSpec::new(CalculationKind::Concatenate, ["first", "last"])),
        ];
        let input = values(&[("first", Value::text("Jane")), ("last", Value::text("Doe"))]);
        let once = resolve_now(&fields, &input);
        let twice = resolve_now(&fields, &once.values);
        assert_eq!(once.values, twice.values);
        assert_eq!(twice.values["full"], Value::text("Jane Doe"));
        assert!(once.changed);
        assert!(!twice.changed);
    }

    #[test]
    fn test_formula_error_is_isolated() {
        let fields = vec![
            number("a"),
            number("broken").derived(DerivedSpec::custom("parentValues[0] / 0", ["a"])),
            number("fine").derived(DerivedSpec::new(CalculationKind::Sum, ["a"])),
        ];
        let out = resolve_now(&fields, &values(&[("a", Value::Number(5.0))]));
        assert_eq!(out.values["broken"], Value::Error(ComputationError::DivisionByZero));
        assert_eq!(out.values["fine"], Value::Number(5.0));
        assert_eq!(out.diagnostics, vec![Diagnostic { field: "broken".into(), error: ComputationError::DivisionByZero }]);
    }

    #[test]
    fn test_input_snapshot_is_not_mutated() {
        let fields = vec![number("a"), number("s").derived(DerivedSpec::new(CalculationKind::Sum, ["a"]))];
        let input = values(&[("a", Value::Number(2.0))]);
        let before = input.clone();
        let _ = resolve_now(&fields, &input);
        assert_eq!(input, before);
    }

    #[test]
    fn test_unknown_parent_reads_empty() {
        let fields = vec![number("s").derived(DerivedSpec::new(CalculationKind::Sum, ["ghost"]))];
        let out = resolve_now(&fields, &ValueMap::new());
        assert_eq!(out.values["s"], Value::Number(0.0));
    }

    #[test]
    fn test_subset_resolution_skips_unaffected_fields() {
        let fields = vec![
            number("a"),
            number("z"),
            number("from_a").derived(DerivedSpec::new(CalculationKind::Sum, ["a"])),
            number("from_z").derived(DerivedSpec::new(CalculationKind::Sum, ["z"])),
        ];
        let order = build_graph(&fields).unwrap();
        let resolver = Resolver::new(&order, &fields, EngineConfig::default());
        let input = values(&[("a", Value::Number(1.0)), ("z", Value::Number(9.0)), ("from_z", Value::text("stale"))]);

        let out = resolver.resolve_subset_at(&input, now(), &order.downstream_from(&["a".into()]));
        assert_eq!(out.values["from_a"], Value::Number(1.0));
        assert_eq!(out.values["from_z"], Value::text("stale"));
    }
}
