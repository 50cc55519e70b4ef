//! One-stop evaluation of a schema: derive, then validate.
use crate::compute::{Diagnostic, Resolution, Resolver, ValueMap};
use crate::config::EngineConfig;
use crate::graph::{build_graph, GraphError, TopoOrder};
use crate::store::{FieldDefinition, FieldId};
use crate::validation::{FieldErrorReport, Validator};
use chrono::{DateTime, Utc};
use rayon::prelude::*;

/// Result of evaluating one value snapshot against a compiled schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    /// Input values with every derived field recomputed.
    pub values: ValueMap,
    pub errors: FieldErrorReport,
    pub diagnostics: Vec<Diagnostic>,
    /// Whether any derived value differs from the input snapshot.
    pub changed: bool,
}

impl Evaluation {
    pub fn is_valid(&self) -> bool { self.errors.is_empty() }
}

/// A field list with its dependency graph built and custom formulas parsed.
///
/// Build once per structural change; evaluate on every value change.
#[derive(Debug)]
pub struct CompiledForm<'a> {
    fields: &'a [FieldDefinition],
    order: TopoOrder,
    resolver: Resolver<'a>,
}

impl<'a> CompiledForm<'a> {
    pub fn build(fields: &'a [FieldDefinition]) -> Result<Self, GraphError> {
        Self::with_config(fields, EngineConfig::default())
    }

    pub fn with_config(fields: &'a [FieldDefinition], config: EngineConfig) -> Result<Self, GraphError> {
        let order = build_graph(fields)?;
        let resolver = Resolver::new(&order, fields, config);
        Ok(Self { fields, order, resolver })
    }

    pub fn fields(&self) -> &'a [FieldDefinition] { self.fields }

    pub fn order(&self) -> &TopoOrder { &self.order }

    pub fn evaluate(&self, values: &ValueMap) -> Evaluation {
        self.evaluate_at(values, Utc::now())
    }

    /// Like [`CompiledForm::evaluate`] with a fixed "now" for age and `new Date()`.
    pub fn evaluate_at(&self, values: &ValueMap, now: DateTime<Utc>) -> Evaluation {
        self.finish(self.resolver.resolve_at(values, now))
    }

    /// Recomputes only the derived fields downstream of `changed`, then
    /// validates the whole form.
    pub fn evaluate_changed_at(&self, values: &ValueMap, changed: &[FieldId], now: DateTime<Utc>) -> Evaluation {
        let affected = self.order.downstream_from(changed);
        self.finish(self.resolver.resolve_subset_at(values, now, &affected))
    }

    /// Evaluates independent submissions in parallel against the same "now".
    pub fn evaluate_many(&self, batch: &[ValueMap], now: DateTime<Utc>) -> Vec<Evaluation> {
        batch.par_iter().map(|values| self.evaluate_at(values, now)).collect()
    }

    fn finish(&self, resolution: Resolution) -> Evaluation {
        let validation = Validator::new(self.fields).validate_form(&resolution.values);
        Evaluation {
            values: resolution.values,
            errors: validation.errors,
            diagnostics: resolution.diagnostics,
            changed: resolution.changed,
        }
    }
}
