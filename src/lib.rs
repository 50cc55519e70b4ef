//! Form schema evaluation engine.
//!
//! Given a list of [`FieldDefinition`]s and a snapshot of field values, the
//! engine recomputes derived fields in dependency order and checks every
//! entered value against its declarative rules. Schema editing and
//! persistence live in [`store`]; nothing in the evaluation path touches them.
//!
//! ```no_run
//! use formsmith_core::{CompiledForm, FieldDefinition, FieldType, DerivedSpec, CalculationKind, Value, ValueMap};
//!
//! let fields = vec![
//!     FieldDefinition::new("a", FieldType::Number, "A"),
//!     FieldDefinition::new("b", FieldType::Number, "B"),
//!     FieldDefinition::new("total", FieldType::Number, "Total")
//!         .derived(DerivedSpec::new(CalculationKind::Sum, ["a", "b"])),
//! ];
//! let form = CompiledForm::build(&fields).expect("acyclic");
//! let mut values = ValueMap::new();
//! values.insert("a".into(), Value::Number(3.0));
//! values.insert("b".into(), Value::Number(4.0));
//! assert_eq!(form.evaluate(&values).values["total"], Value::Number(7.0));
//! ```

pub mod compute;
pub mod config;
pub mod display;
pub mod form;
pub mod graph;
pub mod store;
pub mod validation;

pub use compute::{compute, resolve, resolve_changed, ComputationError, Diagnostic, Resolution, Value, ValueMap};
pub use config::{ConfigError, EngineConfig};
pub use form::{CompiledForm, Evaluation};
pub use graph::{build_graph, GraphError, TopoOrder};
pub use store::{
    CalculationKind, DefaultValue, DerivedSpec, FieldDefinition, FieldId, FieldOption, FieldType, RuleKind, Schema,
    SchemaError, SchemaRepository, ValidationRule,
};
pub use validation::{evaluate, validate_field, validate_form, FieldErrorReport, FormValidation};
