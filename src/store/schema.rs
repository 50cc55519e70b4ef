//! A named, ordered collection of field definitions and the edits the builder
//! applies to it.
//!
//! Every edit is staged on a copy of the field list, checked as a whole, and
//! committed only when the check passes, so a `Schema` never holds a field
//! list that cannot be evaluated.

use super::types::{FieldDefinition, FieldId, FieldType, ValidationRule};
use crate::compute::{Value, ValueMap};
use crate::graph::{build_graph, GraphError, TopoOrder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Field id '{0}' is used more than once")]
    DuplicateId(FieldId),
    #[error("Field '{0}' has a blank label")]
    BlankLabel(FieldId),
    #[error("Field '{0}' needs at least one option")]
    MissingOptions(FieldId),
    #[error("Rule '{rule}' on field '{field}' needs a numeric value")]
    RuleValueRequired { field: FieldId, rule: String },
    #[error("Rule '{rule}' on field '{field}' does not take a value")]
    RuleValueForbidden { field: FieldId, rule: String },
    #[error("Derived field '{0}' has no parent fields")]
    NoParents(FieldId),
    #[error("Derived field '{0}' has no calculation type")]
    NoCalculation(FieldId),
    #[error("Derived field '{field}' references unknown parent '{parent}'")]
    UnknownParent { field: FieldId, parent: FieldId },
    #[error("No field with id '{0}'")]
    UnknownField(FieldId),
    #[error("Field '{field}' has no validation rule at index {index}")]
    RuleIndexOutOfRange { field: FieldId, index: usize },
    #[error("Cannot move field from position {from} to {to} in a schema of {len} fields")]
    ReorderOutOfRange { from: usize, to: usize, len: usize },
    #[error("Field id cannot change from '{from}' to '{to}'")]
    IdChanged { from: FieldId, to: FieldId },
    #[error("Schema needs a name before it can be saved")]
    BlankName,
    #[error("Schema needs at least one field before it can be saved")]
    NoFields,
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub id: String,
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schema {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self { id: id.into(), name: name.into(), fields: Vec::new(), created_at: now, updated_at: now }
    }

    pub fn field(&self, id: &FieldId) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| &f.id == id)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    /// Appends `field` at the end of the display order.
    pub fn add_field(&mut self, field: FieldDefinition) -> Result<TopoOrder, SchemaError> {
        self.stage(|fields| {
            fields.push(field);
            Ok(())
        })
    }

    /// Applies `edit` to the field with `id`. The edit may not change the id.
    pub fn update_field<F>(&mut self, id: &FieldId, edit: F) -> Result<TopoOrder, SchemaError>
    where
        F: FnOnce(&mut FieldDefinition),
    {
        self.stage(|fields| {
            let field = find_mut(fields, id)?;
            edit(field);
            if &field.id != id {
                return Err(SchemaError::IdChanged { from: id.clone(), to: field.id.clone() });
            }
            Ok(())
        })
    }

    /// Removes a field. Rejected while a derived field still lists it as a parent.
    pub fn delete_field(&mut self, id: &FieldId) -> Result<TopoOrder, SchemaError> {
        self.stage(|fields| {
            let pos = fields.iter().position(|f| &f.id == id).ok_or_else(|| SchemaError::UnknownField(id.clone()))?;
            fields.remove(pos);
            Ok(())
        })
    }

    pub fn reorder_fields(&mut self, from: usize, to: usize) -> Result<TopoOrder, SchemaError> {
        self.stage(|fields| {
            let len = fields.len();
            if from >= len || to >= len {
                return Err(SchemaError::ReorderOutOfRange { from, to, len });
            }
            let moved = fields.remove(from);
            fields.insert(to, moved);
            Ok(())
        })
    }

    pub fn add_validation_rule(&mut self, id: &FieldId, rule: ValidationRule) -> Result<TopoOrder, SchemaError> {
        self.stage(|fields| {
            find_mut(fields, id)?.validation_rules.push(rule);
            Ok(())
        })
    }

    pub fn remove_validation_rule(&mut self, id: &FieldId, index: usize) -> Result<TopoOrder, SchemaError> {
        self.stage(|fields| {
            let rules = &mut find_mut(fields, id)?.validation_rules;
            if index >= rules.len() {
                return Err(SchemaError::RuleIndexOutOfRange { field: id.clone(), index });
            }
            rules.remove(index);
            Ok(())
        })
    }

    /// Structural checks over the whole field list, then the dependency graph.
    pub fn check(&self) -> Result<TopoOrder, SchemaError> {
        check_fields(&self.fields)
    }

    /// [`Schema::check`], plus the conditions for persisting: a name and at
    /// least one field.
    pub fn check_for_save(&self) -> Result<TopoOrder, SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::BlankName);
        }
        if self.fields.is_empty() {
            return Err(SchemaError::NoFields);
        }
        self.check()
    }

    /// The values a freshly opened form starts with: the default when one is
    /// set, `false` for checkboxes, empty otherwise.
    pub fn initial_values(&self) -> ValueMap {
        self.fields
            .iter()
            .map(|f| {
                let value = match (&f.default_value, f.field_type) {
                    (Some(default), _) => Value::from(default),
                    (None, FieldType::Checkbox) => Value::Boolean(false),
                    (None, _) => Value::Empty,
                };
                (f.id.clone(), value)
            })
            .collect()
    }

    fn stage<F>(&mut self, edit: F) -> Result<TopoOrder, SchemaError>
    where
        F: FnOnce(&mut Vec<FieldDefinition>) -> Result<(), SchemaError>,
    {
        let mut staged = self.fields.clone();
        edit(&mut staged)?;
        for (i, field) in staged.iter_mut().enumerate() {
            field.order = i;
        }
        let order = check_fields(&staged)?;
        self.fields = staged;
        self.touch();
        Ok(order)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn find_mut<'f>(fields: &'f mut [FieldDefinition], id: &FieldId) -> Result<&'f mut FieldDefinition, SchemaError> {
    fields.iter_mut().find(|f| &f.id == id).ok_or_else(|| SchemaError::UnknownField(id.clone()))
}

fn check_fields(fields: &[FieldDefinition]) -> Result<TopoOrder, SchemaError> {
    let mut seen = HashSet::with_capacity(fields.len());
    for field in fields {
        if !seen.insert(&field.id) {
            return Err(SchemaError::DuplicateId(field.id.clone()));
        }
    }

    for field in fields {
        if field.label.trim().is_empty() {
            return Err(SchemaError::BlankLabel(field.id.clone()));
        }
        if field.field_type.needs_options() && field.options.as_ref().map_or(true, Vec::is_empty) {
            return Err(SchemaError::MissingOptions(field.id.clone()));
        }
        for rule in &field.validation_rules {
            match (rule.kind.takes_value(), rule.value) {
                (true, None) => {
                    return Err(SchemaError::RuleValueRequired { field: field.id.clone(), rule: rule.kind.to_string() })
                }
                (false, Some(_)) => {
                    return Err(SchemaError::RuleValueForbidden { field: field.id.clone(), rule: rule.kind.to_string() })
                }
                _ => {}
            }
        }
        if let Some(spec) = field.derived_spec() {
            if spec.parent_fields.is_empty() {
                return Err(SchemaError::NoParents(field.id.clone()));
            }
            if spec.calculation_type.is_none() {
                return Err(SchemaError::NoCalculation(field.id.clone()));
            }
            if let Some(parent) = spec.parent_fields.iter().find(|p| !seen.contains(p)) {
                return Err(SchemaError::UnknownParent { field: field.id.clone(), parent: parent.clone() });
            }
        }
    }

    Ok(build_graph(fields)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CalculationKind, DefaultValue, DerivedSpec, FieldOption, RuleKind};

    fn schema() -> Schema {
        let mut s = Schema::new("form_1", "Signup");
        s.add_field(FieldDefinition::new("first", FieldType::Text, "First name")).unwrap();
        s.add_field(FieldDefinition::new("last", FieldType::Text, "Last name")).unwrap();
        s
    }

    fn orders(s: &Schema) -> Vec<(String, usize)> {
        s.fields.iter().map(|f| (f.id.to_string(), f.order)).collect()
    }

    #[test]
    fn test_add_assigns_order_and_rejects_duplicates() {
        let mut s = schema();
        assert_eq!(orders(&s), [("first".to_string(), 0), ("last".to_string(), 1)]);

        let err = s.add_field(FieldDefinition::new("first", FieldType::Number, "Again")).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateId("first".into()));
        assert_eq!(s.fields.len(), 2);
    }

    #[test]
    fn test_reorder_and_delete_keep_order_dense() {
        let mut s = schema();
        s.add_field(FieldDefinition::new("email", FieldType::Text, "Email")).unwrap();

        s.reorder_fields(2, 0).unwrap();
        assert_eq!(orders(&s), [("email".to_string(), 0), ("first".to_string(), 1), ("last".to_string(), 2)]);

        s.delete_field(&"first".into()).unwrap();
        assert_eq!(orders(&s), [("email".to_string(), 0), ("last".to_string(), 1)]);

        assert_eq!(s.reorder_fields(0, 5), Err(SchemaError::ReorderOutOfRange { from: 0, to: 5, len: 2 }));
    }

    #[test]
    fn test_rejected_edit_leaves_schema_untouched() {
        let mut s = schema();
        let before = s.clone();
        let err = s
            .update_field(&"first".into(), |f| {
                f.derived = Some(DerivedSpec::new(CalculationKind::Concatenate, ["first"]));
            })
            .unwrap_err();
        assert_eq!(err, SchemaError::Graph(GraphError::SelfReference { field: "first".into() }));
        assert_eq!(s, before);
    }

    #[test]
    fn test_update_cannot_change_id() {
        let mut s = schema();
        let err = s.update_field(&"first".into(), |f| f.id = "renamed".into()).unwrap_err();
        assert!(matches!(err, SchemaError::IdChanged { .. }));
    }

    #[test]
    fn test_derived_chain_cycle_is_rejected() {
        let mut s = schema();
        s.add_field(
            FieldDefinition::new("a", FieldType::Text, "A")
                .derived(DerivedSpec::new(CalculationKind::Concatenate, ["first"])),
        )
        .unwrap();
        s.add_field(
            FieldDefinition::new("b", FieldType::Text, "B").derived(DerivedSpec::new(CalculationKind::Concatenate, ["a"])),
        )
        .unwrap();

        let err = s
            .update_field(&"a".into(), |f| {
                f.derived = Some(DerivedSpec::new(CalculationKind::Concatenate, ["b"]));
            })
            .unwrap_err();
        assert!(matches!(err, SchemaError::Graph(GraphError::Cycle { .. })));
    }

    #[test]
    fn test_deleting_a_parent_is_rejected() {
        let mut s = schema();
        s.add_field(
            FieldDefinition::new("full", FieldType::Text, "Full")
                .derived(DerivedSpec::new(CalculationKind::Concatenate, ["first", "last"])),
        )
        .unwrap();
        let err = s.delete_field(&"last".into()).unwrap_err();
        assert_eq!(err, SchemaError::UnknownParent { field: "full".into(), parent: "last".into() });
    }

    #[test]
    fn test_structural_checks() {
        let mut s = schema();
        assert_eq!(
            s.add_field(FieldDefinition::new("pick", FieldType::Select, "Pick")),
            Err(SchemaError::MissingOptions("pick".into()))
        );
        assert_eq!(
            s.add_field(FieldDefinition::new("blank", FieldType::Text, "  ")),
            Err(SchemaError::BlankLabel("blank".into()))
        );
        assert!(s
            .add_field(FieldDefinition::new("pick", FieldType::Select, "Pick").with_option(FieldOption::new("A", "a")))
            .is_ok());
        assert!(matches!(
            s.add_validation_rule(&"first".into(), ValidationRule::new(RuleKind::MinLength, "short")),
            Err(SchemaError::RuleValueRequired { .. })
        ));
        assert!(matches!(
            s.add_validation_rule(&"first".into(), ValidationRule::with_value(RuleKind::Email, 1.0, "bad")),
            Err(SchemaError::RuleValueForbidden { .. })
        ));
        let no_kind = DerivedSpec { is_derived: true, parent_fields: vec!["first".into()], ..Default::default() };
        assert_eq!(
            s.add_field(FieldDefinition::new("d", FieldType::Text, "D").derived(no_kind)),
            Err(SchemaError::NoCalculation("d".into()))
        );
    }

    #[test]
    fn test_validation_rule_edits() {
        let mut s = schema();
        let id = FieldId::from("first");
        s.add_validation_rule(&id, ValidationRule::new(RuleKind::Required, "required")).unwrap();
        s.add_validation_rule(&id, ValidationRule::with_value(RuleKind::MaxLength, 20.0, "long")).unwrap();
        s.remove_validation_rule(&id, 0).unwrap();

        let rules = &s.field(&id).unwrap().validation_rules;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].kind, RuleKind::MaxLength);
        assert_eq!(
            s.remove_validation_rule(&id, 3),
            Err(SchemaError::RuleIndexOutOfRange { field: id.clone(), index: 3 })
        );
    }

    #[test]
    fn test_edits_bump_updated_at() {
        let mut s = schema();
        let created = s.created_at;
        s.set_name("Renamed");
        assert!(s.updated_at >= created);
        assert_eq!(s.created_at, created);
    }

    #[test]
    fn test_check_for_save() {
        assert_eq!(Schema::new("x", "  ").check_for_save(), Err(SchemaError::BlankName));
        assert_eq!(Schema::new("x", "Empty").check_for_save(), Err(SchemaError::NoFields));
        assert!(schema().check_for_save().is_ok());
    }

    #[test]
    fn test_initial_values() {
        let mut s = schema();
        s.add_field(FieldDefinition::new("agree", FieldType::Checkbox, "Agree")).unwrap();
        s.add_field(FieldDefinition::new("qty", FieldType::Number, "Qty").with_default(DefaultValue::Number(2.0)))
            .unwrap();

        let values = s.initial_values();
        assert_eq!(values["first"], Value::Empty);
        assert_eq!(values["agree"], Value::Boolean(false));
        assert_eq!(values["qty"], Value::Number(2.0));
    }

    #[test]
    fn test_schema_json_round_trip_keys() {
        let s = schema();
        let json = serde_json::to_value(&s).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        let back: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_full_schema_survives_json() {
        let mut s = Schema::new("form_2", "Everything");
        s.fields = vec![
            FieldDefinition::new("plan", FieldType::Select, "Plan")
                .with_option(FieldOption::new("Basic", "basic"))
                .with_option(FieldOption::new("Pro", "pro"))
                .with_default(DefaultValue::Text("basic".into())),
            FieldDefinition::new("agree", FieldType::Checkbox, "Agree").with_default(DefaultValue::Boolean(true)),
            FieldDefinition::new("seats", FieldType::Number, "Seats").with_default(DefaultValue::Number(2.5)),
            FieldDefinition::new("bio", FieldType::Textarea, "Bio")
                .with_rule(ValidationRule::with_value(RuleKind::MinLength, 3.0, "Too short"))
                .with_rule(ValidationRule::with_value(RuleKind::MaxLength, 140.0, "Too long"))
                .with_rule(ValidationRule::new(RuleKind::NotEmpty, "Say something")),
            FieldDefinition::new("tags", FieldType::Text, "Tags")
                .with_default(DefaultValue::List(vec!["a".into(), "b".into()])),
            FieldDefinition::new("per_seat", FieldType::Number, "Per seat")
                .derived(DerivedSpec::custom("return parentValues[0] / 2;", ["seats"])),
        ];
        for (i, field) in s.fields.iter_mut().enumerate() {
            field.order = i;
        }
        s.fields[0].required = true;

        let back: Schema = serde_json::from_value(serde_json::to_value(&s).unwrap()).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_string_rule_value_saved_back_as_number() {
        let raw = serde_json::json!({ "type": "minLength", "value": "3", "message": "Too short" });
        let rule: ValidationRule = serde_json::from_value(raw).unwrap();
        assert_eq!(rule.value, Some(3.0));
        assert_eq!(serde_json::to_value(&rule).unwrap()["value"], serde_json::json!(3.0));
    }
}
