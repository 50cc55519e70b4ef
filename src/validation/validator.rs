//! Runs every rule of every field and collects failures into a report.
use super::rules;
use crate::compute::{Value, ValueMap};
use crate::store::{FieldDefinition, FieldId};
use serde::Serialize;
use std::collections::BTreeMap;

/// Field id -> failing rule messages, for failing fields only.
pub type FieldErrorReport = BTreeMap<FieldId, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormValidation {
    pub is_valid: bool,
    pub errors: FieldErrorReport,
}

impl FormValidation {
    pub fn is_valid(&self) -> bool { self.is_valid }

    pub fn errors_for(&self, id: &FieldId) -> &[String] {
        self.errors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Applies author-defined rules to entered values.
///
/// Rules are local to one field, so no ordering is needed: every field is
/// visited once, and every failing rule contributes its message.
pub struct Validator<'a> {
    fields: &'a [FieldDefinition],
}

impl<'a> Validator<'a> {
    pub fn new(fields: &'a [FieldDefinition]) -> Self {
        Self { fields }
    }

    pub fn validate_form(&self, values: &ValueMap) -> FormValidation {
        let errors: FieldErrorReport = self
            .fields
            .iter()
            .filter_map(|field| {
                let value = values.get(&field.id).unwrap_or(&Value::Empty);
                let messages = validate_field(field, value);
                (!messages.is_empty()).then(|| (field.id.clone(), messages))
            })
            .collect();

        FormValidation { is_valid: errors.is_empty(), errors }
    }
}

/// Messages of every rule `value` fails, in declaration order. Derived fields
/// are computed, not entered, and never fail.
pub fn validate_field(field: &FieldDefinition, value: &Value) -> Vec<String> {
    if field.is_derived() {
        return Vec::new();
    }
    field
        .validation_rules
        .iter()
        .filter(|rule| !rules::evaluate(rule, value))
        .map(|rule| rule.message.clone())
        .collect()
}

pub fn validate_form(fields: &[FieldDefinition], values: &ValueMap) -> FormValidation {
    Validator::new(fields).validate_form(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CalculationKind, DerivedSpec, FieldType, RuleKind, ValidationRule};

    fn password_field() -> FieldDefinition {
        FieldDefinition::new("pwd", FieldType::Text, "Password")
            .with_rule(ValidationRule::new(RuleKind::Required, "Password is required"))
            .with_rule(ValidationRule::with_value(RuleKind::MinLength, 10.0, "Too short"))
            .with_rule(ValidationRule::new(RuleKind::Password, "Needs 8 characters and a digit"))
    }

    #[test]
    fn test_collects_every_failure_in_order() {
        let out = validate_field(&password_field(), &Value::text("abc"));
        assert_eq!(out, vec!["Too short".to_string(), "Needs 8 characters and a digit".to_string()]);
    }

    #[test]
    fn test_derived_field_never_fails() {
        let field = FieldDefinition::new("age", FieldType::Number, "Age")
            .with_rule(ValidationRule::new(RuleKind::Required, "required"))
            .derived(DerivedSpec::new(CalculationKind::Age, ["birth"]));
        assert!(validate_field(&field, &Value::Empty).is_empty());
        assert!(validate_field(&field, &Value::text("")).is_empty());
    }

    #[test]
    fn test_form_report_only_lists_failing_fields() {
        let fields = vec![
            password_field(),
            FieldDefinition::new("agree", FieldType::Checkbox, "Agree")
                .with_rule(ValidationRule::new(RuleKind::Required, "required")),
            FieldDefinition::new("name", FieldType::Text, "Name")
                .with_rule(ValidationRule::new(RuleKind::Required, "Name is required")),
        ];
        let values: ValueMap = [
            (FieldId::from("pwd"), Value::text("abcdefghi12")),
            (FieldId::from("agree"), Value::Boolean(false)),
        ]
        .into_iter()
        .collect();

        let report = validate_form(&fields, &values);
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors_for(&"name".into()), ["Name is required".to_string()]);
        assert!(report.errors_for(&"pwd".into()).is_empty());
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = validate_form(&[], &ValueMap::new());
        assert_eq!(serde_json::to_value(&report).unwrap(), serde_json::json!({"isValid": true, "errors": {}}));
    }
}
