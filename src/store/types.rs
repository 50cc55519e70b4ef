//! Schema data model: field definitions, validation rules and derived-field
//! declarations, in the JSON shape the form builder persists.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Stable identifier of a field, unique within a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub String);

impl FieldId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for FieldId {
    fn from(s: &str) -> Self { Self(s.to_string()) }
}

impl From<String> for FieldId {
    fn from(s: String) -> Self { Self(s) }
}

impl Borrow<str> for FieldId {
    fn borrow(&self) -> &str { &self.0 }
}

/// The closed set of input kinds a field can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "textarea")]
    Textarea,
    #[serde(rename = "select", alias = "single-select")]
    Select,
    #[serde(rename = "radio", alias = "single-choice")]
    Radio,
    #[serde(rename = "checkbox", alias = "boolean")]
    Checkbox,
    #[serde(rename = "date")]
    Date,
}

impl FieldType {
    /// Select and radio fields must carry at least one option.
    pub fn needs_options(self) -> bool {
        matches!(self, FieldType::Select | FieldType::Radio)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleKind {
    #[serde(rename = "required")]
    Required,
    #[serde(rename = "notEmpty", alias = "not-empty")]
    NotEmpty,
    #[serde(rename = "minLength", alias = "min-length")]
    MinLength,
    #[serde(rename = "maxLength", alias = "max-length")]
    MaxLength,
    #[serde(rename = "email", alias = "email-format")]
    Email,
    #[serde(rename = "password", alias = "password-strength")]
    Password,
}

impl RuleKind {
    /// Whether the rule needs a numeric parameter. Every other kind forbids one.
    pub fn takes_value(self) -> bool {
        matches!(self, RuleKind::MinLength | RuleKind::MaxLength)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::Required => "required",
            RuleKind::NotEmpty => "notEmpty",
            RuleKind::MinLength => "minLength",
            RuleKind::MaxLength => "maxLength",
            RuleKind::Email => "email",
            RuleKind::Password => "password",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A declarative check on a field value, with the message shown when it fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    /// Length bound for `minLength`/`maxLength`. The builder stores it either as
    /// a number or as a numeric string, so both are accepted. It is always
    /// written back as a number.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de_rule_value")]
    pub value: Option<f64>,
    pub message: String,
}

impl ValidationRule {
    pub fn new(kind: RuleKind, message: impl Into<String>) -> Self {
        Self { kind, value: None, message: message.into() }
    }

    pub fn with_value(kind: RuleKind, value: f64, message: impl Into<String>) -> Self {
        Self { kind, value: Some(value), message: message.into() }
    }
}

fn de_rule_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("rule value '{}' is not a number", s))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub label: String,
    pub value: String,
}

impl FieldOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self { label: label.into(), value: value.into() }
    }
}

/// Author-supplied starting value. Its shape follows the field type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Boolean(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationKind {
    Age,
    Sum,
    Concatenate,
    Custom,
}

impl CalculationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CalculationKind::Age => "age",
            CalculationKind::Sum => "sum",
            CalculationKind::Concatenate => "concatenate",
            CalculationKind::Custom => "custom",
        }
    }
}

/// Declares that a field is computed from other fields.
///
/// The formula is evaluated only for [`CalculationKind::Custom`]; for the
/// predefined kinds it is kept so the builder can show it, but never run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedSpec {
    pub is_derived: bool,
    #[serde(default)]
    pub parent_fields: Vec<FieldId>,
    #[serde(default)]
    pub formula: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation_type: Option<CalculationKind>,
}

impl DerivedSpec {
    pub fn new(kind: CalculationKind, parents: impl IntoIterator<Item = impl Into<FieldId>>) -> Self {
        Self {
            is_derived: true,
            parent_fields: parents.into_iter().map(Into::into).collect(),
            formula: String::new(),
            calculation_type: Some(kind),
        }
    }

    pub fn custom(formula: impl Into<String>, parents: impl IntoIterator<Item = impl Into<FieldId>>) -> Self {
        Self { formula: formula.into(), ..Self::new(CalculationKind::Custom, parents) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub id: FieldId,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<DefaultValue>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<FieldOption>>,
    #[serde(rename = "derivedConfig", default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<DerivedSpec>,
    /// Display position. Dense `0..n` within a schema.
    #[serde(default)]
    pub order: usize,
}

impl FieldDefinition {
    pub fn new(id: impl Into<FieldId>, field_type: FieldType, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            field_type,
            label: label.into(),
            required: false,
            default_value: None,
            validation_rules: Vec::new(),
            options: field_type.needs_options().then(Vec::new),
            derived: None,
            order: 0,
        }
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    pub fn with_option(mut self, option: FieldOption) -> Self {
        self.options.get_or_insert_with(Vec::new).push(option);
        self
    }

    pub fn with_default(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn derived(mut self, spec: DerivedSpec) -> Self {
        self.derived = Some(spec);
        self
    }

    /// The derived declaration, only when it is switched on.
    pub fn derived_spec(&self) -> Option<&DerivedSpec> {
        self.derived.as_ref().filter(|d| d.is_derived)
    }

    pub fn is_derived(&self) -> bool { self.derived_spec().is_some() }
}
