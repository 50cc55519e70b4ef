//! Declarative field validation.
pub mod rules;
pub mod validator;

pub use rules::evaluate;
pub use validator::{validate_field, validate_form, FieldErrorReport, FormValidation, Validator};
